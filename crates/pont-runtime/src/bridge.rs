//! Assembly of the running bridge: one ingress task per HTTP request, one
//! dispatcher task, one poller task, one event-bus consumer task.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use pont_events::EventBus;
use pont_github::GithubClient;
use pont_store::{IntakeStore, SqliteIntakeStore};
use pont_telegram::TelegramClient;
use tokio::net::TcpListener;

use crate::correlation::CorrelationDirectory;
use crate::dispatcher::{GithubWebhookRoute, QueueDispatcher};
use crate::handlers::{
    CommentMirrorHandler, IssueMirrorHandler, NoBumpingHandler, ReplyToCommentHandler,
};
use crate::poller::TelegramPoller;
use crate::receiver::{build_webhook_router, WebhookReceiverState};

#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub db_path: PathBuf,
    pub bind: String,
    pub webhook_path: String,
    pub telegram_api_base: String,
    pub telegram_bot_token: String,
    pub telegram_chat_id: i64,
    pub github_api_base: String,
    pub github_token: String,
    pub visibility_timeout: Duration,
    pub dispatcher_idle_poll: Duration,
    pub poll_timeout_secs: u64,
}

/// Starts every bridge task and serves webhooks until shutdown.
///
/// Credential problems surface here, before any task is spawned: an invalid
/// Telegram token fails `getMe` and the process never starts.
pub async fn run_bridge(config: BridgeConfig) -> Result<()> {
    let bind_addr: SocketAddr = config
        .bind
        .parse()
        .with_context(|| format!("invalid --bind '{}': expected host:port", config.bind))?;

    let telegram = Arc::new(TelegramClient::new(
        &config.telegram_api_base,
        &config.telegram_bot_token,
    )?);
    let github = Arc::new(GithubClient::new(
        &config.github_api_base,
        &config.github_token,
    )?);
    let profile = telegram
        .get_me()
        .await
        .context("telegram credential check failed")?;

    let store: Arc<dyn IntakeStore> = Arc::new(SqliteIntakeStore::with_visibility_timeout(
        &config.db_path,
        config.visibility_timeout,
    )?);
    let directory = Arc::new(CorrelationDirectory::new());

    let mut bus = EventBus::new();
    bus.register_handler(Arc::new(NoBumpingHandler::new(
        Arc::clone(&telegram),
        profile.username.clone(),
    )));
    bus.register_handler(Arc::new(IssueMirrorHandler::new(
        Arc::clone(&telegram),
        Arc::clone(&directory),
        config.telegram_chat_id,
    )));
    bus.register_handler(Arc::new(CommentMirrorHandler::new(
        Arc::clone(&telegram),
        Arc::clone(&directory),
        config.telegram_chat_id,
    )));
    bus.register_handler(Arc::new(ReplyToCommentHandler::new(
        github,
        Arc::clone(&directory),
    )));
    let publisher = bus.publisher();

    let dispatcher = QueueDispatcher::new(
        Arc::clone(&store),
        vec![Arc::new(GithubWebhookRoute::new(
            config.webhook_path.clone(),
            publisher.clone(),
        ))],
    )
    .with_idle_poll_interval(config.dispatcher_idle_poll);
    let poller = TelegramPoller::new(Arc::clone(&telegram), publisher)
        .with_poll_timeout_secs(config.poll_timeout_secs);

    let app = build_webhook_router(
        Arc::new(WebhookReceiverState::new(store)),
        std::slice::from_ref(&config.webhook_path),
    );
    let listener = TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("failed to bind webhook listener on {bind_addr}"))?;
    let local_addr = listener
        .local_addr()
        .context("failed to resolve webhook listen address")?;

    println!(
        "pont bridge listening: addr={local_addr} webhook_path={} bot=@{} chat_id={} db={}",
        config.webhook_path,
        profile.username,
        config.telegram_chat_id,
        config.db_path.display()
    );

    tokio::spawn(bus.run());
    tokio::spawn(dispatcher.run());
    tokio::spawn(poller.run());

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .context("webhook server exited unexpectedly")?;
    Ok(())
}
