mod bootstrap_helpers;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Result};
use clap::Parser;
use pont_runtime::{run_bridge, BridgeConfig};

fn parse_positive_u64(value: &str) -> Result<u64, String> {
    let parsed = value
        .parse::<u64>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

#[derive(Debug, Parser)]
#[command(
    name = "pont",
    about = "Bridge between GitHub issues and a Telegram group chat",
    version
)]
struct Cli {
    #[arg(
        long,
        env = "PONT_DB_PATH",
        default_value = "pont.sqlite",
        help = "SQLite file backing the webhook intake queue."
    )]
    db_path: PathBuf,

    #[arg(
        long,
        env = "PONT_BIND",
        default_value = "127.0.0.1:8080",
        help = "host:port the webhook listener binds to."
    )]
    bind: String,

    #[arg(
        long,
        env = "PONT_WEBHOOK_PATH",
        default_value = "/github",
        help = "Path the tracker posts webhook deliveries to."
    )]
    webhook_path: String,

    #[arg(
        long,
        env = "PONT_TELEGRAM_BOT_TOKEN",
        hide_env_values = true,
        help = "Telegram bot token. Validated against getMe at startup."
    )]
    telegram_bot_token: String,

    #[arg(
        long,
        env = "PONT_TELEGRAM_CHAT_ID",
        allow_hyphen_values = true,
        help = "Chat the bridge mirrors into. Group ids are negative."
    )]
    telegram_chat_id: i64,

    #[arg(
        long,
        env = "PONT_TELEGRAM_API_BASE",
        default_value = "https://api.telegram.org",
        help = "Telegram Bot API base URL."
    )]
    telegram_api_base: String,

    #[arg(
        long,
        env = "PONT_GITHUB_TOKEN",
        hide_env_values = true,
        help = "GitHub token used to create issue comments."
    )]
    github_token: String,

    #[arg(
        long,
        env = "PONT_GITHUB_API_BASE",
        default_value = "https://api.github.com",
        help = "GitHub REST API base URL."
    )]
    github_api_base: String,

    #[arg(
        long,
        env = "PONT_VISIBILITY_TIMEOUT_SECS",
        default_value = "30",
        value_parser = parse_positive_u64,
        help = "Seconds a claimed envelope stays hidden from other claimants."
    )]
    visibility_timeout_secs: u64,

    #[arg(
        long,
        env = "PONT_DISPATCHER_IDLE_POLL_SECS",
        default_value = "5",
        value_parser = parse_positive_u64,
        help = "Dispatcher fallback poll interval when no webhook notification arrives."
    )]
    dispatcher_idle_poll_secs: u64,

    #[arg(
        long,
        env = "PONT_POLL_TIMEOUT_SECS",
        default_value = "60",
        value_parser = parse_positive_u64,
        help = "Server-side timeout for Telegram long-poll requests."
    )]
    poll_timeout_secs: u64,
}

impl Cli {
    fn into_bridge_config(self) -> Result<BridgeConfig> {
        if !self.webhook_path.starts_with('/') {
            bail!(
                "invalid --webhook-path '{}': must start with '/'",
                self.webhook_path
            );
        }
        Ok(BridgeConfig {
            db_path: self.db_path,
            bind: self.bind,
            webhook_path: self.webhook_path,
            telegram_api_base: self.telegram_api_base,
            telegram_bot_token: self.telegram_bot_token,
            telegram_chat_id: self.telegram_chat_id,
            github_api_base: self.github_api_base,
            github_token: self.github_token,
            visibility_timeout: Duration::from_secs(self.visibility_timeout_secs),
            dispatcher_idle_poll: Duration::from_secs(self.dispatcher_idle_poll_secs),
            poll_timeout_secs: self.poll_timeout_secs,
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    bootstrap_helpers::init_tracing();
    let cli = Cli::parse();
    let config = cli.into_bridge_config()?;
    run_bridge(config).await
}
