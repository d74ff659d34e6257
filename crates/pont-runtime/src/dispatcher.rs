//! Single sequential consumer of the intake queue.
//!
//! The dispatcher is the only writer of claims and deletes. An envelope is
//! deleted once every matching route has returned, whether or not any of
//! them succeeded: queue-level delivery means "attempted at least once",
//! not "applied successfully". The one exception is undecodable persisted
//! headers, which leave the envelope in place for identical retries after
//! each visibility window.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use pont_events::EventPublisher;
use pont_github::webhook::{decode_webhook_events, GITHUB_EVENT_HEADER};
use pont_store::{Envelope, HeaderBlob, IntakeStore};

/// How long the dispatcher sleeps between claim sweeps when no receiver
/// notification arrives.
pub const DEFAULT_IDLE_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// One decoder bound to a webhook path. Routes turn a persisted delivery
/// into bus events; they perform no outbound calls themselves.
#[async_trait]
pub trait WebhookRoute: Send + Sync {
    fn path(&self) -> &str;

    async fn deliver(&self, headers: &HeaderBlob, body: &str) -> Result<()>;
}

/// Decodes GitHub deliveries and publishes the resulting events.
pub struct GithubWebhookRoute {
    path: String,
    publisher: EventPublisher,
}

impl GithubWebhookRoute {
    pub fn new(path: impl Into<String>, publisher: EventPublisher) -> Self {
        Self {
            path: path.into(),
            publisher,
        }
    }
}

#[async_trait]
impl WebhookRoute for GithubWebhookRoute {
    fn path(&self) -> &str {
        &self.path
    }

    async fn deliver(&self, headers: &HeaderBlob, body: &str) -> Result<()> {
        let event_name = headers.get(GITHUB_EVENT_HEADER).unwrap_or_default();
        for event in decode_webhook_events(event_name, body)? {
            self.publisher.publish(event).await;
        }
        Ok(())
    }
}

/// The claim/route/retire loop over the intake store.
pub struct QueueDispatcher {
    store: Arc<dyn IntakeStore>,
    routes: Vec<Arc<dyn WebhookRoute>>,
    idle_poll_interval: Duration,
}

impl QueueDispatcher {
    pub fn new(store: Arc<dyn IntakeStore>, routes: Vec<Arc<dyn WebhookRoute>>) -> Self {
        Self {
            store,
            routes,
            idle_poll_interval: DEFAULT_IDLE_POLL_INTERVAL,
        }
    }

    pub fn with_idle_poll_interval(mut self, interval: Duration) -> Self {
        self.idle_poll_interval = interval;
        self
    }

    /// Runs forever: wait for a receiver notification or the poll timer,
    /// then drain whatever is visible.
    pub async fn run(self) {
        loop {
            self.drain_available().await;
            self.store.wait_for_work(self.idle_poll_interval).await;
        }
    }

    /// Claims and dispatches envelopes until the store has nothing visible.
    /// Returns the number of envelopes retired.
    pub async fn drain_available(&self) -> usize {
        let mut retired = 0usize;
        loop {
            let envelope = match self.store.claim_next().await {
                Ok(Some(envelope)) => envelope,
                // A lost claim race also lands here; the next tick retries.
                Ok(None) => return retired,
                Err(error) => {
                    tracing::warn!(error = %error, "claim failed; will retry on next tick");
                    return retired;
                }
            };

            if self.dispatch_envelope(&envelope).await {
                match self.store.delete(envelope.id).await {
                    Ok(()) => retired += 1,
                    Err(error) => {
                        tracing::warn!(
                            envelope_id = envelope.id,
                            error = %error,
                            "failed to delete dispatched envelope; it will be redelivered"
                        );
                    }
                }
            }
        }
    }

    /// Routes one envelope. Returns whether it should be deleted.
    async fn dispatch_envelope(&self, envelope: &Envelope) -> bool {
        let headers = match HeaderBlob::decode(&envelope.headers) {
            Ok(headers) => headers,
            Err(error) => {
                // Left in place: this retries identically after every
                // visibility window and fails identically.
                tracing::error!(
                    envelope_id = envelope.id,
                    error = %error,
                    "undecodable persisted headers; envelope left unresolved"
                );
                return false;
            }
        };

        for route in &self.routes {
            if route.path() != envelope.path {
                continue;
            }
            if let Err(error) = route.deliver(&headers, &envelope.body).await {
                tracing::warn!(
                    envelope_id = envelope.id,
                    path = envelope.path,
                    error = %error,
                    "webhook route failed; envelope still counts as attempted"
                );
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use anyhow::bail;
    use pont_store::SqliteIntakeStore;
    use tempfile::tempdir;

    use super::*;

    struct RecordingRoute {
        path: String,
        fail: bool,
        deliveries: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl WebhookRoute for RecordingRoute {
        fn path(&self) -> &str {
            &self.path
        }

        async fn deliver(&self, _headers: &HeaderBlob, body: &str) -> Result<()> {
            self.deliveries
                .lock()
                .expect("delivery log")
                .push(body.to_string());
            if self.fail {
                bail!("route failed");
            }
            Ok(())
        }
    }

    fn store_with(path: &std::path::Path) -> Arc<SqliteIntakeStore> {
        Arc::new(SqliteIntakeStore::new(path.join("intake.sqlite")).expect("open store"))
    }

    fn encoded_headers() -> String {
        HeaderBlob::from_pairs([("x-github-event", "issues")])
            .encode()
            .expect("encode headers")
    }

    #[tokio::test]
    async fn drain_routes_by_path_and_retires_envelopes() {
        let temp = tempdir().expect("tempdir");
        let store = store_with(temp.path());
        let deliveries = Arc::new(Mutex::new(Vec::new()));

        store
            .enqueue("/github", &encoded_headers(), "matching")
            .await
            .expect("enqueue");
        store
            .enqueue("/other", &encoded_headers(), "not matching")
            .await
            .expect("enqueue");

        let dispatcher = QueueDispatcher::new(
            store.clone() as Arc<dyn IntakeStore>,
            vec![Arc::new(RecordingRoute {
                path: "/github".to_string(),
                fail: false,
                deliveries: Arc::clone(&deliveries),
            })],
        );
        let retired = dispatcher.drain_available().await;

        // Both envelopes retire; only the matching path reached the route.
        assert_eq!(retired, 2);
        assert_eq!(*deliveries.lock().expect("delivery log"), vec!["matching"]);
        assert!(store.claim_next().await.expect("claim").is_none());
    }

    #[tokio::test]
    async fn failing_route_still_retires_the_envelope() {
        let temp = tempdir().expect("tempdir");
        let store = store_with(temp.path());
        let deliveries = Arc::new(Mutex::new(Vec::new()));
        store
            .enqueue("/github", &encoded_headers(), "payload")
            .await
            .expect("enqueue");

        let dispatcher = QueueDispatcher::new(
            store.clone() as Arc<dyn IntakeStore>,
            vec![Arc::new(RecordingRoute {
                path: "/github".to_string(),
                fail: true,
                deliveries: Arc::clone(&deliveries),
            })],
        );
        let retired = dispatcher.drain_available().await;

        assert_eq!(retired, 1);
        assert_eq!(deliveries.lock().expect("delivery log").len(), 1);
        assert!(store.claim_next().await.expect("claim").is_none());
    }

    #[tokio::test]
    async fn undecodable_headers_leave_the_envelope_unresolved() {
        let temp = tempdir().expect("tempdir");
        let store = Arc::new(
            SqliteIntakeStore::with_visibility_timeout(
                temp.path().join("intake.sqlite"),
                Duration::from_millis(40),
            )
            .expect("open store"),
        );
        let deliveries = Arc::new(Mutex::new(Vec::new()));
        store
            .enqueue("/github", "not a header blob", "payload")
            .await
            .expect("enqueue");

        let dispatcher = QueueDispatcher::new(
            store.clone() as Arc<dyn IntakeStore>,
            vec![Arc::new(RecordingRoute {
                path: "/github".to_string(),
                fail: false,
                deliveries: Arc::clone(&deliveries),
            })],
        );

        assert_eq!(dispatcher.drain_available().await, 0);
        assert!(deliveries.lock().expect("delivery log").is_empty());

        // The poisoned envelope reappears after the visibility window and
        // fails identically.
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(dispatcher.drain_available().await, 0);
        assert!(deliveries.lock().expect("delivery log").is_empty());
    }

    #[tokio::test]
    async fn github_route_publishes_decoded_events() {
        let mut bus = pont_events::EventBus::new();
        struct Capture(Arc<Mutex<Vec<&'static str>>>);

        #[async_trait]
        impl pont_events::EventHandler for Capture {
            fn name(&self) -> &'static str {
                "capture"
            }

            async fn handle(&self, event: &pont_events::BridgeEvent) -> Result<bool> {
                self.0.lock().expect("kinds").push(event.kind());
                Ok(true)
            }
        }

        let kinds = Arc::new(Mutex::new(Vec::new()));
        bus.register_handler(Arc::new(Capture(Arc::clone(&kinds))));
        let route = GithubWebhookRoute::new("/github", bus.publisher());
        let consumer = tokio::spawn(bus.run());

        let headers = HeaderBlob::from_pairs([("x-github-event", "issues")]);
        let body = r#"{
            "action": "opened",
            "issue": {
                "number": 7,
                "html_url": "https://github.com/acme/widgets/issues/7",
                "title": "Crash on start",
                "body": "It crashes.",
                "user": { "login": "alice" }
            },
            "repository": { "name": "widgets", "owner": { "login": "acme" } }
        }"#;
        route.deliver(&headers, body).await.expect("deliver");
        drop(route);

        consumer.await.expect("consumer loop");
        assert_eq!(*kinds.lock().expect("kinds"), vec!["issue_created"]);
    }
}
