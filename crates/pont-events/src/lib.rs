//! Bridge event model and the single-consumer event bus.
//!
//! Events are a closed union: every handler pattern-matches the variant it
//! understands and declines the rest, so adding a variant forces every
//! match site to be revisited. Events are never persisted; they exist only
//! between a producer (queue dispatcher, upstream poller) and the one
//! consumer loop that drives the handler chain.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Producers block once this many events are in flight, so a stalled
/// handler chain back-pressures the dispatcher and pollers.
const EVENT_BUS_CAPACITY: usize = 16;

/// Reference to a tracker issue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssueRef {
    pub owner: String,
    pub repo: String,
    pub number: u64,
    pub url: String,
    pub title: String,
}

/// Reference to a tracker comment, retaining the body so a chat reply can
/// quote it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommentRef {
    pub comment_id: u64,
    pub issue: IssueRef,
    pub body: String,
}

/// The tracker entity a mirrored chat message stands for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackerRef {
    Issue(IssueRef),
    Comment(CommentRef),
}

impl TrackerRef {
    /// The issue this reference ultimately points at.
    pub fn issue(&self) -> &IssueRef {
        match self {
            Self::Issue(issue) => issue,
            Self::Comment(comment) => &comment.issue,
        }
    }
}

/// A newly opened tracker issue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssueCreated {
    pub issue: IssueRef,
    pub body: String,
    pub author: String,
}

/// A new comment on a tracker issue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommentCreated {
    pub comment_id: u64,
    pub comment_url: String,
    pub body: String,
    pub author: String,
    pub issue: IssueRef,
}

/// A message observed in the chat, possibly replying to an earlier one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub message_id: i64,
    pub chat_id: i64,
    pub sender: String,
    pub text: String,
    pub reply_to_message_id: Option<i64>,
}

/// Everything the bridge reacts to, from either side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeEvent {
    IssueCreated(IssueCreated),
    CommentCreated(CommentCreated),
    ChatMessage(ChatMessage),
}

impl BridgeEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::IssueCreated(_) => "issue_created",
            Self::CommentCreated(_) => "comment_created",
            Self::ChatMessage(_) => "chat_message",
        }
    }
}

/// One link in the handler chain.
///
/// Every registered handler sees every event; a handler that does not
/// understand the variant (or its conditions) returns `Ok(false)` with no
/// side effect. Handlers must be mutually exclusive by construction since
/// the chain never short-circuits.
#[async_trait]
pub trait EventHandler: Send + Sync {
    fn name(&self) -> &'static str;

    /// Returns whether the handler acted on the event.
    async fn handle(&self, event: &BridgeEvent) -> Result<bool>;
}

/// Ordered handler chain invoked for every event.
#[derive(Default)]
pub struct HandlerChain {
    handlers: Vec<Arc<dyn EventHandler>>,
}

impl HandlerChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, handler: Arc<dyn EventHandler>) {
        self.handlers.push(handler);
    }

    /// Runs every handler in registration order. A failing handler is
    /// logged and the chain continues; there is no short-circuit on
    /// "handled". Returns how many handlers reported the event handled.
    pub async fn dispatch(&self, event: &BridgeEvent) -> usize {
        let mut handled = 0usize;
        for handler in &self.handlers {
            match handler.handle(event).await {
                Ok(true) => handled += 1,
                Ok(false) => {}
                Err(error) => {
                    tracing::warn!(
                        handler = handler.name(),
                        kind = event.kind(),
                        error = %error,
                        "event handler failed; continuing chain"
                    );
                }
            }
        }
        if handled == 0 {
            tracing::debug!(kind = event.kind(), "event not handled by any handler");
        }
        handled
    }
}

/// Cloneable producer handle onto the bus.
#[derive(Clone)]
pub struct EventPublisher {
    sender: mpsc::Sender<BridgeEvent>,
}

impl EventPublisher {
    /// Hands an event to the consumer loop, waiting if the bus is full.
    pub async fn publish(&self, event: BridgeEvent) {
        if let Err(error) = self.sender.send(event).await {
            tracing::warn!(error = %error, "event bus consumer is gone; dropping event");
        }
    }
}

/// Single-consumer handoff point between producers and the handler chain.
pub struct EventBus {
    sender: mpsc::Sender<BridgeEvent>,
    receiver: mpsc::Receiver<BridgeEvent>,
    chain: HandlerChain,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::channel(EVENT_BUS_CAPACITY);
        Self {
            sender,
            receiver,
            chain: HandlerChain::new(),
        }
    }

    /// Builds a bus around an already-populated handler chain.
    pub fn with_chain(chain: HandlerChain) -> Self {
        let mut bus = Self::new();
        bus.chain = chain;
        bus
    }

    pub fn publisher(&self) -> EventPublisher {
        EventPublisher {
            sender: self.sender.clone(),
        }
    }

    pub fn register_handler(&mut self, handler: Arc<dyn EventHandler>) {
        self.chain.register(handler);
    }

    /// Consumes events in arrival order until every publisher is dropped.
    pub async fn run(mut self) {
        drop(self.sender);
        while let Some(event) = self.receiver.recv().await {
            self.chain.dispatch(&event).await;
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use anyhow::bail;

    use super::*;

    struct RecordingHandler {
        name: &'static str,
        handles: bool,
        fail: bool,
        invocations: Arc<Mutex<Vec<&'static str>>>,
    }

    #[async_trait]
    impl EventHandler for RecordingHandler {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn handle(&self, _event: &BridgeEvent) -> Result<bool> {
            self.invocations
                .lock()
                .expect("invocation log")
                .push(self.name);
            if self.fail {
                bail!("{} exploded", self.name);
            }
            Ok(self.handles)
        }
    }

    fn chat_message() -> BridgeEvent {
        BridgeEvent::ChatMessage(ChatMessage {
            message_id: 1,
            chat_id: -100,
            sender: "alice".to_string(),
            text: "hello".to_string(),
            reply_to_message_id: None,
        })
    }

    #[tokio::test]
    async fn every_handler_runs_in_registration_order_without_short_circuit() {
        let invocations = Arc::new(Mutex::new(Vec::new()));
        let mut chain = HandlerChain::new();
        for name in ["first", "second", "third"] {
            chain.register(Arc::new(RecordingHandler {
                name,
                handles: true,
                fail: false,
                invocations: Arc::clone(&invocations),
            }));
        }

        let handled = chain.dispatch(&chat_message()).await;
        assert_eq!(handled, 3);
        assert_eq!(
            *invocations.lock().expect("invocation log"),
            vec!["first", "second", "third"]
        );
    }

    #[tokio::test]
    async fn failing_handler_does_not_block_the_rest_of_the_chain() {
        let invocations = Arc::new(Mutex::new(Vec::new()));
        let mut chain = HandlerChain::new();
        chain.register(Arc::new(RecordingHandler {
            name: "faulty",
            handles: true,
            fail: true,
            invocations: Arc::clone(&invocations),
        }));
        chain.register(Arc::new(RecordingHandler {
            name: "steady",
            handles: true,
            fail: false,
            invocations: Arc::clone(&invocations),
        }));

        let handled = chain.dispatch(&chat_message()).await;
        assert_eq!(handled, 1);
        assert_eq!(
            *invocations.lock().expect("invocation log"),
            vec!["faulty", "steady"]
        );
    }

    #[tokio::test]
    async fn bus_consumer_drains_published_events() {
        let invocations = Arc::new(Mutex::new(Vec::new()));
        let mut bus = EventBus::new();
        bus.register_handler(Arc::new(RecordingHandler {
            name: "only",
            handles: true,
            fail: false,
            invocations: Arc::clone(&invocations),
        }));
        let publisher = bus.publisher();
        let consumer = tokio::spawn(bus.run());

        publisher.publish(chat_message()).await;
        publisher.publish(chat_message()).await;
        drop(publisher);

        consumer.await.expect("consumer loop");
        assert_eq!(invocations.lock().expect("invocation log").len(), 2);
    }
}
