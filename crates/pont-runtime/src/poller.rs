//! Long-poll ingestion of chat updates.
//!
//! The polling transport is already reliable and ordered, so updates bypass
//! the intake store and go straight onto the event bus.

use std::sync::Arc;
use std::time::Duration;

use pont_events::{BridgeEvent, ChatMessage, EventPublisher};
use pont_telegram::{TelegramClient, Update};

/// Server-side long-poll window.
pub const DEFAULT_POLL_TIMEOUT_SECS: u64 = 60;
/// Pause before resubscribing after a transport error.
pub const DEFAULT_ERROR_BACKOFF: Duration = Duration::from_secs(5);

/// One sequential long-poll task against the Telegram Bot API.
pub struct TelegramPoller {
    client: Arc<TelegramClient>,
    publisher: EventPublisher,
    poll_timeout_secs: u64,
    error_backoff: Duration,
}

impl TelegramPoller {
    pub fn new(client: Arc<TelegramClient>, publisher: EventPublisher) -> Self {
        Self {
            client,
            publisher,
            poll_timeout_secs: DEFAULT_POLL_TIMEOUT_SECS,
            error_backoff: DEFAULT_ERROR_BACKOFF,
        }
    }

    pub fn with_poll_timeout_secs(mut self, timeout_secs: u64) -> Self {
        self.poll_timeout_secs = timeout_secs;
        self
    }

    /// Polls forever, advancing the offset past every update it has seen so
    /// the server stops redelivering them.
    pub async fn run(self) {
        let mut offset = 0i64;
        loop {
            match self.client.get_updates(offset, self.poll_timeout_secs).await {
                Ok(updates) => {
                    for update in updates {
                        offset = offset.max(update.update_id.saturating_add(1));
                        if let Some(event) = chat_message_event(update) {
                            self.publisher.publish(event).await;
                        }
                    }
                }
                Err(error) => {
                    tracing::warn!(error = %error, "chat long poll failed; backing off");
                    tokio::time::sleep(self.error_backoff).await;
                }
            }
        }
    }
}

/// Converts one update into a chat-message event. Updates without a message
/// (edits, channel posts, service events) are skipped.
fn chat_message_event(update: Update) -> Option<BridgeEvent> {
    let message = update.message?;
    let text = message.text.clone().unwrap_or_default();
    let sender = message
        .from
        .as_ref()
        .map(|user| user.display_name().to_string())
        .unwrap_or_else(|| "unknown".to_string());
    Some(BridgeEvent::ChatMessage(ChatMessage {
        message_id: message.message_id,
        chat_id: message.chat.id,
        sender,
        text,
        reply_to_message_id: message.reply_to_message.as_ref().map(|m| m.message_id),
    }))
}

#[cfg(test)]
mod tests {
    use pont_telegram::{Chat, Message, User};

    use super::*;

    fn update_with_message(message: Message) -> Update {
        Update {
            update_id: 9,
            message: Some(message),
        }
    }

    #[test]
    fn unit_reply_metadata_and_sender_survive_conversion() {
        let update = update_with_message(Message {
            message_id: 200,
            chat: Chat { id: -277 },
            from: Some(User {
                username: Some("alice".to_string()),
                first_name: None,
            }),
            text: Some("hello".to_string()),
            reply_to_message: Some(Box::new(Message {
                message_id: 101,
                chat: Chat { id: -277 },
                from: None,
                text: None,
                reply_to_message: None,
            })),
        });

        let Some(BridgeEvent::ChatMessage(message)) = chat_message_event(update) else {
            panic!("expected chat message event");
        };
        assert_eq!(message.message_id, 200);
        assert_eq!(message.chat_id, -277);
        assert_eq!(message.sender, "alice");
        assert_eq!(message.text, "hello");
        assert_eq!(message.reply_to_message_id, Some(101));
    }

    #[test]
    fn unit_updates_without_a_message_are_skipped() {
        let update = Update {
            update_id: 9,
            message: None,
        };
        assert!(chat_message_event(update).is_none());
    }
}
