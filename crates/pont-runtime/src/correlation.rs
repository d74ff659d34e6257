//! Bidirectional indices linking chat messages to tracker entities.
//!
//! Both maps live behind one lock and are reachable only through the atomic
//! operations below; the raw maps are never exposed. The lock is held for
//! the duration of one operation and never across an outbound call.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use pont_events::TrackerRef;

#[derive(Debug, Default)]
struct Indices {
    /// Chat message id → the tracker entity it mirrors.
    outgoing: HashMap<i64, TrackerRef>,
    /// Tracker comment id → the chat message whose reply produced it.
    suppressed: HashMap<u64, i64>,
}

/// In-memory correlation state shared by all handlers.
///
/// Entries are never evicted; threads are long-running but finite, and the
/// directory is rebuilt empty on restart.
#[derive(Debug, Default)]
pub struct CorrelationDirectory {
    inner: Mutex<Indices>,
}

impl CorrelationDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Indices> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Records that `chat_message_id` was posted by the bridge to mirror
    /// `target`. Idempotent under redelivery: re-recording overwrites with
    /// the same value.
    pub fn record_outgoing_mirror(&self, chat_message_id: i64, target: TrackerRef) {
        self.lock().outgoing.insert(chat_message_id, target);
    }

    /// Records that `tracker_comment_id` was created by the bridge on
    /// behalf of the chat reply `chat_message_id`.
    pub fn record_suppressed_comment(&self, tracker_comment_id: u64, chat_message_id: i64) {
        self.lock()
            .suppressed
            .insert(tracker_comment_id, chat_message_id);
    }

    /// Whether a tracker comment originated from this bridge and must not
    /// be mirrored back to chat.
    pub fn is_suppressed(&self, tracker_comment_id: u64) -> bool {
        self.lock().suppressed.contains_key(&tracker_comment_id)
    }

    /// Resolves the tracker entity behind a replied-to chat message, one
    /// hop only.
    pub fn resolve_reply_target(&self, replied_to_chat_message_id: i64) -> Option<TrackerRef> {
        self.lock()
            .outgoing
            .get(&replied_to_chat_message_id)
            .cloned()
    }
}
