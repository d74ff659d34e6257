//! Intake queue abstractions and the versioned header blob codec.
//!
//! Inbound webhook deliveries are persisted as envelopes and handed to the
//! dispatcher through a visibility-timeout claim discipline, so a claimant
//! that dies before deleting its envelope loses nothing: the row reappears
//! once the window elapses.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

mod sqlite;

pub use sqlite::SqliteIntakeStore;

/// Result type for intake store operations.
pub type StoreResult<T> = Result<T, IntakeStoreError>;

/// Errors returned by store implementations.
#[derive(Debug, Error)]
pub enum IntakeStoreError {
    #[error("unsupported header blob schema version {0}")]
    UnsupportedHeaderSchemaVersion(u32),
    #[error("invalid persisted value for '{field}': {value}")]
    InvalidPersistedValue { field: &'static str, value: String },
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Chrono(#[from] chrono::ParseError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Current schema version for persisted request headers.
pub const HEADER_BLOB_SCHEMA_VERSION: u32 = 1;

/// Request headers persisted alongside an envelope as a versioned opaque
/// blob. The store never inspects the contents; decoding happens at the
/// point of use in the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderBlob {
    pub schema_version: u32,
    pub headers: BTreeMap<String, String>,
}

impl HeaderBlob {
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut headers = BTreeMap::new();
        for (name, value) in pairs {
            let name = name.into().to_ascii_lowercase();
            let value = value.into();
            headers
                .entry(name)
                .and_modify(|existing: &mut String| {
                    existing.push_str(", ");
                    existing.push_str(&value);
                })
                .or_insert(value);
        }
        Self {
            schema_version: HEADER_BLOB_SCHEMA_VERSION,
            headers,
        }
    }

    pub fn encode(&self) -> StoreResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decodes a persisted blob, rejecting schema versions this build does
    /// not understand.
    pub fn decode(raw: &str) -> StoreResult<Self> {
        let blob: Self = serde_json::from_str(raw)?;
        if blob.schema_version != HEADER_BLOB_SCHEMA_VERSION {
            return Err(IntakeStoreError::UnsupportedHeaderSchemaVersion(
                blob.schema_version,
            ));
        }
        Ok(blob)
    }

    /// Case-insensitive single-header lookup. Stored names are lowercased
    /// at capture time; this also tolerates blobs written by other tools.
    pub fn get(&self, name: &str) -> Option<&str> {
        if let Some(value) = self.headers.get(&name.to_ascii_lowercase()) {
            return Some(value.as_str());
        }
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// One persisted inbound webhook delivery awaiting dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub id: i64,
    pub path: String,
    /// Encoded [`HeaderBlob`]; opaque until the dispatcher decodes it.
    pub headers: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
    pub visible_at: DateTime<Utc>,
}

/// Durable, lockable queue of pending webhook deliveries.
///
/// At most one claimant holds an envelope at a time; a claimed envelope that
/// is never deleted becomes claimable again once its visibility window
/// elapses. Delivery order is unspecified.
#[async_trait]
pub trait IntakeStore: Send + Sync {
    /// Persists a delivery with `visible_at = now` and wakes any waiting
    /// dispatcher.
    async fn enqueue(&self, path: &str, headers: &str, body: &str) -> StoreResult<i64>;

    /// Claims one visible envelope by advancing its `visible_at` past the
    /// visibility window. Returns `None` when nothing is visible or another
    /// claimant won the race for the selected row.
    async fn claim_next(&self) -> StoreResult<Option<Envelope>>;

    /// Removes an envelope permanently. Deleting an unknown id is a no-op.
    async fn delete(&self, id: i64) -> StoreResult<()>;

    /// Blocks until new work is enqueued or `timeout` elapses, whichever
    /// comes first. Purely a latency optimization for the dispatcher.
    async fn wait_for_work(&self, timeout: Duration);
}
