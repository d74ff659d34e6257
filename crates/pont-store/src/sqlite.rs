//! SQLite-backed `IntakeStore` with visibility-timeout claims.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, TimeDelta, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tokio::sync::Notify;

use crate::{Envelope, IntakeStore, StoreResult};

/// How long a claimed envelope stays hidden from other claimants.
pub const DEFAULT_VISIBILITY_TIMEOUT: Duration = Duration::from_secs(30);

/// Ordered schema migrations. Each entry is applied at most once, gated by
/// comparing its 1-based ordinal against `PRAGMA user_version`.
const MIGRATIONS: &[&str] = &[
    // 1
    r#"
    CREATE TABLE webhook_queue(
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        path TEXT NOT NULL,
        headers TEXT NOT NULL,
        body TEXT NOT NULL,
        visible_at TEXT NOT NULL
    );
    "#,
];

/// Persistent queue of inbound webhook deliveries.
#[derive(Debug)]
pub struct SqliteIntakeStore {
    db_path: PathBuf,
    visibility_timeout: Duration,
    notify: Notify,
}

impl SqliteIntakeStore {
    /// Opens (creating if needed) the store at `path` with the default
    /// visibility window.
    pub fn new(path: impl AsRef<Path>) -> StoreResult<Self> {
        Self::with_visibility_timeout(path, DEFAULT_VISIBILITY_TIMEOUT)
    }

    pub fn with_visibility_timeout(
        path: impl AsRef<Path>,
        visibility_timeout: Duration,
    ) -> StoreResult<Self> {
        let db_path = path.as_ref().to_path_buf();
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let store = Self {
            db_path,
            visibility_timeout,
            notify: Notify::new(),
        };
        let connection = store.open_connection()?;
        apply_migrations(&connection)?;
        Ok(store)
    }

    fn open_connection(&self) -> StoreResult<Connection> {
        let connection = Connection::open(&self.db_path)?;
        connection.busy_timeout(Duration::from_secs(5))?;
        connection.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            "#,
        )?;
        Ok(connection)
    }
}

#[async_trait]
impl IntakeStore for SqliteIntakeStore {
    async fn enqueue(&self, path: &str, headers: &str, body: &str) -> StoreResult<i64> {
        let connection = self.open_connection()?;
        let now = timestamp_to_db(Utc::now());
        connection.execute(
            r#"
            INSERT INTO webhook_queue (created_at, updated_at, path, headers, body, visible_at)
            VALUES (?1, ?1, ?2, ?3, ?4, ?1)
            "#,
            params![now, path, headers, body],
        )?;
        let id = connection.last_insert_rowid();

        self.notify.notify_waiters();
        Ok(id)
    }

    async fn claim_next(&self) -> StoreResult<Option<Envelope>> {
        let connection = self.open_connection()?;
        let now = Utc::now();

        // Any visible row is eligible; delivery order is unspecified.
        let candidate: Option<(i64, String, String, String, String, String)> = connection
            .query_row(
                r#"
                SELECT rowid, created_at, path, headers, body, visible_at
                FROM webhook_queue
                WHERE visible_at <= ?1
                LIMIT 1
                "#,
                params![timestamp_to_db(now)],
                |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                        row.get(5)?,
                    ))
                },
            )
            .optional()?;

        let Some((id, created_at, path, headers, body, observed_visible_at)) = candidate else {
            return Ok(None);
        };

        // Lock the row by advancing visible_at, conditioned on the value we
        // just observed. Zero rows affected means another claimant won.
        let claimed_until =
            now + TimeDelta::milliseconds(self.visibility_timeout.as_millis() as i64);
        let affected = connection.execute(
            r#"
            UPDATE webhook_queue
            SET visible_at = ?1, updated_at = ?2
            WHERE rowid = ?3 AND visible_at = ?4
            "#,
            params![
                timestamp_to_db(claimed_until),
                timestamp_to_db(now),
                id,
                observed_visible_at
            ],
        )?;
        if affected == 0 {
            return Ok(None);
        }

        Ok(Some(Envelope {
            id,
            path,
            headers,
            body,
            created_at: timestamp_from_db(&created_at)?,
            visible_at: claimed_until,
        }))
    }

    async fn delete(&self, id: i64) -> StoreResult<()> {
        let connection = self.open_connection()?;
        connection.execute("DELETE FROM webhook_queue WHERE rowid = ?1", params![id])?;
        Ok(())
    }

    async fn wait_for_work(&self, timeout: Duration) {
        let _ = tokio::time::timeout(timeout, self.notify.notified()).await;
    }
}

fn apply_migrations(connection: &Connection) -> StoreResult<()> {
    let current: i64 = connection.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    for (index, migration) in MIGRATIONS.iter().enumerate() {
        let ordinal = index as i64 + 1;
        if current < ordinal {
            connection.execute_batch(migration)?;
        }
    }
    connection.pragma_update(None, "user_version", MIGRATIONS.len() as i64)?;
    Ok(())
}

// Fixed-width fractional seconds keep lexicographic TEXT comparison in SQL
// consistent with chronological order.
fn timestamp_to_db(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn timestamp_from_db(value: &str) -> StoreResult<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(value)?.with_timezone(&Utc))
}
