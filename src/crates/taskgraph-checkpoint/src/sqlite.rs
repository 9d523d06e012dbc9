//! SQLite-backed checkpoint storage
//!
//! Every checkpoint is one row of the `checkpoints` table, keyed by
//! `(thread_id, sequence)`. State and metadata are stored as JSON text so the
//! database stays inspectable with the `sqlite3` shell:
//!
//! ```text
//! thread_id | sequence | ts                        | state        | metadata
//! ----------+----------+---------------------------+--------------+---------------------------
//! a1b2c3d4  | 0        | 2024-05-01T10:00:00+00:00 | {"user_q...} | {"source":"input",...}
//! a1b2c3d4  | 1        | 2024-05-01T10:00:02+00:00 | {"user_q...} | {"source":"loop",...}
//! ```
//!
//! The latest state of any thread is a single indexed lookup, and the list of
//! sessions is a `GROUP BY` over the primary key; neither replays history.

use crate::{
    checkpoint::{Checkpoint, CheckpointInfo, CheckpointMetadata, Sequence, ThreadSummary},
    error::{CheckpointError, Result},
    traits::CheckpointSaver,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::path::Path;
use std::str::FromStr;
use tokio::sync::Mutex;

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS checkpoints (
    thread_id TEXT NOT NULL,
    sequence INTEGER NOT NULL,
    ts TEXT NOT NULL,
    state TEXT NOT NULL,
    metadata TEXT NOT NULL,
    PRIMARY KEY (thread_id, sequence)
)";

/// Checkpoint saver persisting to a SQLite database.
///
/// Appends issued through one saver are serialized across all threads, not
/// only within a thread, matching SQLite's single writer per database. Reads
/// never take the writer lock.
pub struct SqliteCheckpointSaver {
    pool: SqlitePool,
    // Serializes sequence assignment for appends issued through this saver.
    write_lock: Mutex<()>,
}

impl SqliteCheckpointSaver {
    /// Open (or create) a database file
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    CheckpointError::Storage(format!(
                        "Failed to create checkpoint directory {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        tracing::debug!(path = %path.display(), "Opened checkpoint database");
        Self::with_pool(pool).await
    }

    /// Private in-memory database, mostly for tests
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        // A single connection that never expires: each in-memory connection
        // is its own database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        Self::with_pool(pool).await
    }

    /// Wrap an existing pool, creating the schema if needed
    pub async fn with_pool(pool: SqlitePool) -> Result<Self> {
        sqlx::query(SCHEMA).execute(&pool).await?;
        Ok(Self {
            pool,
            write_lock: Mutex::new(()),
        })
    }

    /// Close the underlying pool
    pub async fn close(&self) {
        self.pool.close().await;
    }

    fn decode_checkpoint(row: &SqliteRow) -> Result<Checkpoint> {
        let state: String = row.try_get("state")?;
        Ok(Checkpoint {
            thread_id: row.try_get("thread_id")?,
            sequence: decode_sequence(row.try_get("sequence")?)?,
            ts: decode_ts(&row.try_get::<String, _>("ts")?)?,
            state: serde_json::from_str(&state)?,
            metadata: serde_json::from_str(&row.try_get::<String, _>("metadata")?)?,
        })
    }

    fn decode_info(row: &SqliteRow) -> Result<CheckpointInfo> {
        Ok(CheckpointInfo {
            thread_id: row.try_get("thread_id")?,
            sequence: decode_sequence(row.try_get("sequence")?)?,
            ts: decode_ts(&row.try_get::<String, _>("ts")?)?,
            metadata: serde_json::from_str(&row.try_get::<String, _>("metadata")?)?,
        })
    }
}

fn decode_sequence(raw: i64) -> Result<Sequence> {
    Sequence::try_from(raw)
        .map_err(|_| CheckpointError::Invalid(format!("negative sequence {}", raw)))
}

fn decode_ts(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| CheckpointError::Invalid(format!("bad timestamp '{}': {}", raw, e)))
}

#[async_trait]
impl CheckpointSaver for SqliteCheckpointSaver {
    async fn append(
        &self,
        thread_id: &str,
        state: serde_json::Value,
        mut metadata: CheckpointMetadata,
    ) -> Result<Sequence> {
        if thread_id.is_empty() {
            return Err(CheckpointError::Invalid("thread_id is required".to_string()));
        }

        let state_json = serde_json::to_string(&state)?;
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;

        let previous: Option<i64> =
            sqlx::query_scalar("SELECT MAX(sequence) FROM checkpoints WHERE thread_id = ?")
                .bind(thread_id)
                .fetch_one(&mut *tx)
                .await?;

        let sequence = previous.map(|p| p + 1).unwrap_or(0);
        if metadata.parent.is_none() {
            metadata.parent = previous.map(decode_sequence).transpose()?;
        }
        let metadata_json = serde_json::to_string(&metadata)?;

        sqlx::query(
            "INSERT INTO checkpoints (thread_id, sequence, ts, state, metadata)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(thread_id)
        .bind(sequence)
        .bind(Utc::now().to_rfc3339())
        .bind(&state_json)
        .bind(&metadata_json)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        tracing::trace!(thread_id, sequence, "Checkpoint appended");
        decode_sequence(sequence)
    }

    async fn latest(&self, thread_id: &str) -> Result<Option<Checkpoint>> {
        let row = sqlx::query(
            "SELECT thread_id, sequence, ts, state, metadata FROM checkpoints
             WHERE thread_id = ? ORDER BY sequence DESC LIMIT 1",
        )
        .bind(thread_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::decode_checkpoint).transpose()
    }

    async fn get(&self, thread_id: &str, sequence: Sequence) -> Result<Option<Checkpoint>> {
        let sequence = i64::try_from(sequence)
            .map_err(|_| CheckpointError::Invalid(format!("sequence {} out of range", sequence)))?;

        let row = sqlx::query(
            "SELECT thread_id, sequence, ts, state, metadata FROM checkpoints
             WHERE thread_id = ? AND sequence = ?",
        )
        .bind(thread_id)
        .bind(sequence)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::decode_checkpoint).transpose()
    }

    async fn list(&self, thread_id: &str) -> Result<Vec<CheckpointInfo>> {
        let rows = sqlx::query(
            "SELECT thread_id, sequence, ts, metadata FROM checkpoints
             WHERE thread_id = ? ORDER BY sequence ASC",
        )
        .bind(thread_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::decode_info).collect()
    }

    async fn threads(&self) -> Result<Vec<ThreadSummary>> {
        let rows = sqlx::query(
            "SELECT thread_id, MAX(sequence) AS latest_sequence, MAX(ts) AS updated_at
             FROM checkpoints GROUP BY thread_id ORDER BY thread_id",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(ThreadSummary {
                    thread_id: row.try_get("thread_id")?,
                    latest_sequence: decode_sequence(row.try_get("latest_sequence")?)?,
                    updated_at: decode_ts(&row.try_get::<String, _>("updated_at")?)?,
                })
            })
            .collect()
    }

    async fn delete_thread(&self, thread_id: &str) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        sqlx::query("DELETE FROM checkpoints WHERE thread_id = ?")
            .bind(thread_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
