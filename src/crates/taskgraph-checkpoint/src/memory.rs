//! In-memory checkpoint storage for development and testing
//!
//! [`InMemoryCheckpointSaver`] keeps every thread's checkpoints in a
//! `Vec` behind a `tokio::sync::RwLock`. Appends take the write lock, so they
//! are serialized; the lock is held only for the push itself, so appends to
//! different threads never wait on a slow step. Data is lost when the process
//! exits; use [`crate::SqliteCheckpointSaver`] when threads must survive a
//! restart.

use crate::{
    checkpoint::{Checkpoint, CheckpointInfo, CheckpointMetadata, Sequence, ThreadSummary},
    error::{CheckpointError, Result},
    traits::CheckpointSaver,
};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Thread-safe in-memory checkpoint storage
type CheckpointStorage = Arc<RwLock<HashMap<String, Vec<Checkpoint>>>>;

/// In-memory checkpoint saver implementation
///
/// # Example
///
/// ```rust
/// use taskgraph_checkpoint::{CheckpointMetadata, CheckpointSaver, CheckpointSource, InMemoryCheckpointSaver};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let saver = InMemoryCheckpointSaver::new();
///     let seq = saver
///         .append("thread-1", serde_json::json!({"n": 1}), CheckpointMetadata::new(CheckpointSource::Input))
///         .await?;
///     assert_eq!(seq, 0);
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone)]
pub struct InMemoryCheckpointSaver {
    storage: CheckpointStorage,
}

impl InMemoryCheckpointSaver {
    /// Create a new in-memory checkpoint saver
    pub fn new() -> Self {
        Self {
            storage: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Get the number of threads being tracked
    pub async fn thread_count(&self) -> usize {
        self.storage.read().await.len()
    }

    /// Get the total number of checkpoints across all threads
    pub async fn checkpoint_count(&self) -> usize {
        self.storage
            .read()
            .await
            .values()
            .map(|entries| entries.len())
            .sum()
    }

    /// Clear all checkpoints (useful for testing)
    pub async fn clear(&self) {
        self.storage.write().await.clear();
    }
}

impl Default for InMemoryCheckpointSaver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CheckpointSaver for InMemoryCheckpointSaver {
    async fn append(
        &self,
        thread_id: &str,
        state: serde_json::Value,
        mut metadata: CheckpointMetadata,
    ) -> Result<Sequence> {
        if thread_id.is_empty() {
            return Err(CheckpointError::Invalid("thread_id is required".to_string()));
        }

        let mut storage = self.storage.write().await;
        let entries = storage.entry(thread_id.to_string()).or_default();

        let sequence = entries.len() as Sequence;
        if metadata.parent.is_none() && sequence > 0 {
            metadata.parent = Some(sequence - 1);
        }

        entries.push(Checkpoint {
            thread_id: thread_id.to_string(),
            sequence,
            ts: Utc::now(),
            state,
            metadata,
        });

        Ok(sequence)
    }

    async fn latest(&self, thread_id: &str) -> Result<Option<Checkpoint>> {
        let storage = self.storage.read().await;
        Ok(storage.get(thread_id).and_then(|entries| entries.last().cloned()))
    }

    async fn get(&self, thread_id: &str, sequence: Sequence) -> Result<Option<Checkpoint>> {
        let storage = self.storage.read().await;
        // Entries are gapless, so the sequence is also the index.
        Ok(storage
            .get(thread_id)
            .and_then(|entries| entries.get(sequence as usize).cloned()))
    }

    async fn list(&self, thread_id: &str) -> Result<Vec<CheckpointInfo>> {
        let storage = self.storage.read().await;
        Ok(storage
            .get(thread_id)
            .map(|entries| entries.iter().map(Checkpoint::info).collect())
            .unwrap_or_default())
    }

    async fn threads(&self) -> Result<Vec<ThreadSummary>> {
        let storage = self.storage.read().await;
        let mut summaries: Vec<ThreadSummary> = storage
            .iter()
            .filter_map(|(thread_id, entries)| {
                entries.last().map(|last| ThreadSummary {
                    thread_id: thread_id.clone(),
                    latest_sequence: last.sequence,
                    updated_at: last.ts,
                })
            })
            .collect();
        summaries.sort_by(|a, b| a.thread_id.cmp(&b.thread_id));
        Ok(summaries)
    }

    async fn delete_thread(&self, thread_id: &str) -> Result<()> {
        let mut storage = self.storage.write().await;
        storage.remove(thread_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::CheckpointSource;
    use serde_json::json;

    #[tokio::test]
    async fn test_append_assigns_gapless_sequences() {
        let saver = InMemoryCheckpointSaver::new();

        for expected in 0..4u64 {
            let seq = saver
                .append(
                    "thread-1",
                    json!({"count": expected}),
                    CheckpointMetadata::after_step("step"),
                )
                .await
                .unwrap();
            assert_eq!(seq, expected);
        }

        let history = saver.list("thread-1").await.unwrap();
        let sequences: Vec<u64> = history.iter().map(|c| c.sequence).collect();
        assert_eq!(sequences, vec![0, 1, 2, 3]);
        assert_eq!(history[0].metadata.parent, None);
        assert_eq!(history[3].metadata.parent, Some(2));
    }

    #[tokio::test]
    async fn test_latest_and_get() {
        let saver = InMemoryCheckpointSaver::new();
        assert!(saver.latest("missing").await.unwrap().is_none());

        saver
            .append("t", json!({"v": "a"}), CheckpointMetadata::new(CheckpointSource::Input))
            .await
            .unwrap();
        saver
            .append("t", json!({"v": "b"}), CheckpointMetadata::after_step("x"))
            .await
            .unwrap();

        let latest = saver.latest("t").await.unwrap().unwrap();
        assert_eq!(latest.sequence, 1);
        assert_eq!(latest.state, json!({"v": "b"}));

        let first = saver.get("t", 0).await.unwrap().unwrap();
        assert_eq!(first.state, json!({"v": "a"}));
        assert!(saver.get("t", 7).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_explicit_parent_is_kept() {
        let saver = InMemoryCheckpointSaver::new();
        for _ in 0..3 {
            saver
                .append("t", json!({}), CheckpointMetadata::after_step("s"))
                .await
                .unwrap();
        }
        let seq = saver
            .append(
                "t",
                json!({}),
                CheckpointMetadata::new(CheckpointSource::Fork).with_parent(0),
            )
            .await
            .unwrap();

        let fork = saver.get("t", seq).await.unwrap().unwrap();
        assert_eq!(fork.metadata.parent, Some(0));
    }

    #[tokio::test]
    async fn test_threads_and_delete() {
        let saver = InMemoryCheckpointSaver::new();
        saver
            .append("b", json!({}), CheckpointMetadata::new(CheckpointSource::Input))
            .await
            .unwrap();
        saver
            .append("a", json!({}), CheckpointMetadata::new(CheckpointSource::Input))
            .await
            .unwrap();
        saver
            .append("a", json!({}), CheckpointMetadata::after_step("s"))
            .await
            .unwrap();

        let threads = saver.threads().await.unwrap();
        assert_eq!(threads.len(), 2);
        assert_eq!(threads[0].thread_id, "a");
        assert_eq!(threads[0].latest_sequence, 1);
        assert_eq!(saver.checkpoint_count().await, 3);

        saver.delete_thread("a").await.unwrap();
        assert_eq!(saver.thread_count().await, 1);
        assert!(saver.latest("a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_empty_thread_id_rejected() {
        let saver = InMemoryCheckpointSaver::new();
        let result = saver
            .append("", json!({}), CheckpointMetadata::new(CheckpointSource::Input))
            .await;
        assert!(matches!(result, Err(CheckpointError::Invalid(_))));
    }
}
