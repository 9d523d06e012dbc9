//! Storage backend trait
//!
//! [`CheckpointSaver`] is the only shared mutable resource of the execution
//! engine. Backends must uphold the following contract:
//!
//! - Sequence numbers are assigned by the store, start at 0 for a new thread
//!   and increase by exactly one per append. They are never reused while the
//!   thread exists; [`CheckpointSaver::delete_thread`] is the one exception.
//! - Appends to the same thread are serialized. Appends to different threads
//!   must not wait on one another beyond what the storage medium imposes.
//! - A successful `append` is durable before it returns; the engine only
//!   proceeds to the next step afterwards.
//! - Checkpoints are never mutated. Removal only happens through an explicit
//!   [`CheckpointSaver::delete_thread`] call from the owner of the data.
//!
//! # Implementing a backend
//!
//! ```rust,ignore
//! use async_trait::async_trait;
//! use taskgraph_checkpoint::*;
//!
//! struct RedisSaver { /* ... */ }
//!
//! #[async_trait]
//! impl CheckpointSaver for RedisSaver {
//!     async fn append(
//!         &self,
//!         thread_id: &str,
//!         state: serde_json::Value,
//!         metadata: CheckpointMetadata,
//!     ) -> Result<Sequence> {
//!         // INCR a per-thread counter, then SET the snapshot under (thread, seq)
//!         todo!()
//!     }
//!
//!     // latest, get, list, threads, delete_thread ...
//! }
//! ```

use crate::checkpoint::{Checkpoint, CheckpointInfo, CheckpointMetadata, Sequence, ThreadSummary};
use crate::error::Result;
use async_trait::async_trait;

/// Durable, append-only checkpoint storage keyed by `(thread_id, sequence)`
#[async_trait]
pub trait CheckpointSaver: Send + Sync {
    /// Persist a new snapshot for `thread_id` and return its sequence number.
    ///
    /// When `metadata.parent` is unset the store links the checkpoint to the
    /// thread's previous latest sequence.
    async fn append(
        &self,
        thread_id: &str,
        state: serde_json::Value,
        metadata: CheckpointMetadata,
    ) -> Result<Sequence>;

    /// Latest checkpoint of a thread, if the thread exists
    async fn latest(&self, thread_id: &str) -> Result<Option<Checkpoint>>;

    /// A specific historical checkpoint
    async fn get(&self, thread_id: &str, sequence: Sequence) -> Result<Option<Checkpoint>>;

    /// Metadata of every checkpoint of a thread, ascending by sequence
    async fn list(&self, thread_id: &str) -> Result<Vec<CheckpointInfo>>;

    /// Distinct thread identifiers with their latest sequence
    async fn threads(&self) -> Result<Vec<ThreadSummary>>;

    /// Remove every checkpoint of a thread.
    ///
    /// This is garbage collection, not history editing: the thread ceases to
    /// exist, and a later append under the same id starts a new thread at
    /// sequence 0. Callers that need ids to stay unique must not reuse them
    /// after deletion.
    async fn delete_thread(&self, thread_id: &str) -> Result<()>;
}
