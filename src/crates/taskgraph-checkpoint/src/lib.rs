//! # taskgraph-checkpoint - Durable State Snapshots
//!
//! Append-only storage of state snapshots for the task-graph engine. Every
//! time a step completes, the engine hands the thread's full state to a
//! [`CheckpointSaver`], which assigns the next sequence number and persists
//! it before the engine moves on.
//!
//! ## Core Concepts
//!
//! - [`Checkpoint`] - immutable snapshot keyed by `(thread_id, sequence)`
//! - [`CheckpointMetadata`] - producing step, parent sequence and the step to
//!   resume at
//! - [`CheckpointSaver`] - the storage trait
//!
//! ## Backends
//!
//! - [`InMemoryCheckpointSaver`] - process-local, for tests and development
//! - [`SqliteCheckpointSaver`] - a single SQLite file, survives restarts
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use taskgraph_checkpoint::{CheckpointMetadata, CheckpointSaver, CheckpointSource, SqliteCheckpointSaver};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let saver = SqliteCheckpointSaver::open("checkpoints.db").await?;
//!
//!     saver
//!         .append("thread-1", json!({"user_query": "rust"}), CheckpointMetadata::new(CheckpointSource::Input))
//!         .await?;
//!
//!     if let Some(latest) = saver.latest("thread-1").await? {
//!         println!("thread-1 is at sequence {}", latest.sequence);
//!     }
//!
//!     for summary in saver.threads().await? {
//!         println!("{} -> {}", summary.thread_id, summary.latest_sequence);
//!     }
//!     Ok(())
//! }
//! ```

pub mod checkpoint;
pub mod error;
pub mod memory;
pub mod sqlite;
pub mod traits;

pub use checkpoint::{
    Checkpoint, CheckpointInfo, CheckpointMetadata, CheckpointSource, HaltKind, Sequence,
    ThreadSummary,
};
pub use error::{CheckpointError, Result};
pub use memory::InMemoryCheckpointSaver;
pub use sqlite::SqliteCheckpointSaver;
pub use traits::CheckpointSaver;
