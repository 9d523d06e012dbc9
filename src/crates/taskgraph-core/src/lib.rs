//! # taskgraph-core - Durable Task-Graph Execution
//!
//! Executes a fixed topology of named steps against a shared JSON state,
//! persisting a checkpoint after every step so a thread can pause for
//! approval and resume later, in another process if need be.
//!
//! ## Building blocks
//!
//! - [`StateSchema`] - channels and their merge rule (overwrite or append)
//! - [`Step`] / [`Router`] - units of work and conditional edge logic
//! - [`TopologyBuilder`] / [`Topology`] - validated graph definition with
//!   [`END`] and [`FORCE_END`] terminal markers and [`LoopGuard`]s
//! - [`Engine`] - drives threads over a [`CheckpointSaver`]
//! - [`InterruptConfig`] / [`RunConfig`] - per-call breakpoints, cancellation
//!   and step limit
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use serde_json::{json, Value};
//! use taskgraph_core::{
//!     ChannelSpec, Engine, HaltReason, InMemoryCheckpointSaver, InterruptConfig, RunConfig,
//!     StateSchema, TopologyBuilder, END,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut builder = TopologyBuilder::new();
//!     builder
//!         .add_fn_step("draft", |state: Value| async move {
//!             Ok(json!({"text": format!("draft about {}", state["topic"].as_str().unwrap_or(""))}))
//!         })
//!         .add_fn_step("publish", |_state: Value| async move { Ok(json!({"published": true})) })
//!         .add_edge("draft", "publish")
//!         .add_edge("publish", END)
//!         .set_entry("draft");
//!
//!     let schema = StateSchema::new()
//!         .channel(ChannelSpec::last_value("topic").required())
//!         .channel(ChannelSpec::last_value("text"))
//!         .channel(ChannelSpec::last_value("published").with_default(json!(false)))
//!         .channel(ChannelSpec::last_value("approved").with_default(json!(false)));
//!
//!     let engine = Engine::new(builder.build()?, schema, Arc::new(InMemoryCheckpointSaver::new()));
//!     let config = RunConfig::new().with_interrupts(
//!         InterruptConfig::new()
//!             .with_interrupt_before(["publish"])
//!             .with_approval_channel("approved"),
//!     );
//!
//!     let first = engine.run("doc-1", json!({"topic": "rust"}), &config).await?;
//!     assert_eq!(first.halt, HaltReason::Paused);
//!
//!     let done = engine.run("doc-1", json!({"approved": true}), &config).await?;
//!     assert_eq!(done.halt, HaltReason::Completed);
//!     assert_eq!(done.state["published"], json!(true));
//!     Ok(())
//! }
//! ```

pub mod engine;
pub mod error;
pub mod interrupt;
pub mod state;
pub mod step;
pub mod topology;

pub use engine::{Engine, HaltReason, RunConfig, RunOutcome, DEFAULT_MAX_STEPS};
pub use error::{GraphError, Result};
pub use interrupt::InterruptConfig;
pub use state::{ChannelKind, ChannelSpec, StateSchema};
pub use step::{FnStep, Router, Step};
pub use topology::{is_terminal, LoopGuard, StepId, Topology, TopologyBuilder, END, FORCE_END};

pub use taskgraph_checkpoint::{
    Checkpoint, CheckpointError, CheckpointInfo, CheckpointMetadata, CheckpointSaver,
    CheckpointSource, HaltKind, InMemoryCheckpointSaver, Sequence, SqliteCheckpointSaver,
    ThreadSummary,
};
pub use tokio_util::sync::CancellationToken;
