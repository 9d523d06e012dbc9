//! Checkpoint records
//!
//! A [`Checkpoint`] is an immutable snapshot of one thread's full state taken
//! after a step completes. Checkpoints are identified by `(thread_id, sequence)`
//! where `sequence` is assigned by the store, starts at 0 and never repeats
//! within a thread.
//!
//! The [`CheckpointMetadata`] attached to every snapshot records which step
//! produced it and which step should run next, which is all the engine needs
//! to resume a thread without replaying its history:
//!
//! ```text
//! seq 0  source=input  step=-          next=planner
//! seq 1  source=loop   step=planner    next=researcher
//! seq 2  source=loop   step=researcher next=reviewer
//! seq 3  source=loop   step=reviewer   next=writer      <- paused here
//! seq 4  source=update step=-          next=writer      (approval merged)
//! seq 5  source=loop   step=writer     next=-  halt=completed
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Per-thread checkpoint sequence number
pub type Sequence = u64;

/// How a checkpoint came to exist
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CheckpointSource {
    /// Initial state of a fresh thread
    Input,
    /// Written by the execution loop after a step completed
    Loop,
    /// External update merged into a resumed thread
    Update,
    /// Copy of a historical checkpoint that execution continues from
    Fork,
}

/// Terminal outcome recorded on the last checkpoint of a finished thread
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum HaltKind {
    /// Traversal reached the end marker
    Completed,
    /// Traversal was cut off by a loop-safety limit
    ForceEnded,
}

/// Metadata stored alongside every checkpoint
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CheckpointMetadata {
    /// The source of the checkpoint
    pub source: CheckpointSource,

    /// The step that produced this checkpoint (absent for input/update/fork)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<String>,

    /// Sequence of the checkpoint this one was derived from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<Sequence>,

    /// Step to execute next; absent once the thread halted terminally
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next: Option<String>,

    /// Terminal halt recorded when `next` is absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub halt: Option<HaltKind>,

    /// Additional custom metadata
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub extra: HashMap<String, serde_json::Value>,
}

impl CheckpointMetadata {
    /// Create metadata with the given source
    pub fn new(source: CheckpointSource) -> Self {
        Self {
            source,
            step: None,
            parent: None,
            next: None,
            halt: None,
            extra: HashMap::new(),
        }
    }

    /// Metadata for a checkpoint written after `step` completed
    pub fn after_step(step: impl Into<String>) -> Self {
        Self::new(CheckpointSource::Loop).with_step(step)
    }

    /// Set the producing step
    pub fn with_step(mut self, step: impl Into<String>) -> Self {
        self.step = Some(step.into());
        self
    }

    /// Set the parent sequence
    pub fn with_parent(mut self, parent: Sequence) -> Self {
        self.parent = Some(parent);
        self
    }

    /// Set the next step to execute
    pub fn with_next(mut self, next: Option<String>) -> Self {
        self.next = next;
        self
    }

    /// Record a terminal halt
    pub fn with_halt(mut self, halt: HaltKind) -> Self {
        self.halt = Some(halt);
        self
    }

    /// Add custom metadata
    pub fn with_extra(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }
}

/// An immutable, sequence-numbered snapshot of one thread's state
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Checkpoint {
    /// Thread the checkpoint belongs to
    pub thread_id: String,

    /// Store-assigned sequence number
    pub sequence: Sequence,

    /// When the checkpoint was written
    pub ts: DateTime<Utc>,

    /// Full state container (JSON object keyed by channel name)
    pub state: serde_json::Value,

    /// Producing step, lineage and resume information
    pub metadata: CheckpointMetadata,
}

impl Checkpoint {
    /// Strip the state, keeping only what history listings need
    pub fn info(&self) -> CheckpointInfo {
        CheckpointInfo {
            thread_id: self.thread_id.clone(),
            sequence: self.sequence,
            ts: self.ts,
            metadata: self.metadata.clone(),
        }
    }
}

/// Checkpoint without its state payload
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CheckpointInfo {
    pub thread_id: String,
    pub sequence: Sequence,
    pub ts: DateTime<Utc>,
    pub metadata: CheckpointMetadata,
}

/// One entry of the distinct-thread listing
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ThreadSummary {
    pub thread_id: String,
    pub latest_sequence: Sequence,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_metadata_builder() {
        let metadata = CheckpointMetadata::after_step("planner")
            .with_parent(3)
            .with_next(Some("researcher".to_string()))
            .with_extra("attempt", json!(2));

        assert_eq!(metadata.source, CheckpointSource::Loop);
        assert_eq!(metadata.step.as_deref(), Some("planner"));
        assert_eq!(metadata.parent, Some(3));
        assert_eq!(metadata.next.as_deref(), Some("researcher"));
        assert_eq!(metadata.halt, None);
        assert_eq!(metadata.extra.get("attempt"), Some(&json!(2)));
    }

    #[test]
    fn test_metadata_serialization_skips_empty_fields() {
        let metadata = CheckpointMetadata::new(CheckpointSource::Input);
        let value = serde_json::to_value(&metadata).unwrap();
        assert_eq!(value, json!({"source": "input"}));

        let terminal = CheckpointMetadata::after_step("writer").with_halt(HaltKind::ForceEnded);
        let value = serde_json::to_value(&terminal).unwrap();
        assert_eq!(value["halt"], json!("force_ended"));

        let back: CheckpointMetadata = serde_json::from_value(value).unwrap();
        assert_eq!(back, terminal);
    }
}
