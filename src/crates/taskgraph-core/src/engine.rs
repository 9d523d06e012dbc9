//! Execution engine
//!
//! [`Engine::run`] drives one thread through the topology:
//!
//! 1. Load the thread's latest checkpoint. A thread without checkpoints is
//!    fresh: the incoming update becomes its initial state (checkpoint 0,
//!    resuming at the entry step).
//! 2. Merge the incoming update with the per-channel reducers. A non-empty
//!    update on an existing thread is persisted as an `update` checkpoint.
//! 3. Starting at the persisted `next` step, repeat: check cancellation,
//!    honor interrupt points, invoke the step, merge its update, resolve the
//!    following step and persist the checkpoint. The checkpoint write
//!    completes before the next step is selected for execution.
//! 4. Halt at a terminal marker, an interrupt point, a cancellation or an
//!    error.
//!
//! ```text
//!  load ─► merge ─► [cancelled?] ─► [interrupt?] ─► step.run ─► merge ─► next_of ─► append ─┐
//!                        ▲                                                                   │
//!                        └───────────────────────────── next is a step ◄─────────────────────┘
//! ```
//!
//! Each checkpoint records the step to execute next, so a crash between a
//! step and its checkpoint write leaves the previous checkpoint as the resume
//! point and the step runs again on the next call.

use crate::error::{GraphError, Result};
use crate::interrupt::InterruptConfig;
use crate::state::StateSchema;
use crate::topology::{StepId, Topology, END, FORCE_END};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use taskgraph_checkpoint::{
    Checkpoint, CheckpointInfo, CheckpointMetadata, CheckpointSaver, CheckpointSource, HaltKind,
    Sequence,
};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;

/// Default per-call step limit
pub const DEFAULT_MAX_STEPS: usize = 100;

/// Why a call to [`Engine::run`] returned
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HaltReason {
    /// Stopped before an interrupt point, waiting for an external call
    Paused,
    /// Reached the end marker
    Completed,
    /// Cut off by a loop-safety limit
    ForceEnded,
    /// Cancellation token fired at a step boundary
    Cancelled,
}

impl HaltReason {
    /// Whether the thread can never advance again
    pub fn is_terminal(&self) -> bool {
        matches!(self, HaltReason::Completed | HaltReason::ForceEnded)
    }
}

impl From<HaltKind> for HaltReason {
    fn from(kind: HaltKind) -> Self {
        match kind {
            HaltKind::Completed => HaltReason::Completed,
            HaltKind::ForceEnded => HaltReason::ForceEnded,
        }
    }
}

impl fmt::Display for HaltReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HaltReason::Paused => "PAUSED",
            HaltReason::Completed => "COMPLETED",
            HaltReason::ForceEnded => "FORCE_ENDED",
            HaltReason::Cancelled => "CANCELLED",
        };
        f.write_str(name)
    }
}

/// Per-call execution options
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub interrupts: InterruptConfig,
    pub cancel: Option<CancellationToken>,
    pub max_steps: usize,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            interrupts: InterruptConfig::default(),
            cancel: None,
            max_steps: DEFAULT_MAX_STEPS,
        }
    }
}

impl RunConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_interrupts(mut self, interrupts: InterruptConfig) -> Self {
        self.interrupts = interrupts;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|t| t.is_cancelled())
    }
}

/// Result of one call to [`Engine::run`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunOutcome {
    /// Merged state at the point the call returned
    pub state: Value,
    pub halt: HaltReason,
    /// Sequence of the thread's latest checkpoint
    pub sequence: Sequence,
    /// Step the thread will execute next; `None` once terminal
    pub next: Option<StepId>,
}

/// Drives a [`Topology`] over threads persisted in a [`CheckpointSaver`]
#[derive(Clone)]
pub struct Engine {
    topology: Arc<Topology>,
    schema: Arc<StateSchema>,
    saver: Arc<dyn CheckpointSaver>,
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl Engine {
    pub fn new(topology: Topology, schema: StateSchema, saver: Arc<dyn CheckpointSaver>) -> Self {
        Self {
            topology: Arc::new(topology),
            schema: Arc::new(schema),
            saver,
            locks: Arc::new(DashMap::new()),
        }
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn schema(&self) -> &StateSchema {
        &self.schema
    }

    pub fn saver(&self) -> Arc<dyn CheckpointSaver> {
        Arc::clone(&self.saver)
    }

    /// Start or resume a thread.
    ///
    /// For a fresh thread `update` is the full initial input; for an existing
    /// thread it is merged into the latest checkpoint before execution resumes
    /// at the persisted next step. A thread that already halted terminally is
    /// not re-run: the update is merged and persisted, and the stored halt is
    /// returned.
    #[tracing::instrument(skip(self, update, config))]
    pub async fn run(&self, thread_id: &str, update: Value, config: &RunConfig) -> Result<RunOutcome> {
        let _guard = self.acquire(thread_id)?;

        match self.saver.latest(thread_id).await? {
            None => {
                let state = self.schema.initial_state(&update)?;
                let entry = self.topology.entry().to_string();
                let metadata =
                    CheckpointMetadata::new(CheckpointSource::Input).with_next(Some(entry.clone()));
                let sequence = self.saver.append(thread_id, state.clone(), metadata).await?;

                tracing::info!(entry = %entry, "Starting fresh thread");
                self.drive(thread_id, state, entry, sequence, false, config).await
            }
            Some(checkpoint) => {
                tracing::info!(sequence = checkpoint.sequence, "Resuming thread");
                self.continue_from(thread_id, checkpoint, update, CheckpointSource::Update, config)
                    .await
            }
        }
    }

    /// Fork a thread from a historical checkpoint and continue from there.
    ///
    /// A `fork` checkpoint copying the chosen snapshot (merged with `update`)
    /// is appended with the chosen sequence as its parent; later checkpoints
    /// of the thread stay in its history.
    #[tracing::instrument(skip(self, update, config))]
    pub async fn run_from(
        &self,
        thread_id: &str,
        sequence: Sequence,
        update: Value,
        config: &RunConfig,
    ) -> Result<RunOutcome> {
        let _guard = self.acquire(thread_id)?;

        let checkpoint = self.saver.get(thread_id, sequence).await?.ok_or_else(|| {
            GraphError::NotFound(format!("checkpoint {} of thread '{}'", sequence, thread_id))
        })?;

        tracing::info!(sequence, "Forking thread");
        self.continue_from(thread_id, checkpoint, update, CheckpointSource::Fork, config)
            .await
    }

    /// Latest checkpoint of a thread
    pub async fn state(&self, thread_id: &str) -> Result<Option<Checkpoint>> {
        Ok(self.saver.latest(thread_id).await?)
    }

    /// A specific checkpoint of a thread
    pub async fn checkpoint(&self, thread_id: &str, sequence: Sequence) -> Result<Option<Checkpoint>> {
        Ok(self.saver.get(thread_id, sequence).await?)
    }

    /// Checkpoint metadata of a thread, ascending by sequence
    pub async fn history(&self, thread_id: &str) -> Result<Vec<CheckpointInfo>> {
        Ok(self.saver.list(thread_id).await?)
    }

    /// Threads with a run in progress
    pub fn active_threads(&self) -> usize {
        self.locks.len()
    }

    fn acquire(&self, thread_id: &str) -> Result<ThreadLease> {
        if thread_id.is_empty() {
            return Err(GraphError::Validation("thread_id must not be empty".to_string()));
        }
        let lock = self
            .locks
            .entry(thread_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .value()
            .clone();
        let mut lease = ThreadLease {
            guard: None,
            locks: Arc::clone(&self.locks),
            thread_id: thread_id.to_string(),
        };
        match lock.try_lock_owned() {
            Ok(guard) => {
                lease.guard = Some(guard);
                Ok(lease)
            }
            Err(_) => {
                tracing::warn!(thread_id, "Rejected concurrent run");
                Err(GraphError::ThreadBusy(thread_id.to_string()))
            }
        }
    }

    async fn continue_from(
        &self,
        thread_id: &str,
        checkpoint: Checkpoint,
        update: Value,
        source: CheckpointSource,
        config: &RunConfig,
    ) -> Result<RunOutcome> {
        let Checkpoint {
            sequence: base,
            mut state,
            metadata,
            ..
        } = checkpoint;

        let touched = self.schema.apply(&mut state, &update)?;

        let mut sequence = base;
        if !touched.is_empty() || source == CheckpointSource::Fork {
            let mut written = CheckpointMetadata::new(source).with_next(metadata.next.clone());
            if let Some(halt) = metadata.halt {
                written = written.with_halt(halt);
            }
            if source == CheckpointSource::Fork {
                written = written.with_parent(base);
            }
            sequence = self.saver.append(thread_id, state.clone(), written).await?;
            tracing::debug!(sequence, channels = ?touched, "Persisted incoming update");
        }

        match metadata.next {
            Some(next) => self.drive(thread_id, state, next, sequence, true, config).await,
            None => {
                let halt = metadata.halt.map(HaltReason::from).unwrap_or(HaltReason::Completed);
                tracing::info!(%halt, "Thread already halted");
                Ok(RunOutcome {
                    state,
                    halt,
                    sequence,
                    next: None,
                })
            }
        }
    }

    async fn drive(
        &self,
        thread_id: &str,
        mut state: Value,
        mut current: StepId,
        mut sequence: Sequence,
        resumed: bool,
        config: &RunConfig,
    ) -> Result<RunOutcome> {
        let mut executed = 0usize;

        loop {
            if config.is_cancelled() {
                tracing::info!(step = %current, "Run cancelled");
                return Ok(RunOutcome {
                    state,
                    halt: HaltReason::Cancelled,
                    sequence,
                    next: Some(current),
                });
            }

            if config.interrupts.should_interrupt_before(&current) {
                let passes = resumed && executed == 0 && config.interrupts.is_approved(&state);
                if !passes {
                    tracing::info!(step = %current, sequence, "Paused before interrupt point");
                    return Ok(RunOutcome {
                        state,
                        halt: HaltReason::Paused,
                        sequence,
                        next: Some(current),
                    });
                }
                tracing::debug!(step = %current, "Passing approved interrupt point");
            }

            if executed >= config.max_steps {
                tracing::error!(max_steps = config.max_steps, "Recursion limit reached");
                return Err(GraphError::RecursionLimit(config.max_steps));
            }

            let step = self
                .topology
                .step(&current)
                .ok_or_else(|| GraphError::NotFound(format!("step '{}'", current)))?;

            tracing::debug!(step = %current, "Executing step");
            let update = step.run(&state).await.map_err(|e| {
                tracing::error!(step = %current, error = %e, "Step failed");
                match e {
                    GraphError::StepExecution { .. } => e,
                    other => GraphError::step_execution(current.clone(), other.to_string()),
                }
            })?;

            self.schema.apply(&mut state, &update)?;
            let target = self.topology.next_of(&current, &state)?;

            let (next, halt) = match target.as_str() {
                END => (None, Some(HaltKind::Completed)),
                FORCE_END => (None, Some(HaltKind::ForceEnded)),
                _ => (Some(target.clone()), None),
            };

            let mut metadata = CheckpointMetadata::after_step(&current).with_next(next.clone());
            if let Some(halt) = halt {
                metadata = metadata.with_halt(halt);
            }
            sequence = self.saver.append(thread_id, state.clone(), metadata).await?;
            executed += 1;

            tracing::debug!(step = %current, sequence, next = ?next, "Checkpoint written");

            match (next, halt) {
                (Some(next), _) => current = next,
                (None, halt) => {
                    let halt = halt.map(HaltReason::from).unwrap_or(HaltReason::Completed);
                    tracing::info!(%halt, sequence, steps = executed, "Thread halted");
                    return Ok(RunOutcome {
                        state,
                        halt,
                        sequence,
                        next: None,
                    });
                }
            }
        }
    }
}

/// Exclusive hold on one thread's lock.
///
/// Dropping it releases the lock and removes the table entry when nobody
/// else holds a reference to it, so the table only tracks live runs.
struct ThreadLease {
    guard: Option<OwnedMutexGuard<()>>,
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
    thread_id: String,
}

impl Drop for ThreadLease {
    fn drop(&mut self) {
        drop(self.guard.take());
        self.locks
            .remove_if(&self.thread_id, |_, lock| Arc::strong_count(lock) == 1);
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("topology", &self.topology)
            .field("active_threads", &self.active_threads())
            .finish()
    }
}
