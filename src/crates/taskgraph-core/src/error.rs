//! Error types for topology construction and execution
//!
//! ```text
//! GraphError
//! ├── Validation      - malformed state or update (fatal to the call)
//! ├── Topology        - invalid graph definition (fatal at build time)
//! ├── ThreadBusy      - another run holds the thread (retry later)
//! ├── Storage         - checkpoint read/write failed (fatal to the call)
//! ├── StepExecution   - a step returned an error instead of degrading
//! ├── Routing         - a router picked a branch it never declared
//! ├── RecursionLimit  - a single call ran more steps than allowed
//! ├── NotFound        - unknown thread, checkpoint or step
//! └── Serialization   - JSON conversion failed
//! ```
//!
//! Failures of external calls made *inside* a step are not represented here:
//! steps convert them into a degraded state update and the run continues.

use taskgraph_checkpoint::CheckpointError;
use thiserror::Error;

/// Convenience result type using [`GraphError`]
pub type Result<T> = std::result::Result<T, GraphError>;

/// Errors raised by the engine, the topology and the state schema
#[derive(Error, Debug)]
pub enum GraphError {
    /// State or update does not match the schema
    #[error("Validation error: {0}")]
    Validation(String),

    /// Topology definition is invalid
    #[error("Topology error: {0}")]
    Topology(String),

    /// A run is already in progress for this thread
    #[error("Thread '{0}' is busy with another run")]
    ThreadBusy(String),

    /// Checkpoint persistence failed
    #[error("Storage failure: {0}")]
    Storage(#[from] CheckpointError),

    /// A step returned an error
    #[error("Step '{step}' failed: {error}")]
    StepExecution {
        /// Step that failed
        step: String,
        /// Error message from the step
        error: String,
    },

    /// A router returned a branch that has no declared target
    #[error("Router after '{step}' returned undeclared branch '{branch}'")]
    Routing {
        /// Step whose outgoing router misbehaved
        step: String,
        /// Branch key the router returned
        branch: String,
    },

    /// Too many steps executed within one call
    #[error("Recursion limit of {0} steps reached without halting")]
    RecursionLimit(usize),

    /// Requested thread, checkpoint or step does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl GraphError {
    /// Create a step execution error with context
    pub fn step_execution(step: impl Into<String>, error: impl Into<String>) -> Self {
        Self::StepExecution {
            step: step.into(),
            error: error.into(),
        }
    }

    /// Whether the caller may retry the same call later
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ThreadBusy(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_conversion() {
        let err: GraphError = CheckpointError::Storage("disk full".to_string()).into();
        assert!(matches!(err, GraphError::Storage(_)));
        assert!(err.to_string().contains("disk full"));
    }

    #[test]
    fn test_display_includes_context() {
        let err = GraphError::step_execution("planner", "boom");
        assert_eq!(err.to_string(), "Step 'planner' failed: boom");

        let err = GraphError::Routing {
            step: "reviewer".to_string(),
            branch: "sideways".to_string(),
        };
        assert!(err.to_string().contains("sideways"));
    }

    #[test]
    fn test_only_busy_is_retryable() {
        assert!(GraphError::ThreadBusy("t".to_string()).is_retryable());
        assert!(!GraphError::Validation("x".to_string()).is_retryable());
    }
}
