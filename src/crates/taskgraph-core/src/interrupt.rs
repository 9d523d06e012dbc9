//! Per-run interrupt points
//!
//! Interrupts are configured per call rather than baked into the topology, so
//! the same graph can run unattended or with a breakpoint. Pausing does not
//! block anything: the engine returns [`HaltReason::Paused`] and the thread
//! continues only when the caller invokes `run` again.
//!
//! A thread paused before step `S` passes `S` on the next call if that call
//! resumes the thread and, when an approval channel is configured, the merged
//! state carries `true` in that channel. Otherwise the run pauses again at the
//! same place, which makes repeated resumes without approval idempotent.
//!
//! [`HaltReason::Paused`]: crate::engine::HaltReason::Paused

use crate::topology::StepId;
use serde_json::Value;
use std::collections::HashSet;

/// Steps to pause before, plus the approval gate for passing them
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InterruptConfig {
    /// Steps to pause before
    pub interrupt_before: HashSet<StepId>,

    /// Boolean channel that must be `true` to pass an interrupt point
    pub approval_channel: Option<String>,
}

impl InterruptConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set steps to interrupt before
    pub fn with_interrupt_before<I, S>(mut self, steps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<StepId>,
    {
        self.interrupt_before = steps.into_iter().map(Into::into).collect();
        self
    }

    /// Require `channel` to be `true` before an interrupt point is passed
    pub fn with_approval_channel(mut self, channel: impl Into<String>) -> Self {
        self.approval_channel = Some(channel.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.interrupt_before.is_empty()
    }

    pub fn should_interrupt_before(&self, step: &str) -> bool {
        self.interrupt_before.contains(step)
    }

    /// Whether the state satisfies the approval gate
    pub fn is_approved(&self, state: &Value) -> bool {
        match &self.approval_channel {
            Some(channel) => state.get(channel).and_then(Value::as_bool).unwrap_or(false),
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_interrupt_points() {
        let config = InterruptConfig::new().with_interrupt_before(["writer"]);
        assert!(config.should_interrupt_before("writer"));
        assert!(!config.should_interrupt_before("planner"));
        assert!(!config.is_empty());
        assert!(InterruptConfig::default().is_empty());
    }

    #[test]
    fn test_approval_gate() {
        let open = InterruptConfig::new().with_interrupt_before(["w"]);
        assert!(open.is_approved(&json!({})));

        let gated = open.with_approval_channel("approved");
        assert!(!gated.is_approved(&json!({})));
        assert!(!gated.is_approved(&json!({"approved": false})));
        assert!(!gated.is_approved(&json!({"approved": "yes"})));
        assert!(gated.is_approved(&json!({"approved": true})));
    }
}
