//! Research state: channel layout, typed records and partial updates.
//!
//! The engine stores state as a JSON object. [`research_schema`] declares the
//! channels and their reducers, [`ResearchState`] is a typed read-only view of
//! a snapshot, and [`StateUpdate`] builds the partial updates steps return.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use taskgraph_core::{ChannelSpec, StateSchema};

pub const USER_QUERY: &str = "user_query";
pub const PLAN: &str = "plan";
pub const PLAN_CURSOR: &str = "plan_cursor";
pub const FINDINGS: &str = "findings";
pub const CRITIQUE: &str = "critique";
pub const REVISION_COUNT: &str = "revision_count";
pub const HUMAN_APPROVED: &str = "human_approved";
pub const HUMAN_FEEDBACK: &str = "human_feedback";
pub const FINAL_OUTPUT: &str = "final_output";
pub const LOG: &str = "log";

/// Completion status of a planned step
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    #[default]
    Pending,
    Completed,
    Failed,
}

/// One planned research step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanStep {
    pub step_id: u32,
    pub task: String,
    pub query: String,
    #[serde(default)]
    pub status: StepStatus,
}

impl PlanStep {
    pub fn new(step_id: u32, task: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            step_id,
            task: task.into(),
            query: query.into(),
            status: StepStatus::Pending,
        }
    }

    /// Query to send to the search tool; falls back to the task text
    pub fn search_query(&self) -> &str {
        if self.query.trim().is_empty() {
            &self.task
        } else {
            &self.query
        }
    }
}

/// Outcome of executing one plan step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchResult {
    pub step_id: u32,
    pub query: String,
    #[serde(default)]
    pub findings: Vec<String>,
    #[serde(default)]
    pub sources: Vec<String>,
    #[serde(default)]
    pub relevance_score: f64,
}

/// Quality evaluation of the gathered findings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Critique {
    pub score: f64,
    pub feedback: String,
    #[serde(default)]
    pub suggestions: Vec<String>,
    pub needs_refinement: bool,
}

/// Audit log entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogMessage {
    pub role: String,
    pub content: String,
}

impl LogMessage {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new("assistant", content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new("system", content)
    }
}

/// Typed view over a research state snapshot
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResearchState {
    pub user_query: String,
    pub plan: Vec<PlanStep>,
    pub plan_cursor: usize,
    pub findings: Vec<ResearchResult>,
    pub critique: Option<Critique>,
    pub revision_count: u32,
    pub human_approved: bool,
    pub human_feedback: Option<String>,
    pub final_output: Option<String>,
    pub log: Vec<LogMessage>,
}

impl ResearchState {
    pub fn from_value(state: &Value) -> serde_json::Result<Self> {
        Self::deserialize(state)
    }

    /// Plan step under the cursor, if any remain
    pub fn current_step(&self) -> Option<&PlanStep> {
        self.plan.get(self.plan_cursor)
    }

    pub fn plan_exhausted(&self) -> bool {
        self.plan_cursor >= self.plan.len()
    }
}

/// Channel layout of a research thread
pub fn research_schema() -> StateSchema {
    StateSchema::new()
        .channel(ChannelSpec::last_value(USER_QUERY).required().write_once())
        .channel(ChannelSpec::last_value(PLAN).with_default(json!([])))
        .channel(ChannelSpec::last_value(PLAN_CURSOR).with_default(json!(0)))
        .channel(ChannelSpec::topic(FINDINGS))
        .channel(ChannelSpec::last_value(CRITIQUE))
        .channel(ChannelSpec::last_value(REVISION_COUNT).with_default(json!(0)))
        .channel(ChannelSpec::last_value(HUMAN_APPROVED).with_default(json!(false)))
        .channel(ChannelSpec::last_value(HUMAN_FEEDBACK))
        .channel(ChannelSpec::last_value(FINAL_OUTPUT))
        .channel(ChannelSpec::topic(LOG))
}

/// Initial input for a fresh thread
pub fn initial_input(query: &str) -> Value {
    json!({
        "user_query": query,
        "log": [LogMessage::new("user", query)],
    })
}

/// Partial state update returned by a step.
///
/// Unset fields are left out of the JSON so the engine only touches the
/// channels a step actually wrote.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StateUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan: Option<Vec<PlanStep>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan_cursor: Option<usize>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub findings: Vec<ResearchResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub critique: Option<Critique>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revision_count: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub human_approved: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub human_feedback: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_output: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub log: Vec<LogMessage>,
}

impl StateUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_plan(mut self, plan: Vec<PlanStep>) -> Self {
        self.plan = Some(plan);
        self
    }

    pub fn with_plan_cursor(mut self, cursor: usize) -> Self {
        self.plan_cursor = Some(cursor);
        self
    }

    pub fn with_finding(mut self, result: ResearchResult) -> Self {
        self.findings.push(result);
        self
    }

    pub fn with_critique(mut self, critique: Critique) -> Self {
        self.critique = Some(critique);
        self
    }

    pub fn with_revision_count(mut self, count: u32) -> Self {
        self.revision_count = Some(count);
        self
    }

    pub fn with_approval(mut self, approved: bool) -> Self {
        self.human_approved = Some(approved);
        self
    }

    pub fn with_feedback(mut self, feedback: impl Into<String>) -> Self {
        self.human_feedback = Some(feedback.into());
        self
    }

    pub fn with_final_output(mut self, output: impl Into<String>) -> Self {
        self.final_output = Some(output.into());
        self
    }

    pub fn with_log(mut self, message: LogMessage) -> Self {
        self.log.push(message);
        self
    }

    pub fn into_value(self) -> serde_json::Result<Value> {
        serde_json::to_value(self)
    }
}
