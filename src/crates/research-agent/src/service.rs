//! Session service.
//!
//! Maps research sessions onto engine threads: starting a session runs a
//! fresh thread, approving resumes it with `human_approved` set, and status is
//! derived from the latest checkpoint rather than stored separately.

use crate::config::ResearchConfig;
use crate::error::{ResearchError, Result};
use crate::graph::{build_topology, interrupt_config};
use crate::llm::{ChatModel, OpenAiChatModel};
use crate::search::{SearchTool, TavilySearch};
use crate::state::{initial_input, research_schema, Critique, PlanStep, ResearchState, StateUpdate};
use chrono::{DateTime, Utc};
use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use taskgraph_core::{
    Checkpoint, CheckpointInfo, CheckpointMetadata, CheckpointSaver, Engine, HaltReason, RunConfig,
    RunOutcome, Sequence, SqliteCheckpointSaver,
};
use uuid::Uuid;

pub const MIN_QUERY_CHARS: usize = 3;
pub const MAX_QUERY_CHARS: usize = 1000;

/// Caller-visible session status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Pending,
    Researching,
    AwaitingApproval,
    Completed,
    Failed,
    Rejected,
}

impl SessionStatus {
    /// Derive the status of a session from its state and last halt
    pub fn derive(state: &ResearchState, halt: Option<HaltReason>) -> Self {
        if state.final_output.is_some() {
            SessionStatus::Completed
        } else if halt == Some(HaltReason::ForceEnded) {
            SessionStatus::Failed
        } else if state.critique.is_some() && !state.human_approved {
            SessionStatus::AwaitingApproval
        } else if !state.plan.is_empty() {
            SessionStatus::Researching
        } else {
            SessionStatus::Pending
        }
    }

    fn message(&self) -> &'static str {
        match self {
            SessionStatus::Completed => "Research completed successfully",
            SessionStatus::AwaitingApproval => {
                "Research ready for human review. Approve to generate the final report."
            }
            SessionStatus::Failed => "Research stopped after reaching the revision limit",
            SessionStatus::Rejected => "Research session rejected by user",
            SessionStatus::Pending | SessionStatus::Researching => "Research in progress",
        }
    }
}

/// Result of starting or resuming a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchResponse {
    pub thread_id: String,
    pub status: SessionStatus,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub halt: Option<HaltReason>,
    pub plan: Vec<PlanStep>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub critique: Option<Critique>,
    pub revision_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_output: Option<String>,
}

impl ResearchResponse {
    fn from_state(thread_id: &str, state: &ResearchState, halt: Option<HaltReason>) -> Self {
        let status = SessionStatus::derive(state, halt);
        Self {
            thread_id: thread_id.to_string(),
            status,
            message: status.message().to_string(),
            halt,
            plan: state.plan.clone(),
            critique: state.critique.clone(),
            revision_count: state.revision_count,
            final_output: state.final_output.clone(),
        }
    }

    fn from_outcome(thread_id: &str, outcome: &RunOutcome) -> Result<Self> {
        let state = ResearchState::from_value(&outcome.state)?;
        Ok(Self::from_state(thread_id, &state, Some(outcome.halt)))
    }
}

/// Full view of one session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionResponse {
    pub thread_id: String,
    pub status: SessionStatus,
    pub latest_sequence: Sequence,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_step: Option<String>,
    pub state: ResearchState,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointListResponse {
    pub thread_id: String,
    pub checkpoints: Vec<CheckpointInfo>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointStateResponse {
    pub thread_id: String,
    pub sequence: Sequence,
    pub ts: DateTime<Utc>,
    pub metadata: CheckpointMetadata,
    pub state: ResearchState,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub thread_id: String,
    pub status: SessionStatus,
    pub user_query: String,
    pub latest_sequence: Sequence,
    pub updated_at: DateTime<Utc>,
}

fn last_halt(checkpoint: &Checkpoint) -> Option<HaltReason> {
    checkpoint.metadata.halt.map(HaltReason::from)
}

/// Research sessions over a checkpointed engine
#[derive(Clone)]
pub struct ResearchService {
    engine: Engine,
}

impl ResearchService {
    pub fn new(
        model: Arc<dyn ChatModel>,
        search: Arc<dyn SearchTool>,
        saver: Arc<dyn CheckpointSaver>,
    ) -> Result<Self> {
        let topology = build_topology(model, search)?;
        Ok(Self {
            engine: Engine::new(topology, research_schema(), saver),
        })
    }

    /// Wire OpenAI, Tavily and the SQLite checkpoint store from configuration
    pub async fn from_config(config: &ResearchConfig) -> Result<Self> {
        let model = OpenAiChatModel::new(
            config.openai_api_key.clone(),
            config.openai_base_url.clone(),
            config.openai_model.clone(),
            config.request_timeout,
        )
        .map_err(|e| ResearchError::config(format!("Failed to create OpenAI client: {}", e)))?;
        let search = TavilySearch::new(
            config.tavily_api_key.clone(),
            config.tavily_base_url.clone(),
            config.max_search_results,
            config.request_timeout,
        )
        .map_err(|e| ResearchError::config(format!("Failed to create Tavily client: {}", e)))?;
        let saver = SqliteCheckpointSaver::open(&config.checkpoint_db_path).await?;

        tracing::info!(
            model = %config.openai_model,
            db = %config.checkpoint_db_path.display(),
            "Research service ready"
        );
        Self::new(Arc::new(model), Arc::new(search), Arc::new(saver))
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Start a new session and run it until it pauses or halts
    #[tracing::instrument(skip(self, query))]
    pub async fn start(
        &self,
        query: &str,
        thread_id: Option<String>,
        enable_hitl: bool,
    ) -> Result<ResearchResponse> {
        let query = query.trim();
        let chars = query.chars().count();
        if !(MIN_QUERY_CHARS..=MAX_QUERY_CHARS).contains(&chars) {
            return Err(ResearchError::InvalidQuery(format!(
                "query must be between {} and {} characters, got {}",
                MIN_QUERY_CHARS, MAX_QUERY_CHARS, chars
            )));
        }

        let thread_id = match thread_id.filter(|id| !id.trim().is_empty()) {
            Some(id) => id,
            None => Uuid::new_v4().to_string()[..8].to_string(),
        };
        if self.engine.state(&thread_id).await?.is_some() {
            return Err(ResearchError::SessionExists(thread_id));
        }

        tracing::info!(thread_id = %thread_id, "Starting research session");
        let config = RunConfig::new().with_interrupts(interrupt_config(enable_hitl));
        let outcome = self.engine.run(&thread_id, initial_input(query), &config).await?;

        ResearchResponse::from_outcome(&thread_id, &outcome)
    }

    /// Current status and state of a session
    pub async fn session(&self, thread_id: &str) -> Result<SessionResponse> {
        let checkpoint = self.latest(thread_id).await?;
        let state = ResearchState::from_value(&checkpoint.state)?;
        Ok(SessionResponse {
            thread_id: thread_id.to_string(),
            status: SessionStatus::derive(&state, last_halt(&checkpoint)),
            latest_sequence: checkpoint.sequence,
            updated_at: checkpoint.ts,
            next_step: checkpoint.metadata.next.clone(),
            state,
        })
    }

    /// Approve (and resume) or reject a paused session.
    ///
    /// Rejection leaves the thread untouched.
    #[tracing::instrument(skip(self, feedback))]
    pub async fn approve(
        &self,
        thread_id: &str,
        approved: bool,
        feedback: Option<String>,
    ) -> Result<ResearchResponse> {
        let checkpoint = self.latest(thread_id).await?;

        if !approved {
            tracing::info!(thread_id, "Research session rejected");
            let state = ResearchState::from_value(&checkpoint.state)?;
            let mut response = ResearchResponse::from_state(thread_id, &state, last_halt(&checkpoint));
            response.status = SessionStatus::Rejected;
            response.message = SessionStatus::Rejected.message().to_string();
            return Ok(response);
        }

        let mut update = StateUpdate::new().with_approval(true);
        if let Some(feedback) = feedback.filter(|f| !f.trim().is_empty()) {
            update = update.with_feedback(feedback);
        }

        let config = RunConfig::new().with_interrupts(interrupt_config(true));
        let outcome = self.engine.run(thread_id, update.into_value()?, &config).await?;

        let mut response = ResearchResponse::from_outcome(thread_id, &outcome)?;
        if response.status == SessionStatus::Completed {
            response.message = "Research completed after approval".to_string();
        } else if response.status != SessionStatus::Failed {
            response.message = "Research continuing".to_string();
        }
        Ok(response)
    }

    /// Checkpoint history of a session, oldest first
    pub async fn checkpoints(&self, thread_id: &str) -> Result<CheckpointListResponse> {
        let checkpoints = self.engine.history(thread_id).await?;
        if checkpoints.is_empty() {
            return Err(ResearchError::not_found(format!("session '{}'", thread_id)));
        }
        Ok(CheckpointListResponse {
            thread_id: thread_id.to_string(),
            checkpoints,
        })
    }

    /// State captured in one checkpoint
    pub async fn checkpoint_state(
        &self,
        thread_id: &str,
        sequence: Sequence,
    ) -> Result<CheckpointStateResponse> {
        let checkpoint = self
            .engine
            .checkpoint(thread_id, sequence)
            .await?
            .ok_or_else(|| {
                ResearchError::not_found(format!("checkpoint {} of session '{}'", sequence, thread_id))
            })?;
        Ok(CheckpointStateResponse {
            thread_id: checkpoint.thread_id,
            sequence: checkpoint.sequence,
            ts: checkpoint.ts,
            state: ResearchState::from_value(&checkpoint.state)?,
            metadata: checkpoint.metadata,
        })
    }

    /// Every known session, most recently updated first
    pub async fn sessions(&self) -> Result<Vec<SessionSummary>> {
        let saver = self.engine.saver();
        let latest = try_join_all(
            saver
                .threads()
                .await?
                .into_iter()
                .map(|thread| {
                    let saver = Arc::clone(&saver);
                    async move { saver.latest(&thread.thread_id).await }
                }),
        )
        .await?;

        let mut summaries = Vec::with_capacity(latest.len());
        for checkpoint in latest.into_iter().flatten() {
            let state = ResearchState::from_value(&checkpoint.state)?;
            summaries.push(SessionSummary {
                status: SessionStatus::derive(&state, last_halt(&checkpoint)),
                user_query: state.user_query,
                thread_id: checkpoint.thread_id,
                latest_sequence: checkpoint.sequence,
                updated_at: checkpoint.ts,
            });
        }
        summaries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(summaries)
    }

    async fn latest(&self, thread_id: &str) -> Result<Checkpoint> {
        self.engine
            .state(thread_id)
            .await?
            .ok_or_else(|| ResearchError::not_found(format!("session '{}'", thread_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> ResearchState {
        ResearchState {
            user_query: "Q".into(),
            ..Default::default()
        }
    }

    fn critique() -> Critique {
        Critique {
            score: 0.9,
            feedback: "ok".into(),
            suggestions: vec![],
            needs_refinement: false,
        }
    }

    #[test]
    fn test_status_derivation() {
        let mut s = state();
        assert_eq!(SessionStatus::derive(&s, None), SessionStatus::Pending);

        s.plan = vec![PlanStep::new(1, "t", "q")];
        assert_eq!(SessionStatus::derive(&s, None), SessionStatus::Researching);

        s.critique = Some(critique());
        assert_eq!(SessionStatus::derive(&s, Some(HaltReason::Paused)), SessionStatus::AwaitingApproval);
        assert_eq!(
            SessionStatus::derive(&s, Some(HaltReason::ForceEnded)),
            SessionStatus::Failed
        );

        s.human_approved = true;
        assert_eq!(SessionStatus::derive(&s, None), SessionStatus::Researching);

        s.final_output = Some("report".into());
        assert_eq!(SessionStatus::derive(&s, Some(HaltReason::Completed)), SessionStatus::Completed);
    }

    #[test]
    fn test_status_serialization() {
        assert_eq!(
            serde_json::to_value(SessionStatus::AwaitingApproval).unwrap(),
            serde_json::json!("awaiting_approval")
        );
    }
}
