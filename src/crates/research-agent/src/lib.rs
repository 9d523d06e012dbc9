//! # research-agent - Self-Correcting Research Assistant
//!
//! A planner, researcher, reviewer and writer wired into a
//! [`taskgraph_core`] topology. The reviewer scores the gathered findings and
//! loops back to planning while the score stays below
//! [`QUALITY_THRESHOLD`], up to [`MAX_REVISIONS`] refinements. With
//! human-in-the-loop enabled the run pauses before the writer until the
//! session is approved.
//!
//! ## Example
//!
//! ```rust,ignore
//! use research_agent::{ResearchConfig, ResearchService};
//!
//! let config = ResearchConfig::from_env()?;
//! let service = ResearchService::from_config(&config).await?;
//!
//! let started = service.start("How does Rust's borrow checker work?", None, true).await?;
//! let done = service.approve(&started.thread_id, true, Some("Add examples".into())).await?;
//! println!("{}", done.final_output.unwrap_or_default());
//! ```

pub mod config;
pub mod error;
pub mod graph;
pub mod llm;
pub mod search;
pub mod service;
pub mod state;
pub mod steps;

pub use config::ResearchConfig;
pub use error::{LlmError, ResearchError, Result, SearchError};
pub use graph::{
    build_topology, interrupt_config, route_after_research, route_after_review, MAX_REVISIONS,
    QUALITY_THRESHOLD,
};
pub use llm::{ChatMessage, ChatModel, OpenAiChatModel};
pub use search::{SearchHit, SearchTool, TavilySearch};
pub use service::{
    CheckpointListResponse, CheckpointStateResponse, ResearchResponse, ResearchService,
    SessionResponse, SessionStatus, SessionSummary,
};
pub use state::{
    initial_input, research_schema, Critique, LogMessage, PlanStep, ResearchResult, ResearchState,
    StateUpdate, StepStatus,
};
