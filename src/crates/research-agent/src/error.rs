//! Error types for the research assistant.

use taskgraph_core::{CheckpointError, GraphError};
use thiserror::Error;

/// Result type for research operations.
pub type Result<T> = std::result::Result<T, ResearchError>;

/// Errors surfaced by the research service.
#[derive(Debug, Error)]
pub enum ResearchError {
    /// Graph execution failed.
    #[error(transparent)]
    Graph(#[from] GraphError),

    /// Checkpoint store failed outside of a run.
    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    /// Missing or malformed configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Query rejected before a session was created.
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// Session or checkpoint not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// A session with this thread id already exists.
    #[error("Session already exists: {0}")]
    SessionExists(String),

    /// State could not be (de)serialized.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ResearchError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }
}

/// Errors from the language model client.
#[derive(Debug, Error)]
pub enum LlmError {
    /// HTTP request failed.
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    /// API authentication failed.
    #[error("Authentication failed: {0}")]
    AuthenticationError(String),

    /// Rate limit exceeded.
    #[error("Rate limit exceeded: {0}")]
    RateLimitExceeded(String),

    /// Invalid response from provider.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// General provider error.
    #[error("Provider error: {0}")]
    ProviderError(String),
}

/// Errors from the web search client.
#[derive(Debug, Error)]
pub enum SearchError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Authentication failed: {0}")]
    AuthenticationError(String),

    #[error("Search provider error: {0}")]
    ProviderError(String),
}
