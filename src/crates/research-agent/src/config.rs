//! Research assistant configuration.
//!
//! [`ResearchConfig`] is an explicit struct handed to the client and step
//! constructors; nothing reads the environment after start-up.

use crate::error::{ResearchError, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_TAVILY_BASE_URL: &str = "https://api.tavily.com";
pub const DEFAULT_CHECKPOINT_DB: &str = "research_checkpoints.db";
pub const DEFAULT_MAX_SEARCH_RESULTS: usize = 5;
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

#[derive(Clone, Serialize, Deserialize)]
pub struct ResearchConfig {
    pub openai_api_key: String,
    pub tavily_api_key: String,
    pub openai_model: String,
    pub openai_base_url: String,
    pub tavily_base_url: String,
    pub checkpoint_db_path: PathBuf,
    pub max_search_results: usize,
    pub request_timeout: Duration,
}

impl std::fmt::Debug for ResearchConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResearchConfig")
            .field("openai_model", &self.openai_model)
            .field("openai_base_url", &self.openai_base_url)
            .field("tavily_base_url", &self.tavily_base_url)
            .field("checkpoint_db_path", &self.checkpoint_db_path)
            .field("max_search_results", &self.max_search_results)
            .field("request_timeout", &self.request_timeout)
            .finish_non_exhaustive()
    }
}

impl ResearchConfig {
    /// Create a configuration with defaults for everything but the API keys.
    pub fn new(openai_api_key: impl Into<String>, tavily_api_key: impl Into<String>) -> Self {
        Self {
            openai_api_key: openai_api_key.into(),
            tavily_api_key: tavily_api_key.into(),
            openai_model: DEFAULT_OPENAI_MODEL.to_string(),
            openai_base_url: DEFAULT_OPENAI_BASE_URL.to_string(),
            tavily_base_url: DEFAULT_TAVILY_BASE_URL.to_string(),
            checkpoint_db_path: PathBuf::from(DEFAULT_CHECKPOINT_DB),
            max_search_results: DEFAULT_MAX_SEARCH_RESULTS,
            request_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }

    /// Load configuration from environment variables.
    ///
    /// `OPENAI_API_KEY` and `TAVILY_API_KEY` are required. Optional overrides:
    /// `OPENAI_MODEL`, `OPENAI_BASE_URL`, `TAVILY_BASE_URL`,
    /// `CHECKPOINT_DB_PATH`, `RESEARCH_MAX_RESULTS`, `RESEARCH_TIMEOUT_SECS`.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let require = |key: &str| {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| ResearchError::config(format!("{} not set", key)))
        };

        let mut config = Self::new(require("OPENAI_API_KEY")?, require("TAVILY_API_KEY")?);

        if let Some(model) = lookup("OPENAI_MODEL") {
            config.openai_model = model;
        }
        if let Some(url) = lookup("OPENAI_BASE_URL") {
            config.openai_base_url = url;
        }
        if let Some(url) = lookup("TAVILY_BASE_URL") {
            config.tavily_base_url = url;
        }
        if let Some(path) = lookup("CHECKPOINT_DB_PATH") {
            config.checkpoint_db_path = PathBuf::from(path);
        }
        if let Some(max) = parse_var(&lookup, "RESEARCH_MAX_RESULTS")? {
            config.max_search_results = max;
        }
        if let Some(secs) = parse_var::<u64, _>(&lookup, "RESEARCH_TIMEOUT_SECS")? {
            config.request_timeout = Duration::from_secs(secs);
        }

        Ok(config)
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.openai_model = model.into();
        self
    }

    pub fn with_openai_base_url(mut self, url: impl Into<String>) -> Self {
        self.openai_base_url = url.into();
        self
    }

    pub fn with_tavily_base_url(mut self, url: impl Into<String>) -> Self {
        self.tavily_base_url = url.into();
        self
    }

    pub fn with_checkpoint_db_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.checkpoint_db_path = path.into();
        self
    }

    pub fn with_max_search_results(mut self, max: usize) -> Self {
        self.max_search_results = max;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(val) => val
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| ResearchError::config(format!("Failed to parse {}: {}", key, e))),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config =
            ResearchConfig::from_lookup(lookup(&[("OPENAI_API_KEY", "sk"), ("TAVILY_API_KEY", "tv")]))
                .unwrap();
        assert_eq!(config.openai_model, "gpt-4o-mini");
        assert_eq!(config.checkpoint_db_path, PathBuf::from("research_checkpoints.db"));
        assert_eq!(config.max_search_results, 5);
        assert_eq!(config.request_timeout, Duration::from_secs(60));
    }

    #[test]
    fn test_missing_key() {
        let err = ResearchConfig::from_lookup(lookup(&[("OPENAI_API_KEY", "sk")])).unwrap_err();
        assert!(matches!(err, ResearchError::Config(ref msg) if msg.contains("TAVILY_API_KEY")));

        let err = ResearchConfig::from_lookup(lookup(&[("OPENAI_API_KEY", " "), ("TAVILY_API_KEY", "tv")]))
            .unwrap_err();
        assert!(matches!(err, ResearchError::Config(_)));
    }

    #[test]
    fn test_overrides() {
        let config = ResearchConfig::from_lookup(lookup(&[
            ("OPENAI_API_KEY", "sk"),
            ("TAVILY_API_KEY", "tv"),
            ("OPENAI_MODEL", "gpt-4o"),
            ("CHECKPOINT_DB_PATH", "/tmp/r.db"),
            ("RESEARCH_MAX_RESULTS", "3"),
            ("RESEARCH_TIMEOUT_SECS", "10"),
        ]))
        .unwrap();
        assert_eq!(config.openai_model, "gpt-4o");
        assert_eq!(config.checkpoint_db_path, PathBuf::from("/tmp/r.db"));
        assert_eq!(config.max_search_results, 3);
        assert_eq!(config.request_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_bad_number() {
        let err = ResearchConfig::from_lookup(lookup(&[
            ("OPENAI_API_KEY", "sk"),
            ("TAVILY_API_KEY", "tv"),
            ("RESEARCH_MAX_RESULTS", "many"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("RESEARCH_MAX_RESULTS"));
    }

    #[test]
    fn test_debug_hides_keys() {
        let config = ResearchConfig::new("secret-openai", "secret-tavily");
        let shown = format!("{:?}", config);
        assert!(!shown.contains("secret"));
    }
}
