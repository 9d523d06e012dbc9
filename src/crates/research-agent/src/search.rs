//! Web search seam and the Tavily client.

use crate::error::SearchError;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// One search result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub score: f64,
}

#[async_trait]
pub trait SearchTool: Send + Sync {
    async fn search(&self, query: &str) -> Result<Vec<SearchHit>, SearchError>;
}

/// Tavily search API client
#[derive(Clone)]
pub struct TavilySearch {
    api_key: String,
    base_url: String,
    max_results: usize,
    client: Client,
}

impl std::fmt::Debug for TavilySearch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TavilySearch")
            .field("base_url", &self.base_url)
            .field("max_results", &self.max_results)
            .finish_non_exhaustive()
    }
}

impl TavilySearch {
    pub fn new(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        max_results: usize,
        timeout: Duration,
    ) -> Result<Self, SearchError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            max_results,
            client,
        })
    }
}

#[derive(Serialize)]
struct SearchRequest<'a> {
    api_key: &'a str,
    query: &'a str,
    max_results: usize,
    search_depth: &'a str,
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchHit>,
}

#[async_trait]
impl SearchTool for TavilySearch {
    #[tracing::instrument(skip(self))]
    async fn search(&self, query: &str) -> Result<Vec<SearchHit>, SearchError> {
        let url = format!("{}/search", self.base_url);
        let body = SearchRequest {
            api_key: &self.api_key,
            query,
            max_results: self.max_results,
            search_depth: "advanced",
        };

        let response = self.client.post(&url).json(&body).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(match status.as_u16() {
                401 | 403 => SearchError::AuthenticationError(error_text),
                _ => SearchError::ProviderError(format!("Tavily API error {}: {}", status, error_text)),
            });
        }

        let parsed: SearchResponse = response
            .json()
            .await
            .map_err(|e| SearchError::ProviderError(format!("Malformed response: {}", e)))?;

        tracing::debug!(hits = parsed.results.len(), "Search completed");
        Ok(parsed.results)
    }
}
