use crate::search::SearchTool;
use crate::state::{ResearchResult, ResearchState, StateUpdate, StepStatus};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use taskgraph_core::{Result, Step};

/// Executes the plan step under the cursor and advances the cursor
pub struct ResearcherStep {
    search: Arc<dyn SearchTool>,
}

impl ResearcherStep {
    pub fn new(search: Arc<dyn SearchTool>) -> Self {
        Self { search }
    }
}

#[async_trait]
impl Step for ResearcherStep {
    #[tracing::instrument(name = "researcher", skip_all)]
    async fn run(&self, state: &Value) -> Result<Value> {
        let state = ResearchState::from_value(state)?;
        let cursor = state.plan_cursor;
        let Some(step) = state.current_step() else {
            tracing::debug!(cursor, plan = state.plan.len(), "No plan step left to research");
            return Ok(json!({}));
        };

        let query = step.search_query().to_string();
        tracing::info!(step_id = step.step_id, %query, "Researching");

        let (result, status) = match self.search.search(&query).await {
            Ok(hits) => {
                let relevance_score = if hits.is_empty() {
                    0.0
                } else {
                    hits.iter().map(|h| h.score).sum::<f64>() / hits.len() as f64
                };
                let findings = hits
                    .iter()
                    .filter(|h| !h.content.is_empty())
                    .map(|h| h.content.clone())
                    .collect();
                let sources = hits
                    .iter()
                    .filter(|h| !h.url.is_empty())
                    .map(|h| h.url.clone())
                    .collect();
                (
                    ResearchResult {
                        step_id: step.step_id,
                        query,
                        findings,
                        sources,
                        relevance_score,
                    },
                    StepStatus::Completed,
                )
            }
            Err(e) => {
                tracing::warn!(step_id = step.step_id, error = %e, "Search failed");
                (
                    ResearchResult {
                        step_id: step.step_id,
                        query,
                        findings: vec![format!("Search failed: {}", e)],
                        sources: Vec::new(),
                        relevance_score: 0.0,
                    },
                    StepStatus::Failed,
                )
            }
        };

        let mut plan = state.plan.clone();
        plan[cursor].status = status;

        Ok(StateUpdate::new()
            .with_plan(plan)
            .with_plan_cursor(cursor + 1)
            .with_finding(result)
            .into_value()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SearchError;
    use crate::search::SearchHit;
    use crate::state::PlanStep;

    struct FixedSearch(std::result::Result<Vec<SearchHit>, String>);

    #[async_trait]
    impl SearchTool for FixedSearch {
        async fn search(&self, _query: &str) -> std::result::Result<Vec<SearchHit>, SearchError> {
            self.0.clone().map_err(SearchError::ProviderError)
        }
    }

    fn state_with_plan(cursor: usize) -> Value {
        serde_json::to_value(ResearchState {
            user_query: "Q".into(),
            plan: vec![PlanStep::new(1, "first", "q1"), PlanStep::new(2, "second", "")],
            plan_cursor: cursor,
            ..Default::default()
        })
        .unwrap()
    }

    fn hit(url: &str, content: &str, score: f64) -> SearchHit {
        SearchHit {
            title: String::new(),
            url: url.into(),
            content: content.into(),
            score,
        }
    }

    #[tokio::test]
    async fn test_records_findings_and_advances() {
        let step = ResearcherStep::new(Arc::new(FixedSearch(Ok(vec![
            hit("https://a", "alpha", 0.8),
            hit("", "beta", 0.4),
        ]))));
        let update = step.run(&state_with_plan(0)).await.unwrap();

        assert_eq!(update["plan_cursor"], json!(1));
        assert_eq!(update["plan"][0]["status"], json!("completed"));
        assert_eq!(update["plan"][1]["status"], json!("pending"));
        assert_eq!(update["findings"][0]["findings"], json!(["alpha", "beta"]));
        assert_eq!(update["findings"][0]["sources"], json!(["https://a"]));
        assert!((update["findings"][0]["relevance_score"].as_f64().unwrap() - 0.6).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_uses_task_when_query_empty_and_degrades_on_error() {
        let step = ResearcherStep::new(Arc::new(FixedSearch(Err("quota".into()))));
        let update = step.run(&state_with_plan(1)).await.unwrap();

        assert_eq!(update["plan_cursor"], json!(2));
        assert_eq!(update["plan"][1]["status"], json!("failed"));
        assert_eq!(update["findings"][0]["query"], json!("second"));
        let finding = update["findings"][0]["findings"][0].as_str().unwrap();
        assert!(finding.starts_with("Search failed:"));
        assert!(finding.contains("quota"));
    }

    #[tokio::test]
    async fn test_cursor_past_plan_is_noop() {
        let step = ResearcherStep::new(Arc::new(FixedSearch(Ok(vec![]))));
        let update = step.run(&state_with_plan(2)).await.unwrap();
        assert_eq!(update, json!({}));
    }
}
