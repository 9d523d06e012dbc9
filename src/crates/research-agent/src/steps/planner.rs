use crate::llm::{ChatMessage, ChatModel};
use crate::state::{LogMessage, PlanStep, ResearchState, StateUpdate};
use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;
use std::sync::{Arc, LazyLock};
use taskgraph_core::{Result, Step};

const TEMPERATURE: f32 = 0.2;

const SYSTEM_PROMPT: &str = "You are a research planning expert. Break the user's research \
query into clear, actionable sub-tasks, each with a search query optimized for web search.

Answer with a numbered plan in exactly this format:
STEP 1: [Description]
SEARCH: [Search query]

STEP 2: [Description]
SEARCH: [Search query]

Use 3-5 steps depending on complexity. Each step should build on the previous ones \
so that together they answer the query comprehensively.";

static STEP_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^[*#\s]*step\b[^:]*:[*\s]*(.*)$").unwrap());

static SEARCH_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^[*#\s]*search[*\s]*:[*\s]*(.*)$").unwrap());

/// Turns the query, or the previous plan plus its critique, into a plan
pub struct PlannerStep {
    model: Arc<dyn ChatModel>,
}

impl PlannerStep {
    pub fn new(model: Arc<dyn ChatModel>) -> Self {
        Self { model }
    }

    fn prompt(state: &ResearchState) -> String {
        let critique = match &state.critique {
            Some(c) if c.needs_refinement && !state.plan.is_empty() => c,
            _ => return format!("Research Query: {}", state.user_query),
        };

        let previous: Vec<String> = state
            .plan
            .iter()
            .map(|s| format!("Step {}: {}", s.step_id, s.task))
            .collect();
        let focus = if critique.suggestions.is_empty() {
            "being more specific and comprehensive".to_string()
        } else {
            critique.suggestions.iter().take(3).cloned().collect::<Vec<_>>().join(", ")
        };

        format!(
            "The previous research plan did not fully answer the query.\n\n\
             Original Query: {}\n\n\
             Previous Plan:\n{}\n\n\
             Critique Feedback: {}\n\
             Suggestions: {}\n\n\
             Create an IMPROVED research plan that addresses the gaps identified.\n\
             Focus on: {}",
            state.user_query,
            previous.join("\n"),
            critique.feedback,
            critique.suggestions.join(", "),
            focus
        )
    }
}

/// Parse `STEP n: ...` / `SEARCH: ...` pairs.
///
/// A step is kept only when both its description and its search query are
/// non-empty. Steps are numbered from 1 in the order they appear.
pub fn parse_plan(response: &str) -> Vec<PlanStep> {
    let mut steps = Vec::new();
    let mut step_id = 0u32;
    let mut task = String::new();
    let mut query = String::new();

    let mut flush = |step_id: u32, task: &mut String, query: &mut String| {
        if !task.is_empty() && !query.is_empty() {
            steps.push(PlanStep::new(step_id, task.clone(), query.clone()));
        }
        task.clear();
        query.clear();
    };

    for line in response.lines().map(str::trim).filter(|l| !l.is_empty()) {
        if let Some(caps) = STEP_LINE.captures(line) {
            flush(step_id, &mut task, &mut query);
            step_id += 1;
            task = caps[1].trim_end_matches('*').trim().to_string();
        } else if let Some(caps) = SEARCH_LINE.captures(line) {
            query = caps[1].trim_end_matches('*').trim().to_string();
        }
    }
    flush(step_id, &mut task, &mut query);

    steps
}

fn fallback_plan(query: &str) -> Vec<PlanStep> {
    vec![PlanStep::new(1, format!("Research: {}", query), query)]
}

#[async_trait]
impl Step for PlannerStep {
    #[tracing::instrument(name = "planner", skip_all)]
    async fn run(&self, state: &Value) -> Result<Value> {
        let state = ResearchState::from_value(state)?;
        let messages = [ChatMessage::system(SYSTEM_PROMPT), ChatMessage::user(Self::prompt(&state))];

        let (plan, log) = match self.model.complete(&messages, TEMPERATURE).await {
            Ok(response) => {
                let mut plan = parse_plan(&response);
                if plan.is_empty() {
                    tracing::warn!("Planner response had no usable steps, using fallback plan");
                    plan = fallback_plan(&state.user_query);
                }
                (plan, LogMessage::assistant(response))
            }
            Err(e) => {
                tracing::warn!(error = %e, "Planner call failed, using fallback plan");
                (
                    fallback_plan(&state.user_query),
                    LogMessage::system(format!("Planning failed: {}", e)),
                )
            }
        };

        tracing::info!(steps = plan.len(), revision = state.revision_count, "Plan created");

        Ok(StateUpdate::new()
            .with_plan(plan)
            .with_plan_cursor(0)
            .with_log(log)
            .into_value()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::Critique;

    #[test]
    fn test_parse_plan() {
        let response = "Here is the plan.\n\
            STEP 1: Survey async runtimes\n\
            SEARCH: rust async runtime comparison\n\
            \n\
            STEP 2: Look at benchmarks\n\
            SEARCH: tokio vs async-std benchmarks\n";
        let plan = parse_plan(response);
        assert_eq!(plan.len(), 2);
        assert_eq!(plan[0].step_id, 1);
        assert_eq!(plan[0].task, "Survey async runtimes");
        assert_eq!(plan[1].query, "tokio vs async-std benchmarks");
    }

    #[test]
    fn test_parse_plan_markdown_and_incomplete_steps() {
        let response = "**STEP 1:** Background\n\
            **SEARCH:** history of rust\n\
            STEP 2: no query here\n\
            step 3: Ecosystem\n\
            search: crates.io growth";
        let plan = parse_plan(response);
        assert_eq!(plan.len(), 2);
        assert_eq!(plan[0].task, "Background");
        assert_eq!(plan[0].query, "history of rust");
        assert_eq!(plan[1].step_id, 3);
        assert_eq!(plan[1].query, "crates.io growth");
    }

    #[test]
    fn test_parse_plan_garbage() {
        assert!(parse_plan("I cannot help with that.").is_empty());
        assert!(parse_plan("").is_empty());
    }

    #[test]
    fn test_refinement_prompt() {
        let state = ResearchState {
            user_query: "Q".into(),
            plan: vec![PlanStep::new(1, "first", "q1")],
            critique: Some(Critique {
                score: 0.4,
                feedback: "too shallow".into(),
                suggestions: vec!["a".into(), "b".into(), "c".into(), "d".into()],
                needs_refinement: true,
            }),
            ..Default::default()
        };
        let prompt = PlannerStep::prompt(&state);
        assert!(prompt.contains("Step 1: first"));
        assert!(prompt.contains("Critique Feedback: too shallow"));
        assert!(prompt.ends_with("Focus on: a, b, c"));

        let fresh = ResearchState {
            user_query: "Q".into(),
            ..Default::default()
        };
        assert_eq!(PlannerStep::prompt(&fresh), "Research Query: Q");
    }
}
