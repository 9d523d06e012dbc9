use super::truncate_chars;
use crate::graph::{MAX_REVISIONS, QUALITY_THRESHOLD};
use crate::llm::{ChatMessage, ChatModel};
use crate::state::{Critique, LogMessage, ResearchState, StateUpdate};
use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;
use std::sync::{Arc, LazyLock};
use taskgraph_core::{Result, Step};

const TEMPERATURE: f32 = 0.1;
const FINDINGS_PER_RESULT: usize = 3;
const FINDING_CHARS: usize = 500;
const SOURCES_PER_RESULT: usize = 3;
const DEFAULT_SCORE: f64 = 0.5;

const SYSTEM_PROMPT: &str = "You are a research quality evaluator. Assess whether the \
gathered research adequately answers the user's query.

Evaluate on:
1. RELEVANCE: Do the results directly address the query?
2. COMPLETENESS: Are all aspects of the query covered?
3. QUALITY: Are the sources credible and the information accurate?
4. DEPTH: Is there enough detail for a comprehensive answer?

Answer in exactly this format:
SCORE: [0.0 to 1.0]
FEEDBACK: [Your detailed assessment]
SUGGESTIONS: [Comma-separated improvements, or \"None\" if score >= 0.8]
SHOULD_REFINE: [YES or NO]

A score of 0.8 or higher means the research is sufficient.";

static FIELD_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^[*#\s]*(score|feedback|suggestions|should_refine)[*\s]*:[*\s]*(.*)$").unwrap()
});

static NUMBER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^-?\d+(?:\.\d+)?|^-?\.\d+").unwrap());

/// Scores the gathered findings and decides whether to refine
pub struct ReviewerStep {
    model: Arc<dyn ChatModel>,
}

impl ReviewerStep {
    pub fn new(model: Arc<dyn ChatModel>) -> Self {
        Self { model }
    }

    fn prompt(state: &ResearchState) -> String {
        let mut summary = Vec::new();
        for result in &state.findings {
            summary.push(format!("\n### Step {}: {}", result.step_id, result.query));
            summary.push("Findings:".to_string());
            for (i, finding) in result.findings.iter().take(FINDINGS_PER_RESULT).enumerate() {
                summary.push(format!("  {}. {}...", i + 1, truncate_chars(finding, FINDING_CHARS)));
            }
            if !result.sources.is_empty() {
                let sources: Vec<&str> = result
                    .sources
                    .iter()
                    .take(SOURCES_PER_RESULT)
                    .map(String::as_str)
                    .collect();
                summary.push(format!("Sources: {}", sources.join(", ")));
            }
        }

        format!(
            "Original Query: {}\n\n\
             Gathered Research:\n{}\n\n\
             Current Revision Count: {}/{}\n\n\
             Evaluate whether this research adequately answers the original query.",
            state.user_query,
            summary.join("\n"),
            state.revision_count,
            MAX_REVISIONS
        )
    }
}

/// Parse a `SCORE/FEEDBACK/SUGGESTIONS/SHOULD_REFINE` evaluation.
///
/// Scores may be written as `0.8`, `0.8/1.0` or `80%`; values above 1 are read
/// as percentages and the result is clamped to `[0, 1]`. Refinement is forced
/// whenever the score is below the quality threshold.
pub fn parse_critique(response: &str) -> Critique {
    let mut score = DEFAULT_SCORE;
    let mut feedback = String::new();
    let mut suggestions = Vec::new();
    let mut should_refine = true;

    for line in response.lines().map(str::trim) {
        let Some(caps) = FIELD_LINE.captures(line) else {
            continue;
        };
        let value = caps[2].trim().trim_end_matches('*').trim();

        match caps[1].to_ascii_lowercase().as_str() {
            "score" => score = parse_score(value).unwrap_or(DEFAULT_SCORE),
            "feedback" => feedback = value.to_string(),
            "suggestions" => {
                suggestions = if value.eq_ignore_ascii_case("none") {
                    Vec::new()
                } else {
                    value
                        .split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(String::from)
                        .collect()
                };
            }
            "should_refine" => should_refine = value.eq_ignore_ascii_case("yes"),
            _ => {}
        }
    }

    if feedback.is_empty() {
        feedback = "No detailed feedback provided.".to_string();
    }

    Critique {
        score,
        feedback,
        suggestions,
        needs_refinement: should_refine || score < QUALITY_THRESHOLD,
    }
}

fn parse_score(value: &str) -> Option<f64> {
    let head = value.replace('%', "");
    let head = head.split('/').next()?.trim();
    let score: f64 = NUMBER.find(head)?.as_str().parse().ok()?;
    let score = if score > 1.0 { score / 100.0 } else { score };
    Some(score.clamp(0.0, 1.0))
}

#[async_trait]
impl Step for ReviewerStep {
    #[tracing::instrument(name = "reviewer", skip_all)]
    async fn run(&self, state: &Value) -> Result<Value> {
        let state = ResearchState::from_value(state)?;
        let messages = [ChatMessage::system(SYSTEM_PROMPT), ChatMessage::user(Self::prompt(&state))];

        let (critique, log) = match self.model.complete(&messages, TEMPERATURE).await {
            Ok(response) => (parse_critique(&response), LogMessage::assistant(response)),
            Err(e) => {
                tracing::warn!(error = %e, "Reviewer call failed, accepting research as is");
                (
                    Critique {
                        score: 0.0,
                        feedback: format!("Evaluation unavailable: {}", e),
                        suggestions: Vec::new(),
                        needs_refinement: false,
                    },
                    LogMessage::system(format!("Evaluation failed: {}", e)),
                )
            }
        };

        let revision_count = if critique.needs_refinement {
            state.revision_count + 1
        } else {
            state.revision_count
        };
        tracing::info!(
            score = critique.score,
            needs_refinement = critique.needs_refinement,
            revision_count,
            "Research reviewed"
        );

        Ok(StateUpdate::new()
            .with_critique(critique)
            .with_revision_count(revision_count)
            .with_log(log)
            .into_value()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::ResearchResult;

    #[test]
    fn test_parse_full_critique() {
        let critique = parse_critique(
            "SCORE: 0.85\n\
             FEEDBACK: Solid coverage.\n\
             SUGGESTIONS: None\n\
             SHOULD_REFINE: NO",
        );
        assert_eq!(critique.score, 0.85);
        assert_eq!(critique.feedback, "Solid coverage.");
        assert!(critique.suggestions.is_empty());
        assert!(!critique.needs_refinement);
    }

    #[test]
    fn test_score_formats() {
        assert_eq!(parse_critique("SCORE: 80%").score, 0.8);
        assert_eq!(parse_critique("SCORE: 0.7/1.0").score, 0.7);
        assert_eq!(parse_critique("**Score:** 0.9").score, 0.9);
        assert_eq!(parse_critique("SCORE: 150").score, 1.0);
        assert_eq!(parse_critique("SCORE: -3").score, 0.0);
        assert_eq!(parse_critique("SCORE: excellent").score, 0.5);
    }

    #[test]
    fn test_defaults_and_forced_refinement() {
        let critique = parse_critique("nothing structured here");
        assert_eq!(critique.score, 0.5);
        assert_eq!(critique.feedback, "No detailed feedback provided.");
        assert!(critique.needs_refinement);

        let critique = parse_critique("SCORE: 0.6\nSHOULD_REFINE: NO\nSUGGESTIONS: more data, newer sources,");
        assert!(critique.needs_refinement);
        assert_eq!(critique.suggestions, vec!["more data", "newer sources"]);
    }

    #[test]
    fn test_prompt_limits_findings() {
        let state = ResearchState {
            user_query: "Q".into(),
            revision_count: 2,
            findings: vec![ResearchResult {
                step_id: 1,
                query: "q1".into(),
                findings: vec!["x".repeat(600), "b".into(), "c".into(), "d".into()],
                sources: vec!["s1".into(), "s2".into(), "s3".into(), "s4".into()],
                relevance_score: 0.0,
            }],
            ..Default::default()
        };
        let prompt = ReviewerStep::prompt(&state);
        assert!(prompt.contains(&format!("1. {}...", "x".repeat(500))));
        assert!(!prompt.contains(&"x".repeat(501)));
        assert!(prompt.contains("3. c..."));
        assert!(!prompt.contains("4. d"));
        assert!(prompt.contains("Sources: s1, s2, s3\n"));
        assert!(!prompt.contains("s4"));
        assert!(prompt.contains("Current Revision Count: 2/3"));
    }
}
