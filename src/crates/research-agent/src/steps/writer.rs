use crate::llm::{ChatMessage, ChatModel};
use crate::state::{LogMessage, ResearchState, StateUpdate};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use taskgraph_core::{Result, Step};

const TEMPERATURE: f32 = 0.3;

const SYSTEM_PROMPT: &str = "You are an expert research synthesizer. Write a comprehensive, \
well-structured answer based on the gathered research.

Guidelines:
1. STRUCTURE: Use clear headings and organize information logically
2. CITATIONS: Reference sources with [Source N]
3. COMPLETENESS: Address every aspect of the original query
4. ACCURACY: Only include information supported by the research

If human feedback is provided, incorporate it.

Format the response as an executive summary, the key findings by topic, \
a conclusion, and the list of sources.";

/// Synthesises the final answer from all findings
pub struct WriterStep {
    model: Arc<dyn ChatModel>,
}

impl WriterStep {
    pub fn new(model: Arc<dyn ChatModel>) -> Self {
        Self { model }
    }

    fn research_text(state: &ResearchState) -> String {
        state
            .findings
            .iter()
            .map(|result| {
                let mut section = format!("\n## Research for: {}\n", result.query);
                for (i, finding) in result.findings.iter().enumerate() {
                    section.push_str(&format!("\n{}. {}\n", i + 1, finding));
                }
                section
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Sources in first-seen order, numbered from 1
    fn sources_text(state: &ResearchState) -> String {
        let mut seen: HashSet<&String> = HashSet::new();
        state
            .findings
            .iter()
            .flat_map(|r| r.sources.iter())
            .filter(|s| seen.insert(*s))
            .enumerate()
            .map(|(i, s)| format!("[{}] {}", i + 1, s))
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn prompt(state: &ResearchState) -> String {
        let mut prompt = format!(
            "Original Query: {}\n\nGathered Research:\n{}\n\nAvailable Sources:\n{}",
            state.user_query,
            Self::research_text(state),
            Self::sources_text(state)
        );
        if let Some(feedback) = state.human_feedback.as_deref().filter(|f| !f.is_empty()) {
            prompt.push_str(&format!("\n\nHuman Feedback to Incorporate:\n{}", feedback));
        }
        prompt.push_str(
            "\n\nSynthesize a comprehensive response that fully addresses the original query.",
        );
        prompt
    }
}

#[async_trait]
impl Step for WriterStep {
    #[tracing::instrument(name = "writer", skip_all)]
    async fn run(&self, state: &Value) -> Result<Value> {
        let state = ResearchState::from_value(state)?;
        let messages = [ChatMessage::system(SYSTEM_PROMPT), ChatMessage::user(Self::prompt(&state))];

        let (output, log) = match self.model.complete(&messages, TEMPERATURE).await {
            Ok(response) => (response.clone(), LogMessage::assistant(response)),
            Err(e) => {
                tracing::warn!(error = %e, "Writer call failed, returning raw findings");
                let output = format!(
                    "Synthesis failed: {}\n\n# Findings for: {}\n{}\n\n## Sources\n{}",
                    e,
                    state.user_query,
                    Self::research_text(&state),
                    Self::sources_text(&state)
                );
                (output, LogMessage::system(format!("Synthesis failed: {}", e)))
            }
        };

        tracing::info!(chars = output.len(), "Final answer written");

        Ok(StateUpdate::new()
            .with_final_output(output)
            .with_log(log)
            .into_value()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::ResearchResult;

    fn result(step_id: u32, findings: &[&str], sources: &[&str]) -> ResearchResult {
        ResearchResult {
            step_id,
            query: format!("q{}", step_id),
            findings: findings.iter().map(|s| s.to_string()).collect(),
            sources: sources.iter().map(|s| s.to_string()).collect(),
            relevance_score: 0.0,
        }
    }

    #[test]
    fn test_prompt_dedups_sources_and_includes_feedback() {
        let state = ResearchState {
            user_query: "Q".into(),
            findings: vec![
                result(1, &["alpha", "beta"], &["https://a", "https://b"]),
                result(2, &["gamma"], &["https://b", "https://c"]),
            ],
            human_feedback: Some("focus on safety".into()),
            ..Default::default()
        };
        let prompt = WriterStep::prompt(&state);

        assert!(prompt.contains("## Research for: q1"));
        assert!(prompt.contains("\n2. beta\n"));
        assert!(prompt.contains("[1] https://a\n[2] https://b\n[3] https://c"));
        assert!(prompt.contains("Human Feedback to Incorporate:\nfocus on safety"));
    }

    #[test]
    fn test_prompt_without_feedback() {
        let state = ResearchState {
            user_query: "Q".into(),
            human_feedback: Some(String::new()),
            ..Default::default()
        };
        assert!(!WriterStep::prompt(&state).contains("Human Feedback"));
    }
}
