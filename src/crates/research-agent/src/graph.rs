//! Research topology and routing policy.
//!
//! ```text
//! planner -> researcher -+-> researcher            (continue)
//!                        +-> reviewer -+-> planner  (refine, guarded)
//!                                      +-> writer -> END
//!                                      +-> FORCE_END
//! ```

use crate::llm::ChatModel;
use crate::search::SearchTool;
use crate::state::{CRITIQUE, HUMAN_APPROVED, PLAN, PLAN_CURSOR, REVISION_COUNT};
use crate::steps::{PlannerStep, ResearcherStep, ReviewerStep, WriterStep};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use taskgraph_core::{InterruptConfig, LoopGuard, Result, Topology, TopologyBuilder, END, FORCE_END};

pub const PLANNER: &str = "planner";
pub const RESEARCHER: &str = "researcher";
pub const REVIEWER: &str = "reviewer";
pub const WRITER: &str = "writer";

/// Refinement passes allowed before the run is force-ended
pub const MAX_REVISIONS: u32 = 3;

/// Minimum critique score accepted without refinement
pub const QUALITY_THRESHOLD: f64 = 0.8;

pub const BRANCH_CONTINUE: &str = "continue";
pub const BRANCH_EVALUATE: &str = "evaluate";
pub const BRANCH_REFINE: &str = "refine";
pub const BRANCH_SYNTHESIZE: &str = "synthesize";
pub const BRANCH_FORCE_END: &str = "force_end";

/// Keep researching while plan steps remain, then evaluate
pub fn route_after_research(state: &Value) -> String {
    let plan_len = state.get(PLAN).and_then(Value::as_array).map_or(0, Vec::len);
    let cursor = state.get(PLAN_CURSOR).and_then(Value::as_u64).unwrap_or(0) as usize;

    if cursor < plan_len {
        BRANCH_CONTINUE.to_string()
    } else {
        BRANCH_EVALUATE.to_string()
    }
}

/// Force-end past the revision cap, refine weak research, otherwise write
pub fn route_after_review(state: &Value) -> String {
    let revision_count = state.get(REVISION_COUNT).and_then(Value::as_u64).unwrap_or(0);
    if revision_count > u64::from(MAX_REVISIONS) {
        return BRANCH_FORCE_END.to_string();
    }

    let critique = state.get(CRITIQUE);
    let score = critique
        .and_then(|c| c.get("score"))
        .and_then(Value::as_f64)
        .unwrap_or(0.0);
    let needs_refinement = critique
        .and_then(|c| c.get("needs_refinement"))
        .and_then(Value::as_bool)
        .unwrap_or(false);

    if score < QUALITY_THRESHOLD && needs_refinement {
        BRANCH_REFINE.to_string()
    } else {
        BRANCH_SYNTHESIZE.to_string()
    }
}

/// Wire the four research steps into a validated topology
pub fn build_topology(model: Arc<dyn ChatModel>, search: Arc<dyn SearchTool>) -> Result<Topology> {
    let mut builder = TopologyBuilder::new();
    builder
        .add_step(PLANNER, PlannerStep::new(model.clone()))
        .add_step(RESEARCHER, ResearcherStep::new(search))
        .add_step(REVIEWER, ReviewerStep::new(model.clone()))
        .add_step(WRITER, WriterStep::new(model))
        .set_entry(PLANNER)
        .add_edge(PLANNER, RESEARCHER)
        .add_conditional_edge(
            RESEARCHER,
            route_after_research,
            branches(&[(BRANCH_CONTINUE, RESEARCHER), (BRANCH_EVALUATE, REVIEWER)]),
        )
        .add_conditional_edge(
            REVIEWER,
            route_after_review,
            branches(&[
                (BRANCH_REFINE, PLANNER),
                (BRANCH_SYNTHESIZE, WRITER),
                (BRANCH_FORCE_END, FORCE_END),
            ]),
        )
        .with_loop_guard(
            REVIEWER,
            BRANCH_REFINE,
            LoopGuard::new(REVISION_COUNT, i64::from(MAX_REVISIONS)),
        )
        .add_edge(WRITER, END);

    builder.build()
}

/// Pause before the writer until `human_approved` is set, when enabled
pub fn interrupt_config(enable_hitl: bool) -> InterruptConfig {
    if enable_hitl {
        InterruptConfig::new()
            .with_interrupt_before([WRITER])
            .with_approval_channel(HUMAN_APPROVED)
    } else {
        InterruptConfig::new()
    }
}

fn branches(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|(branch, target)| (branch.to_string(), target.to_string()))
        .collect()
}
