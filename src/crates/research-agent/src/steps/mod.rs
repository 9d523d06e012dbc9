//! The four research steps.
//!
//! Each step reads a [`ResearchState`](crate::state::ResearchState) snapshot
//! and returns a partial update. A failed model or search call never aborts
//! the run: the step degrades to a valid update and logs what went wrong.

mod planner;
mod researcher;
mod reviewer;
mod writer;

pub use planner::{parse_plan, PlannerStep};
pub use researcher::ResearcherStep;
pub use reviewer::{parse_critique, ReviewerStep};
pub use writer::WriterStep;

/// Truncate to at most `max` characters, on a char boundary
pub(crate) fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
