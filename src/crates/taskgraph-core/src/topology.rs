//! Static graph definition and validation
//!
//! A [`Topology`] is a set of named steps, a designated entry step and exactly
//! one outgoing edge per step. Edges are either unconditional or routed: a
//! [`Router`] returns a branch key and the edge maps that key to a target.
//!
//! The definition itself is fixed, but traversal may cycle because a routed
//! branch can point back to an earlier step. Termination of such loops is a
//! property of the state, enforced with a [`LoopGuard`] on the looping branch:
//! when the guarded channel exceeds its maximum the branch resolves to
//! [`FORCE_END`] instead of its target.
//!
//! ```text
//!   planner ──► researcher ──┬─ continue ─► researcher
//!      ▲                     └─ evaluate ─► reviewer ──┬─ refine ─────► planner  (guarded)
//!      └────────────────────────────────────────────── ├─ synthesize ─► writer ──► END
//!                                                      └─ force_end ──► FORCE_END
//! ```

use crate::error::{GraphError, Result};
use crate::step::{FnStep, Router, Step};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

/// Identifier of a step
pub type StepId = String;

/// Terminal marker: traversal completed normally
pub const END: &str = "__end__";

/// Terminal marker: traversal was cut off by a loop-safety limit
pub const FORCE_END: &str = "__force_end__";

/// Whether `id` is one of the terminal markers
pub fn is_terminal(id: &str) -> bool {
    id == END || id == FORCE_END
}

/// Upper bound on an integer channel for a looping branch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopGuard {
    pub channel: String,
    pub max: i64,
}

impl LoopGuard {
    pub fn new(channel: impl Into<String>, max: i64) -> Self {
        Self {
            channel: channel.into(),
            max,
        }
    }

    /// True once the channel is strictly greater than `max`.
    ///
    /// A missing or non-integer channel counts as 0.
    pub fn exceeded(&self, state: &Value) -> bool {
        state
            .get(&self.channel)
            .and_then(Value::as_i64)
            .unwrap_or(0)
            > self.max
    }
}

#[derive(Clone)]
enum Edge {
    Direct(StepId),
    Conditional {
        router: Arc<dyn Router>,
        branches: HashMap<String, StepId>,
        guards: HashMap<String, LoopGuard>,
    },
}

/// Builder for [`Topology`]
///
/// ```rust
/// use taskgraph_core::topology::{TopologyBuilder, END};
/// use serde_json::{json, Value};
/// use std::collections::HashMap;
///
/// let mut builder = TopologyBuilder::new();
/// builder
///     .add_fn_step("count", |state: Value| async move {
///         Ok(json!({"n": state["n"].as_i64().unwrap_or(0) + 1}))
///     })
///     .add_conditional_edge(
///         "count",
///         |state: &Value| {
///             if state["n"].as_i64().unwrap_or(0) < 3 { "again".to_string() } else { "done".to_string() }
///         },
///         HashMap::from([
///             ("again".to_string(), "count".to_string()),
///             ("done".to_string(), END.to_string()),
///         ]),
///     )
///     .set_entry("count");
///
/// let topology = builder.build().unwrap();
/// assert_eq!(topology.entry(), "count");
/// ```
#[derive(Default)]
pub struct TopologyBuilder {
    steps: HashMap<StepId, Arc<dyn Step>>,
    edges: HashMap<StepId, Vec<Edge>>,
    guards: Vec<(StepId, String, LoopGuard)>,
    entry: Option<StepId>,
    errors: Vec<String>,
}

impl TopologyBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a step under `id`
    pub fn add_step<S>(&mut self, id: impl Into<StepId>, step: S) -> &mut Self
    where
        S: Step + 'static,
    {
        let id = id.into();
        if is_terminal(&id) {
            self.errors
                .push(format!("Step id '{}' is reserved for a terminal marker", id));
        } else if self.steps.insert(id.clone(), Arc::new(step)).is_some() {
            self.errors.push(format!("Step '{}' is defined twice", id));
        }
        self
    }

    /// Register an async closure as a step
    pub fn add_fn_step<F, Fut>(&mut self, id: impl Into<StepId>, f: F) -> &mut Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        self.add_step(id, FnStep::new(f))
    }

    /// Unconditional edge
    pub fn add_edge(&mut self, from: impl Into<StepId>, to: impl Into<StepId>) -> &mut Self {
        self.edges
            .entry(from.into())
            .or_default()
            .push(Edge::Direct(to.into()));
        self
    }

    /// Routed edge; `branches` maps every key the router may return to a target
    pub fn add_conditional_edge<R>(
        &mut self,
        from: impl Into<StepId>,
        router: R,
        branches: HashMap<String, StepId>,
    ) -> &mut Self
    where
        R: Router + 'static,
    {
        self.edges.entry(from.into()).or_default().push(Edge::Conditional {
            router: Arc::new(router),
            branches,
            guards: HashMap::new(),
        });
        self
    }

    /// Guard the `branch` of the routed edge leaving `from`
    pub fn with_loop_guard(
        &mut self,
        from: impl Into<StepId>,
        branch: impl Into<String>,
        guard: LoopGuard,
    ) -> &mut Self {
        self.guards.push((from.into(), branch.into(), guard));
        self
    }

    /// Set the entry step
    pub fn set_entry(&mut self, id: impl Into<StepId>) -> &mut Self {
        self.entry = Some(id.into());
        self
    }

    /// Validate and freeze the definition
    pub fn build(self) -> Result<Topology> {
        let TopologyBuilder {
            steps,
            mut edges,
            guards,
            entry,
            errors,
        } = self;

        if let Some(first) = errors.into_iter().next() {
            return Err(GraphError::Topology(first));
        }

        let entry = entry.ok_or_else(|| GraphError::Topology("No entry step set".to_string()))?;
        if !steps.contains_key(&entry) {
            return Err(GraphError::Topology(format!(
                "Entry step '{}' does not exist",
                entry
            )));
        }

        let valid_target = |to: &str| steps.contains_key(to) || is_terminal(to);

        for (from, list) in &edges {
            if !steps.contains_key(from) {
                return Err(GraphError::Topology(format!(
                    "Edge source '{}' does not exist",
                    from
                )));
            }
            if list.len() > 1 {
                return Err(GraphError::Topology(format!(
                    "Step '{}' has {} outgoing edges, expected exactly one",
                    from,
                    list.len()
                )));
            }
            for edge in list {
                match edge {
                    Edge::Direct(to) => {
                        if !valid_target(to) {
                            return Err(GraphError::Topology(format!(
                                "Edge target '{}' does not exist",
                                to
                            )));
                        }
                    }
                    Edge::Conditional { branches, .. } => {
                        if branches.is_empty() {
                            return Err(GraphError::Topology(format!(
                                "Routed edge from '{}' declares no branches",
                                from
                            )));
                        }
                        for (branch, to) in branches {
                            if !valid_target(to) {
                                return Err(GraphError::Topology(format!(
                                    "Branch '{}' of '{}' targets missing step '{}'",
                                    branch, from, to
                                )));
                            }
                        }
                    }
                }
            }
        }

        let mut ids: Vec<&StepId> = steps.keys().collect();
        ids.sort();
        for id in ids {
            if !edges.contains_key(id) {
                return Err(GraphError::Topology(format!(
                    "Step '{}' has no outgoing edge",
                    id
                )));
            }
        }

        let mut resolved: HashMap<StepId, Edge> = edges
            .drain()
            .filter_map(|(from, mut list)| list.pop().map(|edge| (from, edge)))
            .collect();

        for (from, branch, guard) in guards {
            match resolved.get_mut(&from) {
                Some(Edge::Conditional {
                    branches,
                    guards: branch_guards,
                    ..
                }) if branches.contains_key(&branch) => {
                    branch_guards.insert(branch, guard);
                }
                _ => {
                    return Err(GraphError::Topology(format!(
                        "Loop guard references unknown branch '{}' of '{}'",
                        branch, from
                    )))
                }
            }
        }

        Ok(Topology {
            steps,
            edges: resolved,
            entry,
        })
    }
}

/// Validated, immutable graph definition
pub struct Topology {
    steps: HashMap<StepId, Arc<dyn Step>>,
    edges: HashMap<StepId, Edge>,
    entry: StepId,
}

impl Topology {
    pub fn entry(&self) -> &str {
        &self.entry
    }

    pub fn step(&self, id: &str) -> Option<Arc<dyn Step>> {
        self.steps.get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.steps.contains_key(id)
    }

    /// Whether `id` is a terminal marker
    pub fn is_terminal(&self, id: &str) -> bool {
        is_terminal(id)
    }

    /// Step ids in sorted order
    pub fn step_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.steps.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    /// Resolve the step that follows `from` given the merged state.
    ///
    /// Returns a step id or a terminal marker. A guarded branch whose guard is
    /// exceeded resolves to [`FORCE_END`].
    pub fn next_of(&self, from: &str, state: &Value) -> Result<StepId> {
        let edge = self
            .edges
            .get(from)
            .ok_or_else(|| GraphError::NotFound(format!("step '{}'", from)))?;

        match edge {
            Edge::Direct(to) => Ok(to.clone()),
            Edge::Conditional {
                router,
                branches,
                guards,
            } => {
                let branch = router.route(state);
                let target = branches.get(&branch).ok_or_else(|| GraphError::Routing {
                    step: from.to_string(),
                    branch: branch.clone(),
                })?;

                if let Some(guard) = guards.get(&branch) {
                    if guard.exceeded(state) {
                        tracing::warn!(
                            step = from,
                            branch = %branch,
                            channel = %guard.channel,
                            max = guard.max,
                            "Loop guard exceeded, forcing end"
                        );
                        return Ok(FORCE_END.to_string());
                    }
                }

                tracing::debug!(step = from, branch = %branch, target = %target, "Routed");
                Ok(target.clone())
            }
        }
    }
}

impl std::fmt::Debug for Topology {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Topology")
            .field("entry", &self.entry)
            .field("steps", &self.step_ids())
            .finish()
    }
}
