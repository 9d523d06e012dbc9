//! Steps and routers
//!
//! A [`Step`] reads the merged state and returns a partial update; it never
//! mutates the state directly. A [`Router`] inspects the state after a step
//! and names the branch to follow.

use crate::error::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;

/// A unit of work in the topology
///
/// Steps may call external services. Failures of those calls should be turned
/// into a degraded update; an `Err` aborts the whole run without writing a
/// checkpoint for the step.
#[async_trait]
pub trait Step: Send + Sync {
    /// Produce a partial update from the current state
    async fn run(&self, state: &Value) -> Result<Value>;
}

#[async_trait]
impl<S: Step + ?Sized> Step for Arc<S> {
    async fn run(&self, state: &Value) -> Result<Value> {
        (**self).run(state).await
    }
}

/// Adapter turning an async closure into a [`Step`]
///
/// ```rust
/// use taskgraph_core::step::{FnStep, Step};
/// use serde_json::json;
///
/// #[tokio::main]
/// async fn main() {
///     let step = FnStep::new(|state: serde_json::Value| async move {
///         let n = state["n"].as_i64().unwrap_or(0);
///         Ok(json!({"n": n + 1}))
///     });
///     let update = step.run(&json!({"n": 1})).await.unwrap();
///     assert_eq!(update, json!({"n": 2}));
/// }
/// ```
pub struct FnStep<F> {
    f: F,
}

impl<F> FnStep<F> {
    pub fn new<Fut>(f: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync,
        Fut: Future<Output = Result<Value>> + Send,
    {
        Self { f }
    }
}

#[async_trait]
impl<F, Fut> Step for FnStep<F>
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value>> + Send,
{
    async fn run(&self, state: &Value) -> Result<Value> {
        (self.f)(state.clone()).await
    }
}

/// Conditional edge logic: picks a branch key from the current state
pub trait Router: Send + Sync {
    fn route(&self, state: &Value) -> String;
}

impl<F> Router for F
where
    F: Fn(&Value) -> String + Send + Sync,
{
    fn route(&self, state: &Value) -> String {
        self(state)
    }
}
