//! State schema and per-channel reducers
//!
//! The state of a thread is a JSON object keyed by channel name. Every channel
//! declares how partial updates are merged into it:
//!
//! | Kind | Behavior | Use Case |
//! |------|----------|----------|
//! | [`ChannelKind::LastValue`] | update replaces the value | cursors, flags, current plan |
//! | [`ChannelKind::Topic`] | update array is concatenated | findings, message logs |
//!
//! A step never sees another step's partial update, only the merged state, so
//! the reducer is the single place where concatenation vs replacement is
//! decided.
//!
//! ```rust
//! use taskgraph_core::state::{ChannelSpec, StateSchema};
//! use serde_json::json;
//!
//! let schema = StateSchema::new()
//!     .channel(ChannelSpec::last_value("query").required())
//!     .channel(ChannelSpec::topic("notes"));
//!
//! let mut state = schema.initial_state(&json!({"query": "rust"})).unwrap();
//! schema.apply(&mut state, &json!({"notes": ["a"]})).unwrap();
//! schema.apply(&mut state, &json!({"notes": ["b"]})).unwrap();
//! assert_eq!(state["notes"], json!(["a", "b"]));
//! ```

use crate::error::{GraphError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Merge rule of a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    /// Overwrite: the update replaces the current value
    LastValue,
    /// Append: the update must be an array and is concatenated
    Topic,
}

impl ChannelKind {
    /// Merge `update` into `current` for a channel called `name`
    pub fn reduce(&self, name: &str, current: &mut Value, update: &Value) -> Result<()> {
        match self {
            ChannelKind::LastValue => {
                *current = update.clone();
                Ok(())
            }
            ChannelKind::Topic => {
                let incoming = update.as_array().ok_or_else(|| {
                    GraphError::Validation(format!(
                        "Channel '{}' appends and expects an array update, got {}",
                        name,
                        type_name(update)
                    ))
                })?;
                match current {
                    Value::Array(existing) => existing.extend(incoming.iter().cloned()),
                    // An unset topic starts from the update.
                    Value::Null => *current = Value::Array(incoming.clone()),
                    other => {
                        return Err(GraphError::Validation(format!(
                            "Channel '{}' holds {} instead of an array",
                            name,
                            type_name(other)
                        )))
                    }
                }
                Ok(())
            }
        }
    }
}

/// Declaration of one state channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelSpec {
    pub name: String,
    pub kind: ChannelKind,
    /// Must be present in the initial input of a fresh thread
    pub required: bool,
    /// Value used when a fresh thread's input omits the channel
    pub default: Value,
    /// Once holding a non-null value, any further write is rejected
    #[serde(default)]
    pub write_once: bool,
}

impl ChannelSpec {
    /// Overwriting channel, default `null`
    pub fn last_value(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ChannelKind::LastValue,
            required: false,
            default: Value::Null,
            write_once: false,
        }
    }

    /// Appending channel, default `[]`
    pub fn topic(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ChannelKind::Topic,
            required: false,
            default: Value::Array(Vec::new()),
            write_once: false,
        }
    }

    /// Mark the channel as required in the initial input
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Reject writes once the channel holds a non-null value
    pub fn write_once(mut self) -> Self {
        self.write_once = true;
        self
    }

    /// Set the default value
    pub fn with_default(mut self, default: Value) -> Self {
        self.default = default;
        self
    }
}

/// Ordered set of channel declarations
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateSchema {
    channels: Vec<ChannelSpec>,
}

impl StateSchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a channel, replacing an earlier declaration with the same name
    pub fn channel(mut self, spec: ChannelSpec) -> Self {
        if let Some(existing) = self.channels.iter_mut().find(|c| c.name == spec.name) {
            *existing = spec;
        } else {
            self.channels.push(spec);
        }
        self
    }

    pub fn channels(&self) -> &[ChannelSpec] {
        &self.channels
    }

    pub fn get(&self, name: &str) -> Option<&ChannelSpec> {
        self.channels.iter().find(|c| c.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Build the full state of a fresh thread from its input.
    ///
    /// Every required channel must be present and non-null; every other channel
    /// falls back to its default. Unknown channels are rejected.
    pub fn initial_state(&self, input: &Value) -> Result<Value> {
        let input = as_update_object(input)?;

        for spec in self.channels.iter().filter(|c| c.required) {
            match input.get(&spec.name) {
                Some(value) if !value.is_null() => {}
                _ => {
                    return Err(GraphError::Validation(format!(
                        "Missing required channel '{}'",
                        spec.name
                    )))
                }
            }
        }

        let mut state = Value::Object(
            self.channels
                .iter()
                .map(|c| (c.name.clone(), c.default.clone()))
                .collect(),
        );
        self.apply(&mut state, &Value::Object(input.clone()))?;
        Ok(state)
    }

    /// Merge a partial update into `state` using each channel's reducer.
    ///
    /// Returns the names of the channels the update touched. The update is
    /// validated before anything is written, so a rejected update leaves the
    /// state unchanged. Any write to a write-once channel that already holds
    /// a value is rejected.
    pub fn apply(&self, state: &mut Value, update: &Value) -> Result<Vec<String>> {
        let update = as_update_object(update)?;

        let mut plan = Vec::with_capacity(update.len());
        for (name, value) in &update {
            let spec = self.get(name).ok_or_else(|| {
                GraphError::Validation(format!("Unknown channel '{}'", name))
            })?;
            let is_set = state.get(name).is_some_and(|current| !current.is_null());
            if spec.write_once && is_set {
                return Err(GraphError::Validation(format!(
                    "Channel '{}' is write-once and already set",
                    name
                )));
            }
            if spec.kind == ChannelKind::Topic && !value.is_array() {
                return Err(GraphError::Validation(format!(
                    "Channel '{}' appends and expects an array update, got {}",
                    name,
                    type_name(value)
                )));
            }
            plan.push((spec, value));
        }

        let state = state
            .as_object_mut()
            .ok_or_else(|| GraphError::Validation("State must be an object".to_string()))?;

        let mut touched = Vec::with_capacity(plan.len());
        for (spec, value) in plan {
            let current = state.entry(spec.name.clone()).or_insert(Value::Null);
            spec.kind.reduce(&spec.name, current, value)?;
            touched.push(spec.name.clone());
        }
        Ok(touched)
    }

    /// Non-mutating variant of [`StateSchema::apply`]
    pub fn merge(&self, state: &Value, update: &Value) -> Result<Value> {
        let mut merged = state.clone();
        self.apply(&mut merged, update)?;
        Ok(merged)
    }
}

fn as_update_object(value: &Value) -> Result<Map<String, Value>> {
    match value {
        Value::Object(map) => Ok(map.clone()),
        Value::Null => Ok(Map::new()),
        other => Err(GraphError::Validation(format!(
            "State update must be an object, got {}",
            type_name(other)
        ))),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn schema() -> StateSchema {
        StateSchema::new()
            .channel(ChannelSpec::last_value("query").required())
            .channel(ChannelSpec::last_value("cursor").with_default(json!(0)))
            .channel(ChannelSpec::topic("items"))
    }

    #[test]
    fn test_initial_state_fills_defaults() {
        let state = schema().initial_state(&json!({"query": "q"})).unwrap();
        assert_eq!(state, json!({"query": "q", "cursor": 0, "items": []}));
    }

    #[test]
    fn test_missing_required_channel() {
        let err = schema().initial_state(&json!({"cursor": 2})).unwrap_err();
        assert!(matches!(err, GraphError::Validation(msg) if msg.contains("query")));

        let err = schema().initial_state(&json!({"query": null})).unwrap_err();
        assert!(matches!(err, GraphError::Validation(_)));
    }

    #[test]
    fn test_unknown_channel_rejected() {
        let mut state = schema().initial_state(&json!({"query": "q"})).unwrap();
        let before = state.clone();
        let err = schema()
            .apply(&mut state, &json!({"cursor": 1, "bogus": true}))
            .unwrap_err();
        assert!(matches!(err, GraphError::Validation(msg) if msg.contains("bogus")));
        assert_eq!(state, before);
    }

    #[test]
    fn test_topic_appends_and_last_value_overwrites() {
        let schema = schema();
        let mut state = schema.initial_state(&json!({"query": "q"})).unwrap();

        let touched = schema
            .apply(&mut state, &json!({"items": [1, 2], "cursor": 1}))
            .unwrap();
        assert_eq!(touched.len(), 2);
        schema
            .apply(&mut state, &json!({"items": [3], "cursor": 2}))
            .unwrap();

        assert_eq!(state["items"], json!([1, 2, 3]));
        assert_eq!(state["cursor"], json!(2));
    }

    #[test]
    fn test_topic_requires_array() {
        let schema = schema();
        let mut state = schema.initial_state(&json!({"query": "q"})).unwrap();
        let err = schema.apply(&mut state, &json!({"items": "x"})).unwrap_err();
        assert!(matches!(err, GraphError::Validation(_)));
    }

    #[test]
    fn test_null_update_is_empty() {
        let schema = schema();
        let mut state = schema.initial_state(&json!({"query": "q"})).unwrap();
        assert!(schema.apply(&mut state, &Value::Null).unwrap().is_empty());
        assert!(schema.apply(&mut state, &json!([1])).is_err());
    }

    #[test]
    fn test_write_once_channel_rejects_second_write() {
        let schema = StateSchema::new()
            .channel(ChannelSpec::last_value("query").required().write_once())
            .channel(ChannelSpec::topic("items"));
        let mut state = schema.initial_state(&json!({"query": "original"})).unwrap();
        let before = state.clone();

        let err = schema
            .apply(&mut state, &json!({"query": "replaced", "items": [1]}))
            .unwrap_err();
        assert!(matches!(err, GraphError::Validation(msg) if msg.contains("query")));
        assert_eq!(state, before);

        assert!(schema.apply(&mut state, &json!({"query": null})).is_err());
        schema.apply(&mut state, &json!({"items": [2]})).unwrap();
        assert_eq!(state["query"], json!("original"));
    }

    #[test]
    fn test_redeclaring_channel_replaces_it() {
        let schema = schema().channel(ChannelSpec::topic("cursor"));
        assert_eq!(schema.channels().len(), 3);
        assert_eq!(schema.get("cursor").unwrap().kind, ChannelKind::Topic);
    }

    proptest! {
        #[test]
        fn prop_topic_length_is_sum_of_updates(batches in prop::collection::vec(prop::collection::vec(any::<i32>(), 0..5), 0..10)) {
            let schema = schema();
            let mut state = schema.initial_state(&json!({"query": "q"})).unwrap();
            let mut expected = Vec::new();
            for batch in batches {
                expected.extend(batch.iter().copied());
                schema.apply(&mut state, &json!({"items": batch})).unwrap();
            }
            prop_assert_eq!(state["items"].clone(), json!(expected));
        }
    }
}
