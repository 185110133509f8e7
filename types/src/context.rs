//! Shared execution context.
//!
//! One [`Context`] is created per execution (a resolved task chain or a
//! workflow run) and handed to every task in order. Tasks read keys written
//! by earlier tasks and write their own. There is no isolation between tasks
//! of the same chain; concurrent executions must each own a fresh instance.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Reserved key under which the workflow engine keeps stage inputs and results.
pub const WORKFLOW_KEY: &str = "workflow";

/// A context key a task needed was never written by an earlier task.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("context key '{key}' is missing")]
pub struct MissingKeyError {
    pub key: String,
}

/// String-keyed map of JSON values shared by one execution chain.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Context(Map<String, Value>);

impl Context {
    #[must_use]
    pub fn new() -> Self {
        Self(Map::new())
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut Value> {
        self.0.get_mut(key)
    }

    /// Read a key that an earlier task must have written.
    pub fn require(&self, key: &str) -> Result<&Value, MissingKeyError> {
        self.0.get(key).ok_or_else(|| MissingKeyError {
            key: key.to_string(),
        })
    }

    /// Read a string key that an earlier task must have written.
    ///
    /// Non-string values are rendered with their JSON form so that tasks can
    /// concatenate results without caring how the producer typed them.
    pub fn require_str(&self, key: &str) -> Result<String, MissingKeyError> {
        self.require(key).map(|value| match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
    }

    /// Insert a value, returning the previous one if the key was present.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(key.into(), value.into())
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Merge every entry of `other` into this context, overwriting on collision.
    pub fn extend(&mut self, other: Context) {
        self.0.extend(other.0);
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn as_map_mut(&mut self) -> &mut Map<String, Value> {
        &mut self.0
    }
}

impl From<Map<String, Value>> for Context {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl From<Context> for Value {
    fn from(ctx: Context) -> Self {
        Value::Object(ctx.0)
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Context {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn require_reports_missing_key() {
        let ctx = Context::new();
        let err = ctx.require("A").unwrap_err();
        assert_eq!(err.key, "A");
        assert_eq!(err.to_string(), "context key 'A' is missing");
    }

    #[test]
    fn require_str_renders_non_strings() {
        let mut ctx = Context::new();
        ctx.insert("n", 42);
        ctx.insert("s", "text");
        assert_eq!(ctx.require_str("n").unwrap(), "42");
        assert_eq!(ctx.require_str("s").unwrap(), "text");
    }

    #[test]
    fn serializes_as_plain_object() {
        let ctx: Context = [("A", "A"), ("B", "AB")].into_iter().collect();
        let value = serde_json::to_value(&ctx).unwrap();
        assert_eq!(value, json!({"A": "A", "B": "AB"}));

        let back: Context = serde_json::from_value(value).unwrap();
        assert_eq!(back, ctx);
    }

    #[test]
    fn extend_overwrites_existing_keys() {
        let mut ctx: Context = [("a", 1), ("b", 2)].into_iter().collect();
        ctx.extend([("b", 3), ("c", 4)].into_iter().collect());
        assert_eq!(Value::from(ctx), json!({"a": 1, "b": 3, "c": 4}));
    }
}
