//! Named callables published by an enclosing scope.
//!
//! An orchestrator, an entity, a service collection and a service each own a
//! [`CapabilityRegistry`]. When tasks are bound, the registries of every
//! enclosing scope are layered outermost first, so inner scopes shadow outer
//! ones and a task only ever sees capabilities published above it.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;

/// Callable behind a capability.
pub type ActionFn = Arc<dyn Fn(&[Value]) -> Value + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Action {name} not found. available actions: [{}]", available.join(", "))]
pub struct MissingCapability {
    pub name: String,
    pub available: Vec<String>,
}

#[derive(Clone)]
pub struct Capability {
    signature: String,
    action: ActionFn,
}

impl Capability {
    pub fn new(
        signature: impl Into<String>,
        action: impl Fn(&[Value]) -> Value + Send + Sync + 'static,
    ) -> Self {
        Self {
            signature: signature.into(),
            action: Arc::new(action),
        }
    }

    /// Free-form hint describing the expected arguments.
    #[must_use]
    pub fn signature(&self) -> &str {
        &self.signature
    }

    pub fn call(&self, args: &[Value]) -> Value {
        (self.action)(args)
    }
}

impl fmt::Debug for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Capability")
            .field("signature", &self.signature)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Default)]
pub struct CapabilityRegistry {
    owner: String,
    actions: BTreeMap<String, Capability>,
}

impl CapabilityRegistry {
    pub fn new(owner: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            actions: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Publish a capability. Re-registering a name replaces the previous
    /// callable; the replacement is logged, never rejected.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        signature: impl Into<String>,
        action: impl Fn(&[Value]) -> Value + Send + Sync + 'static,
    ) {
        self.insert(name, Capability::new(signature, action));
    }

    pub fn insert(&mut self, name: impl Into<String>, capability: Capability) {
        let name = name.into();
        if let Some(previous) = self.actions.get(&name) {
            tracing::warn!(
                owner = %self.owner,
                action = %name,
                previous_signature = previous.signature(),
                "Action already registered, overwriting"
            );
        }
        tracing::debug!(owner = %self.owner, action = %name, "Registered action");
        self.actions.insert(name, capability);
    }

    pub fn remove(&mut self, name: &str) -> Option<Capability> {
        self.actions.remove(name)
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Capability> {
        self.actions.get(name)
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.actions.contains_key(name)
    }

    /// Run a capability, reporting absence as a typed error.
    pub fn try_invoke(&self, name: &str, args: &[Value]) -> Result<Value, MissingCapability> {
        match self.actions.get(name) {
            Some(capability) => {
                tracing::debug!(owner = %self.owner, action = name, "Running action");
                Ok(capability.call(args))
            }
            None => Err(MissingCapability {
                name: name.to_string(),
                available: self.list_capabilities(),
            }),
        }
    }

    /// Run a capability. Absence yields a "not found" sentinel value instead
    /// of an error so optional lookups never abort a task.
    pub fn invoke(&self, name: &str, args: &[Value]) -> Value {
        self.try_invoke(name, args)
            .unwrap_or_else(|missing| Value::String(missing.to_string()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.actions.keys().map(String::as_str)
    }

    #[must_use]
    pub fn list_capabilities(&self) -> Vec<String> {
        self.actions.keys().cloned().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Copy every capability of `outer` into this registry. Names already
    /// present are overwritten with a warning, like [`Self::register`].
    pub fn merge_from(&mut self, outer: &CapabilityRegistry) {
        for (name, capability) in &outer.actions {
            self.insert(name.clone(), capability.clone());
        }
    }

    /// Layer `inner` over this registry; entries of `inner` shadow ours.
    #[must_use]
    pub fn layered(&self, inner: &CapabilityRegistry) -> CapabilityRegistry {
        let mut merged = self.clone();
        for (name, capability) in &inner.actions {
            if merged.actions.contains_key(name) {
                tracing::trace!(
                    outer = %self.owner,
                    inner = %inner.owner,
                    action = %name,
                    "Inner scope shadows action"
                );
            }
            merged.actions.insert(name.clone(), capability.clone());
        }
        merged.owner.clone_from(&inner.owner);
        merged
    }

    /// The view a task gets: only the names it requested that `self` provides.
    #[must_use]
    pub fn subset<'a>(
        &self,
        owner: &str,
        requested: impl IntoIterator<Item = &'a String>,
    ) -> CapabilityRegistry {
        let mut view = CapabilityRegistry::new(owner);
        for name in requested {
            match self.actions.get(name) {
                Some(capability) => {
                    view.actions.insert(name.clone(), capability.clone());
                }
                None => {
                    tracing::debug!(
                        task = owner,
                        action = %name,
                        scope = %self.owner,
                        "Requested action not offered by enclosing scopes"
                    );
                }
            }
        }
        view
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn invoke_runs_registered_action() {
        let mut registry = CapabilityRegistry::new("test");
        registry.register("echo", "value", |args| {
            args.first().cloned().unwrap_or(Value::Null)
        });

        assert_eq!(registry.invoke("echo", &[json!("hi")]), json!("hi"));
        assert_eq!(registry.list_capabilities(), vec!["echo"]);
    }

    #[test]
    fn missing_action_returns_sentinel() {
        let mut registry = CapabilityRegistry::new("test");
        registry.register("service_info", "", |_| json!([]));

        let value = registry.invoke("entity_info", &[]);
        assert_eq!(
            value,
            json!("Action entity_info not found. available actions: [service_info]")
        );

        let err = registry.try_invoke("entity_info", &[]).unwrap_err();
        assert_eq!(err.available, vec!["service_info"]);
    }

    #[test]
    fn reregistration_keeps_last_writer() {
        let mut registry = CapabilityRegistry::new("test");
        registry.register("v", "", |_| json!(1));
        registry.register("v", "", |_| json!(2));

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.invoke("v", &[]), json!(2));
    }

    #[test]
    fn merge_from_overwrites_existing_names() {
        let mut outer = CapabilityRegistry::new("outer");
        outer.register("shared", "", |_| json!("outer"));
        outer.register("only_outer", "", |_| json!(1));

        let mut inner = CapabilityRegistry::new("inner");
        inner.register("shared", "", |_| json!("inner"));
        inner.merge_from(&outer);

        assert_eq!(inner.owner(), "inner");
        assert_eq!(inner.invoke("shared", &[]), json!("outer"));
        assert_eq!(inner.list_capabilities(), ["only_outer", "shared"]);
    }

    #[test]
    fn layered_inner_scope_shadows_outer() {
        let mut outer = CapabilityRegistry::new("orchestrator");
        outer.register("entity_info", "", |_| json!("all"));
        outer.register("only_outer", "", |_| json!("outer"));

        let mut inner = CapabilityRegistry::new("einz");
        inner.register("entity_info", "", |_| json!("einz"));

        let merged = outer.layered(&inner);
        assert_eq!(merged.invoke("entity_info", &[]), json!("einz"));
        assert_eq!(merged.invoke("only_outer", &[]), json!("outer"));
        assert_eq!(merged.owner(), "einz");
    }

    #[test]
    fn subset_only_keeps_requested_and_offered() {
        let mut scope = CapabilityRegistry::new("uno");
        scope.register("service_info", "", |_| json!("svc"));
        scope.register("unrelated", "", |_| json!("x"));

        let requested = vec!["service_info".to_string(), "entity_info".to_string()];
        let view = scope.subset("D", &requested);

        assert_eq!(view.list_capabilities(), vec!["service_info"]);
        assert_eq!(view.owner(), "D");
    }
}
