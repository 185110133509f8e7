//! Atomic units of work.

use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use trellis_types::Context;

use crate::capability::CapabilityRegistry;
use crate::error::TaskError;

/// Body of a task: reads and writes the shared context, may call the
/// capabilities it was bound to.
pub type TaskFn =
    Arc<dyn Fn(&mut Context, &CapabilityRegistry) -> Result<Value, TaskError> + Send + Sync>;

/// A named, synchronous function over the shared [`Context`].
///
/// Dependencies and requested capabilities are plain lists that default to
/// empty. Cloning is cheap: the body is shared, only the bound capability view
/// is copied.
#[derive(Clone)]
pub struct Task {
    name: String,
    description: String,
    dependencies: Vec<String>,
    requested_actions: Vec<String>,
    body: TaskFn,
    actions: CapabilityRegistry,
}

impl Task {
    pub fn new(
        name: impl Into<String>,
        body: impl Fn(&mut Context, &CapabilityRegistry) -> Result<Value, TaskError>
        + Send
        + Sync
        + 'static,
    ) -> Self {
        let name = name.into();
        Self {
            actions: CapabilityRegistry::new(name.clone()),
            name,
            description: String::new(),
            dependencies: Vec::new(),
            requested_actions: Vec::new(),
            body: Arc::new(body),
        }
    }

    #[must_use]
    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    #[must_use]
    pub fn depends_on<I, S>(mut self, dependencies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies
            .extend(dependencies.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn requests<I, S>(mut self, actions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.requested_actions
            .extend(actions.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    #[must_use]
    pub fn dependencies(&self) -> &[String] {
        &self.dependencies
    }

    #[must_use]
    pub fn requested_actions(&self) -> &[String] {
        &self.requested_actions
    }

    /// Capabilities currently bound to this task.
    #[must_use]
    pub fn actions(&self) -> &CapabilityRegistry {
        &self.actions
    }

    pub fn run(&self, ctx: &mut Context) -> Result<Value, TaskError> {
        (self.body)(ctx, &self.actions)
    }

    /// Bind a single capability directly on this task.
    pub fn register_action(
        &mut self,
        name: impl Into<String>,
        signature: impl Into<String>,
        action: impl Fn(&[Value]) -> Value + Send + Sync + 'static,
    ) {
        self.actions.register(name, signature, action);
    }

    pub fn try_run_action(&self, name: &str, args: &[Value]) -> Value {
        self.actions.invoke(name, args)
    }

    /// Replace the bound view with the requested subset of `scope`.
    pub fn bind_actions(&mut self, scope: &CapabilityRegistry) {
        if self.requested_actions.is_empty() {
            return;
        }
        self.actions = scope.subset(&self.name, &self.requested_actions);
        tracing::debug!(
            task = %self.name,
            bound = ?self.actions.list_capabilities(),
            "Bound requested actions"
        );
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("name", &self.name)
            .field("dependencies", &self.dependencies)
            .field("requested_actions", &self.requested_actions)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn optional_lists_default_to_empty() {
        let task = Task::new("A", |_, _| Ok(json!("A")));
        assert!(task.dependencies().is_empty());
        assert!(task.requested_actions().is_empty());
        assert_eq!(task.description(), "");
    }

    #[test]
    fn run_mutates_shared_context() {
        let task = Task::new("B", |ctx, _| {
            let a = ctx.require_str("A")?;
            let value = format!("{a}B");
            ctx.insert("B", value.clone());
            Ok(json!(value))
        })
        .depends_on(["A"]);

        let mut ctx = Context::new();
        ctx.insert("A", "A");
        assert_eq!(task.run(&mut ctx).unwrap(), json!("AB"));
        assert_eq!(ctx.get("B"), Some(&json!("AB")));
    }

    #[test]
    fn missing_key_surfaces_as_task_error() {
        let task = Task::new("B", |ctx, _| Ok(ctx.require("A")?.clone()));
        let err = task.run(&mut Context::new()).unwrap_err();
        assert!(matches!(err, TaskError::MissingKey(_)));
    }

    #[test]
    fn bind_actions_only_exposes_requested_names() {
        let mut scope = CapabilityRegistry::new("uno");
        scope.register("service_info", "", |_| json!(["uno"]));
        scope.register("secret", "", |_| json!("nope"));

        let mut task = Task::new("D", |_, actions| Ok(actions.invoke("service_info", &[])))
            .requests(["service_info"]);
        task.bind_actions(&scope);

        assert_eq!(task.run(&mut Context::new()).unwrap(), json!(["uno"]));
        assert!(!task.actions().contains("secret"));
        assert!(
            task.try_run_action("secret", &[])
                .as_str()
                .is_some_and(|s| s.starts_with("Action secret not found"))
        );
    }
}
