//! Services and the dependency resolver.

use std::collections::HashMap;

use serde_json::Value;
use trellis_types::Context;

use crate::capability::CapabilityRegistry;
use crate::error::EngineError;
use crate::task::Task;

/// Declarative description of a service, as read from a definition source.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceDefinition {
    pub name: String,
    pub description: String,
    /// Public task names, in declaration order.
    pub tasks: Vec<String>,
}

impl ServiceDefinition {
    pub fn new<I, S>(name: impl Into<String>, tasks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            description: String::new(),
            tasks: tasks.into_iter().map(Into::into).collect(),
        }
    }
}

/// A named collection of tasks that resolves and runs dependency chains.
///
/// Dependencies resolve only against this service's own task table.
#[derive(Debug, Clone)]
pub struct Service {
    name: String,
    description: String,
    listed: Vec<String>,
    tasks: HashMap<String, Task>,
    actions: CapabilityRegistry,
}

impl Service {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            actions: CapabilityRegistry::new(name.clone()),
            name,
            description: String::new(),
            listed: Vec::new(),
            tasks: HashMap::new(),
        }
    }

    /// Build a service from its definition and the available implementations.
    pub fn from_definition(
        definition: ServiceDefinition,
        implementations: Vec<Task>,
    ) -> Result<Self, EngineError> {
        let mut service = Self::new(definition.name);
        service.description = definition.description;
        service.listed = definition.tasks;
        service.load_tasks(implementations)?;
        Ok(service)
    }

    /// Populate the task table. Implementations the definition does not list
    /// are skipped; a name appearing twice is a load error.
    pub fn load_tasks(&mut self, implementations: Vec<Task>) -> Result<(), EngineError> {
        for mut task in implementations {
            if !self.listed.iter().any(|name| name == task.name()) {
                tracing::debug!(
                    service = %self.name,
                    task = task.name(),
                    "Skipping task not listed by service"
                );
                continue;
            }
            if self.tasks.contains_key(task.name()) {
                return Err(EngineError::DuplicateTask {
                    owner: self.name.clone(),
                    task: task.name().to_string(),
                });
            }
            tracing::debug!(service = %self.name, task = task.name(), "Loaded task");
            task.bind_actions(&self.actions);
            self.tasks.insert(task.name().to_string(), task);
        }

        for name in &self.listed {
            if !self.tasks.contains_key(name) {
                tracing::warn!(service = %self.name, task = %name, "Listed task has no implementation");
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// The service's own capability registry.
    #[must_use]
    pub fn actions(&self) -> &CapabilityRegistry {
        &self.actions
    }

    pub fn actions_mut(&mut self) -> &mut CapabilityRegistry {
        &mut self.actions
    }

    /// Bind every task's requested capabilities against `scope` layered
    /// under this service's own registry.
    pub fn bind_requested(&mut self, scope: &CapabilityRegistry) {
        let merged = scope.layered(&self.actions);
        for task in self.tasks.values_mut() {
            task.bind_actions(&merged);
        }
    }

    #[must_use]
    pub fn get_task(&self, name: &str) -> Option<&Task> {
        self.tasks.get(name)
    }

    #[must_use]
    pub fn provides(&self, name: &str) -> bool {
        self.tasks.contains_key(name)
    }

    /// Loaded task names in declaration order.
    #[must_use]
    pub fn task_names(&self) -> Vec<String> {
        self.listed
            .iter()
            .filter(|name| self.tasks.contains_key(*name))
            .cloned()
            .collect()
    }

    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.listed.iter().filter_map(|name| self.tasks.get(name))
    }

    /// Expand `name` into its execution order: each dependency's full chain
    /// in declared order, then the task itself. Shared dependencies are not
    /// de-duplicated across branches.
    pub fn resolve_chain(&self, name: &str) -> Result<Vec<&Task>, EngineError> {
        let mut chain = Vec::new();
        let mut path = Vec::new();
        self.resolve_into(name, None, &mut path, &mut chain)?;
        tracing::debug!(
            service = %self.name,
            task = name,
            chain = ?chain.iter().map(|t| t.name()).collect::<Vec<_>>(),
            "Resolved task chain"
        );
        Ok(chain)
    }

    fn resolve_into<'a>(
        &'a self,
        name: &str,
        parent: Option<&str>,
        path: &mut Vec<String>,
        chain: &mut Vec<&'a Task>,
    ) -> Result<(), EngineError> {
        if path.iter().any(|visited| visited == name) {
            let mut cycle = path.clone();
            cycle.push(name.to_string());
            return Err(EngineError::Cycle {
                service: self.name.clone(),
                path: cycle,
            });
        }

        let Some(task) = self.tasks.get(name) else {
            return Err(match parent {
                Some(parent) => EngineError::DependencyNotFound {
                    service: self.name.clone(),
                    task: parent.to_string(),
                    dependency: name.to_string(),
                },
                None => EngineError::TaskNotFound {
                    service: self.name.clone(),
                    task: name.to_string(),
                },
            });
        };

        path.push(name.to_string());
        for dependency in task.dependencies() {
            self.resolve_into(dependency, Some(name), path, chain)?;
        }
        path.pop();

        chain.push(task);
        Ok(())
    }

    /// Run `chain` in order against `ctx` and return the last task's result.
    pub fn run_chain(&self, chain: &[&Task], ctx: &mut Context) -> Result<Value, EngineError> {
        let mut last = Value::Null;
        if chain.is_empty() {
            tracing::error!(service = %self.name, "Empty task chain, was the task ever registered?");
            return Ok(last);
        }
        for task in chain {
            tracing::debug!(service = %self.name, task = task.name(), "Running task");
            last = task.run(ctx).map_err(|source| EngineError::Task {
                task: task.name().to_string(),
                source,
            })?;
        }
        Ok(last)
    }

    pub fn run_task(&self, name: &str, ctx: &mut Context) -> Result<Value, EngineError> {
        let chain = self.resolve_chain(name)?;
        self.run_chain(&chain, ctx)
    }
}
