//! Startup-time table of task implementations.

use std::collections::HashMap;

use crate::error::EngineError;
use crate::task::Task;

const OWNER: &str = "task registry";

/// Task implementations keyed by name.
///
/// Populated once at process start; definition sources pick implementations
/// out of it by the names their services list.
#[derive(Debug, Clone, Default)]
pub struct TaskRegistry {
    tasks: HashMap<String, Task>,
}

impl TaskRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, task: Task) -> Result<(), EngineError> {
        let name = task.name().to_string();
        if self.tasks.contains_key(&name) {
            return Err(EngineError::DuplicateTask {
                owner: OWNER.to_string(),
                task: name,
            });
        }
        self.tasks.insert(name, task);
        Ok(())
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Task> {
        self.tasks.get(name)
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.tasks.contains_key(name)
    }

    /// Registered names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tasks.keys().cloned().collect();
        names.sort();
        names
    }

    /// Fresh copies of the named tasks. Unknown names are logged and skipped.
    #[must_use]
    pub fn instantiate(&self, names: &[String]) -> Vec<Task> {
        names
            .iter()
            .filter_map(|name| {
                let task = self.tasks.get(name).cloned();
                if task.is_none() {
                    tracing::warn!(task = %name, "No implementation registered for task");
                }
                task
            })
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}
