//! Engine error taxonomy.

use thiserror::Error;
use trellis_types::{ErrorKind, MissingKeyError};

/// Failure reported by a task body.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskError {
    /// The task needed a context key that no earlier task produced.
    #[error(transparent)]
    MissingKey(#[from] MissingKeyError),
    #[error("{0}")]
    Failed(String),
}

impl TaskError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("task '{task}' not found in service '{service}'")]
    TaskNotFound { service: String, task: String },
    #[error("task '{task}' of service '{service}' depends on unknown task '{dependency}'")]
    DependencyNotFound {
        service: String,
        task: String,
        dependency: String,
    },
    #[error("dependency cycle in service '{service}': {}", path.join(" -> "))]
    Cycle { service: String, path: Vec<String> },
    #[error("task '{task}' registered twice in '{owner}'")]
    DuplicateTask { owner: String, task: String },
    #[error("entity '{0}' not found")]
    EntityNotFound(String),
    #[error("service '{0}' not found")]
    ServiceNotFound(String),
    #[error("workflow '{workflow}' not found in entity '{entity}'")]
    WorkflowNotFound { entity: String, workflow: String },
    #[error("stage '{stage}' of workflow '{workflow}' is not provided by any service of entity '{entity}'")]
    StageNotFound {
        entity: String,
        workflow: String,
        stage: String,
    },
    #[error("malformed workflow '{workflow}': {reason}")]
    BadWorkflow { workflow: String, reason: String },
    #[error("task '{task}' failed: {source}")]
    Task {
        task: String,
        #[source]
        source: TaskError,
    },
}

impl EngineError {
    /// Category under which this error is reported to callers.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::TaskNotFound { .. } | Self::StageNotFound { .. } => ErrorKind::TaskNotFound,
            Self::DependencyNotFound { .. } => ErrorKind::DependencyNotFound,
            Self::Cycle { .. } => ErrorKind::CycleError,
            Self::DuplicateTask { .. } => ErrorKind::BadTask,
            Self::EntityNotFound(_) => ErrorKind::EntityNotFound,
            Self::ServiceNotFound(_) => ErrorKind::ServiceNotFound,
            Self::WorkflowNotFound { .. } => ErrorKind::WorkflowNotFound,
            Self::BadWorkflow { .. } => ErrorKind::BadWorkflow,
            Self::Task {
                source: TaskError::MissingKey(_),
                ..
            } => ErrorKind::DependencyError,
            Self::Task {
                source: TaskError::Failed(_),
                ..
            } => ErrorKind::TaskError,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cycle_message_lists_path() {
        let err = EngineError::Cycle {
            service: "uno".to_string(),
            path: vec!["A".to_string(), "B".to_string(), "A".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "dependency cycle in service 'uno': A -> B -> A"
        );
        assert_eq!(err.kind(), ErrorKind::CycleError);
    }

    #[test]
    fn task_errors_map_to_distinct_kinds() {
        let missing = EngineError::Task {
            task: "B".to_string(),
            source: MissingKeyError {
                key: "A".to_string(),
            }
            .into(),
        };
        assert_eq!(missing.kind(), ErrorKind::DependencyError);
        assert_eq!(
            missing.to_string(),
            "task 'B' failed: context key 'A' is missing"
        );

        let failed = EngineError::Task {
            task: "B".to_string(),
            source: TaskError::failed("boom"),
        };
        assert_eq!(failed.kind(), ErrorKind::TaskError);
    }
}
