//! Error kinds reported in a response's `errors` map.

use std::fmt;

/// Application-level failure categories.
///
/// The string form is the key under which messages are collected in
/// [`Response::errors`](crate::Response::errors).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Payload was not decodable at all.
    InvalidJson,
    /// Payload decoded but does not describe a valid request.
    InvalidRequest,
    /// Neither `entity` nor `service` was supplied.
    BadRequest,
    /// `entity` was supplied without `workflow`.
    BadWorkflow,
    /// `service` was supplied without `task`.
    BadTask,
    EntityNotFound,
    ServiceNotFound,
    WorkflowNotFound,
    TaskNotFound,
    DependencyNotFound,
    CycleError,
    /// A task read a context key no earlier task produced.
    DependencyError,
    /// A task reported its own failure.
    TaskError,
    SerializationError,
}

impl ErrorKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InvalidJson => "InvalidJSON",
            Self::InvalidRequest => "InvalidRequest",
            Self::BadRequest => "BadRequest",
            Self::BadWorkflow => "BadWorkflow",
            Self::BadTask => "BadTask",
            Self::EntityNotFound => "EntityNotFound",
            Self::ServiceNotFound => "ServiceNotFound",
            Self::WorkflowNotFound => "WorkflowNotFound",
            Self::TaskNotFound => "TaskNotFound",
            Self::DependencyNotFound => "DependencyNotFound",
            Self::CycleError => "CycleError",
            Self::DependencyError => "DependencyError",
            Self::TaskError => "TaskError",
            Self::SerializationError => "SerializationError",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<ErrorKind> for String {
    fn from(kind: ErrorKind) -> Self {
        kind.as_str().to_string()
    }
}
