//! Request lifecycle status.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Lifecycle of a request as seen through its response.
///
/// ```text
/// created -> pending -> incomplete -> ... -> complete | completed | error
///                                       \-> finished_with_errors
/// any non-terminal state -> cancelled | stopped
/// ```
///
/// The string forms are part of the wire contract and must not change.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Created,
    Pending,
    #[default]
    Incomplete,
    Complete,
    /// Success marker the server stamps on a request that finished without errors.
    Completed,
    Error,
    FinishedWithErrors,
    Cancelled,
    Stopped,
}

impl Status {
    pub const ALL: [Status; 9] = [
        Status::Created,
        Status::Pending,
        Status::Incomplete,
        Status::Complete,
        Status::Completed,
        Status::Error,
        Status::FinishedWithErrors,
        Status::Cancelled,
        Status::Stopped,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Pending => "pending",
            Self::Incomplete => "incomplete",
            Self::Complete => "complete",
            Self::Completed => "completed",
            Self::Error => "error",
            Self::FinishedWithErrors => "finished_with_errors",
            Self::Cancelled => "cancelled",
            Self::Stopped => "stopped",
        }
    }

    /// Whether a result may no longer be attached.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Completed | Self::Error)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown status '{0}'")]
pub struct UnknownStatusError(String);

impl FromStr for Status {
    type Err = UnknownStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| UnknownStatusError(s.to_string()))
    }
}
