//! Request/response wire contract.
//!
//! [`Request`] and [`Response`] carry the base fields every deployment
//! understands. A deployment adds its own fields through an [`Extension`]
//! type that is flattened into the same JSON object, so the server never
//! needs to change when the contract grows. [`Extra`] (the default) keeps
//! any unknown fields around untouched.

use std::collections::BTreeMap;
use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::context::Context;
use crate::error_kind::ErrorKind;
use crate::status::Status;

/// Extra fields a deployment layers on top of the base request or response.
pub trait Extension:
    Serialize + DeserializeOwned + Default + Clone + PartialEq + fmt::Debug + Send + Sync + 'static
{
    /// Reject a decoded message whose extension fields are inconsistent.
    fn validate(&self) -> Result<(), String> {
        Ok(())
    }
}

/// Catch-all extension: unknown fields are preserved as raw JSON.
pub type Extra = Map<String, Value>;

impl Extension for Extra {}

/// Pairs the request and response extension types of one deployment.
pub trait Protocol: Send + Sync + 'static {
    type RequestExt: Extension;
    type ResponseExt: Extension;
}

/// Base contract with no deployment-specific fields.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultProtocol;

impl Protocol for DefaultProtocol {
    type RequestExt = Extra;
    type ResponseExt = Extra;
}

pub type RequestOf<P> = Request<<P as Protocol>::RequestExt>;
pub type ResponseOf<P> = Response<<P as Protocol>::RequestExt, <P as Protocol>::ResponseExt>;

/// Append-only multi-map of message lists keyed by kind.
pub type Notes = BTreeMap<String, Vec<String>>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("cannot set result on a {0} response")]
    TerminalStatus(Status),
    #[error("invalid request: {0}")]
    Invalid(String),
}

/// A payload that could not be turned into a [`Request`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct DecodeError {
    pub kind: ErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Request<Q = Extra> {
    /// Assigned by the server; any client-supplied value is overwritten.
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub entity: Option<String>,
    #[serde(default)]
    pub workflow: Option<String>,
    #[serde(default)]
    pub service: Option<String>,
    #[serde(default)]
    pub task: Option<String>,
    #[serde(default)]
    pub ctx: Context,
    #[serde(default)]
    pub step_options: Map<String, Value>,
    /// Identity of the caller, assigned by the server.
    #[serde(default)]
    pub requester: Option<String>,
    #[serde(flatten)]
    pub extra: Q,
}

impl<Q: Extension> Request<Q> {
    /// Request running `workflow` on `entity`.
    #[must_use]
    pub fn workflow(entity: impl Into<String>, workflow: impl Into<String>) -> Self {
        Self {
            entity: Some(entity.into()),
            workflow: Some(workflow.into()),
            ..Self::default()
        }
    }

    /// Request running `task` of the shared service `service`.
    #[must_use]
    pub fn task(service: impl Into<String>, task: impl Into<String>) -> Self {
        Self {
            service: Some(service.into()),
            task: Some(task.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_ctx(mut self, ctx: Context) -> Self {
        self.ctx = ctx;
        self
    }

    pub fn set_option(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.step_options.insert(key.into(), value.into());
    }

    pub fn validate(&self) -> Result<(), ProtocolError> {
        self.extra.validate().map_err(ProtocolError::Invalid)
    }

    /// Decode and validate a request payload.
    ///
    /// Syntax errors (including non-UTF-8 input) map to `InvalidJSON`;
    /// well-formed JSON with the wrong shape maps to `InvalidRequest`.
    pub fn decode(payload: &[u8]) -> Result<Self, DecodeError> {
        let request: Self = serde_json::from_slice(payload).map_err(|e| {
            let kind = if e.is_data() {
                ErrorKind::InvalidRequest
            } else {
                ErrorKind::InvalidJson
            };
            DecodeError {
                kind,
                message: e.to_string(),
            }
        })?;
        request.validate().map_err(|e| DecodeError {
            kind: ErrorKind::InvalidRequest,
            message: e.to_string(),
        })?;
        Ok(request)
    }
}

impl<Q> fmt::Display for Request<Q> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let show = |field: &Option<String>| field.clone().unwrap_or_else(|| "-".to_string());
        write!(
            f,
            "Request(id={}, entity={}, workflow={}, service={}, task={})",
            show(&self.id),
            show(&self.entity),
            show(&self.workflow),
            show(&self.service),
            show(&self.task),
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Response<Q = Extra, X = Extra> {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub requester: Option<String>,
    #[serde(default)]
    pub status: Status,
    #[serde(default)]
    pub ctx: Context,
    #[serde(default)]
    pub result: Value,
    #[serde(default)]
    pub errors: Notes,
    #[serde(default)]
    pub info: Notes,
    /// The originating request, absent when the payload never decoded.
    #[serde(default)]
    pub request: Option<Request<Q>>,
    #[serde(flatten)]
    pub extra: X,
}

impl<Q: Extension, X: Extension> Response<Q, X> {
    /// The single construction path for a decoded request.
    #[must_use]
    pub fn from_request(request: Request<Q>, status: Status) -> Self {
        Self {
            id: request.id.clone(),
            requester: request.requester.clone(),
            status,
            ctx: request.ctx.clone(),
            result: Value::Null,
            errors: Notes::new(),
            info: Notes::new(),
            request: Some(request),
            extra: X::default(),
        }
    }

    /// Response for a payload that never became a request.
    #[must_use]
    pub fn rejected(requester: Option<String>) -> Self {
        Self {
            requester,
            status: Status::Error,
            ..Self::default()
        }
    }

    /// Attach the result. Fails, leaving `result` untouched, once the
    /// response reached a terminal status.
    pub fn set_result(&mut self, result: impl Into<Value>) -> Result<(), ProtocolError> {
        if self.status.is_terminal() {
            return Err(ProtocolError::TerminalStatus(self.status));
        }
        self.result = result.into();
        Ok(())
    }

    pub fn set_status(&mut self, status: Status) {
        self.status = status;
    }

    pub fn add_error(&mut self, kind: impl Into<String>, message: impl Into<String>) {
        self.errors
            .entry(kind.into())
            .or_default()
            .push(message.into());
    }

    pub fn add_info(&mut self, key: impl Into<String>, message: impl Into<String>) {
        self.info.entry(key.into()).or_default().push(message.into());
    }

    pub fn update_ctx(&mut self, ctx: Context) {
        self.ctx.extend(ctx);
    }

    #[must_use]
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}
