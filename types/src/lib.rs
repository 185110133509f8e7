//! Core domain types for Trellis.
//!
//! This crate contains pure domain types with no IO, no async, and minimal dependencies.
//! The execution [`Context`], the request [`Status`] lifecycle and the wire
//! [`Request`]/[`Response`] contract are shared by the engine, the RPC layer
//! and any client.

// Pedantic lint configuration - these are intentional design choices
#![allow(clippy::missing_errors_doc)] // Result-returning functions are self-explanatory

mod context;
mod error_kind;
mod protocol;
mod status;

pub use context::{Context, MissingKeyError, WORKFLOW_KEY};
pub use error_kind::ErrorKind;
pub use protocol::{
    DecodeError, DefaultProtocol, Extension, Extra, Notes, Protocol, ProtocolError, Request,
    RequestOf, Response, ResponseOf,
};
pub use status::{Status, UnknownStatusError};
