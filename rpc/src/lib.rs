//! Identity-tagged request/response transport for Trellis.
//!
//! - [`codec`]: header-delimited frames carrying a sequence number
//! - [`Router`]: decode, route to the orchestrator, encode
//! - [`Server`]: TCP listener funnelling every connection into one router
//! - [`Client`], [`RequestQueue`], [`SyncClient`]: the calling side

#![allow(clippy::missing_errors_doc)]

pub mod codec;
mod client;
mod router;
mod server;

pub use client::{Client, DEFAULT_REQUEST_TIMEOUT, HISTORY_LIMIT, RequestQueue, SyncClient};
pub use router::{
    AVAILABLE_TASKS, ClientRecord, DEFAULT_MAX_TRANSACTIONS, Reloader, Router, Transaction, encode,
};
pub use server::{Server, ServerHandle};
