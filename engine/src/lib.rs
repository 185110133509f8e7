//! Orchestration engine for Trellis.
//!
//! Tasks live in services, services in entities, and one [`Orchestrator`]
//! owns the shared services plus every entity. Capabilities published by an
//! enclosing scope flow down to the tasks that request them.

// Pedantic lint configuration - these are intentional design choices
#![allow(clippy::missing_errors_doc)] // Result-returning functions are self-explanatory

pub mod builtin;
mod capability;
mod entity;
mod error;
mod orchestrator;
mod registry;
mod service;
mod services;
mod task;

pub use capability::{ActionFn, Capability, CapabilityRegistry, MissingCapability};
pub use entity::{ENTITY_INFO, Entity, EntityDefinition, Workflow, workflow_result};
pub use error::{EngineError, TaskError};
pub use orchestrator::{EntitySource, Orchestrator};
pub use registry::TaskRegistry;
pub use service::{Service, ServiceDefinition};
pub use services::{SERVICE_INFO, ServiceSet};
pub use task::{Task, TaskFn};
