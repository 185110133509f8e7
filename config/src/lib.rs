//! Settings and on-disk definitions for Trellis.
//!
//! A data root holds `settings.toml` plus the service and entity definitions
//! it names:
//!
//! ```text
//! <root>/settings.toml
//! <root>/common_services/<service>/service.toml
//! <root>/entities/<entity>/entity.toml
//! <root>/entities/<entity>/services/<service>/service.toml
//! ```

#![allow(clippy::missing_errors_doc)]

mod definitions;
mod settings;

pub use definitions::{
    DefinitionError, Definitions, build_orchestrator, load_definitions, load_entity_definition,
    load_service_definition,
};
pub use settings::{
    ClientConfig, ConfigError, DATA_ROOT_ENV, SETTINGS_FILE, ServerConfig, Settings, TrellisConfig,
    resolve_data_root,
};
