//! Service and entity definitions read from a data root.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use trellis_engine::{
    EngineError, EntityDefinition, EntitySource, Orchestrator, Service, ServiceDefinition,
    TaskRegistry,
};

use crate::settings::Settings;

pub const COMMON_SERVICES_DIR: &str = "common_services";
pub const ENTITIES_DIR: &str = "entities";
pub const SERVICES_DIR: &str = "services";
pub const SERVICE_FILE: &str = "service.toml";
pub const ENTITY_FILE: &str = "entity.toml";

#[derive(Debug, Error)]
pub enum DefinitionError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error(transparent)]
    Engine(#[from] EngineError),
}

#[derive(Debug, Deserialize)]
struct ServiceFile {
    service: ServiceSection,
}

#[derive(Debug, Deserialize)]
struct ServiceSection {
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    tasks: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct EntityFile {
    entity: EntitySection,
}

#[derive(Debug, Deserialize)]
struct EntitySection {
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    services: Vec<String>,
    #[serde(default)]
    workflows: BTreeMap<String, String>,
}

fn read_toml<T: DeserializeOwned>(path: &Path) -> Result<T, DefinitionError> {
    let content = fs::read_to_string(path).map_err(|source| DefinitionError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&content).map_err(|source| DefinitionError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Parse a `service.toml`:
///
/// ```toml
/// [service]
/// name = "uno"
/// description = "Letters"
/// tasks = ["A", "B", "C", "D"]
/// ```
pub fn load_service_definition(path: &Path) -> Result<ServiceDefinition, DefinitionError> {
    let ServiceFile { service } = read_toml(path)?;
    Ok(ServiceDefinition {
        name: service.name,
        description: service.description,
        tasks: service.tasks,
    })
}

/// Parse an `entity.toml`:
///
/// ```toml
/// [entity]
/// name = "einz"
/// services = ["dos", "status"]
///
/// [entity.workflows]
/// einzy = "EinzyA -> EinzyB"
/// ```
pub fn load_entity_definition(path: &Path) -> Result<EntityDefinition, DefinitionError> {
    let EntityFile { entity } = read_toml(path)?;
    Ok(EntityDefinition {
        name: entity.name,
        description: entity.description,
        services: entity.services,
        workflows: entity.workflows.into_iter().collect(),
    })
}

fn build_service(path: &Path, registry: &TaskRegistry) -> Result<Service, DefinitionError> {
    let definition = load_service_definition(path)?;
    let implementations = registry.instantiate(&definition.tasks);
    tracing::debug!(
        service = %definition.name,
        path = %path.display(),
        "Loaded service definition"
    );
    Ok(Service::from_definition(definition, implementations)?)
}

/// Everything an [`Orchestrator`] needs to load.
#[derive(Debug, Default)]
pub struct Definitions {
    pub shared: Vec<Service>,
    pub entities: Vec<EntitySource>,
}

impl Definitions {
    pub fn load_into(self, orchestrator: &mut Orchestrator) -> Result<(), EngineError> {
        orchestrator.load(self.shared, self.entities)
    }

    pub fn reload_into(self, orchestrator: &mut Orchestrator) -> Result<(), EngineError> {
        orchestrator.reload(self.shared, self.entities)
    }
}

/// Read every definition `settings` names under `data_root`, taking task
/// implementations from `registry`. Named definitions that do not exist on
/// disk are logged and skipped.
pub fn load_definitions(
    data_root: &Path,
    settings: &Settings,
    registry: &TaskRegistry,
) -> Result<Definitions, DefinitionError> {
    let mut definitions = Definitions::default();

    for name in &settings.common_services {
        let path = data_root
            .join(COMMON_SERVICES_DIR)
            .join(name)
            .join(SERVICE_FILE);
        if !path.is_file() {
            tracing::error!(
                service = %name,
                path = %path.display(),
                "Service file does not exist"
            );
            continue;
        }
        definitions.shared.push(build_service(&path, registry)?);
    }

    for name in &settings.entities {
        let entity_dir = data_root.join(ENTITIES_DIR).join(name);
        let path = entity_dir.join(ENTITY_FILE);
        if !path.is_file() {
            tracing::error!(
                entity = %name,
                path = %path.display(),
                "Entity file does not exist"
            );
            continue;
        }
        let definition = load_entity_definition(&path)?;

        let mut own = Vec::new();
        for service in &definition.services {
            let service_path = entity_dir.join(SERVICES_DIR).join(service).join(SERVICE_FILE);
            if service_path.is_file() {
                own.push(build_service(&service_path, registry)?);
            } else if !settings.common_services.contains(service) {
                tracing::warn!(
                    entity = %name,
                    service = %service,
                    "Service is neither defined by the entity nor shared"
                );
            }
        }
        definitions.entities.push((definition, own));
    }

    Ok(definitions)
}

/// Load every definition and hand them to a fresh [`Orchestrator`].
pub fn build_orchestrator(
    data_root: &Path,
    settings: &Settings,
    registry: &TaskRegistry,
) -> Result<Orchestrator, DefinitionError> {
    let mut orchestrator = Orchestrator::new();
    load_definitions(data_root, settings, registry)?.load_into(&mut orchestrator)?;
    Ok(orchestrator)
}
