//! Top-level owner of the shared services and every entity.

use serde_json::{Map, Value};
use trellis_types::Context;

use crate::capability::CapabilityRegistry;
use crate::entity::{ENTITY_INFO, Entity, EntityDefinition};
use crate::error::EngineError;
use crate::service::Service;
use crate::services::ServiceSet;
use crate::task::Task;

const OWNER: &str = "orchestrator";

/// An entity definition together with the services it brings along.
pub type EntitySource = (EntityDefinition, Vec<Service>);

/// Owns one shared [`ServiceSet`] plus all [`Entity`] instances.
///
/// Structure is fixed after [`Orchestrator::load`]; [`Orchestrator::reload`]
/// swaps in freshly loaded definitions only once they loaded cleanly.
#[derive(Debug, Clone)]
pub struct Orchestrator {
    shared: ServiceSet,
    entities: Vec<Entity>,
    actions: CapabilityRegistry,
}

impl Default for Orchestrator {
    fn default() -> Self {
        Self::new()
    }
}

impl Orchestrator {
    #[must_use]
    pub fn new() -> Self {
        Self {
            shared: ServiceSet::new("shared"),
            entities: Vec::new(),
            actions: CapabilityRegistry::new(OWNER),
        }
    }

    /// Load shared services, then entities. Each entity copies in the shared
    /// services it names. Capabilities are published and bound once
    /// everything is in place.
    pub fn load(
        &mut self,
        shared: Vec<Service>,
        entities: Vec<EntitySource>,
    ) -> Result<(), EngineError> {
        self.shared.load_services(shared);

        for (definition, own) in entities {
            let mut entity = Entity::from_definition(definition, own)?;
            for service in self.shared.services() {
                entity.adopt_service(service);
            }
            match self.entities.iter_mut().find(|e| e.name() == entity.name()) {
                Some(existing) => {
                    tracing::warn!(entity = entity.name(), "Replacing entity");
                    *existing = entity;
                }
                None => self.entities.push(entity),
            }
        }

        self.publish_info();
        self.bind_capabilities();
        tracing::info!(
            shared = ?self.shared.service_names(),
            entities = ?self.entity_names(),
            "Loaded orchestrator"
        );
        Ok(())
    }

    /// Drop everything and load again. On failure the previous state is
    /// kept untouched.
    pub fn reload(
        &mut self,
        shared: Vec<Service>,
        entities: Vec<EntitySource>,
    ) -> Result<(), EngineError> {
        let mut fresh = self.clone();
        fresh.reset();
        fresh.load(shared, entities)?;
        *self = fresh;
        Ok(())
    }

    pub fn reset(&mut self) {
        tracing::debug!("Resetting orchestrator");
        self.entities.clear();
        self.shared.reset();
        self.actions.remove(ENTITY_INFO);
    }

    fn publish_info(&mut self) {
        let snapshot = Value::Array(self.entities.iter().map(Entity::entity_info).collect());
        self.actions.register(ENTITY_INFO, "", move |_| snapshot.clone());
        self.shared.publish_info();
        for entity in &mut self.entities {
            entity.publish_info();
        }
    }

    /// Push capabilities down to every task: orchestrator, then entity, then
    /// service collection, then service.
    fn bind_capabilities(&mut self) {
        self.shared.bind_requested(&self.actions);
        for entity in &mut self.entities {
            entity.bind_requested(&self.actions);
        }
    }

    /// Publish an orchestrator-level capability and rebind every task.
    pub fn register_action(
        &mut self,
        name: impl Into<String>,
        signature: impl Into<String>,
        action: impl Fn(&[Value]) -> Value + Send + Sync + 'static,
    ) {
        self.actions.register(name, signature, action);
        self.bind_capabilities();
    }

    #[must_use]
    pub fn actions(&self) -> &CapabilityRegistry {
        &self.actions
    }

    /// Run `workflow` in `entity` when it is given and known, otherwise in
    /// the first entity that declares it. `Ok(None)` means no entity has the
    /// workflow.
    pub fn run_workflow(
        &self,
        workflow: &str,
        step_options: &Map<String, Value>,
        entity: Option<&str>,
    ) -> Result<Option<Context>, EngineError> {
        if let Some(entity) = entity.and_then(|name| self.get_entity(name)) {
            return entity.run_workflow(workflow, step_options).map(Some);
        }
        if let Some(name) = entity {
            tracing::info!(entity = name, workflow, "Entity not found, searching all entities");
        }

        match self.entities.iter().find(|e| e.get_workflow(workflow).is_some()) {
            Some(owner) => owner.run_workflow(workflow, step_options).map(Some),
            None => {
                tracing::warn!(workflow, "Workflow not found in any entity");
                Ok(None)
            }
        }
    }

    /// Run a task of a shared service against `ctx`.
    pub fn run_task(
        &self,
        service: &str,
        task: &str,
        ctx: &mut Context,
    ) -> Result<Value, EngineError> {
        let owner = self
            .shared
            .get_service(service)
            .ok_or_else(|| EngineError::ServiceNotFound(service.to_string()))?;
        owner.run_task(task, ctx)
    }

    #[must_use]
    pub fn shared(&self) -> &ServiceSet {
        &self.shared
    }

    #[must_use]
    pub fn get_entity(&self, name: &str) -> Option<&Entity> {
        self.entities.iter().find(|e| e.name() == name)
    }

    pub fn entities(&self) -> impl Iterator<Item = &Entity> {
        self.entities.iter()
    }

    #[must_use]
    pub fn entity_names(&self) -> Vec<String> {
        self.entities.iter().map(|e| e.name().to_string()).collect()
    }

    /// `(entity, workflow)` pairs across all entities.
    #[must_use]
    pub fn workflows(&self) -> Vec<(String, String)> {
        self.entities
            .iter()
            .flat_map(|e| {
                e.workflows()
                    .iter()
                    .map(|w| (e.name().to_string(), w.name().to_string()))
            })
            .collect()
    }

    #[must_use]
    pub fn find_task(&self, task: &str) -> Option<&Task> {
        self.find_owner_service(task)?.get_task(task)
    }

    /// First service with this name, entities first, then the shared set.
    #[must_use]
    pub fn find_service(&self, service: &str) -> Option<&Service> {
        let found = self
            .entities
            .iter()
            .find_map(|e| e.services().get_service(service))
            .or_else(|| self.shared.get_service(service));
        if found.is_none() {
            tracing::warn!(service, "Service not found in any entity");
        }
        found
    }

    #[must_use]
    pub fn find_owner_entity(&self, task: &str) -> Option<&Entity> {
        let found = self
            .entities
            .iter()
            .find(|e| e.services().find_owner_service(task).is_some());
        if found.is_none() {
            tracing::warn!(task, "Owner entity not found");
        }
        found
    }

    #[must_use]
    pub fn find_owner_service(&self, task: &str) -> Option<&Service> {
        let found = self
            .entities
            .iter()
            .find_map(|e| e.services().find_owner_service(task))
            .or_else(|| self.shared.find_owner_service(task));
        if found.is_none() {
            tracing::warn!(task, "Owner service not found");
        }
        found
    }
}
