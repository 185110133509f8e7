//! Entities and the workflow engine.

use serde_json::{Map, Value, json};
use trellis_types::{Context, WORKFLOW_KEY};

use crate::capability::CapabilityRegistry;
use crate::error::EngineError;
use crate::service::Service;
use crate::services::ServiceSet;

pub const ENTITY_INFO: &str = "entity_info";

const INPUT_KEY: &str = "input";
const RESULT_KEY: &str = "result";
const OPTIONS_KEY: &str = "options";

/// Declarative description of an entity, as read from a definition source.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntityDefinition {
    pub name: String,
    pub description: String,
    /// Service names in use, own and shared.
    pub services: Vec<String>,
    /// `(workflow name, arrow-separated stage chain)` in declaration order.
    pub workflows: Vec<(String, String)>,
}

/// An ordered chain of stage names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workflow {
    name: String,
    stages: Vec<String>,
}

impl Workflow {
    /// Parse `"A -> B -> C"`. Blank stages are rejected.
    pub fn parse(name: impl Into<String>, chain: &str) -> Result<Self, EngineError> {
        let name = name.into();
        let stages: Vec<String> = chain.split("->").map(|s| s.trim().to_string()).collect();
        if stages.iter().any(String::is_empty) {
            return Err(EngineError::BadWorkflow {
                workflow: name,
                reason: format!("empty stage in '{chain}'"),
            });
        }
        Ok(Self { name, stages })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn stages(&self) -> &[String] {
        &self.stages
    }
}

#[derive(Debug, Clone)]
pub struct Entity {
    name: String,
    description: String,
    service_names: Vec<String>,
    workflows: Vec<Workflow>,
    services: ServiceSet,
    actions: CapabilityRegistry,
}

impl Entity {
    /// Build an entity from its definition and its own services. Services the
    /// definition does not name are dropped. Shared services are adopted
    /// afterwards with [`Entity::adopt_service`].
    pub fn from_definition(
        definition: EntityDefinition,
        own_services: Vec<Service>,
    ) -> Result<Self, EngineError> {
        let workflows = definition
            .workflows
            .iter()
            .map(|(name, chain)| Workflow::parse(name.clone(), chain))
            .collect::<Result<Vec<_>, _>>()?;

        let mut services = ServiceSet::new(definition.name.clone());
        for service in own_services {
            if definition.services.iter().any(|s| s == service.name()) {
                services.insert(service);
            } else {
                tracing::debug!(
                    entity = %definition.name,
                    service = service.name(),
                    "Skipping service not used by entity"
                );
            }
        }

        tracing::debug!(entity = %definition.name, "Loaded entity");
        Ok(Self {
            actions: CapabilityRegistry::new(definition.name.clone()),
            name: definition.name,
            description: definition.description,
            service_names: definition.services,
            workflows,
            services,
        })
    }

    /// Copy in a shared service if this entity names it and does not
    /// already carry its own service of that name.
    pub fn adopt_service(&mut self, service: &Service) -> bool {
        let named = self.service_names.iter().any(|s| s == service.name());
        if !named || self.services.contains(service.name()) {
            return false;
        }
        tracing::debug!(entity = %self.name, service = service.name(), "Copying shared service");
        self.services.insert(service.clone());
        true
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    #[must_use]
    pub fn service_names(&self) -> &[String] {
        &self.service_names
    }

    #[must_use]
    pub fn services(&self) -> &ServiceSet {
        &self.services
    }

    #[must_use]
    pub fn workflows(&self) -> &[Workflow] {
        &self.workflows
    }

    #[must_use]
    pub fn get_workflow(&self, name: &str) -> Option<&Workflow> {
        self.workflows.iter().find(|w| w.name == name)
    }

    #[must_use]
    pub fn actions(&self) -> &CapabilityRegistry {
        &self.actions
    }

    pub fn actions_mut(&mut self) -> &mut CapabilityRegistry {
        &mut self.actions
    }

    /// Summary published through `entity_info`.
    #[must_use]
    pub fn entity_info(&self) -> Value {
        json!({
            "name": self.name,
            "description": self.description,
            "services": self.services.service_names(),
            "workflows": self.workflows.iter().map(Workflow::name).collect::<Vec<_>>(),
        })
    }

    /// Publish `entity_info` and `service_info` for this entity's scope.
    pub fn publish_info(&mut self) {
        let info = self.entity_info();
        self.actions.register(ENTITY_INFO, "", move |_| info.clone());
        self.services.publish_info();
    }

    /// Bind every task against `scope` layered under this entity's registry.
    pub fn bind_requested(&mut self, scope: &CapabilityRegistry) {
        let merged = scope.layered(&self.actions);
        self.services.bind_requested(&merged);
    }

    /// Run a workflow against a fresh context.
    ///
    /// The context starts as `{"workflow": {"input": {}, "result": {}}}`.
    /// Each stage's result lands in `workflow.result[stage]`, and the previous
    /// stage's result is copied to `workflow.input[stage]` before it runs.
    /// Non-empty step options are exposed as `workflow.options`.
    pub fn run_workflow(
        &self,
        name: &str,
        step_options: &Map<String, Value>,
    ) -> Result<Context, EngineError> {
        let workflow = self
            .get_workflow(name)
            .ok_or_else(|| EngineError::WorkflowNotFound {
                entity: self.name.clone(),
                workflow: name.to_string(),
            })?;
        tracing::debug!(
            entity = %self.name,
            workflow = name,
            stages = ?workflow.stages,
            "Running workflow"
        );

        let mut ctx = Context::new();
        let mut section = json!({ INPUT_KEY: {}, RESULT_KEY: {} });
        if !step_options.is_empty() {
            section[OPTIONS_KEY] = Value::Object(step_options.clone());
        }
        ctx.insert(WORKFLOW_KEY, section);

        let mut previous: Option<&str> = None;
        for stage in &workflow.stages {
            if self.services.find_owner_service(stage).is_none() {
                return Err(EngineError::StageNotFound {
                    entity: self.name.clone(),
                    workflow: name.to_string(),
                    stage: stage.clone(),
                });
            }

            let carried =
                previous.and_then(|prev| workflow_map(&mut ctx, RESULT_KEY).get(prev).cloned());
            if let Some(value) = carried {
                workflow_map(&mut ctx, INPUT_KEY).insert(stage.clone(), value);
            }

            let result = self.services.run_task(stage, &mut ctx)?;
            workflow_map(&mut ctx, RESULT_KEY).insert(stage.clone(), result);
            previous = Some(stage.as_str());
        }

        Ok(ctx)
    }
}

/// `ctx.workflow.<key>`, recreated if a task clobbered it.
fn workflow_map<'c>(ctx: &'c mut Context, key: &str) -> &'c mut Map<String, Value> {
    let workflow = object_entry(ctx.as_map_mut(), WORKFLOW_KEY);
    object_entry(workflow, key)
}

fn object_entry<'m>(map: &'m mut Map<String, Value>, key: &str) -> &'m mut Map<String, Value> {
    let slot = map.entry(key).or_insert_with(|| Value::Object(Map::new()));
    if !slot.is_object() {
        *slot = Value::Object(Map::new());
    }
    let Value::Object(inner) = slot else {
        unreachable!("slot was just normalized to an object");
    };
    inner
}

/// The overall result of a finished workflow context: the last stage's
/// entry in `workflow.result`.
#[must_use]
pub fn workflow_result<'c>(ctx: &'c Context, workflow: &Workflow) -> Option<&'c Value> {
    let last = workflow.stages.last()?;
    ctx.get(WORKFLOW_KEY)?.get(RESULT_KEY)?.get(last)
}
