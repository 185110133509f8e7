//! Collections of services.

use serde_json::{Value, json};
use trellis_types::Context;

use crate::capability::CapabilityRegistry;
use crate::error::EngineError;
use crate::service::Service;
use crate::task::Task;

pub const SERVICE_INFO: &str = "service_info";

/// An ordered set of services addressed by name.
///
/// Owns a capability registry that publishes `service_info` to the tasks of
/// every member service.
#[derive(Debug, Clone)]
pub struct ServiceSet {
    owner: String,
    services: Vec<Service>,
    actions: CapabilityRegistry,
}

impl ServiceSet {
    pub fn new(owner: impl Into<String>) -> Self {
        let owner = owner.into();
        Self {
            actions: CapabilityRegistry::new(owner.clone()),
            owner,
            services: Vec::new(),
        }
    }

    #[must_use]
    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn load_services(&mut self, services: impl IntoIterator<Item = Service>) {
        for service in services {
            self.insert(service);
        }
        tracing::debug!(owner = %self.owner, services = ?self.service_names(), "Loaded services");
    }

    /// Add a service, replacing any existing one with the same name.
    pub fn insert(&mut self, service: Service) {
        match self.services.iter_mut().find(|s| s.name() == service.name()) {
            Some(existing) => {
                tracing::warn!(owner = %self.owner, service = service.name(), "Replacing service");
                *existing = service;
            }
            None => self.services.push(service),
        }
    }

    #[must_use]
    pub fn get_service(&self, name: &str) -> Option<&Service> {
        self.services.iter().find(|s| s.name() == name)
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.get_service(name).is_some()
    }

    /// First service (in load order) whose task table holds `task`.
    #[must_use]
    pub fn find_owner_service(&self, task: &str) -> Option<&Service> {
        self.services.iter().find(|s| s.provides(task))
    }

    #[must_use]
    pub fn find_task(&self, task: &str) -> Option<&Task> {
        self.find_owner_service(task)?.get_task(task)
    }

    #[must_use]
    pub fn service_names(&self) -> Vec<String> {
        self.services.iter().map(|s| s.name().to_string()).collect()
    }

    /// `(service, task names)` pairs in load order.
    #[must_use]
    pub fn service_items(&self) -> Vec<(String, Vec<String>)> {
        self.services
            .iter()
            .map(|s| (s.name().to_string(), s.task_names()))
            .collect()
    }

    pub fn services(&self) -> impl Iterator<Item = &Service> {
        self.services.iter()
    }

    pub fn all_tasks(&self) -> impl Iterator<Item = &Task> {
        self.services.iter().flat_map(Service::tasks)
    }

    /// Run `task` in the service that owns it.
    pub fn run_task(&self, task: &str, ctx: &mut Context) -> Result<Value, EngineError> {
        let Some(service) = self.find_owner_service(task) else {
            tracing::warn!(owner = %self.owner, task, "No service provides task");
            return Err(EngineError::TaskNotFound {
                service: self.owner.clone(),
                task: task.to_string(),
            });
        };
        service.run_task(task, ctx)
    }

    #[must_use]
    pub fn actions(&self) -> &CapabilityRegistry {
        &self.actions
    }

    /// Publish `service_info` describing the current members.
    pub fn publish_info(&mut self) {
        let snapshot = Value::Array(
            self.service_items()
                .into_iter()
                .map(|(name, tasks)| json!({ "name": name, "tasks": tasks }))
                .collect(),
        );
        self.actions.register(SERVICE_INFO, "", move |_| snapshot.clone());
    }

    /// Bind every member's tasks against `scope` layered under this set's
    /// own registry.
    pub fn bind_requested(&mut self, scope: &CapabilityRegistry) {
        let merged = scope.layered(&self.actions);
        for service in &mut self.services {
            service.bind_requested(&merged);
        }
    }

    pub fn reset(&mut self) {
        self.services.clear();
        self.actions = CapabilityRegistry::new(self.owner.clone());
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.services.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::ServiceDefinition;

    fn service(name: &str, tasks: &[&'static str]) -> Service {
        let impls = tasks
            .iter()
            .map(|&t| Task::new(t, move |_, _| Ok(json!(t))))
            .collect();
        Service::from_definition(ServiceDefinition::new(name, tasks.iter().copied()), impls)
            .unwrap()
    }

    fn set() -> ServiceSet {
        let mut set = ServiceSet::new("shared");
        set.load_services([service("uno", &["A", "B"]), service("status", &["Info"])]);
        set
    }

    #[test]
    fn lookups_scan_members_in_order() {
        let set = set();
        assert_eq!(set.service_names(), ["uno", "status"]);
        assert_eq!(set.find_owner_service("Info").unwrap().name(), "status");
        assert_eq!(set.find_task("B").unwrap().name(), "B");
        assert!(set.find_task("Z").is_none());
        assert_eq!(set.all_tasks().count(), 3);
    }

    #[test]
    fn run_task_routes_to_owner() {
        let set = set();
        let mut ctx = Context::new();
        assert_eq!(set.run_task("Info", &mut ctx).unwrap(), json!("Info"));

        let err = set.run_task("Nope", &mut ctx).unwrap_err();
        assert!(matches!(err, EngineError::TaskNotFound { .. }));
    }

    #[test]
    fn service_info_lists_members() {
        let mut set = set();
        set.publish_info();
        let info = set.actions().invoke(SERVICE_INFO, &[]);
        assert_eq!(
            info,
            json!([
                {"name": "uno", "tasks": ["A", "B"]},
                {"name": "status", "tasks": ["Info"]},
            ])
        );
    }

    #[test]
    fn reset_clears_members_and_info() {
        let mut set = set();
        set.publish_info();
        set.reset();
        assert!(set.is_empty());
        assert!(!set.actions().contains(SERVICE_INFO));
    }
}
