//! Turns one inbound payload into one encoded response.
//!
//! The router owns the [`Orchestrator`] and the per-identity transaction
//! logs. It is synchronous: the server feeds it frames one at a time, so a
//! request always runs to completion before the next one starts and reloads
//! never overlap request handling.

use std::collections::{HashMap, VecDeque};
use std::marker::PhantomData;

use serde_json::Value;
use trellis_engine::{EngineError, Orchestrator, workflow_result};
use trellis_types::{
    DefaultProtocol, ErrorKind, Extension, Protocol, RequestOf, Response, ResponseOf, Status,
};
use uuid::Uuid;

/// Info key listing the tasks of the service a direct task request named.
pub const AVAILABLE_TASKS: &str = "available_tasks";

pub const DEFAULT_MAX_TRANSACTIONS: usize = 256;

/// Reloads definitions into the orchestrator in place.
pub type Reloader = Box<dyn FnMut(&mut Orchestrator) -> anyhow::Result<()> + Send>;

/// One handled request as remembered in an identity's log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    pub request_id: Option<String>,
    pub status: Status,
    pub errors: Vec<String>,
}

/// State kept per connected identity.
#[derive(Debug, Clone)]
pub struct ClientRecord {
    uuid: Uuid,
    transactions: VecDeque<Transaction>,
}

impl ClientRecord {
    fn new() -> Self {
        Self {
            uuid: Uuid::new_v4(),
            transactions: VecDeque::new(),
        }
    }

    #[must_use]
    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    pub fn transactions(&self) -> impl Iterator<Item = &Transaction> {
        self.transactions.iter()
    }
}

pub struct Router<P: Protocol = DefaultProtocol> {
    orchestrator: Orchestrator,
    clients: HashMap<String, ClientRecord>,
    max_transactions: usize,
    reloader: Option<Reloader>,
    _protocol: PhantomData<fn() -> P>,
}

impl<P: Protocol> Router<P> {
    #[must_use]
    pub fn new(orchestrator: Orchestrator) -> Self {
        Self {
            orchestrator,
            clients: HashMap::new(),
            max_transactions: DEFAULT_MAX_TRANSACTIONS,
            reloader: None,
            _protocol: PhantomData,
        }
    }

    #[must_use]
    pub fn with_max_transactions(mut self, max: usize) -> Self {
        self.max_transactions = max.max(1);
        self
    }

    /// Reload all definitions after any request that finished with errors.
    #[must_use]
    pub fn reload_on_error(mut self, reloader: Reloader) -> Self {
        self.reloader = Some(reloader);
        self
    }

    #[must_use]
    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    #[must_use]
    pub fn client(&self, identity: &str) -> Option<&ClientRecord> {
        self.clients.get(identity)
    }

    /// Forget a disconnected identity and its transaction log.
    pub fn disconnect(&mut self, identity: &str) -> Option<ClientRecord> {
        let record = self.clients.remove(identity);
        if let Some(record) = &record {
            tracing::debug!(
                identity,
                uuid = %record.uuid,
                transactions = record.transactions.len(),
                "Dropping identity"
            );
        }
        record
    }

    /// Handle one frame body from `identity` and encode the reply.
    pub fn handle(&mut self, identity: &str, payload: &[u8]) -> Vec<u8> {
        let response = self.process(identity, payload);
        encode::<P>(&response)
    }

    /// Handle one frame body from `identity`. Application failures end up in
    /// the response's error map, never as an `Err`.
    pub fn process(&mut self, identity: &str, payload: &[u8]) -> ResponseOf<P> {
        if !self.clients.contains_key(identity) {
            let record = ClientRecord::new();
            tracing::debug!(identity, uuid = %record.uuid, "Tracking new identity");
            self.clients.insert(identity.to_string(), record);
        }

        let response = match RequestOf::<P>::decode(payload) {
            Ok(request) => self.route(identity, request),
            Err(err) => {
                tracing::warn!(identity, error = %err, "Rejected undecodable request");
                let mut response = ResponseOf::<P>::rejected(Some(identity.to_string()));
                response.add_error(err.kind, err.message);
                response
            }
        };

        self.record(identity, &response);

        if response.has_errors() {
            self.reload();
        }
        response
    }

    fn route(&mut self, identity: &str, mut request: RequestOf<P>) -> ResponseOf<P> {
        request.id = Some(Uuid::new_v4().to_string());
        request.requester = Some(identity.to_string());
        tracing::debug!(identity, %request, "Routing request");

        let mut response = ResponseOf::<P>::from_request(request.clone(), Status::Pending);

        if let Some(entity) = request.entity.as_deref() {
            self.run_workflow(entity, &request, &mut response);
        } else if let Some(service) = request.service.as_deref() {
            self.run_task(service, &request, &mut response);
        } else {
            response.add_error(
                ErrorKind::BadRequest,
                "request names neither an entity nor a service",
            );
        }

        let status = if response.has_errors() {
            Status::FinishedWithErrors
        } else {
            Status::Completed
        };
        response.set_status(status);
        response
    }

    fn run_workflow(&self, entity: &str, request: &RequestOf<P>, response: &mut ResponseOf<P>) {
        let Some(workflow) = request.workflow.as_deref() else {
            response.add_error(
                ErrorKind::BadWorkflow,
                format!("no workflow given for entity '{entity}'"),
            );
            return;
        };
        if self.orchestrator.get_entity(entity).is_none() {
            response.add_error(
                ErrorKind::EntityNotFound,
                EngineError::EntityNotFound(entity.to_string()).to_string(),
            );
            return;
        }

        match self
            .orchestrator
            .run_workflow(workflow, &request.step_options, Some(entity))
        {
            Ok(Some(ctx)) => {
                let result = self
                    .orchestrator
                    .get_entity(entity)
                    .and_then(|e| e.get_workflow(workflow))
                    .and_then(|w| workflow_result(&ctx, w))
                    .cloned()
                    .unwrap_or(Value::Null);
                set_result(response, result);
                response.update_ctx(ctx);
            }
            Ok(None) => response.add_error(
                ErrorKind::WorkflowNotFound,
                format!("workflow '{workflow}' not found"),
            ),
            Err(err) => add_engine_error(response, &err),
        }
    }

    fn run_task(&self, service: &str, request: &RequestOf<P>, response: &mut ResponseOf<P>) {
        let Some(task) = request.task.as_deref() else {
            response.add_error(
                ErrorKind::BadTask,
                format!("no task given for service '{service}'"),
            );
            return;
        };
        let Some(owner) = self.orchestrator.shared().get_service(service) else {
            response.add_error(
                ErrorKind::ServiceNotFound,
                EngineError::ServiceNotFound(service.to_string()).to_string(),
            );
            return;
        };
        response.add_info(
            AVAILABLE_TASKS,
            format!("{service}: {}", owner.task_names().join(", ")),
        );

        let mut ctx = request.ctx.clone();
        match self.orchestrator.run_task(service, task, &mut ctx) {
            Ok(result) => {
                set_result(response, result);
                response.ctx = ctx;
            }
            Err(err) => add_engine_error(response, &err),
        }
    }

    fn record(&mut self, identity: &str, response: &ResponseOf<P>) {
        let Some(record) = self.clients.get_mut(identity) else {
            return;
        };
        record.transactions.push_back(Transaction {
            request_id: response.id.clone(),
            status: response.status,
            errors: response.errors.keys().cloned().collect(),
        });
        while record.transactions.len() > self.max_transactions {
            record.transactions.pop_front();
        }
    }

    fn reload(&mut self) {
        let Some(reloader) = self.reloader.as_mut() else {
            return;
        };
        tracing::info!("Request finished with errors, reloading definitions");
        if let Err(err) = reloader(&mut self.orchestrator) {
            tracing::error!("Reload failed: {err:#}");
        }
    }
}

fn set_result<Q: Extension, X: Extension>(response: &mut Response<Q, X>, result: Value) {
    if let Err(err) = response.set_result(result) {
        tracing::error!(error = %err, "Result dropped");
    }
}

fn add_engine_error<Q: Extension, X: Extension>(
    response: &mut Response<Q, X>,
    err: &EngineError,
) {
    tracing::warn!(error = %err, "Request failed");
    response.add_error(err.kind(), err.to_string());
}

/// Encode a response. When that fails, a bare error response carrying a
/// `SerializationError` entry is encoded instead.
pub fn encode<P: Protocol>(response: &ResponseOf<P>) -> Vec<u8> {
    match serde_json::to_vec(response) {
        Ok(bytes) => bytes,
        Err(err) => {
            tracing::error!(error = %err, "Failed to encode response");
            let mut fallback = ResponseOf::<P>::rejected(response.requester.clone());
            fallback.id.clone_from(&response.id);
            fallback.add_error(ErrorKind::SerializationError, err.to_string());
            serde_json::to_vec(&fallback).unwrap_or_else(|_| {
                format!(
                    r#"{{"status":"error","errors":{{"{}":["response could not be encoded"]}}}}"#,
                    ErrorKind::SerializationError
                )
                .into_bytes()
            })
        }
    }
}
