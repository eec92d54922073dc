//! Engine contracts backed by the orchestrator's HTTP API
//!
//! The runner owns no storage: claims, lease renewals, progress events and
//! finished runs all go through `OrchestratorClient`.

use async_trait::async_trait;
use sourcer_client::{ClientError, OrchestratorClient};
use sourcer_core::domain::event::ProgressEvent;
use sourcer_core::domain::run::PipelineRun;
use sourcer_core::dto::run::StoredRun;
use sourcer_engine::{EventPublisher, JobQueue, PersistenceSink, QueueError, RelayError, StoreError};
use std::sync::Arc;
use uuid::Uuid;

pub struct RemoteQueue {
    client: Arc<OrchestratorClient>,
}

impl RemoteQueue {
    pub fn new(client: Arc<OrchestratorClient>) -> Self {
        Self { client }
    }
}

fn queue_error(run_id: Option<Uuid>, e: ClientError) -> QueueError {
    match run_id {
        Some(id) if e.is_not_found() => QueueError::NotFound(id),
        _ => QueueError::Unavailable(e.to_string()),
    }
}

#[async_trait]
impl JobQueue for RemoteQueue {
    async fn enqueue(&self, run: PipelineRun) -> Result<(), QueueError> {
        self.client
            .submit_run(&run.query)
            .await
            .map(|_| ())
            .map_err(|e| match e {
                ClientError::ApiError { status: 400, message } => QueueError::InvalidQuery(message),
                e => queue_error(None, e),
            })
    }

    async fn claim(&self, worker_id: &str) -> Result<Option<PipelineRun>, QueueError> {
        self.client
            .claim_run(worker_id)
            .await
            .map_err(|e| queue_error(None, e))
    }

    async fn heartbeat(&self, run_id: Uuid, worker_id: &str) -> Result<bool, QueueError> {
        self.client
            .heartbeat_run(run_id, worker_id)
            .await
            .map(|r| r.cancel_requested)
            .map_err(|e| queue_error(Some(run_id), e))
    }

    // The orchestrator drops the lease when the run is completed, and only
    // for the worker that still holds it
}

/// Forwards progress events; the orchestrator republishes them on its topic
pub struct RemotePublisher {
    client: Arc<OrchestratorClient>,
}

impl RemotePublisher {
    pub fn new(client: Arc<OrchestratorClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl EventPublisher for RemotePublisher {
    async fn publish(&self, _topic: &str, event: &ProgressEvent) -> Result<(), RelayError> {
        self.client
            .publish_event(event)
            .await
            .map_err(|e| RelayError::Unavailable(e.to_string()))
    }
}

/// Reports finished runs as `worker_id`, the lease holder
pub struct RemoteSink {
    client: Arc<OrchestratorClient>,
    worker_id: String,
}

impl RemoteSink {
    pub fn new(client: Arc<OrchestratorClient>, worker_id: impl Into<String>) -> Self {
        Self {
            client,
            worker_id: worker_id.into(),
        }
    }
}

fn store_error(run_id: Uuid, e: ClientError) -> StoreError {
    match e {
        ClientError::ApiError { status: 409, .. } => StoreError::NotOwner(run_id),
        e => StoreError::Backend(e.to_string()),
    }
}

#[async_trait]
impl PersistenceSink for RemoteSink {
    async fn store(&self, run: &PipelineRun) -> Result<(), StoreError> {
        if !run.status.is_terminal() {
            return Err(StoreError::NotTerminal(run.id));
        }
        self.client
            .complete_run(&self.worker_id, run)
            .await
            .map_err(|e| store_error(run.id, e))
    }

    async fn list_all(&self) -> Result<Vec<StoredRun>, StoreError> {
        self.client
            .list_runs(None)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))
    }
}
