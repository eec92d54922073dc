//! Run Service
//!
//! Business logic for run inspection, cancellation and completion.

use sourcer_core::domain::event::ProgressEvent;
use sourcer_core::domain::run::{PipelineRun, RunStatus};
use sourcer_core::dto::run::StoredRun;
use sourcer_engine::queue::{JobQueue, QueueError};
use sourcer_engine::relay::EventPublisher;
use sourcer_engine::sink::PersistenceSink;
use sqlx::PgPool;
use uuid::Uuid;

use crate::repository::{event_repository, run_repository};

pub const CANCELLED_MESSAGE: &str = "Run cancelled";

/// Service error type
#[derive(Debug)]
pub enum RunError {
    NotFound(Uuid),
    InvalidState(String),
    LeaseLost(Uuid),
    ValidationError(String),
    StorageError(String),
    DatabaseError(sqlx::Error),
}

impl From<sqlx::Error> for RunError {
    fn from(err: sqlx::Error) -> Self {
        RunError::DatabaseError(err)
    }
}

/// What a cancel request achieved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// No worker held the run; it is now cancelled
    Cancelled,
    /// The worker will stop at its next stage boundary
    Requested,
}

pub async fn get_run(pool: &PgPool, id: Uuid) -> Result<PipelineRun, RunError> {
    run_repository::find_by_id(pool, id)
        .await?
        .ok_or(RunError::NotFound(id))
}

pub async fn list_by_status(pool: &PgPool, status: RunStatus) -> Result<Vec<StoredRun>, RunError> {
    let runs = run_repository::list(pool, Some(status)).await?;
    Ok(runs.iter().map(StoredRun::from).collect())
}

pub async fn list_events(pool: &PgPool, id: Uuid) -> Result<Vec<ProgressEvent>, RunError> {
    // 404 for unknown runs rather than an empty history
    get_run(pool, id).await?;
    Ok(event_repository::list_for_run(pool, id).await?)
}

/// Cancel a run
///
/// A run no worker is executing is cancelled here, and its terminal event
/// is published here. A run in flight is only flagged; its worker observes
/// the flag on its next heartbeat and ends the run itself.
pub async fn cancel_run(
    pool: &PgPool,
    publisher: &dyn EventPublisher,
    topic: &str,
    id: Uuid,
) -> Result<CancelOutcome, RunError> {
    let run = get_run(pool, id).await?;
    if run.status.is_terminal() {
        return Err(RunError::InvalidState(format!(
            "Cannot cancel run {} in state {}",
            id, run.status
        )));
    }

    if run_repository::cancel_unclaimed(pool, id, CANCELLED_MESSAGE).await? {
        tracing::info!(run_id = %id, "Run cancelled");
        if let Err(e) = publisher
            .publish(topic, &ProgressEvent::error(id, CANCELLED_MESSAGE))
            .await
        {
            tracing::warn!(run_id = %id, "Failed to publish cancellation: {}", e);
        }
        return Ok(CancelOutcome::Cancelled);
    }

    if run_repository::request_cancel(pool, id).await? {
        tracing::info!(run_id = %id, "Cancellation requested");
        return Ok(CancelOutcome::Requested);
    }

    Err(RunError::InvalidState(format!(
        "Run {} finished before it could be cancelled",
        id
    )))
}

/// Record the terminal state reported by a runner
///
/// The lease is released first, which fails for a worker that no longer
/// holds it; only then is the run stored.
pub async fn complete_run(
    queue: &dyn JobQueue,
    sink: &dyn PersistenceSink,
    id: Uuid,
    worker_id: &str,
    run: PipelineRun,
) -> Result<(), RunError> {
    validate_completion(id, &run)?;

    queue.release(id, worker_id).await.map_err(|e| match e {
        QueueError::LeaseLost(id) | QueueError::NotFound(id) => {
            tracing::warn!(run_id = %id, worker_id = %worker_id, "Completion from a worker without the lease");
            RunError::LeaseLost(id)
        }
        e => RunError::StorageError(e.to_string()),
    })?;

    sink.store(&run)
        .await
        .map_err(|e| RunError::StorageError(e.to_string()))
}

// =============================================================================
// Validation
// =============================================================================

fn validate_completion(id: Uuid, run: &PipelineRun) -> Result<(), RunError> {
    if run.id != id {
        return Err(RunError::ValidationError(format!(
            "Run id {} does not match path id {}",
            run.id, id
        )));
    }
    if !run.status.is_terminal() {
        return Err(RunError::ValidationError(format!(
            "Invalid completion status: {}",
            run.status
        )));
    }
    Ok(())
}
