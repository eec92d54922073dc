use async_trait::async_trait;
use sourcer_core::domain::run::PipelineRun;
use sourcer_engine::queue::{JobQueue, QueueError};
use sqlx::PgPool;
use std::time::Duration;
use uuid::Uuid;

use crate::repository::run_repository;

/// Work queue over the `runs` table
///
/// Claims use `FOR UPDATE SKIP LOCKED`, so any number of runners can poll
/// concurrently without handing one run to two of them.
pub struct PgRunQueue {
    pool: PgPool,
    lease: Duration,
}

impl PgRunQueue {
    pub fn new(pool: PgPool, lease: Duration) -> Self {
        Self { pool, lease }
    }
}

fn unavailable(err: sqlx::Error) -> QueueError {
    tracing::error!("Queue database error: {:?}", err);
    QueueError::Unavailable(err.to_string())
}

#[async_trait]
impl JobQueue for PgRunQueue {
    async fn enqueue(&self, run: PipelineRun) -> Result<(), QueueError> {
        run_repository::insert(&self.pool, &run)
            .await
            .map_err(unavailable)
    }

    async fn claim(&self, worker_id: &str) -> Result<Option<PipelineRun>, QueueError> {
        let claimed = run_repository::claim_next(&self.pool, worker_id, self.lease)
            .await
            .map_err(unavailable)?;

        if let Some(run) = &claimed {
            tracing::info!(
                run_id = %run.id,
                worker_id = %worker_id,
                attempt = run.attempts,
                "Run claimed"
            );
        }
        Ok(claimed)
    }

    async fn heartbeat(&self, run_id: Uuid, worker_id: &str) -> Result<bool, QueueError> {
        run_repository::heartbeat(&self.pool, run_id, worker_id, self.lease)
            .await
            .map_err(unavailable)?
            .ok_or(QueueError::NotFound(run_id))
    }

    async fn release(&self, run_id: Uuid, worker_id: &str) -> Result<(), QueueError> {
        let released = run_repository::release(&self.pool, run_id, worker_id)
            .await
            .map_err(unavailable)?;

        if !released {
            tracing::warn!(run_id = %run_id, worker_id = %worker_id, "Release from a worker without the lease");
            return Err(QueueError::LeaseLost(run_id));
        }
        Ok(())
    }
}
