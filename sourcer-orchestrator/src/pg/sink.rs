use async_trait::async_trait;
use sourcer_core::domain::run::PipelineRun;
use sourcer_core::dto::run::StoredRun;
use sourcer_engine::sink::{PersistenceSink, StoreError};
use sqlx::PgPool;

use crate::repository::run_repository;

/// Durable run store over the `runs` table
pub struct PgRunStore {
    pool: PgPool,
}

impl PgRunStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PersistenceSink for PgRunStore {
    async fn store(&self, run: &PipelineRun) -> Result<(), StoreError> {
        if !run.status.is_terminal() {
            return Err(StoreError::NotTerminal(run.id));
        }

        let written = run_repository::store_terminal(&self.pool, run)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        if written {
            tracing::info!(run_id = %run.id, status = %run.status, "Run stored");
        } else {
            tracing::warn!(run_id = %run.id, "Run already terminal, keeping stored record");
        }
        Ok(())
    }

    async fn list_all(&self) -> Result<Vec<StoredRun>, StoreError> {
        let runs = run_repository::list(&self.pool, None)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        Ok(runs.iter().map(StoredRun::from).collect())
    }
}
