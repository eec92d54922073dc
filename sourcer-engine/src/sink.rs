//! Persistence sink
//!
//! Durable record of finished runs. A run is written once, when it reaches
//! a terminal status; a record that is already terminal is never replaced.

use async_trait::async_trait;
use sourcer_core::domain::run::PipelineRun;
use sourcer_core::dto::run::StoredRun;
use std::sync::Mutex;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("run {0} is not in a terminal status")]
    NotTerminal(Uuid),

    #[error("run {0} belongs to another worker")]
    NotOwner(Uuid),

    #[error("storage failed: {0}")]
    Backend(String),
}

#[async_trait]
pub trait PersistenceSink: Send + Sync {
    async fn store(&self, run: &PipelineRun) -> Result<(), StoreError>;

    /// Every stored run, oldest first
    async fn list_all(&self) -> Result<Vec<StoredRun>, StoreError>;
}

/// In-process store
#[derive(Default)]
pub struct MemoryRunStore {
    runs: Mutex<Vec<PipelineRun>>,
}

impl MemoryRunStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, run_id: Uuid) -> Option<PipelineRun> {
        self.runs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .find(|r| r.id == run_id)
            .cloned()
    }
}

#[async_trait]
impl PersistenceSink for MemoryRunStore {
    async fn store(&self, run: &PipelineRun) -> Result<(), StoreError> {
        if !run.status.is_terminal() {
            return Err(StoreError::NotTerminal(run.id));
        }

        let mut runs = self.runs.lock().unwrap_or_else(|e| e.into_inner());
        match runs.iter_mut().find(|r| r.id == run.id) {
            Some(existing) if existing.status.is_terminal() => {
                tracing::debug!(run_id = %run.id, "Run already stored, keeping first record");
            }
            Some(existing) => *existing = run.clone(),
            None => runs.push(run.clone()),
        }
        Ok(())
    }

    async fn list_all(&self) -> Result<Vec<StoredRun>, StoreError> {
        let runs = self.runs.lock().unwrap_or_else(|e| e.into_inner());
        let mut ordered: Vec<&PipelineRun> = runs.iter().collect();
        ordered.sort_by_key(|r| r.created_at);
        Ok(ordered.into_iter().map(StoredRun::from).collect())
    }
}
