//! Run DTOs for inter-service communication

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::run::{PipelineRun, RunStatus};

/// Request to start a pipeline run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitRun {
    pub query: String,
}

/// Immediate acknowledgement of a submission
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub run_id: Uuid,
    pub status: RunStatus,
}

/// Read model of a stored run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredRun {
    pub run_id: Uuid,
    pub query: String,
    pub final_result: Option<serde_json::Value>,
    pub status: RunStatus,
    /// Completion time, or creation time for runs still in flight
    pub timestamp: DateTime<Utc>,
}

impl From<&PipelineRun> for StoredRun {
    fn from(run: &PipelineRun) -> Self {
        StoredRun {
            run_id: run.id,
            query: run.query.clone(),
            final_result: run.final_result.clone(),
            status: run.status,
            timestamp: run.completed_at.unwrap_or(run.created_at),
        }
    }
}

/// Acknowledgement of a cancellation request
///
/// `outcome` is `cancelled` when the run was stopped before any worker ran
/// it, `cancel_requested` when its worker will stop at the next stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelResponse {
    pub run_id: Uuid,
    pub outcome: String,
}

/// Runner request to take the next available run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimRequest {
    pub worker_id: String,
}

/// Runner lease renewal
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatRequest {
    pub worker_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatResponse {
    pub cancel_requested: bool,
}

/// Terminal state reported by the runner holding the run's lease
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompleteRun {
    pub worker_id: String,
    pub run: PipelineRun,
}

/// Optional filters for run listings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunListQuery {
    pub status: Option<RunStatus>,
}
