//! Run endpoints

use crate::OrchestratorClient;
use crate::error::Result;
use sourcer_core::domain::event::ProgressEvent;
use sourcer_core::domain::run::{PipelineRun, RunStatus};
use sourcer_core::dto::run::{
    CancelResponse, ClaimRequest, CompleteRun, HeartbeatRequest, HeartbeatResponse, StoredRun,
    SubmitResponse, SubmitRun,
};
use uuid::Uuid;

impl OrchestratorClient {
    // =============================================================================
    // Runs
    // =============================================================================

    /// Queues a new run; returns as soon as the run is recorded
    pub async fn submit_run(&self, query: &str) -> Result<SubmitResponse> {
        let url = format!("{}/sourcing", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&SubmitRun {
                query: query.to_string(),
            })
            .send()
            .await?;

        self.handle_response(response).await
    }

    pub async fn list_runs(&self, status: Option<RunStatus>) -> Result<Vec<StoredRun>> {
        let url = format!("{}/runs", self.base_url);
        let mut request = self.client.get(&url);
        if let Some(status) = status {
            request = request.query(&[("status", status.as_str())]);
        }
        let response = request.send().await?;

        self.handle_response(response).await
    }

    pub async fn get_run(&self, run_id: Uuid) -> Result<PipelineRun> {
        let url = format!("{}/runs/{}", self.base_url, run_id);
        let response = self.client.get(&url).send().await?;

        self.handle_response(response).await
    }

    /// Published events of one run, oldest first
    pub async fn list_run_events(&self, run_id: Uuid) -> Result<Vec<ProgressEvent>> {
        let url = format!("{}/runs/{}/events", self.base_url, run_id);
        let response = self.client.get(&url).send().await?;

        self.handle_response(response).await
    }

    pub async fn cancel_run(&self, run_id: Uuid) -> Result<CancelResponse> {
        let url = format!("{}/runs/{}/cancel", self.base_url, run_id);
        let response = self.client.post(&url).send().await?;

        self.handle_response(response).await
    }

    // =============================================================================
    // Runner protocol
    // =============================================================================

    /// Takes the next available run, if any
    pub async fn claim_run(&self, worker_id: &str) -> Result<Option<PipelineRun>> {
        let url = format!("{}/runs/claim", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&ClaimRequest {
                worker_id: worker_id.to_string(),
            })
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Renews the lease on a claimed run
    pub async fn heartbeat_run(&self, run_id: Uuid, worker_id: &str) -> Result<HeartbeatResponse> {
        let url = format!("{}/runs/{}/heartbeat", self.base_url, run_id);
        let response = self
            .client
            .post(&url)
            .json(&HeartbeatRequest {
                worker_id: worker_id.to_string(),
            })
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Hands a progress event to the orchestrator for fan-out
    pub async fn publish_event(&self, event: &ProgressEvent) -> Result<()> {
        let url = format!("{}/runs/{}/events", self.base_url, event.run_id);
        let response = self.client.post(&url).json(event).send().await?;

        self.handle_empty_response(response).await
    }

    /// Stores a run that reached a terminal status
    ///
    /// Rejected with 409 when `worker_id` no longer holds the run's lease.
    pub async fn complete_run(&self, worker_id: &str, run: &PipelineRun) -> Result<()> {
        let url = format!("{}/runs/{}/complete", self.base_url, run.id);
        let response = self
            .client
            .post(&url)
            .json(&CompleteRun {
                worker_id: worker_id.to_string(),
                run: run.clone(),
            })
            .send()
            .await?;

        self.handle_empty_response(response).await
    }
}
