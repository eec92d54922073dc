//! Job dispatcher and queue contract
//!
//! Submission only records a queued run; execution happens on whichever
//! worker claims it. Delivery is at-least-once: a claim holds a lease, and a
//! run whose lease lapses becomes claimable again.

use async_trait::async_trait;
use sourcer_core::domain::run::{PipelineRun, RunStatus};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use uuid::Uuid;

/// Longest accepted query, in characters
pub const MAX_QUERY_CHARS: usize = 500;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("queue unavailable: {0}")]
    Unavailable(String),

    #[error("run {0} not found")]
    NotFound(Uuid),

    #[error("run {0} is not leased to this worker")]
    LeaseLost(Uuid),
}

#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn enqueue(&self, run: PipelineRun) -> Result<(), QueueError>;

    /// Hands the next available run to `worker_id` and starts its lease
    async fn claim(&self, worker_id: &str) -> Result<Option<PipelineRun>, QueueError>;

    /// Extends the lease; returns whether cancellation was requested
    ///
    /// A cancellation requested before a redelivery is still reported to the
    /// worker that claims the run next.
    async fn heartbeat(&self, run_id: Uuid, worker_id: &str) -> Result<bool, QueueError>;

    /// Drops the lease `worker_id` holds on a run it finished
    ///
    /// Fails with `LeaseLost` when the run is leased to someone else, or to
    /// nobody, leaving any other worker's lease in place.
    async fn release(&self, _run_id: Uuid, _worker_id: &str) -> Result<(), QueueError> {
        Ok(())
    }
}

/// Front door for new runs
#[derive(Clone)]
pub struct Dispatcher {
    queue: Arc<dyn JobQueue>,
}

impl Dispatcher {
    pub fn new(queue: Arc<dyn JobQueue>) -> Self {
        Self { queue }
    }

    /// Records a queued run and returns its id without waiting for execution
    pub async fn submit(&self, query: &str) -> Result<Uuid, QueueError> {
        let query = validate_query(query)?;
        let run = PipelineRun::new(query);
        let run_id = run.id;

        self.queue.enqueue(run).await?;
        tracing::info!(run_id = %run_id, "Run queued");
        Ok(run_id)
    }
}

/// Trims the query and enforces length limits
pub fn validate_query(query: &str) -> Result<&str, QueueError> {
    let query = query.trim();
    if query.is_empty() {
        return Err(QueueError::InvalidQuery("query cannot be empty".to_string()));
    }
    if query.chars().count() > MAX_QUERY_CHARS {
        return Err(QueueError::InvalidQuery(format!(
            "query exceeds {} characters",
            MAX_QUERY_CHARS
        )));
    }
    Ok(query)
}

struct Lease {
    run: PipelineRun,
    worker_id: String,
    expires_at: Instant,
    cancel_requested: bool,
}

#[derive(Default)]
struct QueueState {
    pending: VecDeque<PipelineRun>,
    leased: HashMap<Uuid, Lease>,
}

/// In-process queue with leases
pub struct MemoryQueue {
    state: Mutex<QueueState>,
    lease: Duration,
}

impl MemoryQueue {
    pub fn new(lease: Duration) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            lease,
        }
    }

    pub fn pending(&self) -> usize {
        self.lock().pending.len()
    }

    pub fn leased(&self) -> usize {
        self.lock().leased.len()
    }

    /// Cancels a run no worker is executing, or flags a leased one for its worker
    ///
    /// A queued run, or one whose lease has lapsed, is removed and returned
    /// as `cancelled`; the caller owns its terminal event.
    pub fn cancel(&self, run_id: Uuid) -> Result<Option<PipelineRun>, QueueError> {
        let mut state = self.lock();
        let removed = match state.pending.iter().position(|r| r.id == run_id) {
            Some(pos) => state.pending.remove(pos),
            None => {
                let now = Instant::now();
                match state.leased.get(&run_id).map(|l| l.expires_at <= now) {
                    Some(true) => state.leased.remove(&run_id).map(|lease| lease.run),
                    Some(false) => {
                        if let Some(lease) = state.leased.get_mut(&run_id) {
                            lease.cancel_requested = true;
                        }
                        return Ok(None);
                    }
                    None => return Err(QueueError::NotFound(run_id)),
                }
            }
        };

        let mut run = removed.ok_or(QueueError::NotFound(run_id))?;
        run.transition_to(RunStatus::Cancelled)
            .map_err(|e| QueueError::Unavailable(e.to_string()))?;
        Ok(Some(run))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, QueueState> {
        // A poisoned lock only means another test thread panicked
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn start_lease(
        &self,
        state: &mut QueueState,
        mut run: PipelineRun,
        worker_id: &str,
        cancel_requested: bool,
    ) -> PipelineRun {
        if run.status == RunStatus::Queued {
            // Queued -> Running is always valid
            let _ = run.transition_to(RunStatus::Running);
        }
        run.attempts += 1;
        state.leased.insert(
            run.id,
            Lease {
                run: run.clone(),
                worker_id: worker_id.to_string(),
                expires_at: Instant::now() + self.lease,
                cancel_requested,
            },
        );
        run
    }
}

impl Default for MemoryQueue {
    fn default() -> Self {
        Self::new(Duration::from_secs(120))
    }
}

#[async_trait]
impl JobQueue for MemoryQueue {
    async fn enqueue(&self, run: PipelineRun) -> Result<(), QueueError> {
        self.lock().pending.push_back(run);
        Ok(())
    }

    async fn claim(&self, worker_id: &str) -> Result<Option<PipelineRun>, QueueError> {
        let mut state = self.lock();
        let now = Instant::now();

        // Expired leases are redelivered ahead of new work, oldest first
        let expired = state
            .leased
            .values()
            .filter(|l| l.expires_at <= now)
            .min_by_key(|l| l.run.created_at)
            .map(|l| l.run.id);
        if let Some(run_id) = expired {
            if let Some(lease) = state.leased.remove(&run_id) {
                tracing::warn!(
                    run_id = %run_id,
                    previous_worker = %lease.worker_id,
                    cancel_requested = lease.cancel_requested,
                    "Lease expired, redelivering run"
                );
                let run = self.start_lease(&mut state, lease.run, worker_id, lease.cancel_requested);
                return Ok(Some(run));
            }
        }

        match state.pending.pop_front() {
            Some(run) => Ok(Some(self.start_lease(&mut state, run, worker_id, false))),
            None => Ok(None),
        }
    }

    async fn heartbeat(&self, run_id: Uuid, worker_id: &str) -> Result<bool, QueueError> {
        let mut state = self.lock();
        let lease = state
            .leased
            .get_mut(&run_id)
            .filter(|l| l.worker_id == worker_id)
            .ok_or(QueueError::NotFound(run_id))?;
        lease.expires_at = Instant::now() + self.lease;
        Ok(lease.cancel_requested)
    }

    async fn release(&self, run_id: Uuid, worker_id: &str) -> Result<(), QueueError> {
        let mut state = self.lock();
        let held = state
            .leased
            .get(&run_id)
            .is_some_and(|lease| lease.worker_id == worker_id);
        if !held {
            return Err(QueueError::LeaseLost(run_id));
        }
        state.leased.remove(&run_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_submit_returns_immediately_with_queued_run() {
        let queue = Arc::new(MemoryQueue::default());
        let dispatcher = Dispatcher::new(queue.clone());

        let run_id = dispatcher.submit("  wireless earbuds ").await.unwrap();
        assert_eq!(queue.pending(), 1);

        let run = queue.claim("w1").await.unwrap().unwrap();
        assert_eq!(run.id, run_id);
        assert_eq!(run.query, "wireless earbuds");
        assert_eq!(run.status, RunStatus::Running);
        assert_eq!(run.attempts, 1);
    }

    #[tokio::test]
    async fn test_submit_rejects_bad_queries() {
        let dispatcher = Dispatcher::new(Arc::new(MemoryQueue::default()));
        assert!(matches!(
            dispatcher.submit("   ").await,
            Err(QueueError::InvalidQuery(_))
        ));
        let long = "a".repeat(MAX_QUERY_CHARS + 1);
        assert!(matches!(
            dispatcher.submit(&long).await,
            Err(QueueError::InvalidQuery(_))
        ));
    }

    #[tokio::test]
    async fn test_claim_is_fifo_and_exclusive() {
        let queue = MemoryQueue::default();
        let first = PipelineRun::new("first");
        let second = PipelineRun::new("second");
        queue.enqueue(first.clone()).await.unwrap();
        queue.enqueue(second.clone()).await.unwrap();

        assert_eq!(queue.claim("a").await.unwrap().unwrap().id, first.id);
        assert_eq!(queue.claim("b").await.unwrap().unwrap().id, second.id);
        assert!(queue.claim("c").await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_lease_is_redelivered() {
        let queue = MemoryQueue::new(Duration::from_secs(10));
        let run = PipelineRun::new("q");
        queue.enqueue(run.clone()).await.unwrap();

        queue.claim("crashed").await.unwrap().unwrap();
        assert!(queue.claim("other").await.unwrap().is_none());

        tokio::time::advance(Duration::from_secs(11)).await;
        let again = queue.claim("other").await.unwrap().unwrap();
        assert_eq!(again.id, run.id);
        assert_eq!(again.status, RunStatus::Running);
        assert_eq!(again.attempts, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_keeps_lease() {
        let queue = MemoryQueue::new(Duration::from_secs(10));
        let run = PipelineRun::new("q");
        queue.enqueue(run.clone()).await.unwrap();
        queue.claim("w").await.unwrap();

        tokio::time::advance(Duration::from_secs(8)).await;
        assert!(!queue.heartbeat(run.id, "w").await.unwrap());
        tokio::time::advance(Duration::from_secs(8)).await;
        assert!(queue.claim("other").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_heartbeat_from_wrong_worker_fails() {
        let queue = MemoryQueue::default();
        let run = PipelineRun::new("q");
        queue.enqueue(run.clone()).await.unwrap();
        queue.claim("w").await.unwrap();
        assert!(queue.heartbeat(run.id, "intruder").await.is_err());
    }

    #[tokio::test]
    async fn test_cancel_queued_and_leased() {
        let queue = MemoryQueue::default();
        let queued = PipelineRun::new("queued");
        let leased = PipelineRun::new("leased");
        queue.enqueue(leased.clone()).await.unwrap();
        queue.claim("w").await.unwrap();
        queue.enqueue(queued.clone()).await.unwrap();

        let removed = queue.cancel(queued.id).unwrap().unwrap();
        assert_eq!(removed.status, RunStatus::Cancelled);
        assert_eq!(queue.pending(), 0);

        assert!(queue.cancel(leased.id).unwrap().is_none());
        assert!(queue.heartbeat(leased.id, "w").await.unwrap());
    }

    #[tokio::test]
    async fn test_release_ends_lease() {
        let queue = MemoryQueue::default();
        let run = PipelineRun::new("q");
        queue.enqueue(run.clone()).await.unwrap();
        queue.claim("w").await.unwrap();
        queue.release(run.id, "w").await.unwrap();
        assert_eq!(queue.leased(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_release_keeps_new_owners_lease() {
        let queue = MemoryQueue::new(Duration::from_secs(10));
        let run = PipelineRun::new("q");
        queue.enqueue(run.clone()).await.unwrap();
        queue.claim("stale").await.unwrap();

        tokio::time::advance(Duration::from_secs(11)).await;
        queue.claim("owner").await.unwrap().unwrap();

        assert!(matches!(
            queue.release(run.id, "stale").await,
            Err(QueueError::LeaseLost(id)) if id == run.id
        ));
        assert_eq!(queue.leased(), 1);
        assert!(!queue.heartbeat(run.id, "owner").await.unwrap());
        queue.release(run.id, "owner").await.unwrap();
        assert_eq!(queue.leased(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_request_survives_redelivery() {
        let queue = MemoryQueue::new(Duration::from_secs(10));
        let run = PipelineRun::new("q");
        queue.enqueue(run.clone()).await.unwrap();
        queue.claim("crashed").await.unwrap();
        assert!(queue.cancel(run.id).unwrap().is_none());

        tokio::time::advance(Duration::from_secs(11)).await;
        let again = queue.claim("next").await.unwrap().unwrap();
        assert_eq!(again.id, run.id);
        assert!(queue.heartbeat(run.id, "next").await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_on_lapsed_lease_finishes_run() {
        let queue = MemoryQueue::new(Duration::from_secs(10));
        let run = PipelineRun::new("q");
        queue.enqueue(run.clone()).await.unwrap();
        queue.claim("crashed").await.unwrap();

        tokio::time::advance(Duration::from_secs(11)).await;
        let cancelled = queue.cancel(run.id).unwrap().unwrap();
        assert_eq!(cancelled.status, RunStatus::Cancelled);
        assert_eq!(queue.leased(), 0);
        assert!(queue.claim("next").await.unwrap().is_none());
    }
}
