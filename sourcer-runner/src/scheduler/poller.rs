//! Run poller
//!
//! Claims queued runs and executes each one in its own task. While a run is
//! executing, a companion task renews its lease and turns a cancellation
//! request from the orchestrator into the engine's cancel signal. A lost
//! lease abandons the run instead: its new owner reports the outcome.

use anyhow::{Context as AnyhowContext, Result};
use sourcer_core::domain::run::{PipelineRun, RunStatus};
use sourcer_engine::{CancelHandle, JobQueue, PipelineEngine, QueueError};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::{self, Duration};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::Config;

/// Run poller that continuously claims and executes runs
pub struct RunPoller {
    config: Config,
    queue: Arc<dyn JobQueue>,
    engine: Arc<PipelineEngine>,
    semaphore: Arc<Semaphore>,
}

impl RunPoller {
    pub fn new(config: Config, queue: Arc<dyn JobQueue>, engine: Arc<PipelineEngine>) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.max_parallel_runs));
        Self {
            config,
            queue,
            engine,
            semaphore,
        }
    }

    /// Starts the polling loop
    pub async fn run(&self) -> Result<()> {
        info!(
            "Starting run poller (interval: {:?}, max parallel runs: {})",
            self.config.poll_interval, self.config.max_parallel_runs
        );

        let mut interval = time::interval(self.config.poll_interval);

        loop {
            interval.tick().await;

            debug!("Polling for queued runs");

            match self.poll_once().await {
                Ok(started) if !started.is_empty() => {
                    info!("Started {} run(s) this cycle", started.len());
                }
                Ok(_) => {}
                Err(e) => {
                    error!("Error during poll cycle: {:#}", e);
                }
            }
        }
    }

    /// Claims runs until the queue is empty or every slot is busy
    ///
    /// Returns the handles of the runs started; they keep executing in the
    /// background whether or not the caller awaits them.
    pub async fn poll_once(&self) -> Result<Vec<JoinHandle<RunStatus>>> {
        let mut started = Vec::new();

        loop {
            let Ok(permit) = self.semaphore.clone().try_acquire_owned() else {
                debug!("Max parallel runs reached, leaving the rest queued");
                break;
            };

            let claimed = self
                .queue
                .claim(&self.config.runner_id)
                .await
                .context("Failed to claim run")?;

            match claimed {
                Some(run) => {
                    info!(run_id = %run.id, attempt = run.attempts, "Claimed run");
                    started.push(self.spawn_run(run, permit));
                }
                None => {
                    debug!("No runs available");
                    break;
                }
            }
        }

        Ok(started)
    }

    fn spawn_run(&self, run: PipelineRun, permit: OwnedSemaphorePermit) -> JoinHandle<RunStatus> {
        let queue = Arc::clone(&self.queue);
        let engine = Arc::clone(&self.engine);
        let runner_id = self.config.runner_id.clone();
        let heartbeat_interval = self.config.heartbeat_interval;

        tokio::spawn(async move {
            let status = Self::execute_run(run, runner_id, queue, engine, heartbeat_interval).await;
            drop(permit);
            status
        })
    }

    async fn execute_run(
        mut run: PipelineRun,
        runner_id: String,
        queue: Arc<dyn JobQueue>,
        engine: Arc<PipelineEngine>,
        heartbeat_interval: Duration,
    ) -> RunStatus {
        let run_id = run.id;
        let (cancel, signal) = CancelHandle::new();

        // A redelivered run may carry a cancel request from before the redelivery
        if !Self::renew(queue.as_ref(), run_id, &runner_id, &cancel).await {
            return run.status;
        }

        let heartbeat = Self::spawn_heartbeat(
            run_id,
            runner_id.clone(),
            Arc::clone(&queue),
            heartbeat_interval,
            cancel,
        );

        let status = engine.run(&mut run, &signal).await;
        heartbeat.abort();

        if signal.is_abandoned() {
            info!(run_id = %run_id, "Run abandoned to its new owner");
            return status;
        }

        match queue.release(run_id, &runner_id).await {
            Ok(()) => {}
            Err(QueueError::LeaseLost(_)) => debug!(run_id = %run_id, "Lease already gone"),
            Err(e) => warn!(run_id = %run_id, "Failed to release lease: {}", e),
        }

        info!(run_id = %run_id, %status, "Run finished");
        status
    }

    /// Renews the lease once and applies the answer to `cancel`
    ///
    /// Returns false once the lease is gone.
    async fn renew(queue: &dyn JobQueue, run_id: Uuid, runner_id: &str, cancel: &CancelHandle) -> bool {
        match queue.heartbeat(run_id, runner_id).await {
            Ok(false) => {
                debug!(run_id = %run_id, "Lease renewed");
                true
            }
            Ok(true) => {
                if cancel.reason().is_none() {
                    info!(run_id = %run_id, "Cancellation requested");
                    cancel.cancel();
                }
                true
            }
            Err(QueueError::NotFound(_)) | Err(QueueError::LeaseLost(_)) => {
                warn!(run_id = %run_id, "Lease lost, giving the run up");
                cancel.abandon();
                false
            }
            Err(e) => {
                warn!(run_id = %run_id, "Failed to send heartbeat: {}", e);
                true
            }
        }
    }

    /// Renews the lease every `interval` until aborted
    ///
    /// A lost lease means the run now belongs to someone else, or to nobody;
    /// either way this runner stops at the next stage boundary without
    /// reporting anything.
    fn spawn_heartbeat(
        run_id: Uuid,
        runner_id: String,
        queue: Arc<dyn JobQueue>,
        interval: Duration,
        cancel: CancelHandle,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = time::interval(interval);
            // The claim itself started the lease
            ticker.tick().await;

            loop {
                ticker.tick().await;

                if !Self::renew(queue.as_ref(), run_id, &runner_id, &cancel).await {
                    break;
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::generator::MockGenerator;
    use crate::stages::sourcing_pipeline;
    use async_trait::async_trait;
    use sourcer_core::domain::event::EventType;
    use sourcer_core::domain::safety::default_banned_terms;
    use sourcer_engine::graph::{StageDefinition, StageGraph};
    use sourcer_engine::stage::{ExecutionError, StageContext, StageExecutor, StageOutput};
    use sourcer_engine::{
        Dispatcher, EventRelay, MemoryQueue, MemoryRelay, MemoryRunStore, NgramEmbedder,
        SafetyGate,
    };

    fn config(max_parallel_runs: usize) -> Config {
        let mut config = Config::default();
        config.runner_id = "runner-test".to_string();
        config.max_parallel_runs = max_parallel_runs;
        config.heartbeat_interval = Duration::from_secs(1);
        config
    }

    struct Sleep(Duration);

    #[async_trait]
    impl StageExecutor for Sleep {
        async fn execute(&self, _ctx: &StageContext) -> Result<StageOutput, ExecutionError> {
            time::sleep(self.0).await;
            Ok(StageOutput::text(r#"{"done": true}"#))
        }
    }

    fn slow_graph() -> StageGraph {
        StageGraph::new(vec![
            StageDefinition::new("first", Arc::new(Sleep(Duration::from_secs(30)))),
            StageDefinition::new("second", Arc::new(Sleep(Duration::from_secs(1))))
                .depends_on(["first"]),
        ])
        .unwrap()
    }

    #[tokio::test]
    async fn test_wireless_earbuds_end_to_end() {
        let queue = Arc::new(MemoryQueue::default());
        let relay = Arc::new(MemoryRelay::new());
        let store = Arc::new(MemoryRunStore::new());
        let gate = Arc::new(SafetyGate::new(Arc::new(NgramEmbedder::default()), 0.8));
        gate.load(default_banned_terms()).await.unwrap();

        let engine = PipelineEngine::new(
            sourcing_pipeline(Arc::new(MockGenerator)).unwrap(),
            relay.clone(),
            store.clone(),
        )
        .with_safety_gate(gate);
        let poller = RunPoller::new(config(2), queue.clone(), Arc::new(engine));

        let mut subscription = relay.subscribe(sourcer_engine::DEFAULT_TOPIC).await.unwrap();
        let run_id = Dispatcher::new(queue.clone())
            .submit("wireless earbuds")
            .await
            .unwrap();

        let handles = poller.poll_once().await.unwrap();
        assert_eq!(handles.len(), 1);
        for handle in handles {
            assert_eq!(handle.await.unwrap(), RunStatus::Completed);
        }

        let mut events = Vec::new();
        while let Some(event) = subscription.try_next() {
            assert_eq!(event.run_id, run_id);
            events.push(event);
        }

        // Start, one per stage, then the result
        assert_eq!(events.len(), 6);
        assert_eq!(events[0].payload["message"], "Run started");
        assert!(events[..5].iter().all(|e| e.event_type == EventType::Status));
        assert_eq!(events[5].event_type, EventType::Result);
        assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
        assert!(events[5].payload["title"].as_str().unwrap().contains("wireless earbuds"));

        let stored = store.get(run_id).unwrap();
        assert_eq!(stored.status, RunStatus::Completed);
        assert_eq!(stored.stage_results.len(), 4);
        assert!(stored.stage_results.iter().all(|r| r.parsed_output.is_some()));

        let verification = &stored.stage_results[2];
        assert_eq!(verification.stage_name, "keyword_verification");
        assert_eq!(verification.safety.len(), 3);

        assert_eq!(queue.pending(), 0);
        assert_eq!(queue.leased(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_request_stops_at_next_stage() {
        let queue = Arc::new(MemoryQueue::default());
        let store = Arc::new(MemoryRunStore::new());
        let engine = PipelineEngine::new(slow_graph(), Arc::new(MemoryRelay::new()), store.clone());
        let poller = RunPoller::new(config(1), queue.clone(), Arc::new(engine));

        let run_id = Dispatcher::new(queue.clone()).submit("q").await.unwrap();
        let mut handles = poller.poll_once().await.unwrap();

        // Let the first stage start
        time::sleep(Duration::from_secs(2)).await;

        // Leased, so the request is only a flag the heartbeat picks up
        assert!(queue.cancel(run_id).unwrap().is_none());

        let status = handles.remove(0).await.unwrap();
        assert_eq!(status, RunStatus::Cancelled);

        let stored = store.get(run_id).unwrap();
        assert_eq!(stored.stage_results.len(), 1);
        assert_eq!(stored.error_message.as_deref(), Some("Run cancelled"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_lease_takeover_reports_one_outcome() {
        let queue = Arc::new(MemoryQueue::new(Duration::from_secs(10)));
        let relay = Arc::new(MemoryRelay::new());
        let store = Arc::new(MemoryRunStore::new());
        let engine = Arc::new(PipelineEngine::new(slow_graph(), relay.clone(), store.clone()));

        // The first runner's heartbeat is too slow to keep its lease
        let mut slow = config(1);
        slow.runner_id = "runner-a".to_string();
        slow.heartbeat_interval = Duration::from_secs(20);
        let first = RunPoller::new(slow, queue.clone(), engine.clone());

        let mut healthy = config(1);
        healthy.runner_id = "runner-b".to_string();
        let second = RunPoller::new(healthy, queue.clone(), engine);

        let mut subscription = relay.subscribe(sourcer_engine::DEFAULT_TOPIC).await.unwrap();
        let run_id = Dispatcher::new(queue.clone()).submit("q").await.unwrap();

        let mut first_handles = first.poll_once().await.unwrap();
        time::sleep(Duration::from_secs(11)).await;
        let mut second_handles = second.poll_once().await.unwrap();
        assert_eq!(second_handles.len(), 1);

        assert_eq!(first_handles.remove(0).await.unwrap(), RunStatus::Running);
        assert_eq!(second_handles.remove(0).await.unwrap(), RunStatus::Completed);

        let events: Vec<_> = std::iter::from_fn(|| subscription.try_next()).collect();
        let terminal: Vec<_> = events.iter().filter(|e| e.is_terminal()).collect();
        assert_eq!(terminal.len(), 1);
        assert_eq!(terminal[0].event_type, EventType::Result);

        let stored = store.get(run_id).unwrap();
        assert_eq!(stored.status, RunStatus::Completed);
        assert_eq!(stored.attempts, 2);
        assert_eq!(queue.leased(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_before_crash_ends_run_on_redelivery() {
        let queue = Arc::new(MemoryQueue::new(Duration::from_secs(10)));
        let relay = Arc::new(MemoryRelay::new());
        let store = Arc::new(MemoryRunStore::new());
        let engine = PipelineEngine::new(slow_graph(), relay.clone(), store.clone());
        let poller = RunPoller::new(config(1), queue.clone(), Arc::new(engine));

        let mut subscription = relay.subscribe(sourcer_engine::DEFAULT_TOPIC).await.unwrap();
        let run_id = Dispatcher::new(queue.clone()).submit("q").await.unwrap();

        // A worker claims the run, is asked to cancel, and dies
        queue.claim("crashed").await.unwrap().unwrap();
        assert!(queue.cancel(run_id).unwrap().is_none());
        time::sleep(Duration::from_secs(11)).await;

        let mut handles = poller.poll_once().await.unwrap();
        assert_eq!(handles.remove(0).await.unwrap(), RunStatus::Cancelled);

        let events: Vec<_> = std::iter::from_fn(|| subscription.try_next()).collect();
        let terminal: Vec<_> = events.iter().filter(|e| e.is_terminal()).collect();
        assert_eq!(terminal.len(), 1);
        assert_eq!(terminal[0].event_type, EventType::Error);

        let stored = store.get(run_id).unwrap();
        assert_eq!(stored.status, RunStatus::Cancelled);
        assert!(stored.stage_results.is_empty());
        assert_eq!(queue.leased(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_respects_max_parallel_runs() {
        let queue = Arc::new(MemoryQueue::default());
        let engine = PipelineEngine::new(
            slow_graph(),
            Arc::new(MemoryRelay::new()),
            Arc::new(MemoryRunStore::new()),
        );
        let poller = RunPoller::new(config(1), queue.clone(), Arc::new(engine));
        let dispatcher = Dispatcher::new(queue.clone());
        dispatcher.submit("first").await.unwrap();
        dispatcher.submit("second").await.unwrap();

        let handles = poller.poll_once().await.unwrap();
        assert_eq!(handles.len(), 1);
        assert_eq!(queue.pending(), 1);

        for handle in handles {
            handle.await.unwrap();
        }
        let handles = poller.poll_once().await.unwrap();
        assert_eq!(handles.len(), 1);
        assert_eq!(queue.pending(), 0);
    }

    #[tokio::test]
    async fn test_empty_queue() {
        let engine = PipelineEngine::new(
            slow_graph(),
            Arc::new(MemoryRelay::new()),
            Arc::new(MemoryRunStore::new()),
        );
        let poller = RunPoller::new(config(2), Arc::new(MemoryQueue::default()), Arc::new(engine));
        assert!(poller.poll_once().await.unwrap().is_empty());
    }
}
