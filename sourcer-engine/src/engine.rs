//! Pipeline engine
//!
//! Walks the stage graph for one run. Each stage sees the parsed outputs of
//! its declared predecessors; every boundary is announced on the relay; the
//! first stage failure ends the run. The run is persisted once, after its
//! terminal event has been published. A worker that lost its lease gives the
//! run up at the next boundary and reports nothing, since the run now
//! belongs to whichever worker claimed it next.

use chrono::Utc;
use serde_json::{Value, json};
use sourcer_core::domain::event::ProgressEvent;
use sourcer_core::domain::run::{PipelineRun, RunStatus, StageResult, StageStatus};
use sourcer_core::domain::safety::SafetyDecision;
use std::collections::HashMap;
use std::sync::Arc;

use crate::cancel::{CancelSignal, StopReason};
use crate::extract::{self, unparsed_wrapper};
use crate::graph::{StageDefinition, StageGraph};
use crate::relay::EventPublisher;
use crate::safety::{SafetyGate, candidate_terms};
use crate::sink::PersistenceSink;
use crate::stage::StageContext;

/// Key under which safety decisions are handed to downstream stages
pub const SAFETY_DECISIONS_KEY: &str = "safety_decisions";

pub struct PipelineEngine {
    graph: Arc<StageGraph>,
    gate: Option<Arc<SafetyGate>>,
    publisher: Arc<dyn EventPublisher>,
    sink: Arc<dyn PersistenceSink>,
    topic: String,
}

impl PipelineEngine {
    pub fn new(
        graph: StageGraph,
        publisher: Arc<dyn EventPublisher>,
        sink: Arc<dyn PersistenceSink>,
    ) -> Self {
        Self {
            graph: Arc::new(graph),
            gate: None,
            publisher,
            sink,
            topic: crate::DEFAULT_TOPIC.to_string(),
        }
    }

    pub fn with_safety_gate(mut self, gate: Arc<SafetyGate>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = topic.into();
        self
    }

    pub fn graph(&self) -> &StageGraph {
        &self.graph
    }

    /// Executes `run` to a terminal status and returns that status
    ///
    /// A run that is already terminal is left untouched. A run that arrives
    /// as `running` is a redelivery and starts over from the first stage. An
    /// abandoned run is returned still `running`.
    pub async fn run(&self, run: &mut PipelineRun, cancel: &CancelSignal) -> RunStatus {
        match run.status {
            status if status.is_terminal() => {
                tracing::warn!(run_id = %run.id, %status, "Run already finished, skipping");
                return status;
            }
            RunStatus::Running => {
                tracing::info!(run_id = %run.id, attempt = run.attempts, "Restarting redelivered run");
                run.stage_results.clear();
                run.final_result = None;
                run.error_message = None;
            }
            _ => {
                if let Err(e) = run.transition_to(RunStatus::Running) {
                    tracing::error!(run_id = %run.id, "{}", e);
                    return run.status;
                }
            }
        }

        let total = self.graph.len();
        tracing::info!(run_id = %run.id, query = %run.query, stages = total, "Run started");
        self.publish(ProgressEvent::status(
            run.id,
            json!({
                "stage": null,
                "message": "Run started",
                "query": run.query,
                "total": total,
            }),
        ))
        .await;

        let mut slots: Vec<Option<StageResult>> = vec![None; total];
        let mut values: HashMap<String, Value> = HashMap::new();
        let mut last_stage: Option<&str> = None;

        for (step, stage) in self.graph.execution_order().enumerate() {
            match cancel.reason() {
                Some(StopReason::Cancelled) => {
                    run.stage_results = slots.into_iter().flatten().collect();
                    return self.finish(run, RunStatus::Cancelled, "Run cancelled".to_string()).await;
                }
                Some(StopReason::Abandoned) => {
                    run.stage_results = slots.into_iter().flatten().collect();
                    return abandon(run);
                }
                None => {}
            }

            let ctx = StageContext {
                run_id: run.id,
                query: run.query.clone(),
                inputs: stage
                    .depends_on
                    .iter()
                    .filter_map(|dep| values.get(dep).map(|v| (dep.clone(), v.clone())))
                    .collect(),
            };

            let position = self.graph.position(&stage.name).unwrap_or(step);
            let started_at = Utc::now();
            tracing::debug!(run_id = %run.id, stage = %stage.name, "Stage started");

            let is_final = step + 1 == total;

            match stage.executor.execute(&ctx).await {
                Ok(output) => {
                    // The final result always comes from the extractor
                    let extraction = match output.parsed_output {
                        Some(parsed) if !is_final => extract::Extraction {
                            raw_output: output.raw_output,
                            parsed_output: Some(parsed),
                            parse_error: None,
                        },
                        _ => extract::extract(&output.raw_output),
                    };
                    if let Some(err) = &extraction.parse_error {
                        tracing::warn!(run_id = %run.id, stage = %stage.name, "Output not parsed: {}", err);
                    }

                    let mut value = match &extraction.parsed_output {
                        Some(parsed) => parsed.clone(),
                        None => unparsed_wrapper(&extraction.raw_output, extraction.parse_error.as_deref()),
                    };

                    let safety = self.verify(run, stage, &mut value).await;
                    let rejected = safety.iter().filter(|d| !d.is_safe).count();

                    slots[position] = Some(StageResult {
                        stage_name: stage.name.clone(),
                        raw_output: extraction.raw_output,
                        parsed_output: extraction.parsed_output,
                        parse_error: extraction.parse_error,
                        started_at,
                        completed_at: Utc::now(),
                        status: StageStatus::Ok,
                        error: None,
                        safety,
                    });
                    values.insert(stage.name.clone(), value);
                    last_stage = Some(&stage.name);

                    let mut payload = json!({
                        "stage": stage.name,
                        "index": step + 1,
                        "total": total,
                        "status": "ok",
                        "message": format!("Stage '{}' completed", stage.name),
                    });
                    if stage.verification {
                        payload["unsafe_terms"] = json!(rejected);
                    }
                    tracing::info!(run_id = %run.id, stage = %stage.name, "Stage completed");
                    self.publish(ProgressEvent::status(run.id, payload)).await;
                }
                Err(e) => {
                    tracing::error!(run_id = %run.id, stage = %stage.name, "Stage failed: {}", e);
                    slots[position] = Some(StageResult {
                        stage_name: stage.name.clone(),
                        raw_output: String::new(),
                        parsed_output: None,
                        parse_error: None,
                        started_at,
                        completed_at: Utc::now(),
                        status: StageStatus::Failed,
                        error: Some(e.to_string()),
                        safety: Vec::new(),
                    });
                    run.stage_results = slots.into_iter().flatten().collect();
                    if cancel.is_abandoned() {
                        return abandon(run);
                    }
                    let message = format!("Stage '{}' failed: {}", stage.name, e);
                    return self.finish(run, RunStatus::Failed, message).await;
                }
            }
        }

        run.stage_results = slots.into_iter().flatten().collect();
        if cancel.is_abandoned() {
            return abandon(run);
        }
        run.final_result = last_stage.and_then(|name| values.remove(name));

        if let Err(e) = run.transition_to(RunStatus::Completed) {
            tracing::error!(run_id = %run.id, "{}", e);
        }
        let payload = run.final_result.clone().unwrap_or(Value::Null);
        self.publish(ProgressEvent::result(run.id, payload)).await;
        tracing::info!(run_id = %run.id, "Run completed");

        self.persist(run).await;
        run.status
    }

    /// Runs candidate terms of a verification stage through the gate
    ///
    /// Decisions are attached to the value passed downstream. An unsafe term
    /// never stops the run.
    async fn verify(
        &self,
        run: &PipelineRun,
        stage: &StageDefinition,
        value: &mut Value,
    ) -> Vec<SafetyDecision> {
        if !stage.verification {
            return Vec::new();
        }
        let Some(gate) = &self.gate else {
            tracing::warn!(stage = %stage.name, "Verification stage without a safety gate");
            return Vec::new();
        };

        let mut decisions = Vec::new();
        for term in candidate_terms(value) {
            let decision = match gate.check(&term).await {
                Ok(decision) => decision,
                Err(e) => {
                    tracing::warn!(run_id = %run.id, term = %term, "Safety check failed: {}", e);
                    SafetyDecision {
                        term,
                        is_safe: false,
                        similarity_score: 0.0,
                        matched_term: None,
                        reason: Some(format!("Safety check unavailable: {}", e)),
                    }
                }
            };
            decisions.push(decision);
        }

        if let Value::Object(map) = value {
            match serde_json::to_value(&decisions) {
                Ok(encoded) => {
                    map.insert(SAFETY_DECISIONS_KEY.to_string(), encoded);
                }
                Err(e) => tracing::error!("Failed to encode safety decisions: {}", e),
            }
        }
        decisions
    }

    /// Ends the run with a failure-like status and its single error event
    async fn finish(&self, run: &mut PipelineRun, status: RunStatus, message: String) -> RunStatus {
        if let Err(e) = run.transition_to(status) {
            tracing::error!(run_id = %run.id, "{}", e);
        }
        run.error_message = Some(message.clone());
        tracing::info!(run_id = %run.id, %status, "{}", message);

        self.publish(ProgressEvent::error(run.id, message)).await;
        self.persist(run).await;
        run.status
    }

    async fn publish(&self, event: ProgressEvent) {
        if let Err(e) = self.publisher.publish(&self.topic, &event).await {
            tracing::warn!(run_id = %event.run_id, "Failed to publish progress event: {}", e);
        }
    }

    async fn persist(&self, run: &PipelineRun) {
        if let Err(e) = self.sink.store(run).await {
            tracing::error!(run_id = %run.id, "Failed to persist run: {}", e);
        }
    }
}

/// Leaves the run to its new owner: no event, no write
fn abandon(run: &PipelineRun) -> RunStatus {
    tracing::warn!(
        run_id = %run.id,
        stages_done = run.stage_results.len(),
        "Lease lost, abandoning run"
    );
    run.status
}
