//! Run API Handlers
//!
//! Submission, inspection and cancellation for callers, plus the claim /
//! heartbeat / events / complete protocol used by runners.

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use sourcer_core::domain::event::ProgressEvent;
use sourcer_core::domain::run::{PipelineRun, RunStatus};
use sourcer_core::dto::run::{
    CancelResponse, ClaimRequest, CompleteRun, HeartbeatRequest, HeartbeatResponse, RunListQuery,
    StoredRun, SubmitResponse, SubmitRun,
};
use uuid::Uuid;

use crate::api::AppState;
use crate::api::error::{ApiError, ApiResult};
use crate::service::run_service::{self, CancelOutcome};

// =============================================================================
// Caller Endpoints
// =============================================================================

/// POST /sourcing, POST /runs
/// Queue a run and return without waiting for it
pub async fn submit_run(
    State(state): State<AppState>,
    Json(req): Json<SubmitRun>,
) -> ApiResult<(StatusCode, Json<SubmitResponse>)> {
    let run_id = state.dispatcher.submit(&req.query).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitResponse {
            run_id,
            status: RunStatus::Queued,
        }),
    ))
}

/// GET /runs
/// List runs, oldest first
///
/// Query parameters:
/// - `status` (optional): only runs in this status
pub async fn list_runs(
    State(state): State<AppState>,
    Query(query): Query<RunListQuery>,
) -> ApiResult<Json<Vec<StoredRun>>> {
    let runs = match query.status {
        Some(status) => run_service::list_by_status(&state.pool, status).await?,
        None => state
            .store
            .list_all()
            .await
            .map_err(|e| ApiError::InternalError(e.to_string()))?,
    };

    Ok(Json(runs))
}

/// GET /runs/{id}
pub async fn get_run(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<PipelineRun>> {
    tracing::debug!("Getting run: {}", id);
    Ok(Json(run_service::get_run(&state.pool, id).await?))
}

/// GET /runs/{id}/events
/// Everything published for a run so far
pub async fn list_run_events(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Vec<ProgressEvent>>> {
    Ok(Json(run_service::list_events(&state.pool, id).await?))
}

/// POST /runs/{id}/cancel
pub async fn cancel_run(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<(StatusCode, Json<CancelResponse>)> {
    let outcome =
        run_service::cancel_run(&state.pool, state.publisher.as_ref(), &state.config.topic, id)
            .await?;

    let outcome = match outcome {
        CancelOutcome::Cancelled => "cancelled",
        CancelOutcome::Requested => "cancel_requested",
    };
    Ok((
        StatusCode::ACCEPTED,
        Json(CancelResponse {
            run_id: id,
            outcome: outcome.to_string(),
        }),
    ))
}

// =============================================================================
// Runner Endpoints
// =============================================================================

/// POST /runs/claim
/// Hand the next available run to a runner; `null` when there is none
pub async fn claim_run(
    State(state): State<AppState>,
    Json(req): Json<ClaimRequest>,
) -> ApiResult<Json<Option<PipelineRun>>> {
    if req.worker_id.trim().is_empty() {
        return Err(ApiError::BadRequest("worker_id cannot be empty".to_string()));
    }

    Ok(Json(state.queue.claim(&req.worker_id).await?))
}

/// POST /runs/{id}/heartbeat
pub async fn heartbeat_run(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<HeartbeatRequest>,
) -> ApiResult<Json<HeartbeatResponse>> {
    let cancel_requested = state.queue.heartbeat(id, &req.worker_id).await?;
    Ok(Json(HeartbeatResponse { cancel_requested }))
}

/// POST /runs/{id}/events
/// Publish a runner's progress event on the deployment topic
pub async fn publish_event(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(event): Json<ProgressEvent>,
) -> ApiResult<StatusCode> {
    if event.run_id != id {
        return Err(ApiError::BadRequest(format!(
            "Event run id {} does not match path id {}",
            event.run_id, id
        )));
    }

    state.publisher.publish(&state.config.topic, &event).await?;
    Ok(StatusCode::ACCEPTED)
}

/// POST /runs/{id}/complete
/// Store the terminal state of a run
///
/// Only the worker holding the lease may complete a run; anyone else gets
/// 409 and the stored run is left alone.
pub async fn complete_run(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<CompleteRun>,
) -> ApiResult<StatusCode> {
    tracing::info!(
        run_id = %id,
        worker_id = %req.worker_id,
        status = %req.run.status,
        "Run reported finished"
    );
    run_service::complete_run(
        state.queue.as_ref(),
        state.store.as_ref(),
        id,
        &req.worker_id,
        req.run,
    )
    .await?;

    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use crate::api::create_router;
    use crate::api::test_support::test_app;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use serde_json::{Value, json};
    use sourcer_core::domain::event::ProgressEvent;
    use sourcer_core::domain::run::{PipelineRun, RunStatus};
    use sourcer_engine::relay::EventRelay;
    use tower::ServiceExt;

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_submit_returns_queued_run() {
        let app = test_app().await;
        let router = create_router(app.state.clone());

        let response = router
            .oneshot(post_json("/sourcing", json!({"query": "wireless earbuds"})))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let body = body_json(response).await;
        assert_eq!(body["status"], "queued");
        assert!(body["run_id"].as_str().is_some());
        assert_eq!(app.queue.pending(), 1);
    }

    #[tokio::test]
    async fn test_submit_rejects_empty_query() {
        let app = test_app().await;
        let response = create_router(app.state.clone())
            .oneshot(post_json("/runs", json!({"query": "  "})))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert!(body["error"].as_str().unwrap().contains("empty"));
    }

    #[tokio::test]
    async fn test_runner_protocol_round() {
        let app = test_app().await;
        let router = create_router(app.state.clone());

        router
            .clone()
            .oneshot(post_json("/sourcing", json!({"query": "phone case"})))
            .await
            .unwrap();

        let claimed = router
            .clone()
            .oneshot(post_json("/runs/claim", json!({"worker_id": "runner-1"})))
            .await
            .unwrap();
        assert_eq!(claimed.status(), StatusCode::OK);
        let mut run: PipelineRun = serde_json::from_value(body_json(claimed).await).unwrap();
        assert_eq!(run.status, RunStatus::Running);

        let beat = router
            .clone()
            .oneshot(post_json(
                &format!("/runs/{}/heartbeat", run.id),
                json!({"worker_id": "runner-1"}),
            ))
            .await
            .unwrap();
        assert_eq!(body_json(beat).await["cancel_requested"], false);

        let mut events = app.relay.subscribe("sourcing_updates").await.unwrap();
        let event = ProgressEvent::result(run.id, json!({"title": "x"}));
        let published = router
            .clone()
            .oneshot(post_json(
                &format!("/runs/{}/events", run.id),
                serde_json::to_value(&event).unwrap(),
            ))
            .await
            .unwrap();
        assert_eq!(published.status(), StatusCode::ACCEPTED);
        assert_eq!(events.try_next(), Some(event));

        run.transition_to(RunStatus::Completed).unwrap();
        let completed = router
            .clone()
            .oneshot(post_json(
                &format!("/runs/{}/complete", run.id),
                json!({"worker_id": "runner-1", "run": run}),
            ))
            .await
            .unwrap();
        assert_eq!(completed.status(), StatusCode::NO_CONTENT);
        assert_eq!(app.store.get(run.id).unwrap().status, RunStatus::Completed);
        assert_eq!(app.queue.leased(), 0);

        let empty = router
            .oneshot(post_json("/runs/claim", json!({"worker_id": "runner-1"})))
            .await
            .unwrap();
        assert_eq!(body_json(empty).await, Value::Null);
    }

    #[tokio::test]
    async fn test_completion_from_other_worker_is_rejected() {
        let app = test_app().await;
        let router = create_router(app.state.clone());

        router
            .clone()
            .oneshot(post_json("/sourcing", json!({"query": "phone case"})))
            .await
            .unwrap();
        let claimed = router
            .clone()
            .oneshot(post_json("/runs/claim", json!({"worker_id": "owner"})))
            .await
            .unwrap();
        let mut run: PipelineRun = serde_json::from_value(body_json(claimed).await).unwrap();

        let mut stale = run.clone();
        stale.transition_to(RunStatus::Cancelled).unwrap();
        let rejected = router
            .clone()
            .oneshot(post_json(
                &format!("/runs/{}/complete", run.id),
                json!({"worker_id": "previous-owner", "run": stale}),
            ))
            .await
            .unwrap();
        assert_eq!(rejected.status(), StatusCode::CONFLICT);
        assert!(app.store.get(run.id).is_none());
        assert_eq!(app.queue.leased(), 1);

        run.transition_to(RunStatus::Completed).unwrap();
        let completed = router
            .oneshot(post_json(
                &format!("/runs/{}/complete", run.id),
                json!({"worker_id": "owner", "run": run}),
            ))
            .await
            .unwrap();
        assert_eq!(completed.status(), StatusCode::NO_CONTENT);
        assert_eq!(app.store.get(run.id).unwrap().status, RunStatus::Completed);
    }

    #[tokio::test]
    async fn test_event_for_other_run_is_rejected() {
        let app = test_app().await;
        let event = ProgressEvent::error(uuid::Uuid::new_v4(), "x");
        let response = create_router(app.state.clone())
            .oneshot(post_json(
                &format!("/runs/{}/events", uuid::Uuid::new_v4()),
                serde_json::to_value(&event).unwrap(),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_heartbeat_for_unknown_lease() {
        let app = test_app().await;
        let response = create_router(app.state.clone())
            .oneshot(post_json(
                &format!("/runs/{}/heartbeat", uuid::Uuid::new_v4()),
                json!({"worker_id": "runner-1"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_list_runs_without_filter_reads_store() {
        let app = test_app().await;
        let mut run = PipelineRun::new("q");
        run.transition_to(RunStatus::Running).unwrap();
        run.transition_to(RunStatus::Failed).unwrap();
        sourcer_engine::sink::PersistenceSink::store(app.store.as_ref(), &run)
            .await
            .unwrap();

        let response = create_router(app.state.clone())
            .oneshot(Request::get("/runs").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = body_json(response).await;
        assert_eq!(body[0]["run_id"], run.id.to_string());
        assert_eq!(body[0]["status"], "failed");
    }
}
