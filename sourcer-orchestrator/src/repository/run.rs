//! Run Repository
//!
//! The `runs` table is both the work queue and the durable record of runs.

use sourcer_core::domain::run::{PipelineRun, RunStatus, StageResult};
use sqlx::PgPool;
use std::time::Duration;
use uuid::Uuid;

const RUN_COLUMNS: &str = "id, query, status, created_at, started_at, completed_at, \
     stage_results, final_result, error_message, attempts";

/// Insert a newly queued run
pub async fn insert(pool: &PgPool, run: &PipelineRun) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO runs (id, query, status, created_at, attempts)
        VALUES ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(run.id)
    .bind(&run.query)
    .bind(run.status.as_str())
    .bind(run.created_at)
    .bind(run.attempts as i32)
    .execute(pool)
    .await?;

    Ok(())
}

/// Find a run by ID
pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<PipelineRun>, sqlx::Error> {
    let row = sqlx::query_as::<_, RunRow>(&format!("SELECT {} FROM runs WHERE id = $1", RUN_COLUMNS))
        .bind(id)
        .fetch_optional(pool)
        .await?;

    Ok(row.map(|r| r.into()))
}

/// List runs oldest first, optionally filtered by status
pub async fn list(pool: &PgPool, status: Option<RunStatus>) -> Result<Vec<PipelineRun>, sqlx::Error> {
    let rows = sqlx::query_as::<_, RunRow>(&format!(
        "SELECT {} FROM runs WHERE ($1::TEXT IS NULL OR status = $1) ORDER BY created_at ASC",
        RUN_COLUMNS
    ))
    .bind(status.map(|s| s.as_str()))
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|r| r.into()).collect())
}

/// Claim the oldest available run for a worker
///
/// Available means queued, or running under a lease that has expired. Rows
/// locked by a concurrent claim are skipped. A redelivered run stays
/// `running` and starts with no stage results. `cancel_requested` survives
/// the redelivery, so the new worker's first heartbeat ends the run as
/// cancelled.
pub async fn claim_next(
    pool: &PgPool,
    worker_id: &str,
    lease: Duration,
) -> Result<Option<PipelineRun>, sqlx::Error> {
    let row = sqlx::query_as::<_, RunRow>(&format!(
        r#"
        UPDATE runs
        SET status = 'running',
            started_at = COALESCE(started_at, now()),
            worker_id = $1,
            lease_expires_at = now() + make_interval(secs => $2),
            attempts = attempts + 1,
            stage_results = '[]'
        WHERE id = (
            SELECT id FROM runs
            WHERE status = 'queued'
               OR (status = 'running' AND lease_expires_at < now())
            ORDER BY created_at ASC
            LIMIT 1
            FOR UPDATE SKIP LOCKED
        )
        RETURNING {}
        "#,
        RUN_COLUMNS
    ))
    .bind(worker_id)
    .bind(lease.as_secs_f64())
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| r.into()))
}

/// Extend the lease held by `worker_id`
///
/// Returns the cancellation flag, or `None` when the worker no longer holds
/// the run.
pub async fn heartbeat(
    pool: &PgPool,
    id: Uuid,
    worker_id: &str,
    lease: Duration,
) -> Result<Option<bool>, sqlx::Error> {
    let flag: Option<(bool,)> = sqlx::query_as(
        r#"
        UPDATE runs
        SET lease_expires_at = now() + make_interval(secs => $3)
        WHERE id = $1 AND worker_id = $2 AND status = 'running'
        RETURNING cancel_requested
        "#,
    )
    .bind(id)
    .bind(worker_id)
    .bind(lease.as_secs_f64())
    .fetch_optional(pool)
    .await?;

    Ok(flag.map(|(cancel,)| cancel))
}

/// Give up the lease `worker_id` holds on a finished run
///
/// The lease expiry is kept: if the terminal write that follows never lands,
/// the run is redelivered once it lapses. Returns false when the run is
/// leased to another worker or not running.
pub async fn release(pool: &PgPool, id: Uuid, worker_id: &str) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE runs SET worker_id = NULL WHERE id = $1 AND worker_id = $2 AND status = 'running'",
    )
    .bind(id)
    .bind(worker_id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Cancel a run no worker is executing: queued, or running on a dead lease
pub async fn cancel_unclaimed(pool: &PgPool, id: Uuid, message: &str) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE runs
        SET status = 'cancelled', completed_at = now(), error_message = $2, lease_expires_at = NULL
        WHERE id = $1
          AND (status = 'queued' OR (status = 'running' AND lease_expires_at < now()))
        "#,
    )
    .bind(id)
    .bind(message)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Flag a running run so its worker stops at the next stage boundary
pub async fn request_cancel(pool: &PgPool, id: Uuid) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE runs SET cancel_requested = TRUE WHERE id = $1 AND status = 'running'",
    )
    .bind(id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Record a run's terminal state
///
/// Rows that are already terminal are left untouched, so status never
/// regresses, and so are rows still leased to a worker. Returns whether the
/// row was written.
pub async fn store_terminal(pool: &PgPool, run: &PipelineRun) -> Result<bool, sqlx::Error> {
    let stage_results = serde_json::to_value(&run.stage_results)
        .map_err(|e| sqlx::Error::Encode(Box::new(e)))?;

    let result = sqlx::query(
        r#"
        INSERT INTO runs (id, query, status, created_at, started_at, completed_at,
                          stage_results, final_result, error_message, attempts)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        ON CONFLICT (id) DO UPDATE
        SET status = EXCLUDED.status,
            started_at = COALESCE(runs.started_at, EXCLUDED.started_at),
            completed_at = EXCLUDED.completed_at,
            stage_results = EXCLUDED.stage_results,
            final_result = EXCLUDED.final_result,
            error_message = EXCLUDED.error_message,
            lease_expires_at = NULL
        WHERE runs.status IN ('queued', 'running') AND runs.worker_id IS NULL
        "#,
    )
    .bind(run.id)
    .bind(&run.query)
    .bind(run.status.as_str())
    .bind(run.created_at)
    .bind(run.started_at)
    .bind(run.completed_at)
    .bind(stage_results)
    .bind(&run.final_result)
    .bind(&run.error_message)
    .bind(run.attempts as i32)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct RunRow {
    id: Uuid,
    query: String,
    status: String,
    created_at: chrono::DateTime<chrono::Utc>,
    started_at: Option<chrono::DateTime<chrono::Utc>>,
    completed_at: Option<chrono::DateTime<chrono::Utc>>,
    stage_results: serde_json::Value,
    final_result: Option<serde_json::Value>,
    error_message: Option<String>,
    attempts: i32,
}

impl From<RunRow> for PipelineRun {
    fn from(row: RunRow) -> Self {
        let status = RunStatus::parse(&row.status).unwrap_or_else(|| {
            tracing::warn!(run_id = %row.id, "Unknown run status '{}', treating as failed", row.status);
            RunStatus::Failed
        });

        let stage_results: Vec<StageResult> = serde_json::from_value(row.stage_results)
            .unwrap_or_else(|e| {
                tracing::warn!(run_id = %row.id, "Unreadable stage results: {}", e);
                Vec::new()
            });

        PipelineRun {
            id: row.id,
            query: row.query,
            created_at: row.created_at,
            status,
            stage_results,
            final_result: row.final_result,
            started_at: row.started_at,
            completed_at: row.completed_at,
            error_message: row.error_message,
            attempts: row.attempts.max(0) as u32,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(status: &str, stage_results: serde_json::Value) -> RunRow {
        RunRow {
            id: Uuid::new_v4(),
            query: "q".to_string(),
            status: status.to_string(),
            created_at: chrono::Utc::now(),
            started_at: None,
            completed_at: None,
            stage_results,
            final_result: None,
            error_message: None,
            attempts: 1,
        }
    }

    #[test]
    fn test_row_conversion() {
        let run: PipelineRun = row("running", serde_json::json!([])).into();
        assert_eq!(run.status, RunStatus::Running);
        assert!(run.stage_results.is_empty());
        assert_eq!(run.attempts, 1);
    }

    #[test]
    fn test_unreadable_row_values_degrade() {
        let run: PipelineRun = row("exploded", serde_json::json!({"not": "a list"})).into();
        assert_eq!(run.status, RunStatus::Failed);
        assert!(run.stage_results.is_empty());
    }
}
