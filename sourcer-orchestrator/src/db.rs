use sourcer_core::domain::safety::default_banned_terms;
use sqlx::{PgPool, postgres::PgPoolOptions};
use std::time::Duration;

use crate::repository::banned_term_repository;

pub async fn create_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(5))
        .connect(database_url)
        .await
}

pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    // Runs double as the work queue
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS runs (
            id UUID PRIMARY KEY,
            query TEXT NOT NULL,
            status VARCHAR(20) NOT NULL,
            created_at TIMESTAMPTZ NOT NULL,
            started_at TIMESTAMPTZ,
            completed_at TIMESTAMPTZ,
            stage_results JSONB NOT NULL DEFAULT '[]',
            final_result JSONB,
            error_message TEXT,
            attempts INTEGER NOT NULL DEFAULT 0,
            worker_id VARCHAR(255),
            lease_expires_at TIMESTAMPTZ,
            cancel_requested BOOLEAN NOT NULL DEFAULT FALSE
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS run_events (
            seq BIGSERIAL PRIMARY KEY,
            run_id UUID NOT NULL,
            topic VARCHAR(63) NOT NULL,
            event JSONB NOT NULL,
            published_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS banned_terms (
            term TEXT PRIMARY KEY,
            reason TEXT NOT NULL,
            category VARCHAR(50) NOT NULL,
            created_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_runs_status_created ON runs(status, created_at)")
        .execute(pool)
        .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_run_events_run_id ON run_events(run_id, seq)")
        .execute(pool)
        .await?;

    if banned_term_repository::count(pool).await? == 0 {
        let seeds = default_banned_terms();
        for term in &seeds {
            banned_term_repository::upsert(pool, term).await?;
        }
        tracing::info!("Seeded {} banned terms", seeds.len());
    }

    tracing::info!("Database migrations completed successfully");
    Ok(())
}
