//! Event Repository
//!
//! Progress events are appended to `run_events` and announced with
//! `pg_notify(topic, seq)`. Listeners use the notification only as a wakeup
//! and read events back by sequence number, which keeps them in order.

use sourcer_core::domain::event::ProgressEvent;
use sqlx::PgPool;
use uuid::Uuid;

/// Append an event and notify listeners on `topic`; returns its sequence number
pub async fn append_and_notify(
    pool: &PgPool,
    topic: &str,
    event: &ProgressEvent,
) -> Result<i64, sqlx::Error> {
    let payload = serde_json::to_value(event).map_err(|e| sqlx::Error::Encode(Box::new(e)))?;
    let mut tx = pool.begin().await?;

    // Serialises publishers per topic so sequence order equals commit order
    sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
        .bind(topic)
        .execute(&mut *tx)
        .await?;

    let (seq,): (i64,) = sqlx::query_as(
        r#"
        INSERT INTO run_events (run_id, topic, event)
        VALUES ($1, $2, $3)
        RETURNING seq
        "#,
    )
    .bind(event.run_id)
    .bind(topic)
    .bind(payload)
    .fetch_one(&mut *tx)
    .await?;

    // Delivered on commit
    sqlx::query("SELECT pg_notify($1, $2)")
        .bind(topic)
        .bind(seq.to_string())
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(seq)
}

/// Highest sequence number published on `topic` so far
pub async fn latest_seq(pool: &PgPool, topic: &str) -> Result<i64, sqlx::Error> {
    let (seq,): (Option<i64>,) = sqlx::query_as("SELECT MAX(seq) FROM run_events WHERE topic = $1")
        .bind(topic)
        .fetch_one(pool)
        .await?;

    Ok(seq.unwrap_or(0))
}

/// Events on `topic` published after `after`, in publication order
pub async fn fetch_after(
    pool: &PgPool,
    topic: &str,
    after: i64,
) -> Result<Vec<(i64, ProgressEvent)>, sqlx::Error> {
    let rows = sqlx::query_as::<_, EventRow>(
        r#"
        SELECT seq, event
        FROM run_events
        WHERE topic = $1 AND seq > $2
        ORDER BY seq ASC
        "#,
    )
    .bind(topic)
    .bind(after)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().filter_map(EventRow::decode).collect())
}

/// Full event history of one run
pub async fn list_for_run(pool: &PgPool, run_id: Uuid) -> Result<Vec<ProgressEvent>, sqlx::Error> {
    let rows = sqlx::query_as::<_, EventRow>(
        r#"
        SELECT seq, event
        FROM run_events
        WHERE run_id = $1
        ORDER BY seq ASC
        "#,
    )
    .bind(run_id)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .filter_map(EventRow::decode)
        .map(|(_, event)| event)
        .collect())
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct EventRow {
    seq: i64,
    event: serde_json::Value,
}

impl EventRow {
    fn decode(self) -> Option<(i64, ProgressEvent)> {
        match serde_json::from_value(self.event) {
            Ok(event) => Some((self.seq, event)),
            Err(e) => {
                tracing::warn!(seq = self.seq, "Skipping undecodable event: {}", e);
                None
            }
        }
    }
}
