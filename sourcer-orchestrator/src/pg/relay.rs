use async_trait::async_trait;
use sourcer_core::domain::event::ProgressEvent;
use sourcer_engine::relay::{EventPublisher, EventRelay, RelayError, Subscription};
use sqlx::PgPool;
use sqlx::postgres::PgListener;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::repository::event_repository;

/// Event relay over Postgres `LISTEN/NOTIFY`
///
/// Publishing appends to `run_events` and notifies the topic channel with
/// the new sequence number. Each subscription owns a listener connection
/// and reads events back in sequence order, starting after the newest event
/// that existed when it subscribed.
pub struct PgRelay {
    pool: PgPool,
}

impl PgRelay {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn unavailable(err: sqlx::Error) -> RelayError {
    RelayError::Unavailable(err.to_string())
}

#[async_trait]
impl EventPublisher for PgRelay {
    async fn publish(&self, topic: &str, event: &ProgressEvent) -> Result<(), RelayError> {
        let seq = event_repository::append_and_notify(&self.pool, topic, event)
            .await
            .map_err(unavailable)?;
        tracing::debug!(run_id = %event.run_id, seq, "Event published");
        Ok(())
    }
}

#[async_trait]
impl EventRelay for PgRelay {
    async fn subscribe(&self, topic: &str) -> Result<Subscription, RelayError> {
        let mut listener = PgListener::connect_with(&self.pool)
            .await
            .map_err(unavailable)?;
        listener.listen(topic).await.map_err(unavailable)?;

        let mut last_seq = event_repository::latest_seq(&self.pool, topic)
            .await
            .map_err(unavailable)?;

        let (tx, rx) = mpsc::unbounded_channel();
        let pool = self.pool.clone();
        let topic = topic.to_string();

        tokio::spawn(async move {
            loop {
                if let Err(e) = listener.recv().await {
                    // The listener reconnects on the next recv; the catch-up
                    // read below covers anything announced meanwhile
                    tracing::warn!(topic = %topic, "Listener error: {}", e);
                    tokio::time::sleep(Duration::from_millis(500)).await;
                }

                let events = match event_repository::fetch_after(&pool, &topic, last_seq).await {
                    Ok(events) => events,
                    Err(e) => {
                        tracing::warn!(topic = %topic, "Failed to read events: {}", e);
                        continue;
                    }
                };

                for (seq, event) in events {
                    last_seq = seq;
                    if tx.send(event).is_err() {
                        tracing::debug!(topic = %topic, "Subscriber dropped, closing listener");
                        return;
                    }
                }

                if tx.is_closed() {
                    return;
                }
            }
        });

        Ok(Subscription::new(rx))
    }
}
