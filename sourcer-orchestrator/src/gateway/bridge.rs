//! Relay to registry bridge
//!
//! Subscribes to the deployment topic and hands every event to the
//! connection registry. A lost subscription is re-established with backoff;
//! events published while it is down are not replayed.

use sourcer_engine::relay::EventRelay;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::gateway::registry::ConnectionRegistry;

const INITIAL_DELAY_MS: u64 = 500;
const MAX_DELAY_MS: u64 = 30_000;

pub fn spawn(
    relay: Arc<dyn EventRelay>,
    registry: Arc<ConnectionRegistry>,
    topic: String,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut delay_ms = INITIAL_DELAY_MS;

        loop {
            match relay.subscribe(&topic).await {
                Ok(mut subscription) => {
                    tracing::info!(topic = %topic, "Relay bridge subscribed");
                    delay_ms = INITIAL_DELAY_MS;

                    while let Some(event) = subscription.next().await {
                        let report = registry.broadcast(&event);
                        tracing::debug!(
                            run_id = %event.run_id,
                            delivered = report.delivered,
                            dropped = report.dropped,
                            "Event fanned out"
                        );
                    }
                    tracing::warn!(topic = %topic, "Relay subscription ended, resubscribing");
                }
                Err(e) => {
                    tracing::warn!(topic = %topic, "Relay subscribe failed: {}", e);
                    tracing::warn!("Retrying in {} ms...", delay_ms);
                }
            }

            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            delay_ms = (delay_ms * 2).min(MAX_DELAY_MS);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::registry::{ConnectionHandle, TopicFilter};
    use serde_json::json;
    use sourcer_core::domain::event::ProgressEvent;
    use sourcer_engine::relay::{EventPublisher, MemoryRelay};
    use uuid::Uuid;

    #[tokio::test]
    async fn test_bridge_forwards_relay_events() {
        let relay = Arc::new(MemoryRelay::new());
        let registry = Arc::new(ConnectionRegistry::new());
        let (conn, mut rx) = ConnectionHandle::new(TopicFilter::AllRuns, 8);
        registry.register(conn);

        let task = spawn(relay.clone(), registry.clone(), "updates".to_string());
        while relay.subscriber_count("updates") == 0 {
            tokio::task::yield_now().await;
        }

        let run_id = Uuid::new_v4();
        relay
            .publish("updates", &ProgressEvent::status(run_id, json!({"stage": "sourcing"})))
            .await
            .unwrap();

        let message = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        let value: serde_json::Value = serde_json::from_str(&message).unwrap();
        assert_eq!(value["type"], "status");
        assert_eq!(value["run_id"], run_id.to_string());
        task.abort();
    }
}
