//! Connection Registry
//!
//! Tracks live observer connections and fans progress events out to them.
//! Each connection owns a bounded channel drained by its own writer task, so
//! broadcasting never waits on a socket. A connection whose channel is
//! closed or full is dropped from the registry; the rest keep receiving.

use sourcer_core::domain::event::ProgressEvent;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use uuid::Uuid;

pub type ConnectionId = Uuid;

/// Which runs a connection wants to hear about
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopicFilter {
    AllRuns,
    Runs(HashSet<Uuid>),
}

impl TopicFilter {
    pub fn single(run_id: Uuid) -> Self {
        TopicFilter::Runs(HashSet::from([run_id]))
    }

    pub fn matches(&self, run_id: Uuid) -> bool {
        match self {
            TopicFilter::AllRuns => true,
            TopicFilter::Runs(ids) => ids.contains(&run_id),
        }
    }
}

#[derive(Debug)]
pub struct ConnectionHandle {
    pub id: ConnectionId,
    pub sender: mpsc::Sender<String>,
    pub topics: TopicFilter,
}

impl ConnectionHandle {
    /// Creates a handle and the receiving end its writer task drains
    pub fn new(topics: TopicFilter, buffer: usize) -> (Self, mpsc::Receiver<String>) {
        let (sender, rx) = mpsc::channel(buffer.max(1));
        let handle = Self {
            id: Uuid::new_v4(),
            sender,
            topics,
        };
        (handle, rx)
    }
}

/// Outcome of one broadcast
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub dropped: usize,
}

#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: Mutex<HashMap<ConnectionId, ConnectionHandle>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, handle: ConnectionHandle) -> ConnectionId {
        let id = handle.id;
        self.lock().insert(id, handle);
        tracing::debug!(connection_id = %id, "Observer connected");
        id
    }

    pub fn deregister(&self, id: ConnectionId) -> bool {
        let removed = self.lock().remove(&id).is_some();
        if removed {
            tracing::debug!(connection_id = %id, "Observer disconnected");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Sends `event` to every interested connection
    pub fn broadcast(&self, event: &ProgressEvent) -> BroadcastReport {
        let message = match event.to_message() {
            Ok(message) => message,
            Err(e) => {
                tracing::error!(run_id = %event.run_id, "Failed to serialize event: {}", e);
                return BroadcastReport::default();
            }
        };

        let mut report = BroadcastReport::default();
        let mut connections = self.lock();
        connections.retain(|id, conn| {
            if !conn.topics.matches(event.run_id) {
                return true;
            }
            match conn.sender.try_send(message.clone()) {
                Ok(()) => {
                    report.delivered += 1;
                    true
                }
                Err(TrySendError::Full(_)) => {
                    tracing::warn!(connection_id = %id, "Observer too slow, disconnecting");
                    report.dropped += 1;
                    false
                }
                Err(TrySendError::Closed(_)) => {
                    tracing::debug!(connection_id = %id, "Observer gone");
                    report.dropped += 1;
                    false
                }
            }
        });
        report
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<ConnectionId, ConnectionHandle>> {
        self.connections.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(run_id: Uuid, index: usize) -> ProgressEvent {
        ProgressEvent::status(run_id, json!({ "index": index }))
    }

    fn index_of(message: &str) -> u64 {
        let value: serde_json::Value = serde_json::from_str(message).unwrap();
        value["data"]["index"].as_u64().unwrap()
    }

    #[test]
    fn test_closed_observer_does_not_affect_others() {
        let registry = ConnectionRegistry::new();
        let run_id = Uuid::new_v4();

        let (a, a_rx) = ConnectionHandle::new(TopicFilter::AllRuns, 16);
        let (b, mut b_rx) = ConnectionHandle::new(TopicFilter::AllRuns, 16);
        registry.register(a);
        registry.register(b);

        let mut a_rx = Some(a_rx);
        for i in 1..=5 {
            if i == 3 {
                // Observer A disconnects after the second event
                drop(a_rx.take());
            }
            registry.broadcast(&event(run_id, i));
        }

        let received: Vec<u64> = std::iter::from_fn(|| b_rx.try_recv().ok())
            .map(|m| index_of(&m))
            .collect();
        assert_eq!(received, vec![1, 2, 3, 4, 5]);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_events_arrive_in_publication_order_after_drop() {
        let registry = ConnectionRegistry::new();
        let run_id = Uuid::new_v4();
        let (a, a_rx) = ConnectionHandle::new(TopicFilter::AllRuns, 16);
        let (b, mut b_rx) = ConnectionHandle::new(TopicFilter::AllRuns, 16);
        registry.register(a);
        registry.register(b);

        registry.broadcast(&event(run_id, 1));
        registry.broadcast(&event(run_id, 2));
        drop(a_rx);
        let reports: Vec<_> = (3..=5).map(|i| registry.broadcast(&event(run_id, i))).collect();

        assert_eq!(reports[0], BroadcastReport { delivered: 1, dropped: 1 });
        assert_eq!(reports[1], BroadcastReport { delivered: 1, dropped: 0 });

        let tail: Vec<u64> = std::iter::from_fn(|| b_rx.try_recv().ok())
            .skip(2)
            .map(|m| index_of(&m))
            .collect();
        assert_eq!(tail, vec![3, 4, 5]);
    }

    #[test]
    fn test_full_channel_drops_only_slow_observer() {
        let registry = ConnectionRegistry::new();
        let run_id = Uuid::new_v4();
        let (slow, _slow_rx) = ConnectionHandle::new(TopicFilter::AllRuns, 1);
        let (fast, mut fast_rx) = ConnectionHandle::new(TopicFilter::AllRuns, 8);
        let slow_id = registry.register(slow);
        registry.register(fast);

        registry.broadcast(&event(run_id, 1));
        let report = registry.broadcast(&event(run_id, 2));

        assert_eq!(report, BroadcastReport { delivered: 1, dropped: 1 });
        assert!(!registry.deregister(slow_id));
        assert_eq!(std::iter::from_fn(|| fast_rx.try_recv().ok()).count(), 2);
    }

    #[test]
    fn test_run_filter() {
        let registry = ConnectionRegistry::new();
        let watched = Uuid::new_v4();
        let (conn, mut rx) = ConnectionHandle::new(TopicFilter::single(watched), 8);
        registry.register(conn);

        registry.broadcast(&event(Uuid::new_v4(), 1));
        registry.broadcast(&event(watched, 2));

        let received: Vec<u64> = std::iter::from_fn(|| rx.try_recv().ok())
            .map(|m| index_of(&m))
            .collect();
        assert_eq!(received, vec![2]);
    }

    #[test]
    fn test_deregister() {
        let registry = ConnectionRegistry::new();
        let (conn, _rx) = ConnectionHandle::new(TopicFilter::AllRuns, 8);
        let id = registry.register(conn);
        assert!(registry.deregister(id));
        assert!(registry.is_empty());
        assert_eq!(registry.broadcast(&event(Uuid::new_v4(), 1)), BroadcastReport::default());
    }
}
