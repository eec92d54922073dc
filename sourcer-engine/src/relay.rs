//! Event relay
//!
//! Topic-based publish/subscribe for progress events. Subscribers see every
//! event published after they attached, in publication order. There is no
//! replay for late subscribers.

use async_trait::async_trait;
use sourcer_core::domain::event::ProgressEvent;
use std::collections::HashMap;
use std::sync::Mutex;
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("relay unavailable: {0}")]
    Unavailable(String),

    #[error("event serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, topic: &str, event: &ProgressEvent) -> Result<(), RelayError>;
}

#[async_trait]
pub trait EventRelay: EventPublisher {
    async fn subscribe(&self, topic: &str) -> Result<Subscription, RelayError>;
}

/// Ordered stream of events for one topic
#[derive(Debug)]
pub struct Subscription {
    rx: mpsc::UnboundedReceiver<ProgressEvent>,
}

impl Subscription {
    pub fn new(rx: mpsc::UnboundedReceiver<ProgressEvent>) -> Self {
        Self { rx }
    }

    /// Next event, or `None` once the relay side is gone
    pub async fn next(&mut self) -> Option<ProgressEvent> {
        self.rx.recv().await
    }

    pub fn try_next(&mut self) -> Option<ProgressEvent> {
        self.rx.try_recv().ok()
    }
}

/// In-process relay
#[derive(Default)]
pub struct MemoryRelay {
    topics: Mutex<HashMap<String, Vec<mpsc::UnboundedSender<ProgressEvent>>>>,
}

impl MemoryRelay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(topic)
            .map_or(0, |subs| subs.iter().filter(|tx| !tx.is_closed()).count())
    }
}

#[async_trait]
impl EventPublisher for MemoryRelay {
    async fn publish(&self, topic: &str, event: &ProgressEvent) -> Result<(), RelayError> {
        let mut topics = self.topics.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(subscribers) = topics.get_mut(topic) {
            subscribers.retain(|tx| tx.send(event.clone()).is_ok());
        }
        Ok(())
    }
}

#[async_trait]
impl EventRelay for MemoryRelay {
    async fn subscribe(&self, topic: &str) -> Result<Subscription, RelayError> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.topics
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(topic.to_string())
            .or_default()
            .push(tx);
        Ok(Subscription::new(rx))
    }
}
