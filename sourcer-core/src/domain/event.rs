//! Progress event domain types
//!
//! A progress event describes a stage boundary or the terminal outcome of a
//! run. The serialized form is exactly what live observers receive:
//!
//! ```json
//! {"type": "status", "run_id": "…", "data": {…}, "timestamp": "…"}
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub run_id: Uuid,
    /// Text or structured payload
    #[serde(rename = "data")]
    pub payload: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Status,
    Result,
    Error,
}

impl ProgressEvent {
    pub fn new(run_id: Uuid, event_type: EventType, payload: serde_json::Value) -> Self {
        Self {
            event_type,
            run_id,
            payload,
            timestamp: Utc::now(),
        }
    }

    pub fn status(run_id: Uuid, payload: serde_json::Value) -> Self {
        Self::new(run_id, EventType::Status, payload)
    }

    pub fn result(run_id: Uuid, payload: serde_json::Value) -> Self {
        Self::new(run_id, EventType::Result, payload)
    }

    pub fn error(run_id: Uuid, message: impl Into<String>) -> Self {
        Self::new(
            run_id,
            EventType::Error,
            serde_json::Value::String(message.into()),
        )
    }

    /// `result` and `error` events close a run's event stream
    pub fn is_terminal(&self) -> bool {
        matches!(self.event_type, EventType::Result | EventType::Error)
    }

    /// Serializes the event as a UTF-8 JSON message
    pub fn to_message(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_shape() {
        let run_id = Uuid::new_v4();
        let event = ProgressEvent::status(run_id, serde_json::json!({"stage": "sourcing"}));

        let value: serde_json::Value = serde_json::from_str(&event.to_message().unwrap()).unwrap();
        assert_eq!(value["type"], "status");
        assert_eq!(value["data"]["stage"], "sourcing");
        assert_eq!(value["run_id"], run_id.to_string());
    }

    #[test]
    fn test_terminal_events() {
        let id = Uuid::new_v4();
        assert!(!ProgressEvent::status(id, serde_json::Value::Null).is_terminal());
        assert!(ProgressEvent::result(id, serde_json::json!({})).is_terminal());
        assert!(ProgressEvent::error(id, "boom").is_terminal());
    }

    #[test]
    fn test_error_payload_is_text() {
        let event = ProgressEvent::error(Uuid::new_v4(), "stage failed");
        assert_eq!(event.payload, serde_json::json!("stage failed"));
    }
}
