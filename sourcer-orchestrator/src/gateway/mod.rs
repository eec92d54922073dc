//! Live progress gateway
//!
//! `registry` holds the observer connections; `bridge` feeds it from the
//! event relay.

pub mod bridge;
pub mod registry;

pub use registry::{BroadcastReport, ConnectionHandle, ConnectionId, ConnectionRegistry, TopicFilter};
