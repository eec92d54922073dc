//! Data Transfer Objects for inter-service communication
//!
//! Request and response bodies for the orchestrator HTTP API.

pub mod run;
pub mod safety;
