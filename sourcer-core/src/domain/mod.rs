//! Core domain types
//!
//! These types represent the business entities of the system and are shared
//! between the orchestrator (persists and streams them) and the runner
//! (produces them while executing a pipeline).

pub mod event;
pub mod run;
pub mod safety;
