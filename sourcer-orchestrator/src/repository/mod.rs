//! Repository Module
//!
//! Data access layer for the orchestrator.
//! Each repository handles database operations for one table.

pub mod banned_term;
pub mod event;
pub mod run;

pub use banned_term as banned_term_repository;
pub use event as event_repository;
pub use run as run_repository;
