//! Service Module
//!
//! Business logic layer for the orchestrator.
//! Services orchestrate between repositories and contain domain logic.

pub mod run;
pub mod safety;

pub use run as run_service;
pub use safety as safety_service;
