//! Sourcer Core
//!
//! Core types shared by every Sourcer process.
//!
//! This crate contains:
//! - Domain types: pipeline runs, stage results, progress events, safety decisions
//! - DTOs: request/response bodies exchanged between orchestrator, runner and CLI

pub mod domain;
pub mod dto;
