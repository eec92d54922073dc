//! Postgres-backed implementations of the engine contracts

pub mod queue;
pub mod relay;
pub mod sink;

pub use queue::PgRunQueue;
pub use relay::PgRelay;
pub use sink::PgRunStore;
