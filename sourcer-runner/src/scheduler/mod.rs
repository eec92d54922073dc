//! Scheduler layer for the runner
//!
//! Polls for queued runs and drives each one through the engine while its
//! lease is kept alive, and periodically refreshes the banned-term index.

pub mod poller;
pub mod refresh;

pub use poller::RunPoller;
pub use refresh::BannedTermRefresher;
