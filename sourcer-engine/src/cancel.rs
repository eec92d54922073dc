//! Cooperative cancellation
//!
//! The engine checks the signal between stages; a stage already in flight
//! always runs to completion.

use tokio::sync::watch;

/// Why a run stops at its next stage boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Someone asked for the run to end; it ends `cancelled` with one error event
    Cancelled,
    /// The worker lost its lease; it stops without publishing or storing anything
    Abandoned,
}

/// Raises cancellation for one run
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: watch::Sender<Option<StopReason>>,
}

/// Observes cancellation for one run
#[derive(Debug, Clone)]
pub struct CancelSignal {
    rx: watch::Receiver<Option<StopReason>>,
}

impl CancelHandle {
    pub fn new() -> (Self, CancelSignal) {
        let (tx, rx) = watch::channel(None);
        (Self { tx }, CancelSignal { rx })
    }

    /// Asks the run to end as `cancelled`; ignored once the run is abandoned
    pub fn cancel(&self) {
        self.tx.send_if_modified(|reason| match reason {
            None => {
                *reason = Some(StopReason::Cancelled);
                true
            }
            Some(_) => false,
        });
    }

    /// Gives the run up; overrides an earlier cancel
    pub fn abandon(&self) {
        self.tx.send_replace(Some(StopReason::Abandoned));
    }

    pub fn reason(&self) -> Option<StopReason> {
        *self.tx.borrow()
    }

    pub fn is_cancelled(&self) -> bool {
        self.reason() == Some(StopReason::Cancelled)
    }
}

impl CancelSignal {
    /// A signal that is never raised
    pub fn never() -> Self {
        let (_, signal) = CancelHandle::new();
        signal
    }

    pub fn reason(&self) -> Option<StopReason> {
        *self.rx.borrow()
    }

    pub fn is_cancelled(&self) -> bool {
        self.reason() == Some(StopReason::Cancelled)
    }

    pub fn is_abandoned(&self) -> bool {
        self.reason() == Some(StopReason::Abandoned)
    }

    /// Resolves once a stop is raised, with its reason
    pub async fn stopped(&mut self) -> StopReason {
        match self.rx.wait_for(|reason| reason.is_some()).await {
            Ok(reason) => match *reason {
                Some(reason) => reason,
                None => std::future::pending().await,
            },
            // Handle dropped without stopping
            Err(_) => std::future::pending().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_signal_starts_clear() {
        let (handle, signal) = CancelHandle::new();
        assert!(!signal.is_cancelled());
        assert!(!handle.is_cancelled());
        assert_eq!(signal.reason(), None);
    }

    #[test]
    fn test_cancel_is_seen_by_clones() {
        let (handle, signal) = CancelHandle::new();
        let other = signal.clone();
        handle.cancel();
        assert!(signal.is_cancelled());
        assert!(other.is_cancelled());
        assert!(!signal.is_abandoned());
    }

    #[test]
    fn test_abandon_overrides_cancel() {
        let (handle, signal) = CancelHandle::new();
        handle.cancel();
        handle.abandon();
        assert!(signal.is_abandoned());
        assert!(!signal.is_cancelled());

        // A late cancel request does not turn an abandoned run back into a cancelled one
        handle.cancel();
        assert_eq!(signal.reason(), Some(StopReason::Abandoned));
    }

    #[tokio::test]
    async fn test_stopped_resolves_with_reason() {
        let (handle, mut signal) = CancelHandle::new();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            handle.cancel();
        });
        let reason = tokio::time::timeout(Duration::from_secs(1), signal.stopped())
            .await
            .unwrap();
        assert_eq!(reason, StopReason::Cancelled);
    }

    #[tokio::test]
    async fn test_never_stays_pending() {
        let mut signal = CancelSignal::never();
        let waited = tokio::time::timeout(Duration::from_millis(20), signal.stopped()).await;
        assert!(waited.is_err());
        assert!(!signal.is_cancelled());
    }
}
