//! Single-flight coordination of access-token refreshes.
//!
//! The first caller to hit an expired token becomes the leader and runs the
//! refresh; everyone arriving while it is in flight is queued as a waiter and
//! receives the leader's outcome. Waiters are settled in the order they
//! queued, and the in-flight flag is released on every path, including a
//! leader that panics or is dropped mid-await.

use std::collections::VecDeque;
use std::future::Future;
use std::time::Duration;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// How a refresh flight failed. Cloned out to every waiter.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RefreshError {
    #[error("No refresh token is stored")]
    MissingRefreshToken,

    #[error("Refresh rejected with status {status}: {body}")]
    Rejected {
        status: u16,
        body: String,
        message: Option<String>,
    },

    #[error("Refresh request failed: {0}")]
    Transport(String),

    #[error("Malformed refresh response: {0}")]
    Malformed(String),

    #[error("Failed to store refreshed tokens: {0}")]
    Store(String),

    #[error("Timed out waiting for token refresh")]
    TimedOut,

    #[error("Token refresh was abandoned before completing")]
    Abandoned,
}

pub type RefreshOutcome = Result<String, RefreshError>;

/// Default bound on how long a waiter sits in the queue.
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Default)]
struct FlightState {
    refreshing: bool,
    waiters: VecDeque<oneshot::Sender<RefreshOutcome>>,
    /// Bumped every time the session is purged.
    purges: u64,
}

pub struct RefreshCoordinator {
    state: Mutex<FlightState>,
    wait_timeout: Duration,
}

impl Default for RefreshCoordinator {
    fn default() -> Self {
        Self::new(DEFAULT_WAIT_TIMEOUT)
    }
}

impl RefreshCoordinator {
    pub fn new(wait_timeout: Duration) -> Self {
        Self {
            state: Mutex::new(FlightState::default()),
            wait_timeout,
        }
    }

    pub fn is_refreshing(&self) -> bool {
        self.state.lock().refreshing
    }

    /// Count of session purges so far. A request remembers the value it was
    /// sent under; if it has moved on by the time the 401 arrives, the
    /// session that request belonged to is already gone.
    pub fn purge_epoch(&self) -> u64 {
        self.state.lock().purges
    }

    pub fn record_purge(&self) {
        self.state.lock().purges += 1;
    }

    /// Number of callers queued behind the current flight.
    pub fn pending_waiters(&self) -> usize {
        self.state.lock().waiters.len()
    }

    /// Run `operation` unless a flight is already under way, in which case
    /// wait for that flight's outcome instead.
    ///
    /// `operation` is only invoked by the leader. Its result is handed to
    /// every queued waiter before being returned.
    pub async fn run_exclusive<F, Fut>(&self, operation: F) -> RefreshOutcome
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = RefreshOutcome>,
    {
        let receiver = {
            let mut state = self.state.lock();
            if state.refreshing {
                let (tx, rx) = oneshot::channel();
                state.waiters.push_back(tx);
                debug!(position = state.waiters.len(), "Joining in-flight token refresh");
                Some(rx)
            } else {
                state.refreshing = true;
                None
            }
        };

        match receiver {
            Some(rx) => self.wait(rx).await,
            None => {
                let guard = FlightGuard {
                    coordinator: self,
                    settled: false,
                };
                let outcome = operation().await;
                guard.settle(&outcome);
                outcome
            }
        }
    }

    async fn wait(&self, rx: oneshot::Receiver<RefreshOutcome>) -> RefreshOutcome {
        match tokio::time::timeout(self.wait_timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            // Sender dropped without sending; the guard always sends, so
            // this only happens if the coordinator itself went away.
            Ok(Err(_)) => Err(RefreshError::Abandoned),
            Err(_) => {
                warn!(timeout = ?self.wait_timeout, "Gave up waiting for token refresh");
                Err(RefreshError::TimedOut)
            }
        }
    }

    /// Release the flight and settle all waiters, oldest first.
    fn finish(&self, outcome: &RefreshOutcome) {
        let waiters = {
            let mut state = self.state.lock();
            state.refreshing = false;
            std::mem::take(&mut state.waiters)
        };

        debug!(
            waiters = waiters.len(),
            success = outcome.is_ok(),
            "Token refresh settled"
        );

        for waiter in waiters {
            // A waiter that timed out or was cancelled has dropped its
            // receiver; the rest still get settled.
            let _ = waiter.send(outcome.clone());
        }
    }
}

/// Leader's hold on the flight. Dropping it unsettled counts as abandonment.
struct FlightGuard<'a> {
    coordinator: &'a RefreshCoordinator,
    settled: bool,
}

impl FlightGuard<'_> {
    fn settle(mut self, outcome: &RefreshOutcome) {
        self.settled = true;
        self.coordinator.finish(outcome);
    }
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        if !self.settled {
            warn!("Token refresh leader dropped before completing");
            self.coordinator.finish(&Err(RefreshError::Abandoned));
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;

    /// Yield until `check` holds; panics rather than spinning forever.
    async fn until(mut check: impl FnMut() -> bool) {
        for _ in 0..1000 {
            if check() {
                return;
            }
            tokio::task::yield_now().await;
        }
        panic!("condition never became true");
    }

    #[tokio::test]
    async fn test_single_caller_runs_operation() {
        let coordinator = RefreshCoordinator::default();
        let outcome = coordinator
            .run_exclusive(|| async { Ok("fresh".to_string()) })
            .await;

        assert_eq!(outcome, Ok("fresh".to_string()));
        assert!(!coordinator.is_refreshing());
        assert_eq!(coordinator.pending_waiters(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_flight() {
        let coordinator = Arc::new(RefreshCoordinator::default());
        let calls = Arc::new(AtomicUsize::new(0));
        let (gate_tx, gate_rx) = oneshot::channel::<()>();

        let leader = tokio::spawn({
            let coordinator = coordinator.clone();
            let calls = calls.clone();
            async move {
                coordinator
                    .run_exclusive(|| async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        let _ = gate_rx.await;
                        Ok("shared".to_string())
                    })
                    .await
            }
        });
        until(|| coordinator.is_refreshing()).await;

        let mut followers = Vec::new();
        for _ in 0..4 {
            let coordinator = coordinator.clone();
            let calls = calls.clone();
            followers.push(tokio::spawn(async move {
                coordinator
                    .run_exclusive(|| async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Ok("duplicate".to_string())
                    })
                    .await
            }));
        }
        until(|| coordinator.pending_waiters() == 4).await;

        gate_tx.send(()).expect("leader still waiting");

        assert_eq!(leader.await.expect("leader task"), Ok("shared".to_string()));
        for follower in followers {
            assert_eq!(follower.await.expect("follower task"), Ok("shared".to_string()));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!coordinator.is_refreshing());
    }

    #[tokio::test]
    async fn test_waiters_settle_in_fifo_order() {
        let coordinator = Arc::new(RefreshCoordinator::default());
        let order = Arc::new(Mutex::new(Vec::new()));
        let (gate_tx, gate_rx) = oneshot::channel::<()>();

        let leader = tokio::spawn({
            let coordinator = coordinator.clone();
            async move {
                coordinator
                    .run_exclusive(|| async move {
                        let _ = gate_rx.await;
                        Err(RefreshError::Transport("connection reset".to_string()))
                    })
                    .await
            }
        });
        until(|| coordinator.is_refreshing()).await;

        let mut waiters = Vec::new();
        for id in 1..=3 {
            let queued = coordinator.clone();
            let order = order.clone();
            waiters.push(tokio::spawn(async move {
                let outcome = queued
                    .run_exclusive(|| async { Ok("unused".to_string()) })
                    .await;
                order.lock().push(id);
                outcome
            }));
            until(|| coordinator.pending_waiters() == id).await;
        }

        gate_tx.send(()).expect("leader still waiting");
        let _ = leader.await.expect("leader task");
        for waiter in waiters {
            assert_eq!(
                waiter.await.expect("waiter task"),
                Err(RefreshError::Transport("connection reset".to_string()))
            );
        }

        assert_eq!(*order.lock(), vec![1, 2, 3]);
    }

    #[test]
    fn test_purge_epoch_counts_purges() {
        let coordinator = RefreshCoordinator::default();
        assert_eq!(coordinator.purge_epoch(), 0);
        coordinator.record_purge();
        coordinator.record_purge();
        assert_eq!(coordinator.purge_epoch(), 2);
    }

    #[tokio::test]
    async fn test_flag_released_after_failure() {
        let coordinator = RefreshCoordinator::default();
        let first = coordinator
            .run_exclusive(|| async { Err(RefreshError::MissingRefreshToken) })
            .await;
        assert_eq!(first, Err(RefreshError::MissingRefreshToken));
        assert!(!coordinator.is_refreshing());

        // A later expiry starts a fresh flight rather than waiting forever.
        let second = coordinator
            .run_exclusive(|| async { Ok("next".to_string()) })
            .await;
        assert_eq!(second, Ok("next".to_string()));
    }

    #[tokio::test]
    async fn test_abandoned_leader_releases_waiters() {
        let coordinator = Arc::new(RefreshCoordinator::default());

        let leader = tokio::spawn({
            let coordinator = coordinator.clone();
            async move {
                coordinator
                    .run_exclusive(|| std::future::pending::<RefreshOutcome>())
                    .await
            }
        });
        until(|| coordinator.is_refreshing()).await;

        let waiter = tokio::spawn({
            let coordinator = coordinator.clone();
            async move {
                coordinator
                    .run_exclusive(|| async { Ok("unused".to_string()) })
                    .await
            }
        });
        until(|| coordinator.pending_waiters() == 1).await;

        leader.abort();
        assert!(leader.await.is_err());

        assert_eq!(waiter.await.expect("waiter task"), Err(RefreshError::Abandoned));
        assert!(!coordinator.is_refreshing());
    }

    #[tokio::test]
    async fn test_waiter_times_out() {
        let coordinator = Arc::new(RefreshCoordinator::new(Duration::from_millis(20)));
        let (gate_tx, gate_rx) = oneshot::channel::<()>();

        let leader = tokio::spawn({
            let coordinator = coordinator.clone();
            async move {
                coordinator
                    .run_exclusive(|| async move {
                        let _ = gate_rx.await;
                        Ok("late".to_string())
                    })
                    .await
            }
        });
        until(|| coordinator.is_refreshing()).await;

        let outcome = coordinator
            .run_exclusive(|| async { Ok("unused".to_string()) })
            .await;
        assert_eq!(outcome, Err(RefreshError::TimedOut));

        // The timed-out waiter's slot is skipped when the flight settles.
        gate_tx.send(()).expect("leader still waiting");
        assert_eq!(leader.await.expect("leader task"), Ok("late".to_string()));
        assert!(!coordinator.is_refreshing());
    }
}
