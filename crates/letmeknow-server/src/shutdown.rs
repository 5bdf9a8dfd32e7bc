//! Relay shutdown: one cancellation token observed by the listener and every
//! session, plus a tracker over the live sessions so a drain can wait for
//! them to deregister and flush their close frames.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tokio_util::task::task_tracker::TrackedFuture;
use tracing::{info, warn};

const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// How a [`ShutdownCoordinator::drain`] ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    /// The listener and every session finished in time.
    Clean,
    /// The deadline passed; the listener task was aborted.
    TimedOut {
        /// Sessions still running at the deadline.
        sessions_left: usize,
    },
}

/// Shutdown state shared by the server and its sessions.
pub struct ShutdownCoordinator {
    token: CancellationToken,
    sessions: TaskTracker,
}

impl ShutdownCoordinator {
    /// Coordinator with no sessions and shutdown not yet triggered.
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            sessions: TaskTracker::new(),
        }
    }

    /// A token that resolves once shutdown is triggered.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Trigger shutdown. Idempotent.
    pub fn trigger(&self) {
        self.token.cancel();
        let _ = self.sessions.close();
    }

    /// Whether shutdown has been triggered.
    pub fn is_triggered(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Wrap a session future so [`drain`](Self::drain) waits for it.
    pub fn track_session<F: Future>(&self, session: F) -> TrackedFuture<F> {
        self.sessions.track_future(session)
    }

    /// Sessions currently running.
    pub fn active_sessions(&self) -> usize {
        self.sessions.len()
    }

    /// Trigger shutdown, then wait for the listener task and every tracked
    /// session, all within `timeout` (10s when `None`).
    pub async fn drain(&self, mut listener: JoinHandle<()>, timeout: Option<Duration>) -> DrainOutcome {
        let deadline = Instant::now() + timeout.unwrap_or(DEFAULT_DRAIN_TIMEOUT);
        self.trigger();
        info!(sessions = self.active_sessions(), "draining relay");

        let finished = tokio::time::timeout_at(deadline, async {
            let _ = (&mut listener).await;
            self.sessions.wait().await;
        })
        .await;

        match finished {
            Ok(()) => DrainOutcome::Clean,
            Err(_) => {
                let sessions_left = self.active_sessions();
                warn!(sessions_left, "drain deadline passed, aborting listener");
                listener.abort();
                DrainOutcome::TimedOut { sessions_left }
            }
        }
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn idle_listener() -> JoinHandle<()> {
        tokio::spawn(async {})
    }

    #[test]
    fn trigger_is_idempotent_and_reaches_all_tokens() {
        let shutdown = ShutdownCoordinator::new();
        let before = shutdown.token();
        assert!(!shutdown.is_triggered());

        shutdown.trigger();
        shutdown.trigger();

        assert!(shutdown.is_triggered());
        assert!(before.is_cancelled());
        assert!(shutdown.token().is_cancelled());
    }

    #[tokio::test]
    async fn drain_waits_for_sessions_that_observe_the_token() {
        let shutdown = ShutdownCoordinator::new();
        let token = shutdown.token();
        let session = tokio::spawn(shutdown.track_session(async move {
            token.cancelled().await;
        }));
        assert_eq!(shutdown.active_sessions(), 1);

        let outcome = shutdown.drain(idle_listener(), None).await;

        assert_eq!(outcome, DrainOutcome::Clean);
        assert_eq!(shutdown.active_sessions(), 0);
        session.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn drain_gives_up_on_stuck_session() {
        let shutdown = ShutdownCoordinator::new();
        let _stuck = tokio::spawn(shutdown.track_session(async {
            tokio::time::sleep(Duration::from_secs(600)).await;
        }));

        let outcome = shutdown
            .drain(idle_listener(), Some(Duration::from_millis(50)))
            .await;

        assert_eq!(outcome, DrainOutcome::TimedOut { sessions_left: 1 });
    }

    #[tokio::test(start_paused = true)]
    async fn drain_aborts_stuck_listener() {
        let shutdown = ShutdownCoordinator::new();
        let listener = tokio::spawn(async {
            tokio::time::sleep(Duration::from_secs(600)).await;
        });

        let outcome = shutdown.drain(listener, Some(Duration::from_millis(50))).await;

        assert_eq!(outcome, DrainOutcome::TimedOut { sessions_left: 0 });
    }
}
