//! Relay Supervisor
//!
//! Owns the long-running background tasks (upstream client, relay
//! coordinator) and their shared cancellation token. Provides explicit
//! start and shutdown with a bounded grace period.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Default grace period for background tasks to drain.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Supervises the relay's background tasks.
pub struct RelaySupervisor {
    cancel: CancellationToken,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
    grace: Duration,
}

impl RelaySupervisor {
    /// Create a supervisor with a fresh cancellation token.
    #[must_use]
    pub fn new(grace: Duration) -> Self {
        Self::with_token(CancellationToken::new(), grace)
    }

    /// Create a supervisor around an existing cancellation token.
    #[must_use]
    pub const fn with_token(cancel: CancellationToken, grace: Duration) -> Self {
        Self {
            cancel,
            tasks: Vec::new(),
            grace,
        }
    }

    /// Get a clone of the cancellation token shared with supervised tasks.
    #[must_use]
    pub fn token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Spawn and track a named background task.
    pub fn spawn<F>(&mut self, name: &'static str, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        tracing::debug!(task = name, "Starting background task");
        self.tasks.push((name, tokio::spawn(task)));
    }

    /// Number of tracked tasks.
    #[must_use]
    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    /// Whether shutdown has been requested.
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Cancel all tasks and wait for them, bounded by the grace period.
    ///
    /// Tasks still running after the grace period are aborted.
    /// Returns `true` if every task finished on its own.
    pub async fn shutdown(self) -> bool {
        self.cancel.cancel();
        tracing::info!(
            task_count = self.tasks.len(),
            grace_secs = self.grace.as_secs(),
            "Waiting for background tasks to stop"
        );

        let aborts: Vec<_> = self
            .tasks
            .iter()
            .map(|(name, handle)| (*name, handle.abort_handle()))
            .collect();

        let drain = futures::future::join_all(self.tasks.into_iter().map(
            |(name, handle)| async move {
                if let Err(e) = handle.await
                    && e.is_panic()
                {
                    tracing::error!(task = name, "Background task panicked");
                }
            },
        ));

        if tokio::time::timeout(self.grace, drain).await.is_ok() {
            tracing::info!("Background tasks stopped");
            true
        } else {
            for (name, abort) in aborts {
                if !abort.is_finished() {
                    tracing::warn!(task = name, "Task did not stop within grace period; aborting");
                    abort.abort();
                }
            }
            false
        }
    }
}

impl Default for RelaySupervisor {
    fn default() -> Self {
        Self::new(DEFAULT_SHUTDOWN_GRACE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_state() {
        let supervisor = RelaySupervisor::default();
        assert!(!supervisor.is_shutting_down());
        assert_eq!(supervisor.task_count(), 0);
    }

    #[tokio::test]
    async fn cooperative_tasks_stop_within_grace() {
        let mut supervisor = RelaySupervisor::new(Duration::from_secs(1));
        for name in ["upstream", "relay"] {
            let token = supervisor.token();
            supervisor.spawn(name, async move { token.cancelled().await });
        }
        assert_eq!(supervisor.task_count(), 2);

        assert!(supervisor.shutdown().await);
    }

    #[tokio::test]
    async fn stuck_task_aborted_after_grace() {
        let mut supervisor = RelaySupervisor::new(Duration::from_millis(20));
        supervisor.spawn("stuck", futures::future::pending());

        let finished = tokio::time::timeout(Duration::from_secs(1), supervisor.shutdown())
            .await
            .expect("shutdown must not hang");
        assert!(!finished);
    }

    #[tokio::test]
    async fn shared_token_cancels_external_holders() {
        let supervisor = RelaySupervisor::new(Duration::from_millis(50));
        let token = supervisor.token();
        assert!(!token.is_cancelled());

        supervisor.shutdown().await;
        assert!(token.is_cancelled());
    }
}
