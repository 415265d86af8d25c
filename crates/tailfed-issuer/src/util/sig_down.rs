//! Graceful shutdown signal handling.
//!
//! [`SigDown`] listens for SIGTERM/SIGINT and trips a cancellation token
//! that subsystems select on, letting the server drain connections before
//! exiting.

use tokio::signal::unix::{SignalKind, signal};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Handles graceful shutdown on SIGTERM and SIGINT signals.
///
/// Spawns a background task that listens for shutdown signals and triggers
/// a cancellation token when one arrives.
pub struct SigDown {
    task_tracker: TaskTracker,
    cancellation_token: CancellationToken,
}

impl SigDown {
    /// Creates a new signal handler.
    ///
    /// Returns an error if signal registration fails.
    pub fn try_new() -> Result<Self, std::io::Error> {
        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        let inner = CancellationToken::new();
        let outer = inner.clone();
        let task_tracker = TaskTracker::new();
        task_tracker.spawn(async move {
            tokio::select! {
                _ = sigterm.recv() => {
                    inner.cancel();
                }
                _ = sigint.recv() => {
                    inner.cancel();
                }
            }
        });
        task_tracker.close();

        Ok(Self {
            task_tracker,
            cancellation_token: outer,
        })
    }

    /// Returns a clone of the cancellation token for distributing to
    /// subsystems.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation_token.clone()
    }

    /// Waits for a shutdown signal and for the signal handler task to
    /// complete.
    pub async fn recv(&self) {
        self.cancellation_token.cancelled().await;
        self.task_tracker.wait().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_registers_without_tripping() {
        let sig_down = SigDown::try_new().unwrap();
        assert!(!sig_down.cancellation_token().is_cancelled());
    }

    #[tokio::test]
    async fn test_tokens_share_state() {
        let sig_down = SigDown::try_new().unwrap();
        let first = sig_down.cancellation_token();
        let second = sig_down.cancellation_token();

        // tokens are clones of one source; cancelling one side is visible
        // on the other
        first.cancel();
        assert!(second.is_cancelled());
    }
}
