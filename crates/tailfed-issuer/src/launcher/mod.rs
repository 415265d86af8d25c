//! Dispatch of verification tasks.
//!
//! The initializer hands a freshly-created flow to a [`Launcher`], which is
//! responsible for driving the verifier against the node's overlay
//! addresses, including the retry policy. The in-process [`LocalLauncher`]
//! is the in-tree backend; a durable workflow engine can implement the same
//! trait for deployments that need retries to survive a restart.

use async_trait::async_trait;
use std::net::SocketAddr;

mod local;

pub use local::{INITIAL_DELAY, LocalLauncher, MAX_ATTEMPTS};

/// A single verification job: one flow and the addresses to probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyTask {
    /// The flow to verify.
    pub id: String,
    /// Overlay address-port pairs, one per address family.
    pub addresses: Vec<SocketAddr>,
}

/// Launches challenge verification for a flow.
#[async_trait]
pub trait Launcher: Send + Sync {
    /// Enqueues verification of `task`. Returns once the task is accepted,
    /// not once verification completes.
    async fn launch(&self, task: VerifyTask) -> Result<(), LaunchError>;
}

/// Failure to hand off a verification task.
#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    #[error("verification backend is not accepting tasks")]
    Closed,
}
