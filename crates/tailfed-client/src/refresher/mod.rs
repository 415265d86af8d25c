//! The refresh engine.
//!
//! A refresh run binds a callback listener on each overlay address, starts a
//! challenge flow against the issuer, answers the verifier's
//! proof-of-possession probe, and asynchronously finalizes the flow into a
//! fresh token on disk.
//!
//! In-flight flows live in a [`DashMap`] with documented ownership: only
//! [`Refresher::job`] inserts, and each flow's finalize waiter removes its
//! own entry (or the shutdown path removes whatever is left).

mod callback;
mod finalize;
mod job;

use dashmap::DashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::api::ApiClient;
use crate::local::LocalOverlay;

pub use job::JobError;

/// How long to wait for callback servers during teardown.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// State for periodically refreshing the identity token.
pub struct Refresher {
    api: ApiClient,
    overlay: Arc<dyn LocalOverlay>,
    token_path: PathBuf,

    in_flight: DashMap<String, InFlight>,
    issued: watch::Sender<u64>,
}

/// The callback servers of one in-flight flow.
struct InFlight {
    cancel: CancellationToken,
    tracker: TaskTracker,
}

impl Refresher {
    /// Creates a refresher writing tokens to `token_path`.
    pub fn new(api: ApiClient, overlay: Arc<dyn LocalOverlay>, token_path: PathBuf) -> Self {
        let (issued, _) = watch::channel(0);
        Self {
            api,
            overlay,
            token_path,
            in_flight: DashMap::new(),
            issued,
        }
    }

    /// A counter incremented every time a token is issued and written.
    pub fn issued_events(&self) -> watch::Receiver<u64> {
        self.issued.subscribe()
    }

    pub(crate) fn notify_issued(&self) {
        self.issued.send_modify(|count| *count += 1);
    }

    /// Stops the callback servers of one flow and forgets it.
    pub(crate) async fn teardown(&self, id: &str) {
        let Some((_, in_flight)) = self.in_flight.remove(id) else {
            return;
        };

        in_flight.cancel.cancel();
        in_flight.tracker.close();
        if tokio::time::timeout(SHUTDOWN_TIMEOUT, in_flight.tracker.wait())
            .await
            .is_err()
        {
            tracing::error!(flow = %id, "callback servers did not shut down in time");
        } else {
            tracing::debug!(flow = %id, "shutdown callback challenge servers");
        }
    }

    /// Shuts down every in-flight refresh flow.
    pub async fn shutdown_in_flight(&self) {
        tracing::debug!("shutting down in-flight flows");
        let ids: Vec<String> = self
            .in_flight
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        for id in ids {
            self.teardown(&id).await;
        }
    }

    /// Number of flows currently in flight. Exposed for tests.
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }
}
