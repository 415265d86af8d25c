//! A single run of the refresh flow.

use std::net::SocketAddr;
use std::sync::Arc;
use tailfed_types::proto::Ports;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use super::{InFlight, Refresher, callback, finalize};
use crate::api::ApiError;
use crate::local::LocalApiError;

/// A failed refresh run. The daemon logs it and keeps scheduling; a single
/// failed refresh never exits the process.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("failed to query overlay status: {0}")]
    Overlay(#[from] LocalApiError),
    #[error("node is not ready")]
    NotReady,
    #[error("expected 2 tailnet ips, got {0}")]
    UnexpectedAddresses(usize),
    #[error("failed to bind listeners: {0}")]
    Bind(#[from] std::io::Error),
    #[error(transparent)]
    Api(#[from] ApiError),
}

impl Refresher {
    /// Performs one refresh: gates on overlay state, binds per-IP callback
    /// listeners, starts a flow, serves the challenge, and spawns the
    /// finalize waiter.
    pub async fn job(self: &Arc<Self>) -> Result<(), JobError> {
        let status = self.overlay.status().await?;
        if !status.ready {
            return Err(JobError::NotReady);
        }
        if !status.healthy {
            tracing::warn!("node is unhealthy");
        }

        if status.ips.len() != 2 {
            return Err(JobError::UnexpectedAddresses(status.ips.len()));
        }
        let (Some(v4), Some(v6)) = (status.ipv4(), status.ipv6()) else {
            return Err(JobError::UnexpectedAddresses(status.ips.len()));
        };

        // bind both listeners before involving the server; dropping a
        // listener releases it, so early returns clean up on their own
        let v4_listener = TcpListener::bind(SocketAddr::new(v4, 0)).await?;
        let v6_listener = TcpListener::bind(SocketAddr::new(v6, 0)).await?;
        let ports = Ports {
            ipv4: v4_listener.local_addr()?.port(),
            ipv6: v6_listener.local_addr()?.port(),
        };
        tracing::debug!(ipv4 = ports.ipv4, ipv6 = ports.ipv6, "bound listeners");

        let start = self.api.start(&status.id, ports).await?;

        let router = callback::challenge_router(
            self.overlay.clone(),
            start.id.clone(),
            start.signing_secret.as_bytes().to_vec(),
        );

        let cancel = CancellationToken::new();
        let tracker = TaskTracker::new();
        for listener in [v4_listener, v6_listener] {
            callback::serve(listener, router.clone(), cancel.clone(), &tracker);
        }

        self.in_flight.insert(
            start.id.clone(),
            InFlight {
                cancel,
                tracker,
            },
        );
        tracing::debug!(flow = %start.id, "new flow successfully started");

        tokio::spawn(finalize::complete(self.clone(), start.id));
        Ok(())
    }
}
