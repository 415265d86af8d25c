//! Process wiring for the refresh daemon.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tailfed_types::version::BuildInfo;
use tokio::signal::unix::{SignalKind, signal};
use url::Url;

use crate::api::ApiClient;
use crate::local::LocalApi;
use crate::refresher::{JobError, Refresher};
use crate::scheduler::{JobOutcome, Scheduler};

/// Fallback refresh cadence when the server does not advertise one.
const DEFAULT_FREQUENCY: Duration = Duration::from_secs(3600);

/// How soon to retry after the overlay reports the node not ready.
const NOT_READY_RETRY: Duration = Duration::from_secs(60);

/// Runtime options of the daemon.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    /// Base URL of the Tailfed API.
    pub url: Url,
    /// Where to write the identity token.
    pub token_path: PathBuf,
    /// Where to record the daemon's process id.
    pub pid_file: Option<PathBuf>,
    /// Refresh cadence override; the server-advertised frequency wins.
    pub frequency: Option<Duration>,
    /// Base URL of the local overlay daemon's status API.
    pub local_api: Url,
}

/// A fatal daemon failure. Refuses startup; once the scheduler is running,
/// individual refresh failures are logged and absorbed instead.
#[derive(Debug, thiserror::Error)]
pub enum DaemonError {
    #[error("server api version {0} is unsupported (want >= 1.0, < 2.0)")]
    UnsupportedServer(String),
    #[error("failed to write pid file: {0}")]
    PidFile(std::io::Error),
    #[error("failed to register signal handlers: {0}")]
    Signals(std::io::Error),
}

/// Whether the daemon can talk to a server of this version.
pub fn version_supported(info: &BuildInfo) -> bool {
    match info.major_minor() {
        Some((major, _)) => major == 1,
        None => false,
    }
}

/// Runs the daemon until SIGINT or SIGTERM.
pub async fn run(config: DaemonConfig) -> Result<(), DaemonError> {
    let api = ApiClient::new(config.url.clone());

    // startup gate: refuse to speak to an incompatible server
    match api.server_version().await {
        Ok(info) if !version_supported(&info) => {
            return Err(DaemonError::UnsupportedServer(info.version));
        }
        Ok(info) => {
            tracing::debug!(version = %info.version, "server version accepted");
        }
        Err(err) => {
            tracing::warn!(error = %err, "could not read server version, continuing anyway");
        }
    }

    let frequency = match api.server_config().await {
        Ok(server_config) => server_config.frequency.as_duration(),
        Err(err) => {
            let fallback = config.frequency.unwrap_or(DEFAULT_FREQUENCY);
            tracing::warn!(error = %err, ?fallback, "could not read server config, using fallback frequency");
            fallback
        }
    };

    let _pid_guard = match &config.pid_file {
        Some(path) => Some(PidFile::write(path).map_err(DaemonError::PidFile)?),
        None => None,
    };

    let overlay = Arc::new(LocalApi::new(config.local_api.clone()));
    let refresher = Arc::new(Refresher::new(api, overlay, config.token_path.clone()));

    let job_refresher = refresher.clone();
    let scheduler = Scheduler::start(frequency, move || {
        let refresher = job_refresher.clone();
        async move {
            match refresher.job().await {
                Ok(()) => JobOutcome::Done,
                Err(JobError::NotReady) => {
                    tracing::warn!("node is not ready, retrying sooner");
                    JobOutcome::RetryAfter(NOT_READY_RETRY)
                }
                Err(err) => {
                    tracing::error!(error = %err, "refresh failed");
                    JobOutcome::Done
                }
            }
        }
    });

    let mut sigterm = signal(SignalKind::terminate()).map_err(DaemonError::Signals)?;
    let mut sigint = signal(SignalKind::interrupt()).map_err(DaemonError::Signals)?;
    let mut sighup = signal(SignalKind::hangup()).map_err(DaemonError::Signals)?;

    tracing::info!(?frequency, "daemon started");
    loop {
        tokio::select! {
            _ = sigterm.recv() => break,
            _ = sigint.recv() => break,
            _ = sighup.recv() => {
                tracing::info!("reload signal received, refreshing now");
                scheduler.run_now().await;
            }
        }
    }

    tracing::info!("signal received, shutting down");
    scheduler.stop().await;
    refresher.shutdown_in_flight().await;

    Ok(())
}

/// The daemon's PID file: decimal ASCII, no trailing newline, removed on
/// clean shutdown.
struct PidFile {
    path: PathBuf,
}

impl PidFile {
    fn write(path: &Path) -> std::io::Result<Self> {
        std::fs::write(path, std::process::id().to_string())?;
        Ok(Self {
            path: path.to_owned(),
        })
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        if let Err(err) = std::fs::remove_file(&self.path) {
            tracing::error!(path = %self.path.display(), error = %err, "failed to remove pid file");
        }
    }
}
