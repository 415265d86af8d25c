//! In-process launcher backend.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tailfed_types::FlowStatus;
use tailfed_types::proto::VerifyRequest;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;

use super::{LaunchError, Launcher, VerifyTask};
use crate::storage::FlowStore;
use crate::verifier::{VerifierError, VerifyBackend};

/// Maximum verification attempts per flow.
pub const MAX_ATTEMPTS: usize = 6;

/// Delay before the second attempt; doubles after every attempt.
pub const INITIAL_DELAY: Duration = Duration::from_millis(500);

/// A [`Launcher`] delivering tasks over an in-memory channel.
///
/// A dispatcher task consumes the channel and spawns one worker per
/// verification task. The retry policy lives here, not in the verifier:
/// attempts rotate through the address list by index, a soft failure
/// consumes an attempt, and an exhausted budget marks the flow failed
/// (best effort) and leaves the record to expire.
#[derive(Clone)]
pub struct LocalLauncher {
    bus: mpsc::Sender<VerifyTask>,
}

impl LocalLauncher {
    /// Spawns the dispatcher and returns the launcher plus its join handle.
    ///
    /// The dispatcher drains until every launcher clone is dropped, then
    /// waits for in-flight workers.
    pub fn spawn(
        verifier: Arc<dyn VerifyBackend>,
        store: Arc<dyn FlowStore>,
    ) -> (Self, JoinHandle<()>) {
        let (bus, mut rx) = mpsc::channel::<VerifyTask>(8);

        let handle = tokio::spawn(async move {
            let tracker = TaskTracker::new();
            while let Some(task) = rx.recv().await {
                let verifier = verifier.clone();
                let store = store.clone();
                tracker.spawn(run_task(task, verifier, store));
            }
            tracker.close();
            tracker.wait().await;
        });

        (Self { bus }, handle)
    }
}

#[async_trait]
impl Launcher for LocalLauncher {
    async fn launch(&self, task: VerifyTask) -> Result<(), LaunchError> {
        self.bus.send(task).await.map_err(|_| LaunchError::Closed)
    }
}

/// Runs the full retry schedule for one flow.
async fn run_task(task: VerifyTask, verifier: Arc<dyn VerifyBackend>, store: Arc<dyn FlowStore>) {
    if task.addresses.is_empty() {
        tracing::error!(flow = %task.id, "verification task without addresses");
        mark_failed(&*store, &task.id).await;
        return;
    }

    let mut delay = INITIAL_DELAY;
    for attempt in 0..MAX_ATTEMPTS {
        let address = task.addresses[attempt % task.addresses.len()];
        let request = VerifyRequest {
            id: task.id.clone(),
            address,
        };

        match verifier.verify(request).await {
            Ok(response) if response.success => {
                tracing::debug!(flow = %task.id, attempt, "verification succeeded");
                return;
            }
            Ok(_) => {
                tracing::debug!(flow = %task.id, attempt, %address, "verification attempt failed");
            }
            Err(VerifierError::FlowNotFound(id)) => {
                tracing::error!(flow = %id, "flow disappeared, giving up");
                return;
            }
            Err(err) => {
                tracing::error!(flow = %task.id, error = %err, "verification failed fatally");
                mark_failed(&*store, &task.id).await;
                return;
            }
        }

        if attempt + 1 < MAX_ATTEMPTS {
            tokio::time::sleep(delay).await;
            delay *= 2;
        }
    }

    tracing::warn!(flow = %task.id, "verification attempts exhausted");
    mark_failed(&*store, &task.id).await;
}

/// Best-effort transition to `failed`; the record is left to expire.
async fn mark_failed(store: &dyn FlowStore, id: &str) {
    let flow = match store.get(id).await {
        Ok(Some(flow)) => flow,
        Ok(None) => return,
        Err(err) => {
            tracing::error!(flow = %id, error = %err, "failed to load flow for failure mark");
            return;
        }
    };
    if flow.status != FlowStatus::Pending {
        return;
    }

    let mut failed = flow;
    failed.status = FlowStatus::Failed;
    if let Err(err) = store.put(&failed).await {
        tracing::error!(flow = %id, error = %err, "failed to mark flow as failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use std::net::SocketAddr;
    use std::sync::Mutex;
    use tailfed_types::proto::VerifyResponse;
    use tailfed_types::{Flow, SigningSecret, UnixTime};

    fn sample_flow(id: &str) -> Flow {
        Flow {
            id: id.to_owned(),
            status: FlowStatus::Pending,
            expires_at: UnixTime::from_secs(u64::MAX),
            secret: SigningSecret::new(vec![0; 64]),
            node: "n_abc".to_owned(),
            public_key: "nodekey:XXXX".to_owned(),
            dns_name: "host.acme.ts.net".to_owned(),
            machine_name: "host".to_owned(),
            hostname: "host".to_owned(),
            tailnet: "acme.ts.net".to_owned(),
            os: "linux".to_owned(),
            tags: vec![],
            authorized: true,
            external: false,
        }
    }

    fn addresses() -> Vec<SocketAddr> {
        vec![
            "100.64.0.1:40001".parse().unwrap(),
            "[fd7a::1]:40002".parse().unwrap(),
        ]
    }

    /// Scripted verifier: pops one outcome per attempt and records the
    /// addresses it was probed on.
    struct ScriptedVerifier {
        outcomes: Mutex<Vec<Result<bool, ()>>>,
        probed: Mutex<Vec<SocketAddr>>,
    }

    impl ScriptedVerifier {
        fn new(outcomes: Vec<Result<bool, ()>>) -> Self {
            Self {
                outcomes: Mutex::new(outcomes),
                probed: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl VerifyBackend for ScriptedVerifier {
        async fn verify(&self, request: VerifyRequest) -> Result<VerifyResponse, VerifierError> {
            self.probed.lock().unwrap().push(request.address);
            let outcome = self.outcomes.lock().unwrap().remove(0);
            match outcome {
                Ok(success) => Ok(VerifyResponse { success }),
                Err(()) => Err(VerifierError::FlowNotFound(request.id)),
            }
        }
    }

    async fn run_with(
        outcomes: Vec<Result<bool, ()>>,
        store: Arc<MemoryStore>,
    ) -> Arc<ScriptedVerifier> {
        let verifier = Arc::new(ScriptedVerifier::new(outcomes));
        run_task(
            VerifyTask {
                id: "flow-1".to_owned(),
                addresses: addresses(),
            },
            verifier.clone(),
            store,
        )
        .await;
        verifier
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_stops_retrying() {
        let store = Arc::new(MemoryStore::new());
        store.put(&sample_flow("flow-1")).await.unwrap();

        let verifier = run_with(vec![Ok(false), Ok(true)], store.clone()).await;
        assert_eq!(verifier.probed.lock().unwrap().len(), 2);
        // the verifier owns the success transition, not the launcher
        assert_eq!(
            store.get("flow-1").await.unwrap().unwrap().status,
            FlowStatus::Pending
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_addresses_rotate_by_attempt_index() {
        let store = Arc::new(MemoryStore::new());
        store.put(&sample_flow("flow-1")).await.unwrap();

        let verifier = run_with(vec![Ok(false); MAX_ATTEMPTS], store).await;
        let probed = verifier.probed.lock().unwrap();
        assert_eq!(probed.len(), MAX_ATTEMPTS);
        let expected = addresses();
        for (attempt, address) in probed.iter().enumerate() {
            assert_eq!(*address, expected[attempt % expected.len()]);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_attempts_mark_failed() {
        let store = Arc::new(MemoryStore::new());
        store.put(&sample_flow("flow-1")).await.unwrap();

        run_with(vec![Ok(false); MAX_ATTEMPTS], store.clone()).await;
        assert_eq!(
            store.get("flow-1").await.unwrap().unwrap().status,
            FlowStatus::Failed
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_flow_never_retries() {
        let store = Arc::new(MemoryStore::new());
        let verifier = run_with(vec![Err(())], store).await;
        assert_eq!(verifier.probed.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_launcher_delivers_over_channel() {
        let store = Arc::new(MemoryStore::new());
        store.put(&sample_flow("flow-1")).await.unwrap();

        let verifier = Arc::new(ScriptedVerifier::new(vec![Ok(true)]));
        let (launcher, handle) = LocalLauncher::spawn(verifier.clone(), store);

        launcher
            .launch(VerifyTask {
                id: "flow-1".to_owned(),
                addresses: addresses(),
            })
            .await
            .unwrap();

        drop(launcher);
        handle.await.unwrap();
        assert_eq!(verifier.probed.lock().unwrap().len(), 1);
    }
}
