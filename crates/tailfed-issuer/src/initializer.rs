//! The flow initializer.

use rand::RngCore;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tailfed_types::proto::{StartRequest, StartResponse};
use tailfed_types::{Flow, FlowStatus, SigningSecret, UnixTime};
use tailfed_types::flow::SIGNING_SECRET_LEN;
use uuid::Uuid;

use crate::control::ControlPlane;
use crate::error::ApiError;
use crate::launcher::{Launcher, VerifyTask};
use crate::storage::FlowStore;

/// How long a flow stays finalizable after `/start`.
pub const FLOW_TTL: Duration = Duration::from_secs(5 * 60);

/// Handles `/start`: validates the request, snapshots the node record,
/// persists a pending flow, and dispatches verification.
pub struct Initializer {
    control: Arc<dyn ControlPlane>,
    store: Arc<dyn FlowStore>,
    launcher: Arc<dyn Launcher>,
}

impl Initializer {
    /// Creates an initializer over its three collaborators.
    pub fn new(
        control: Arc<dyn ControlPlane>,
        store: Arc<dyn FlowStore>,
        launcher: Arc<dyn Launcher>,
    ) -> Self {
        Self {
            control,
            store,
            launcher,
        }
    }

    /// Begins a new flow, returning its id and signing secret.
    pub async fn start(&self, request: StartRequest) -> Result<StartResponse, ApiError> {
        if request.node.is_empty() {
            return Err(ApiError::InvalidInput("node must not be empty".to_owned()));
        }
        if !request.ports.complete() {
            return Err(ApiError::InvalidInput(
                "must have two port bindings".to_owned(),
            ));
        }

        let info = self
            .control
            .node_info(&request.node)
            .await
            .map_err(|err| {
                tracing::error!(node = %request.node, error = %err, "getting node info failed");
                ApiError::internal(err)
            })?
            .ok_or_else(|| {
                tracing::warn!(node = %request.node, "attempt to start token issuance for non-existent node");
                ApiError::NodeNotFound
            })?;

        // the proof-of-possession scheme probes exactly one address per family
        let (Some(v4), Some(v6)) = (info.ipv4(), info.ipv6()) else {
            tracing::error!(node = %request.node, count = info.addresses.len(), "node is missing an overlay address family");
            return Err(ApiError::Internal(
                format!("expected one v4 and one v6 address, got {}", info.addresses.len()).into(),
            ));
        };
        if info.addresses.len() != 2 {
            tracing::error!(node = %request.node, count = info.addresses.len(), "node has extra overlay addresses");
            return Err(ApiError::Internal(
                format!("expected one v4 and one v6 address, got {}", info.addresses.len()).into(),
            ));
        }

        let id = Uuid::now_v7().to_string();
        let mut secret = vec![0u8; SIGNING_SECRET_LEN];
        rand::rng().fill_bytes(&mut secret);

        let flow = Flow {
            id: id.clone(),
            status: FlowStatus::Pending,
            expires_at: UnixTime::now() + FLOW_TTL,
            secret: SigningSecret::new(secret),
            node: info.id.clone(),
            public_key: info.key.clone(),
            dns_name: info.dns_name.clone(),
            machine_name: info.machine_name().to_owned(),
            hostname: info.hostname.clone(),
            tailnet: info.tailnet.clone(),
            os: info.os.clone(),
            tags: info.tags.clone(),
            authorized: info.authorized,
            external: info.external,
        };
        self.store.put(&flow).await.map_err(|err| {
            tracing::error!(flow = %id, error = %err, "failed to save flow");
            ApiError::internal(err)
        })?;

        let addresses = vec![
            SocketAddr::new(v4, request.ports.ipv4),
            SocketAddr::new(v6, request.ports.ipv6),
        ];
        self.launcher
            .launch(VerifyTask {
                id: id.clone(),
                addresses,
            })
            .await
            .map_err(|err| {
                // the partially-created flow is left to expire
                tracing::error!(flow = %id, error = %err, "failed to dispatch verification");
                ApiError::internal(err)
            })?;

        tracing::info!(flow = %id, node = %flow.node, "flow started");
        Ok(StartResponse {
            id,
            signing_secret: flow.secret,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::{NodeInfo, StaticControlPlane};
    use crate::launcher::LaunchError;
    use crate::storage::MemoryStore;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tailfed_types::proto::Ports;

    fn node() -> NodeInfo {
        NodeInfo {
            id: "n_abc".to_owned(),
            addresses: vec!["100.64.0.1".parse().unwrap(), "fd7a::1".parse().unwrap()],
            key: "nodekey:XXXX".to_owned(),
            dns_name: "host.acme.ts.net".to_owned(),
            hostname: "host.internal".to_owned(),
            tailnet: "acme.ts.net".to_owned(),
            os: "linux".to_owned(),
            tags: vec!["tag:prod".to_owned()],
            authorized: true,
            external: false,
        }
    }

    #[derive(Default)]
    struct RecordingLauncher {
        tasks: Mutex<Vec<VerifyTask>>,
        fail: bool,
    }

    #[async_trait]
    impl Launcher for RecordingLauncher {
        async fn launch(&self, task: VerifyTask) -> Result<(), LaunchError> {
            if self.fail {
                return Err(LaunchError::Closed);
            }
            self.tasks.lock().unwrap().push(task);
            Ok(())
        }
    }

    fn initializer(
        node: Option<NodeInfo>,
        launcher: Arc<RecordingLauncher>,
    ) -> (Initializer, Arc<MemoryStore>) {
        let mut control = StaticControlPlane::new("acme.ts.net");
        if let Some(node) = node {
            control = control.with_node(node);
        }
        let store = Arc::new(MemoryStore::new());
        (
            Initializer::new(Arc::new(control), store.clone(), launcher),
            store,
        )
    }

    fn request() -> StartRequest {
        StartRequest {
            node: "n_abc".to_owned(),
            ports: Ports {
                ipv4: 40001,
                ipv6: 40002,
            },
        }
    }

    #[tokio::test]
    async fn test_start_persists_snapshot_and_dispatches() {
        let launcher = Arc::new(RecordingLauncher::default());
        let (initializer, store) = initializer(Some(node()), launcher.clone());

        let response = initializer.start(request()).await.unwrap();
        assert_eq!(response.signing_secret.as_bytes().len(), SIGNING_SECRET_LEN);

        let flow = store.get(&response.id).await.unwrap().unwrap();
        assert_eq!(flow.status, FlowStatus::Pending);
        assert_eq!(flow.node, "n_abc");
        assert_eq!(flow.machine_name, "host");
        assert_eq!(flow.hostname, "host.internal");
        assert_eq!(flow.tailnet, "acme.ts.net");
        assert_eq!(flow.tags, vec!["tag:prod"]);

        let tasks = launcher.tasks.lock().unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].id, response.id);
        assert_eq!(
            tasks[0].addresses,
            vec![
                "100.64.0.1:40001".parse().unwrap(),
                "[fd7a::1]:40002".parse().unwrap(),
            ]
        );
    }

    #[tokio::test]
    async fn test_flow_ids_are_time_ordered() {
        let launcher = Arc::new(RecordingLauncher::default());
        let (initializer, _) = initializer(Some(node()), launcher);

        let first = initializer.start(request()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(2)).await;
        let second = initializer.start(request()).await.unwrap();
        assert!(first.id < second.id);
    }

    #[tokio::test]
    async fn test_missing_port_is_invalid_input() {
        let launcher = Arc::new(RecordingLauncher::default());
        let (initializer, store) = initializer(Some(node()), launcher);

        let mut req = request();
        req.ports.ipv6 = 0;
        let err = initializer.start(req).await.unwrap_err();
        assert!(matches!(err, ApiError::InvalidInput(_)));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_empty_node_is_invalid_input() {
        let launcher = Arc::new(RecordingLauncher::default());
        let (initializer, _) = initializer(Some(node()), launcher);

        let mut req = request();
        req.node = String::new();
        assert!(matches!(
            initializer.start(req).await.unwrap_err(),
            ApiError::InvalidInput(_)
        ));
    }

    #[tokio::test]
    async fn test_unknown_node() {
        let launcher = Arc::new(RecordingLauncher::default());
        let (initializer, _) = initializer(None, launcher);

        assert!(matches!(
            initializer.start(request()).await.unwrap_err(),
            ApiError::NodeNotFound
        ));
    }

    #[tokio::test]
    async fn test_single_address_family_is_internal() {
        let launcher = Arc::new(RecordingLauncher::default());
        let mut only_v4 = node();
        only_v4.addresses = vec!["100.64.0.1".parse().unwrap()];
        let (initializer, store) = initializer(Some(only_v4), launcher);

        assert!(matches!(
            initializer.start(request()).await.unwrap_err(),
            ApiError::Internal(_)
        ));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_extra_addresses_are_internal() {
        let launcher = Arc::new(RecordingLauncher::default());
        let mut crowded = node();
        crowded.addresses = vec![
            "100.64.0.1".parse().unwrap(),
            "100.64.0.2".parse().unwrap(),
            "fd7a::1".parse().unwrap(),
        ];
        let (initializer, store) = initializer(Some(crowded), launcher);

        assert!(matches!(
            initializer.start(request()).await.unwrap_err(),
            ApiError::Internal(_)
        ));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_dispatch_failure_leaves_flow_to_expire() {
        let launcher = Arc::new(RecordingLauncher {
            fail: true,
            ..Default::default()
        });
        let (initializer, store) = initializer(Some(node()), launcher);

        assert!(matches!(
            initializer.start(request()).await.unwrap_err(),
            ApiError::Internal(_)
        ));
        assert_eq!(store.len(), 1);
    }
}
