//! Queries against the node's own overlay daemon.

use async_trait::async_trait;
use serde::Deserialize;
use std::net::IpAddr;
use url::Url;

/// The node's view of its own overlay state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeStatus {
    /// Whether the node is ready (authenticated and connected).
    pub ready: bool,
    /// Whether the overlay daemon reports any health issues.
    pub healthy: bool,
    /// The name of the tailnet.
    pub tailnet: String,
    /// The node's overlay IP addresses.
    pub ips: Vec<IpAddr>,
    /// The node id according to the control plane.
    pub id: String,
    /// The node's unique public key.
    pub public_key: String,
    /// The node's DNS name within the tailnet.
    pub dns_name: String,
    /// The node's operating system.
    pub os: String,
}

impl NodeStatus {
    /// The node's IPv4 address, if present.
    pub fn ipv4(&self) -> Option<IpAddr> {
        self.ips.iter().copied().find(IpAddr::is_ipv4)
    }

    /// The node's IPv6 address, if present.
    pub fn ipv6(&self) -> Option<IpAddr> {
        self.ips.iter().copied().find(IpAddr::is_ipv6)
    }
}

/// Query surface of the local overlay daemon.
#[async_trait]
pub trait LocalOverlay: Send + Sync {
    /// Retrieves the node's current status.
    async fn status(&self) -> Result<NodeStatus, LocalApiError>;
}

/// A local overlay query failure.
#[derive(Debug, thiserror::Error)]
pub enum LocalApiError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    /// The daemon answered but the node has not joined a tailnet yet.
    #[error("current node is uninitialized")]
    Uninitialized,
}

/// HTTP client for the overlay daemon's local status API.
///
/// The transport is a configurable base URL; deployments where the daemon
/// only listens on a unix socket can front it with a local proxy or provide
/// their own [`LocalOverlay`] implementation.
#[derive(Debug, Clone)]
pub struct LocalApi {
    base: Url,
    client: reqwest::Client,
}

impl LocalApi {
    /// Creates a client against the overlay daemon at `base`.
    pub fn new(base: Url) -> Self {
        Self {
            base,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl LocalOverlay for LocalApi {
    async fn status(&self) -> Result<NodeStatus, LocalApiError> {
        let url = self
            .base
            .join("localapi/v0/status")
            .map_err(|_| LocalApiError::Uninitialized)?;
        let raw: RawStatus = self
            .client
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        raw.try_into()
    }
}

/// The subset of the local status API the daemon reads.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawStatus {
    backend_state: String,
    #[serde(default)]
    health: Vec<String>,
    current_tailnet: Option<RawTailnet>,
    #[serde(default, rename = "TailscaleIPs")]
    tailscale_ips: Vec<IpAddr>,
    #[serde(rename = "Self")]
    this_node: Option<RawPeer>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawTailnet {
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawPeer {
    #[serde(rename = "ID")]
    id: String,
    public_key: String,
    #[serde(rename = "DNSName")]
    dns_name: String,
    #[serde(rename = "OS")]
    os: String,
}

impl TryFrom<RawStatus> for NodeStatus {
    type Error = LocalApiError;

    fn try_from(raw: RawStatus) -> Result<Self, Self::Error> {
        let (Some(tailnet), Some(this_node)) = (raw.current_tailnet, raw.this_node) else {
            return Err(LocalApiError::Uninitialized);
        };

        Ok(NodeStatus {
            ready: raw.backend_state == "Running",
            healthy: raw.health.is_empty(),
            tailnet: tailnet.name,
            ips: raw.tailscale_ips,
            id: this_node.id,
            public_key: this_node.public_key,
            // the local API reports the DNS name fully qualified; the
            // control plane does not, and the HMAC canonical string must
            // agree on both sides
            dns_name: this_node.dns_name.trim_end_matches('.').to_owned(),
            os: this_node.os,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_status() -> serde_json::Value {
        serde_json::json!({
            "BackendState": "Running",
            "Health": [],
            "CurrentTailnet": {"Name": "acme.ts.net"},
            "TailscaleIPs": ["100.64.0.1", "fd7a::1"],
            "Self": {
                "ID": "n_abc",
                "PublicKey": "nodekey:XXXX",
                "DNSName": "host.acme.ts.net.",
                "OS": "linux",
            },
        })
    }

    #[test]
    fn test_status_mapping() {
        let raw: RawStatus = serde_json::from_value(sample_status()).unwrap();
        let status = NodeStatus::try_from(raw).unwrap();

        assert!(status.ready);
        assert!(status.healthy);
        assert_eq!(status.tailnet, "acme.ts.net");
        assert_eq!(status.id, "n_abc");
        assert_eq!(status.dns_name, "host.acme.ts.net");
        assert_eq!(status.ipv4(), Some("100.64.0.1".parse().unwrap()));
        assert_eq!(status.ipv6(), Some("fd7a::1".parse().unwrap()));
    }

    #[test]
    fn test_not_running_backend() {
        let mut value = sample_status();
        value["BackendState"] = "NeedsLogin".into();
        value["Health"] = serde_json::json!(["not logged in"]);

        let raw: RawStatus = serde_json::from_value(value).unwrap();
        let status = NodeStatus::try_from(raw).unwrap();
        assert!(!status.ready);
        assert!(!status.healthy);
    }

    #[test]
    fn test_uninitialized_node() {
        let mut value = sample_status();
        value["CurrentTailnet"] = serde_json::Value::Null;

        let raw: RawStatus = serde_json::from_value(value).unwrap();
        assert!(matches!(
            NodeStatus::try_from(raw),
            Err(LocalApiError::Uninitialized)
        ));
    }
}
