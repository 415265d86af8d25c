//! Read-only control-plane queries.
//!
//! The initializer looks a node up by its control-plane id and snapshots the
//! answer into the flow; nothing else ever talks to the control plane. The
//! seam is the [`ControlPlane`] trait: production uses
//! [`HostedControlPlane`] against the hosted API or a headscale instance,
//! tests and fixtures use [`StaticControlPlane`].

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use std::collections::HashMap;
use std::net::IpAddr;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use url::Url;

/// A node record as reported by the control plane.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeInfo {
    /// The id used by the control plane.
    pub id: String,
    /// The node's overlay IP addresses.
    pub addresses: Vec<IpAddr>,
    /// The node's unique public key.
    pub key: String,
    /// The node's DNS name within the tailnet.
    pub dns_name: String,
    /// The node's hostname.
    pub hostname: String,
    /// The name of the tailnet.
    pub tailnet: String,
    /// The node's operating system.
    pub os: String,
    /// ACL tags applied to the node.
    pub tags: Vec<String>,
    /// Whether the node is authorized to join the tailnet.
    pub authorized: bool,
    /// Whether the node is shared in from another tailnet.
    pub external: bool,
}

impl NodeInfo {
    /// The machine short-name: the first label of the DNS name.
    pub fn machine_name(&self) -> &str {
        self.dns_name.split('.').next().unwrap_or(&self.dns_name)
    }

    /// The node's IPv4 address, if the control plane reported one.
    pub fn ipv4(&self) -> Option<IpAddr> {
        self.addresses.iter().copied().find(IpAddr::is_ipv4)
    }

    /// The node's IPv6 address, if the control plane reported one.
    pub fn ipv6(&self) -> Option<IpAddr> {
        self.addresses.iter().copied().find(IpAddr::is_ipv6)
    }
}

/// Read-only query surface of the mesh control plane.
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// The name of the tailnet this control plane serves.
    fn tailnet(&self) -> &str;

    /// Retrieves a node record by id, `None` if the node is unknown.
    async fn node_info(&self, id: &str) -> Result<Option<NodeInfo>, ControlPlaneError>;
}

/// A control-plane query failure.
#[derive(Debug, thiserror::Error)]
pub enum ControlPlaneError {
    #[error("invalid base url {0:?}: {1}")]
    InvalidBaseUrl(String, String),
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected status {0}")]
    UnexpectedStatus(StatusCode),
    #[error("authentication failed: {0}")]
    Authentication(String),
}

/// How the client authenticates with the control-plane API.
#[derive(Debug, Clone)]
pub enum Authentication {
    /// An unrestricted API key. Where possible, prefer OAuth credentials.
    ApiKey(String),
    /// Client-credentials OAuth; tokens are fetched on demand and cached.
    OAuth {
        client_id: String,
        client_secret: String,
    },
}

/// Certificate validation policy for the control-plane connection.
///
/// `Insecure` exists for self-hosted control planes running on
/// locally-issued certificates; the hosted API always uses `Strict`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TlsMode {
    #[default]
    Strict,
    Insecure,
}

struct CachedToken {
    token: String,
    expires_at: Instant,
}

/// Control-plane client for the hosted API or a headscale instance.
pub struct HostedControlPlane {
    client: reqwest::Client,
    base: Url,
    tailnet: String,
    auth: Authentication,
    cached: Mutex<Option<CachedToken>>,
}

impl HostedControlPlane {
    /// Creates a client for `base_url`, which must be http(s).
    pub fn new(
        base_url: &str,
        tailnet: impl Into<String>,
        auth: Authentication,
    ) -> Result<Self, ControlPlaneError> {
        Self::with_tls_mode(base_url, tailnet, auth, TlsMode::Strict)
    }

    /// [`HostedControlPlane::new`] with an explicit certificate policy.
    pub fn with_tls_mode(
        base_url: &str,
        tailnet: impl Into<String>,
        auth: Authentication,
        tls_mode: TlsMode,
    ) -> Result<Self, ControlPlaneError> {
        let base = Url::parse(base_url)
            .map_err(|err| ControlPlaneError::InvalidBaseUrl(base_url.to_owned(), err.to_string()))?;
        if base.scheme() != "http" && base.scheme() != "https" {
            return Err(ControlPlaneError::InvalidBaseUrl(
                base_url.to_owned(),
                format!("invalid scheme {:?}", base.scheme()),
            ));
        }

        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(tls_mode == TlsMode::Insecure)
            .build()?;

        Ok(Self {
            client,
            base,
            tailnet: tailnet.into(),
            auth,
            cached: Mutex::new(None),
        })
    }

    async fn bearer_token(&self) -> Result<String, ControlPlaneError> {
        match &self.auth {
            Authentication::ApiKey(key) => Ok(key.clone()),
            Authentication::OAuth {
                client_id,
                client_secret,
            } => {
                let mut cached = self.cached.lock().await;
                if let Some(entry) = cached.as_ref()
                    && entry.expires_at > Instant::now()
                {
                    return Ok(entry.token.clone());
                }

                let url = self
                    .base
                    .join("api/v2/oauth/token")
                    .map_err(|err| ControlPlaneError::Authentication(err.to_string()))?;
                let response = self
                    .client
                    .post(url)
                    .form(&[
                        ("grant_type", "client_credentials"),
                        ("client_id", client_id.as_str()),
                        ("client_secret", client_secret.as_str()),
                        ("scope", "devices:read"),
                    ])
                    .send()
                    .await?;
                if !response.status().is_success() {
                    return Err(ControlPlaneError::Authentication(format!(
                        "token endpoint returned {}",
                        response.status()
                    )));
                }

                #[derive(Deserialize)]
                struct TokenResponse {
                    access_token: String,
                    #[serde(default)]
                    expires_in: Option<u64>,
                }
                let token: TokenResponse = response.json().await?;

                // renew a minute early so in-flight requests never race expiry
                let lifetime = Duration::from_secs(token.expires_in.unwrap_or(3600).saturating_sub(60));
                *cached = Some(CachedToken {
                    token: token.access_token.clone(),
                    expires_at: Instant::now() + lifetime,
                });
                Ok(token.access_token)
            }
        }
    }
}

#[async_trait]
impl ControlPlane for HostedControlPlane {
    fn tailnet(&self) -> &str {
        &self.tailnet
    }

    async fn node_info(&self, id: &str) -> Result<Option<NodeInfo>, ControlPlaneError> {
        let url = self
            .base
            .join(&format!("api/v2/device/{id}"))
            .map_err(|err| ControlPlaneError::InvalidBaseUrl(id.to_owned(), err.to_string()))?;
        let token = self.bearer_token().await?;

        let response = self
            .client
            .get(url)
            .query(&[("fields", "all")])
            .bearer_auth(token)
            .send()
            .await?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let device: Device = response.json().await?;
                Ok(Some(device.into_node_info(&self.tailnet)))
            }
            status => Err(ControlPlaneError::UnexpectedStatus(status)),
        }
    }
}

/// The subset of the device API response the issuer reads.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Device {
    node_id: String,
    #[serde(default)]
    addresses: Vec<IpAddr>,
    node_key: String,
    name: String,
    hostname: String,
    os: String,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    authorized: bool,
    #[serde(default)]
    is_external: bool,
}

impl Device {
    fn into_node_info(self, tailnet: &str) -> NodeInfo {
        NodeInfo {
            id: self.node_id,
            addresses: self.addresses,
            key: self.node_key,
            dns_name: self.name,
            hostname: self.hostname,
            tailnet: tailnet.to_owned(),
            os: self.os,
            tags: self.tags,
            authorized: self.authorized,
            external: self.is_external,
        }
    }
}

/// A fixed set of node records, for tests and fixtures.
#[derive(Debug, Default)]
pub struct StaticControlPlane {
    tailnet: String,
    nodes: HashMap<String, NodeInfo>,
}

impl StaticControlPlane {
    /// Creates an empty control plane for `tailnet`.
    pub fn new(tailnet: impl Into<String>) -> Self {
        Self {
            tailnet: tailnet.into(),
            nodes: HashMap::new(),
        }
    }

    /// Adds a node record, keyed by its id.
    pub fn with_node(mut self, node: NodeInfo) -> Self {
        self.nodes.insert(node.id.clone(), node);
        self
    }
}

#[async_trait]
impl ControlPlane for StaticControlPlane {
    fn tailnet(&self) -> &str {
        &self.tailnet
    }

    async fn node_info(&self, id: &str) -> Result<Option<NodeInfo>, ControlPlaneError> {
        Ok(self.nodes.get(id).cloned())
    }
}
