//! The persisted flow record shared by the three issuance stages.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Deref;
use std::str::FromStr;

use crate::b64::Base64Bytes;
use crate::timestamp::UnixTime;

/// Number of random bytes in a flow's signing secret.
pub const SIGNING_SECRET_LEN: usize = 64;

/// Everything associated with a single token issuance process.
///
/// A flow is created exactly once by the initializer with
/// [`FlowStatus::Pending`], flipped to `Success` or `Failed` by the verifier
/// or launcher, and deleted by the finalizer immediately after a token is
/// issued. The node facts are a snapshot of what the control plane reported
/// at initialization; later stages validate against the snapshot, never
/// against the node's current state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Flow {
    /// Time-ordered unique identifier (UUIDv7).
    pub id: String,
    /// Current status of the challenge.
    pub status: FlowStatus,
    /// When the flow stops being finalizable.
    pub expires_at: UnixTime,
    /// Key for the proof-of-possession HMAC.
    pub secret: SigningSecret,

    /// The node id used by the control plane.
    pub node: String,
    /// The node's unique public key.
    pub public_key: String,
    /// The node's DNS name within the tailnet.
    pub dns_name: String,
    /// The node's machine short-name.
    pub machine_name: String,
    /// The node's hostname.
    pub hostname: String,
    /// The name of the tailnet.
    pub tailnet: String,
    /// The node's operating system.
    pub os: String,
    /// ACL tags applied to the node.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Whether the node is authorized to join the tailnet.
    pub authorized: bool,
    /// Whether the node is shared into the tailnet from outside.
    pub external: bool,
}

impl Flow {
    /// Whether the flow has passed its expiry.
    pub fn expired_at(&self, now: UnixTime) -> bool {
        now > self.expires_at
    }
}

/// The current status of a flow.
///
/// Transitions are monotonic: `Pending` may move to `Success` or `Failed`,
/// never backward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlowStatus {
    /// Created, awaiting proof-of-possession.
    Pending,
    /// The challenge was verified.
    Success,
    /// The challenge failed or the retry budget was exhausted.
    Failed,
}

impl fmt::Display for FlowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FlowStatus::Pending => "pending",
            FlowStatus::Success => "success",
            FlowStatus::Failed => "failed",
        };
        write!(f, "{name}")
    }
}

impl FromStr for FlowStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(FlowStatus::Pending),
            "success" => Ok(FlowStatus::Success),
            "failed" => Ok(FlowStatus::Failed),
            other => Err(UnknownStatus(other.to_owned())),
        }
    }
}

/// An unrecognized flow status value.
#[derive(Debug, thiserror::Error)]
#[error("unknown status {0:?}")]
pub struct UnknownStatus(pub String);

/// The 64-byte random key the client uses to prove possession of its
/// overlay addresses.
///
/// Serializes as base64 like any other byte payload, but its `Debug`
/// representation never reveals the key material: the secret must not leak
/// into logs or error chains.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct SigningSecret(Base64Bytes);

impl SigningSecret {
    /// Wraps raw secret bytes.
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(Base64Bytes(bytes))
    }

    /// Returns the raw key bytes for MAC computation.
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl Deref for SigningSecret {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        self.0.as_bytes()
    }
}

impl From<Vec<u8>> for SigningSecret {
    fn from(bytes: Vec<u8>) -> Self {
        Self::new(bytes)
    }
}

impl fmt::Debug for SigningSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SigningSecret(redacted)")
    }
}
