//! Requests and responses of the token issuance protocol.
//!
//! The `/start` and `/finalize` endpoints, the launcher→verifier task
//! payload, and the client challenge callback all exchange these types,
//! wrapped in the [`ApiResponse`](crate::envelope::ApiResponse) envelope
//! where the endpoint table says so.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

use crate::b64::Base64Bytes;
use crate::duration::GoDuration;
use crate::flow::SigningSecret;

/// Sent by the client to initiate a token issuance flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartRequest {
    /// The control-plane id of the requesting node.
    pub node: String,
    /// The callback ports the node is listening on.
    pub ports: Ports,
}

/// Listening ports for the node's IPv4 and IPv6 overlay addresses.
///
/// Both must be non-zero: the proof-of-possession scheme probes both
/// address families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ports {
    /// The listening port on the v4 address.
    pub ipv4: u16,
    /// The listening port on the v6 address.
    pub ipv6: u16,
}

impl Ports {
    /// Whether both address families have a binding.
    pub fn complete(&self) -> bool {
        self.ipv4 != 0 && self.ipv6 != 0
    }
}

/// Returned by the start handler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartResponse {
    /// Unique identifier for the challenge.
    pub id: String,
    /// Key for the HMAC-SHA256 signature of the node details. Opaque bytes;
    /// the client must not assume any encoding.
    #[serde(rename = "signing-secret")]
    pub signing_secret: SigningSecret,
}

/// Sent by the launcher to the verifier for a single verification attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyRequest {
    /// The flow's unique identifier.
    pub id: String,
    /// The overlay address-port pair to probe.
    pub address: SocketAddr,
}

/// Returned by the verifier whenever an attempt completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyResponse {
    /// Whether the verification was successful.
    pub success: bool,
}

/// Returned by the client challenge callback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChallengeResponse {
    /// HMAC-SHA256 over the node's tailnet, DNS name, public key, and
    /// operating system.
    pub signature: Base64Bytes,
}

/// Sent by the client once the challenge has been answered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalizeRequest {
    /// The flow identifier from [`StartResponse`].
    pub id: String,
}

/// Returned by the finalize handler once the challenge has been verified.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalizeResponse {
    /// A signed JWT usable for web identity federation.
    #[serde(rename = "identity-token")]
    pub identity_token: String,
}

/// The daemon configuration document served at `/config.json`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigResponse {
    /// How often clients should refresh their token.
    pub frequency: GoDuration,
}

/// Input to the metadata generator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerateRequest {
    /// The public base URL the discovery document is served under.
    pub issuer: String,
}
