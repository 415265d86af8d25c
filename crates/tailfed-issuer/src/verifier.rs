//! The proof-of-possession verifier.

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::sync::Arc;
use std::time::Duration;
use tailfed_types::proto::{ChallengeResponse, VerifyRequest, VerifyResponse};
use tailfed_types::{ApiResponse, Flow, FlowStatus};

use crate::storage::{FlowStore, StoreError};

/// Per-attempt timeout for dialing the node.
const DIAL_TIMEOUT: Duration = Duration::from_secs(1);

/// A single verification attempt against one overlay address.
///
/// Implemented by [`Verifier`]; the seam exists so the launcher's retry
/// loop can be exercised without the network.
#[async_trait]
pub trait VerifyBackend: Send + Sync {
    /// Probes one address for a valid challenge signature.
    ///
    /// A missing flow is fatal ([`VerifierError::FlowNotFound`], never
    /// retried). Everything else — transport failure, bad envelope, wrong
    /// signature — is a soft `success: false` and the caller decides whether
    /// to try another address.
    async fn verify(&self, request: VerifyRequest) -> Result<VerifyResponse, VerifierError>;
}

/// A fatal verification failure.
#[derive(Debug, thiserror::Error)]
pub enum VerifierError {
    /// The flow disappeared; retrying can never succeed.
    #[error("flow {0:?} no longer exists")]
    FlowNotFound(String),
    #[error("storage failure: {0}")]
    Store(#[from] StoreError),
}

/// Dials a node over the overlay and validates its HMAC proof against the
/// flow snapshot.
///
/// The verifier never contacts the control plane: the facts captured at
/// `/start` are authoritative. It also never deletes the flow; that is the
/// finalizer's job.
pub struct Verifier {
    client: reqwest::Client,
    store: Arc<dyn FlowStore>,
}

impl Verifier {
    /// Creates a verifier over the shared flow store.
    pub fn new(store: Arc<dyn FlowStore>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(DIAL_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self { client, store }
    }

    async fn fetch_signature(&self, request: &VerifyRequest) -> Option<Vec<u8>> {
        let url = format!("http://{}/{}", request.address, request.id);
        let response = match self.client.get(&url).send().await {
            Ok(response) => response,
            Err(err) => {
                tracing::warn!(flow = %request.id, address = %request.address, error = %err, "failed to dial node");
                return None;
            }
        };

        let envelope: ApiResponse<ChallengeResponse> = match response.json().await {
            Ok(envelope) => envelope,
            Err(err) => {
                tracing::warn!(flow = %request.id, error = %err, "failed to deserialize challenge response");
                return None;
            }
        };

        match envelope.into_data() {
            Ok(challenge) => Some(challenge.signature.into_inner()),
            Err(err) => {
                tracing::warn!(flow = %request.id, error = %err, "unsuccessful response from node");
                None
            }
        }
    }
}

#[async_trait]
impl VerifyBackend for Verifier {
    async fn verify(&self, request: VerifyRequest) -> Result<VerifyResponse, VerifierError> {
        let mut flow = match self.store.get(&request.id).await? {
            Some(flow) => flow,
            None => return Err(VerifierError::FlowNotFound(request.id)),
        };

        let Some(signature) = self.fetch_signature(&request).await else {
            return Ok(VerifyResponse { success: false });
        };

        if !verify_challenge_signature(&flow, &signature) {
            tracing::warn!(flow = %request.id, "invalid signature");
            return Ok(VerifyResponse { success: false });
        }

        flow.status = FlowStatus::Success;
        self.store.put(&flow).await?;

        tracing::info!(flow = %flow.id, "challenge verified");
        Ok(VerifyResponse { success: true })
    }
}

/// The HMAC-SHA256 over the canonical string `tailnet|dns_name|public_key|os`
/// (UTF-8, pipe separators, no terminator), keyed by the flow's signing
/// secret. Computed over the snapshot captured at `/start`, never the node's
/// current facts.
fn challenge_mac(flow: &Flow) -> Hmac<Sha256> {
    let mut mac = Hmac::<Sha256>::new_from_slice(flow.secret.as_bytes())
        .expect("hmac accepts any key length");
    mac.update(flow.tailnet.as_bytes());
    mac.update(b"|");
    mac.update(flow.dns_name.as_bytes());
    mac.update(b"|");
    mac.update(flow.public_key.as_bytes());
    mac.update(b"|");
    mac.update(flow.os.as_bytes());
    mac
}

/// The signature a well-behaved node is expected to present for `flow`.
pub fn expected_signature(flow: &Flow) -> Vec<u8> {
    challenge_mac(flow).finalize().into_bytes().to_vec()
}

/// Constant-time comparison of a presented signature against the snapshot.
fn verify_challenge_signature(flow: &Flow, signature: &[u8]) -> bool {
    challenge_mac(flow).verify_slice(signature).is_ok()
}
