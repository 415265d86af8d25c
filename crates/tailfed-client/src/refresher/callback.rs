//! The challenge callback server.
//!
//! Each in-flight flow serves `GET /{flow_id}` on every bound overlay
//! listener. The response is an HMAC over the node's CURRENT overlay facts:
//! a node whose attributes changed mid-flow will no longer produce the
//! signature the verifier expects, which is exactly the point.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::sync::Arc;
use tailfed_types::proto::ChallengeResponse;
use tailfed_types::{ApiResponse, Base64Bytes};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::local::{LocalOverlay, NodeStatus};

struct ChallengeState {
    overlay: Arc<dyn LocalOverlay>,
    flow_id: String,
    secret: Vec<u8>,
}

/// Builds the single-route router answering the verifier's probe.
pub(crate) fn challenge_router(
    overlay: Arc<dyn LocalOverlay>,
    flow_id: String,
    secret: Vec<u8>,
) -> Router {
    let state = Arc::new(ChallengeState {
        overlay,
        flow_id,
        secret,
    });
    Router::new()
        .route("/{flow}", get(challenge).fallback(method_not_allowed))
        .fallback(not_found)
        .with_state(state)
}

/// Serves the router on a bound listener until cancelled.
pub(crate) fn serve(
    listener: TcpListener,
    router: Router,
    cancel: CancellationToken,
    tracker: &TaskTracker,
) {
    tracker.spawn(async move {
        let address = listener.local_addr().ok();
        tracing::debug!(?address, "started challenge server");

        let shutdown = async move { cancel.cancelled().await };
        if let Err(err) = axum::serve(listener, router)
            .with_graceful_shutdown(shutdown)
            .await
        {
            tracing::error!(?address, error = %err, "challenge server failed");
        }
    });
}

async fn challenge(
    State(state): State<Arc<ChallengeState>>,
    Path(flow): Path<String>,
) -> Response {
    if flow != state.flow_id {
        return error_response(StatusCode::NOT_FOUND, "not found");
    }

    let status = match state.overlay.status().await {
        Ok(status) => status,
        Err(err) => {
            tracing::error!(flow = %state.flow_id, error = %err, "failed to get node status");
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal server error");
        }
    };

    let signature = sign_challenge(&status, &state.secret);
    Json(ApiResponse::success(ChallengeResponse {
        signature: Base64Bytes(signature),
    }))
    .into_response()
}

async fn not_found() -> Response {
    error_response(StatusCode::NOT_FOUND, "not found")
}

async fn method_not_allowed() -> Response {
    error_response(StatusCode::METHOD_NOT_ALLOWED, "method not allowed")
}

fn error_response(status: StatusCode, message: &str) -> Response {
    let envelope: ApiResponse<()> = ApiResponse::failure(message);
    (status, Json(envelope)).into_response()
}

/// HMAC-SHA256 over `tailnet|dns_name|public_key|os`, keyed by the flow's
/// signing secret.
pub(crate) fn sign_challenge(status: &NodeStatus, secret: &[u8]) -> Vec<u8> {
    let mut mac =
        Hmac::<Sha256>::new_from_slice(secret).expect("hmac accepts any key length");
    mac.update(status.tailnet.as_bytes());
    mac.update(b"|");
    mac.update(status.dns_name.as_bytes());
    mac.update(b"|");
    mac.update(status.public_key.as_bytes());
    mac.update(b"|");
    mac.update(status.os.as_bytes());
    mac.finalize().into_bytes().to_vec()
}
