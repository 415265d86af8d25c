//! HTTP endpoints of the Tailfed issuer.
//!
//! Protocol-critical endpoints (`/start`, `/finalize`) return the JSON
//! response envelope; the `.well-known` documents are served verbatim from
//! the metadata store because OIDC consumers expect them unwrapped.
//!
//! The handlers are thin adapters: all semantics live in the stage handler
//! structs, which are transport-agnostic and can be packaged behind any
//! gateway.

use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use std::sync::Arc;
use tailfed_types::proto::{FinalizeRequest, StartRequest};
use tailfed_types::version::BuildInfo;
use tailfed_types::ApiResponse;
use tracing::instrument;

use crate::error::ApiError;
use crate::finalizer::Finalizer;
use crate::initializer::Initializer;
use crate::metadata::{CONFIG_DOCUMENT, DISCOVERY_DOCUMENT, JWKS_DOCUMENT, MetadataStore};

/// Shared state of the issuer's HTTP surface.
pub struct AppState {
    pub initializer: Initializer,
    pub finalizer: Finalizer,
    pub metadata: Arc<dyn MetadataStore>,
    /// The public base URL tokens are issued under.
    pub issuer: String,
    pub build: BuildInfo,
}

/// Builds the issuer's route table.
pub fn routes(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/start", post(post_start))
        .route("/finalize", post(post_finalize))
        .route("/config.json", get(get_config))
        .route("/.well-known/openid-configuration", get(get_discovery))
        .route("/.well-known/jwks.json", get(get_jwks))
        .route("/version.json", get(get_version))
        .route("/health", get(get_health))
        .with_state(state)
}

/// `POST /start`: begins a token issuance flow.
#[instrument(skip_all)]
async fn post_start(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<StartRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(body) = payload.map_err(|_| ApiError::InvalidInput("invalid request body".to_owned()))?;
    let response = state.initializer.start(body).await?;
    Ok(Json(ApiResponse::success(response)).into_response())
}

/// `POST /finalize`: exchanges a verified flow for an identity token.
#[instrument(skip_all)]
async fn post_finalize(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<FinalizeRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(body) = payload.map_err(|_| ApiError::InvalidInput("invalid request body".to_owned()))?;
    let response = state.finalizer.finalize(&state.issuer, body).await?;
    Ok(Json(ApiResponse::success(response)).into_response())
}

/// `GET /config.json`: the daemon configuration document (enveloped, as
/// written by the generator).
#[instrument(skip_all)]
async fn get_config(State(state): State<Arc<AppState>>) -> Result<Response, ApiError> {
    serve_document(&*state.metadata, CONFIG_DOCUMENT).await
}

/// `GET /.well-known/openid-configuration`: the OIDC discovery document,
/// not wrapped.
#[instrument(skip_all)]
async fn get_discovery(State(state): State<Arc<AppState>>) -> Result<Response, ApiError> {
    serve_document(&*state.metadata, DISCOVERY_DOCUMENT).await
}

/// `GET /.well-known/jwks.json`: the JWK Set, not wrapped.
#[instrument(skip_all)]
async fn get_jwks(State(state): State<Arc<AppState>>) -> Result<Response, ApiError> {
    serve_document(&*state.metadata, JWKS_DOCUMENT).await
}

/// `GET /version.json`: build details of the running binary.
#[instrument(skip_all)]
async fn get_version(State(state): State<Arc<AppState>>) -> Json<BuildInfo> {
    Json(state.build.clone())
}

/// `GET /health`: liveness probe.
#[instrument(skip_all)]
async fn get_health() -> StatusCode {
    StatusCode::NO_CONTENT
}

/// Serves a metadata document verbatim. A missing document is an internal
/// error: the generator runs before the server accepts traffic.
async fn serve_document(meta: &dyn MetadataStore, key: &str) -> Result<Response, ApiError> {
    let raw = meta.load_raw(key).await.map_err(|err| {
        tracing::error!(document = key, error = %err, "failed to load metadata document");
        ApiError::internal(err)
    })?;
    match raw {
        Some(bytes) => Ok((
            [(header::CONTENT_TYPE, "application/json")],
            bytes,
        )
            .into_response()),
        None => {
            tracing::error!(document = key, "metadata document has not been generated");
            Err(ApiError::Internal(
                format!("document {key} not generated").into(),
            ))
        }
    }
}
