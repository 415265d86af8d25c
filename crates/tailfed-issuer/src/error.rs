//! Error surface of the issuance handlers.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tailfed_types::ApiResponse;

/// Message returned for every 5xx response. Internal error details stay in
/// the logs.
pub const INTERNAL_SERVER_ERROR: &str = "internal server error";

/// A failure surfaced by one of the stage handlers.
///
/// The variants map onto the HTTP error table: malformed input is 422, an
/// unknown flow is 404, an unverified or expired flow is 403, and everything
/// transient or unexpected collapses to a 500 whose body never leaks the
/// underlying error string.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The request body failed validation.
    #[error("{0}")]
    InvalidInput(String),
    /// The referenced flow does not exist.
    #[error("flow not found")]
    FlowNotFound,
    /// The referenced node is not known to the control plane. Surfaced as
    /// 422 since the node id is an input constraint.
    #[error("node not found")]
    NodeNotFound,
    /// The flow exists but may not be finalized.
    #[error("{0}")]
    Forbidden(&'static str),
    /// The flow is still pending verification; the client retries on this.
    #[error("{0}")]
    Conflict(&'static str),
    /// A store, control-plane, or dispatch failure. The source is logged at
    /// the call site; the response body is the constant internal message.
    #[error("internal: {0}")]
    Internal(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl ApiError {
    /// Wraps any error as an internal failure.
    pub fn internal<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Internal(Box::new(err))
    }

    /// The HTTP status code this error surfaces as.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::InvalidInput(_) | ApiError::NodeNotFound => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::FlowNotFound => StatusCode::NOT_FOUND,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// The message placed in the response envelope.
    pub fn public_message(&self) -> String {
        match self {
            ApiError::Internal(_) => INTERNAL_SERVER_ERROR.to_owned(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let envelope: ApiResponse<()> = ApiResponse::failure(self.public_message());
        (self.status_code(), Json(envelope)).into_response()
    }
}
