//! The JSON response envelope shared by every Tailfed HTTP endpoint.
//!
//! All server responses (and the client's challenge callback) wrap their
//! payload as `{ "success": bool, "data"?: T, "error"?: string }`. Success
//! responses omit `error`; failures omit `data`.

use serde::{Deserialize, Serialize};

/// The general structure of a Tailfed HTTP response payload.
///
/// # Example
///
/// ```
/// use tailfed_types::ApiResponse;
///
/// let ok = ApiResponse::success(42);
/// assert_eq!(serde_json::to_string(&ok).unwrap(), r#"{"success":true,"data":42}"#);
///
/// let err: ApiResponse<u32> = ApiResponse::failure("node not found");
/// assert_eq!(
///     serde_json::to_string(&err).unwrap(),
///     r#"{"success":false,"error":"node not found"}"#
/// );
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
pub struct ApiResponse<T> {
    /// Whether the request was handled successfully.
    pub success: bool,
    /// Endpoint-specific response data, only present when `success` is true.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    /// A description of what went wrong, only present when `success` is false.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    /// Wraps `data` in a successful envelope.
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    /// Wraps an error message in a failed envelope.
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
        }
    }

    /// Extracts the payload, converting an error envelope into `Err`.
    ///
    /// A success envelope without `data` is treated as an error since no
    /// endpoint produces one.
    pub fn into_data(self) -> Result<T, EnvelopeError> {
        if self.success {
            self.data.ok_or(EnvelopeError::MissingData)
        } else {
            Err(EnvelopeError::Failure(
                self.error.unwrap_or_else(|| "unknown error".to_owned()),
            ))
        }
    }
}

/// Failure to extract a payload from a response envelope.
#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    /// The server reported a failure.
    #[error("{0}")]
    Failure(String),
    /// The envelope claimed success but carried no payload.
    #[error("success response without data")]
    MissingData,
}
