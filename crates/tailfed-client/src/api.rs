//! HTTP client for the Tailfed issuer.

use reqwest::StatusCode;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tailfed_types::proto::{
    ConfigResponse, FinalizeRequest, Ports, StartRequest, StartResponse,
};
use tailfed_types::version::BuildInfo;
use tailfed_types::ApiResponse;
use url::Url;

/// Client for the issuer's `/start`, `/finalize`, and metadata endpoints.
#[derive(Debug, Clone)]
pub struct ApiClient {
    base: Url,
    client: reqwest::Client,
}

/// A failed call against the issuer.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("failed to send request: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("http error: {message} (code: {status})")]
    Status {
        status: StatusCode,
        message: String,
    },
    #[error("malformed response: {0}")]
    Envelope(String),
}

impl ApiError {
    /// Whether the finalize retry loop may try again: transport failures
    /// and `409 Conflict` ("not yet") are retryable, every other HTTP
    /// failure is fatal.
    pub fn is_retryable(&self) -> bool {
        match self {
            ApiError::Transport(_) => true,
            ApiError::Status { status, .. } => *status == StatusCode::CONFLICT,
            ApiError::Envelope(_) => false,
        }
    }
}

impl ApiClient {
    /// Creates a client for the issuer at `base`.
    pub fn new(base: Url) -> Self {
        Self {
            base,
            client: reqwest::Client::new(),
        }
    }

    fn endpoint(&self, path: &str) -> Result<Url, ApiError> {
        self.base
            .join(path)
            .map_err(|err| ApiError::Envelope(format!("invalid endpoint {path:?}: {err}")))
    }

    async fn post_enveloped<B: Serialize, R: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<R, ApiError> {
        let url = self.endpoint(path)?;
        tracing::debug!(%url, "sending request");
        let response = self.client.post(url).json(body).send().await?;
        let status = response.status();
        tracing::debug!(%status, path, "got response");

        let envelope: ApiResponse<R> = response
            .json()
            .await
            .map_err(|err| ApiError::Envelope(err.to_string()))?;
        envelope.into_data().map_err(|err| ApiError::Status {
            status,
            message: err.to_string(),
        })
    }

    async fn get_enveloped<R: DeserializeOwned>(&self, path: &str) -> Result<R, ApiError> {
        let url = self.endpoint(path)?;
        let response = self.client.get(url).send().await?;
        let status = response.status();

        let envelope: ApiResponse<R> = response
            .json()
            .await
            .map_err(|err| ApiError::Envelope(err.to_string()))?;
        envelope.into_data().map_err(|err| ApiError::Status {
            status,
            message: err.to_string(),
        })
    }

    /// Begins the token issuance process for `node`.
    pub async fn start(&self, node: &str, ports: Ports) -> Result<StartResponse, ApiError> {
        self.post_enveloped(
            "start",
            &StartRequest {
                node: node.to_owned(),
                ports,
            },
        )
        .await
    }

    /// Attempts to finish a flow and obtain the identity token.
    pub async fn finalize(&self, id: &str) -> Result<String, ApiError> {
        let response: tailfed_types::proto::FinalizeResponse = self
            .post_enveloped("finalize", &FinalizeRequest { id: id.to_owned() })
            .await?;
        Ok(response.identity_token)
    }

    /// Reads the daemon configuration document.
    pub async fn server_config(&self) -> Result<ConfigResponse, ApiError> {
        self.get_enveloped("config.json").await
    }

    /// Reads the server's build information. Not enveloped.
    pub async fn server_version(&self) -> Result<BuildInfo, ApiError> {
        let url = self.endpoint("version.json")?;
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ApiError::Status {
                status,
                message: "version endpoint failed".to_owned(),
            });
        }
        response
            .json()
            .await
            .map_err(|err| ApiError::Envelope(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode as AxumStatus;
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use tailfed_types::GoDuration;
    use tailfed_types::flow::SigningSecret;
    use std::time::Duration;

    async fn spawn(router: Router) -> Url {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{address}/").parse().unwrap()
    }

    #[tokio::test]
    async fn test_start_decodes_envelope() {
        let router = Router::new().route(
            "/start",
            post(|Json(request): Json<StartRequest>| async move {
                assert_eq!(request.node, "n_abc");
                Json(ApiResponse::success(StartResponse {
                    id: "flow-1".to_owned(),
                    signing_secret: SigningSecret::new(vec![7; 64]),
                }))
            }),
        );
        let client = ApiClient::new(spawn(router).await);

        let response = client
            .start("n_abc", Ports { ipv4: 1, ipv6: 2 })
            .await
            .unwrap();
        assert_eq!(response.id, "flow-1");
        assert_eq!(response.signing_secret.as_bytes(), &[7; 64][..]);
    }

    #[tokio::test]
    async fn test_conflict_is_retryable() {
        let router = Router::new().route(
            "/finalize",
            post(|| async {
                (
                    AxumStatus::CONFLICT,
                    Json(ApiResponse::<()>::failure("not yet")),
                )
            }),
        );
        let client = ApiClient::new(spawn(router).await);

        let err = client.finalize("flow-1").await.unwrap_err();
        assert!(err.is_retryable());
        assert!(err.to_string().contains("not yet"));
    }

    #[tokio::test]
    async fn test_forbidden_is_fatal() {
        let router = Router::new().route(
            "/finalize",
            post(|| async {
                (
                    AxumStatus::FORBIDDEN,
                    Json(ApiResponse::<()>::failure("challenge not verified")),
                )
            }),
        );
        let client = ApiClient::new(spawn(router).await);

        let err = client.finalize("flow-1").await.unwrap_err();
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_transport_error_is_retryable() {
        // bind then drop so nothing is listening
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        drop(listener);

        let client = ApiClient::new(format!("http://{address}/").parse().unwrap());
        let err = client.finalize("flow-1").await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_server_config() {
        let router = Router::new().route(
            "/config.json",
            get(|| async {
                Json(ApiResponse::success(ConfigResponse {
                    frequency: GoDuration(Duration::from_secs(2700)),
                }))
            }),
        );
        let client = ApiClient::new(spawn(router).await);

        let config = client.server_config().await.unwrap();
        assert_eq!(config.frequency.as_duration(), Duration::from_secs(2700));
    }

    #[tokio::test]
    async fn test_server_version_not_enveloped() {
        let router = Router::new().route(
            "/version.json",
            get(|| async {
                Json(BuildInfo {
                    version: "1.2.0".to_owned(),
                    commit: None,
                    platform: None,
                })
            }),
        );
        let client = ApiClient::new(spawn(router).await);

        let version = client.server_version().await.unwrap();
        assert_eq!(version.major_minor(), Some((1, 2)));
    }
}
