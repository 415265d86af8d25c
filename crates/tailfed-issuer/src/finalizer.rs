//! The flow finalizer.

use std::sync::Arc;
use std::time::Duration;
use tailfed_types::proto::{FinalizeRequest, FinalizeResponse};
use tailfed_types::{FlowStatus, UnixTime};

use crate::error::ApiError;
use crate::oidc::Claims;
use crate::signing::Signer;
use crate::storage::FlowStore;

/// Handles `/finalize`: exchanges a verified flow id for a signed identity
/// token and deletes the flow.
pub struct Finalizer {
    store: Arc<dyn FlowStore>,
    signer: Arc<dyn Signer>,
    audience: String,
    validity: Duration,
}

impl Finalizer {
    /// Creates a finalizer issuing tokens for `audience` valid for
    /// `validity`.
    pub fn new(
        store: Arc<dyn FlowStore>,
        signer: Arc<dyn Signer>,
        audience: impl Into<String>,
        validity: Duration,
    ) -> Self {
        Self {
            store,
            signer,
            audience: audience.into(),
            validity,
        }
    }

    /// Issues a token for a verified flow. `issuer` is the public base URL
    /// the request arrived under.
    pub async fn finalize(
        &self,
        issuer: &str,
        request: FinalizeRequest,
    ) -> Result<FinalizeResponse, ApiError> {
        let flow = self
            .store
            .get(&request.id)
            .await
            .map_err(|err| {
                tracing::error!(flow = %request.id, error = %err, "failed to get flow");
                ApiError::internal(err)
            })?
            .ok_or_else(|| {
                tracing::warn!(flow = %request.id, "flow not found");
                ApiError::FlowNotFound
            })?;

        match flow.status {
            FlowStatus::Success => {}
            // still pending: tell the client to come back, not to give up
            FlowStatus::Pending => return Err(ApiError::Conflict("challenge not yet verified")),
            FlowStatus::Failed => return Err(ApiError::Forbidden("challenge not verified")),
        }
        if flow.expired_at(UnixTime::now()) {
            return Err(ApiError::Forbidden("challenge expired"));
        }

        let claims = Claims::from_flow(issuer, &self.audience, self.validity, &flow);
        let token = self.signer.sign(&claims).await.map_err(|err| {
            tracing::error!(flow = %flow.id, error = %err, "failed to sign token");
            ApiError::internal(err)
        })?;

        self.store.delete(&flow.id).await.map_err(|err| {
            tracing::error!(flow = %flow.id, error = %err, "failed to delete flow");
            ApiError::internal(err)
        })?;

        tracing::info!(flow = %flow.id, node = %flow.node, "token issued");
        Ok(FinalizeResponse {
            identity_token: token,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signing::MemorySigner;
    use crate::storage::MemoryStore;
    use tailfed_types::{Flow, SigningSecret};

    fn flow(status: FlowStatus, expires_at: UnixTime) -> Flow {
        Flow {
            id: "flow-1".to_owned(),
            status,
            expires_at,
            secret: SigningSecret::new(vec![0; 64]),
            node: "n_abc".to_owned(),
            public_key: "nodekey:XXXX".to_owned(),
            dns_name: "host.acme.ts.net".to_owned(),
            machine_name: "host".to_owned(),
            hostname: "host".to_owned(),
            tailnet: "acme.ts.net".to_owned(),
            os: "linux".to_owned(),
            tags: vec![],
            authorized: true,
            external: false,
        }
    }

    fn far_future() -> UnixTime {
        UnixTime::now() + Duration::from_secs(300)
    }

    async fn finalizer_with(flow: Option<Flow>) -> (Finalizer, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        if let Some(flow) = flow {
            store.put(&flow).await.unwrap();
        }
        let signer = Arc::new(MemorySigner::generate().unwrap());
        (
            Finalizer::new(store.clone(), signer, "sts.example.com", Duration::from_secs(3600)),
            store,
        )
    }

    #[tokio::test]
    async fn test_finalize_issues_and_deletes() {
        let (finalizer, store) =
            finalizer_with(Some(flow(FlowStatus::Success, far_future()))).await;

        let response = finalizer
            .finalize(
                "https://tailfed.example.com",
                FinalizeRequest {
                    id: "flow-1".to_owned(),
                },
            )
            .await
            .unwrap();
        assert_eq!(response.identity_token.split('.').count(), 3);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_second_finalize_is_not_found() {
        let (finalizer, _) = finalizer_with(Some(flow(FlowStatus::Success, far_future()))).await;
        let request = FinalizeRequest {
            id: "flow-1".to_owned(),
        };

        finalizer
            .finalize("https://issuer", request.clone())
            .await
            .unwrap();
        assert!(matches!(
            finalizer.finalize("https://issuer", request).await,
            Err(ApiError::FlowNotFound)
        ));
    }

    #[tokio::test]
    async fn test_pending_flow_is_conflict() {
        let (finalizer, store) =
            finalizer_with(Some(flow(FlowStatus::Pending, far_future()))).await;

        let err = finalizer
            .finalize("https://issuer", FinalizeRequest { id: "flow-1".to_owned() })
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Conflict("challenge not yet verified")));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_flow_is_forbidden() {
        let (finalizer, _) = finalizer_with(Some(flow(FlowStatus::Failed, far_future()))).await;
        assert!(matches!(
            finalizer
                .finalize("https://issuer", FinalizeRequest { id: "flow-1".to_owned() })
                .await,
            Err(ApiError::Forbidden("challenge not verified"))
        ));
    }

    #[tokio::test]
    async fn test_expired_flow_is_forbidden() {
        let expired = UnixTime::from_secs(UnixTime::now().as_secs() - 1);
        let (finalizer, store) = finalizer_with(Some(flow(FlowStatus::Success, expired))).await;

        let err = finalizer
            .finalize("https://issuer", FinalizeRequest { id: "flow-1".to_owned() })
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Forbidden("challenge expired")));
        // expired flows are left in place to age out, not deleted here
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_missing_flow_is_not_found() {
        let (finalizer, _) = finalizer_with(None).await;
        assert!(matches!(
            finalizer
                .finalize("https://issuer", FinalizeRequest { id: "missing".to_owned() })
                .await,
            Err(ApiError::FlowNotFound)
        ));
    }
}
