//! The OIDC metadata generator.

use std::sync::Arc;
use std::time::Duration;
use tailfed_types::proto::{ConfigResponse, GenerateRequest};
use tailfed_types::{ApiResponse, GoDuration};

use crate::metadata::{
    CONFIG_DOCUMENT, DISCOVERY_DOCUMENT, JWKS_DOCUMENT, MetadataError, MetadataStore, save,
};
use crate::oidc::DiscoveryDocument;
use crate::signing::{JwkSet, Signer, SignerError};

/// Writes the discovery document, the JWKS, and the daemon configuration
/// document to the metadata store.
///
/// Runs at service startup in development and on a schedule in production.
/// Overwrites are fine; readers tolerate a stale read during rotation.
pub struct Generator {
    meta: Arc<dyn MetadataStore>,
    signer: Arc<dyn Signer>,
    validity: Duration,
}

impl Generator {
    /// Creates a generator for tokens valid for `validity`.
    pub fn new(meta: Arc<dyn MetadataStore>, signer: Arc<dyn Signer>, validity: Duration) -> Self {
        Self {
            meta,
            signer,
            validity,
        }
    }

    /// The refresh frequency advertised to clients: ¾ of token validity.
    pub fn frequency(&self) -> Duration {
        self.validity * 3 / 4
    }

    /// Writes all three documents for the given issuer URL.
    pub async fn generate(&self, request: &GenerateRequest) -> Result<(), GeneratorError> {
        let config = ApiResponse::success(ConfigResponse {
            frequency: GoDuration(self.frequency()),
        });
        save(&*self.meta, CONFIG_DOCUMENT, &config).await?;

        let jwks = JwkSet {
            keys: vec![self.signer.public_key()?],
        };
        save(&*self.meta, JWKS_DOCUMENT, &jwks).await?;

        let discovery = DiscoveryDocument::new(&request.issuer);
        save(&*self.meta, DISCOVERY_DOCUMENT, &discovery).await?;

        tracing::info!(issuer = %request.issuer, "metadata documents written");
        Ok(())
    }
}

/// A metadata generation failure.
#[derive(Debug, thiserror::Error)]
pub enum GeneratorError {
    #[error("metadata store failure: {0}")]
    Metadata(#[from] MetadataError),
    #[error("signer failure: {0}")]
    Signer(#[from] SignerError),
}
