//! Ephemeral in-memory signer for development.

use async_trait::async_trait;
use rsa::signature::{SignatureEncoding, Signer as _};
use rsa::traits::PublicKeyParts;
use rsa::{RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;
use uuid::Uuid;

use super::{Jwk, Signer, SignerError, SigningAlgorithm, jws};
use crate::oidc::Claims;

/// A [`Signer`] backed by an RSA-2048 key generated at startup.
///
/// The key lives only in process memory: every restart produces a fresh key
/// and a fresh `kid`, so this backend is only suitable for development where
/// the metadata generator republishes the JWKS on boot.
pub struct MemorySigner {
    kid: String,
    signing_key: rsa::pkcs1v15::SigningKey<Sha256>,
    public_key: RsaPublicKey,
}

impl MemorySigner {
    /// Generates a fresh RSA-2048 key pair.
    pub fn generate() -> Result<Self, SignerError> {
        let private = RsaPrivateKey::new(&mut rand_core::OsRng, 2048)
            .map_err(|err| SignerError::KeyGeneration(err.to_string()))?;
        let public_key = RsaPublicKey::from(&private);

        Ok(Self {
            kid: Uuid::now_v7().to_string(),
            signing_key: rsa::pkcs1v15::SigningKey::new(private),
            public_key,
        })
    }

    /// The key id embedded in token headers and the published JWK.
    pub fn kid(&self) -> &str {
        &self.kid
    }
}

#[async_trait]
impl Signer for MemorySigner {
    async fn sign(&self, claims: &Claims) -> Result<String, SignerError> {
        let input = jws::signing_input(SigningAlgorithm::RS256, &self.kid, claims)?;
        let signature = self
            .signing_key
            .try_sign(input.as_bytes())
            .map_err(|err| SignerError::Signature(err.to_string()))?;
        Ok(jws::assemble(&input, &signature.to_vec()))
    }

    fn public_key(&self) -> Result<Jwk, SignerError> {
        Ok(Jwk::rsa(
            self.kid.clone(),
            SigningAlgorithm::RS256,
            &self.public_key.n().to_bytes_be(),
            &self.public_key.e().to_bytes_be(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{Algorithm, DecodingKey, Validation};
    use std::time::Duration;
    use tailfed_types::{Flow, FlowStatus, SigningSecret, UnixTime};

    fn sample_flow() -> Flow {
        Flow {
            id: "flow-1".to_owned(),
            status: FlowStatus::Success,
            expires_at: UnixTime::from_secs(u64::MAX),
            secret: SigningSecret::new(vec![0; 64]),
            node: "n_abc".to_owned(),
            public_key: "nodekey:XXXX".to_owned(),
            dns_name: "host.acme.ts.net".to_owned(),
            machine_name: "host".to_owned(),
            hostname: "host".to_owned(),
            tailnet: "acme.ts.net".to_owned(),
            os: "linux".to_owned(),
            tags: vec!["tag:prod".to_owned()],
            authorized: true,
            external: false,
        }
    }

    #[tokio::test]
    async fn test_token_verifies_against_published_jwk() {
        let signer = MemorySigner::generate().unwrap();
        let claims = Claims::from_flow(
            "https://tailfed.example.com",
            "sts.example.com",
            Duration::from_secs(3600),
            &sample_flow(),
        );

        let token = signer.sign(&claims).await.unwrap();
        let jwk = signer.public_key().unwrap();

        let decoding_key =
            DecodingKey::from_rsa_components(jwk.n.as_deref().unwrap(), jwk.e.as_deref().unwrap())
                .unwrap();
        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_audience(&["sts.example.com"]);
        validation.set_issuer(&["https://tailfed.example.com"]);

        let decoded = jsonwebtoken::decode::<Claims>(&token, &decoding_key, &validation).unwrap();
        assert_eq!(
            decoded.claims.sub,
            "acme.ts.net:host.acme.ts.net:host:n_abc"
        );
        assert_eq!(decoded.header.kid.as_deref(), Some(signer.kid()));
    }

    #[tokio::test]
    async fn test_kid_is_stable() {
        let signer = MemorySigner::generate().unwrap();
        let first = signer.public_key().unwrap();
        let second = signer.public_key().unwrap();
        assert_eq!(first.kid, second.kid);
        assert_eq!(first.alg, SigningAlgorithm::RS256);
        assert_eq!(first.key_use, "sig");
    }
}
