//! Token signing.
//!
//! A [`Signer`] turns a claim set into a compact JWS and publishes its
//! public half as a JWK. Two implementations are provided:
//!
//! - [`MemorySigner`]: an ephemeral RSA-2048 key generated at startup, for
//!   development.
//! - [`RemoteSigner`]: wraps a [`SignaturePayload`] capability whose private
//!   key never leaves its trust boundary; the JOSE envelope is assembled
//!   locally around the raw signature.
//!
//! The key type fixes the algorithm: RSA-2048→RS256, RSA-3072→RS384,
//! RSA-4096→RS512, P-256→ES256, P-384→ES384, P-521→ES512. Anything else is
//! a startup failure.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::oidc::Claims;

pub mod jws;
mod memory;
mod remote;

pub use memory::MemorySigner;
pub use remote::{RemoteSigner, SignaturePayload, ecdsa_der_to_fixed};

/// Asymmetric signing capability producing compact JWS tokens.
#[async_trait]
pub trait Signer: Send + Sync {
    /// Signs a claim set, returning the compact JWS serialization.
    async fn sign(&self, claims: &Claims) -> Result<String, SignerError>;

    /// The public key as a JWK with `use=sig`, embedded `kid`, and
    /// algorithm. Stable for the lifetime of the key.
    fn public_key(&self) -> Result<Jwk, SignerError>;
}

/// A signing failure.
#[derive(Debug, thiserror::Error)]
pub enum SignerError {
    /// The configured key type cannot sign JWTs. Refuses startup.
    #[error("unsupported key spec {0:?}")]
    UnsupportedKeySpec(String),
    #[error("failed to generate signing key: {0}")]
    KeyGeneration(String),
    #[error("failed to produce signature: {0}")]
    Signature(String),
    /// The remote signature was not in the expected encoding.
    #[error("malformed signature from signing backend: {0}")]
    MalformedSignature(String),
    #[error("failed to encode claims: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// JWS signing algorithms supported by the issuer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SigningAlgorithm {
    RS256,
    RS384,
    RS512,
    ES256,
    ES384,
    ES512,
}

impl SigningAlgorithm {
    /// Every algorithm the issuer may advertise, in discovery-document order.
    pub const ALL: [SigningAlgorithm; 6] = [
        SigningAlgorithm::RS256,
        SigningAlgorithm::RS384,
        SigningAlgorithm::RS512,
        SigningAlgorithm::ES256,
        SigningAlgorithm::ES384,
        SigningAlgorithm::ES512,
    ];

    /// The JOSE name of the algorithm.
    pub fn as_str(&self) -> &'static str {
        match self {
            SigningAlgorithm::RS256 => "RS256",
            SigningAlgorithm::RS384 => "RS384",
            SigningAlgorithm::RS512 => "RS512",
            SigningAlgorithm::ES256 => "ES256",
            SigningAlgorithm::ES384 => "ES384",
            SigningAlgorithm::ES512 => "ES512",
        }
    }
}

impl fmt::Display for SigningAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The key types a signing backend may hold.
///
/// Parsed from the backend's key description; anything outside this set is
/// rejected at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeySpec {
    Rsa2048,
    Rsa3072,
    Rsa4096,
    EccP256,
    EccP384,
    EccP521,
}

impl KeySpec {
    /// The fixed algorithm for this key type.
    pub fn algorithm(&self) -> SigningAlgorithm {
        match self {
            KeySpec::Rsa2048 => SigningAlgorithm::RS256,
            KeySpec::Rsa3072 => SigningAlgorithm::RS384,
            KeySpec::Rsa4096 => SigningAlgorithm::RS512,
            KeySpec::EccP256 => SigningAlgorithm::ES256,
            KeySpec::EccP384 => SigningAlgorithm::ES384,
            KeySpec::EccP521 => SigningAlgorithm::ES512,
        }
    }

    /// For ECDSA keys, the byte length of each signature component in the
    /// fixed-length `R‖S` form JWS requires.
    pub fn ecdsa_component_len(&self) -> Option<usize> {
        match self {
            KeySpec::EccP256 => Some(32),
            KeySpec::EccP384 => Some(48),
            KeySpec::EccP521 => Some(66),
            _ => None,
        }
    }
}

impl FromStr for KeySpec {
    type Err = SignerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "RSA_2048" => Ok(KeySpec::Rsa2048),
            "RSA_3072" => Ok(KeySpec::Rsa3072),
            "RSA_4096" => Ok(KeySpec::Rsa4096),
            "ECC_NIST_P256" => Ok(KeySpec::EccP256),
            "ECC_NIST_P384" => Ok(KeySpec::EccP384),
            "ECC_NIST_P521" => Ok(KeySpec::EccP521),
            other => Err(SignerError::UnsupportedKeySpec(other.to_owned())),
        }
    }
}

/// A published signing key in JWK form.
///
/// Only the fields the issuer publishes are modeled; the JWKS must be able
/// to advertise all six algorithms, including ES512.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jwk {
    /// Key type: `RSA` or `EC`.
    pub kty: String,
    /// Intended use, always `sig`.
    #[serde(rename = "use")]
    pub key_use: String,
    /// Key identifier matching the `kid` header of issued tokens.
    pub kid: String,
    /// The fixed signing algorithm of the key.
    pub alg: SigningAlgorithm,
    /// RSA modulus, base64url.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n: Option<String>,
    /// RSA public exponent, base64url.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub e: Option<String>,
    /// EC curve name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crv: Option<String>,
    /// EC x coordinate, base64url.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<String>,
    /// EC y coordinate, base64url.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<String>,
}

impl Jwk {
    /// Builds an RSA signing JWK from big-endian modulus and exponent bytes.
    pub fn rsa(kid: String, alg: SigningAlgorithm, n: &[u8], e: &[u8]) -> Self {
        Self {
            kty: "RSA".to_owned(),
            key_use: "sig".to_owned(),
            kid,
            alg,
            n: Some(jws::b64url(n)),
            e: Some(jws::b64url(e)),
            crv: None,
            x: None,
            y: None,
        }
    }

    /// Builds an EC signing JWK from big-endian coordinate bytes.
    pub fn ec(kid: String, alg: SigningAlgorithm, curve: &str, x: &[u8], y: &[u8]) -> Self {
        Self {
            kty: "EC".to_owned(),
            key_use: "sig".to_owned(),
            kid,
            alg,
            n: None,
            e: None,
            crv: Some(curve.to_owned()),
            x: Some(jws::b64url(x)),
            y: Some(jws::b64url(y)),
        }
    }
}

/// A JWK Set document as served at `/.well-known/jwks.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JwkSet {
    pub keys: Vec<Jwk>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_spec_algorithm_mapping() {
        assert_eq!(KeySpec::Rsa2048.algorithm(), SigningAlgorithm::RS256);
        assert_eq!(KeySpec::Rsa3072.algorithm(), SigningAlgorithm::RS384);
        assert_eq!(KeySpec::Rsa4096.algorithm(), SigningAlgorithm::RS512);
        assert_eq!(KeySpec::EccP256.algorithm(), SigningAlgorithm::ES256);
        assert_eq!(KeySpec::EccP384.algorithm(), SigningAlgorithm::ES384);
        assert_eq!(KeySpec::EccP521.algorithm(), SigningAlgorithm::ES512);
    }

    #[test]
    fn test_ecdsa_component_lengths() {
        assert_eq!(KeySpec::EccP256.ecdsa_component_len(), Some(32));
        assert_eq!(KeySpec::EccP384.ecdsa_component_len(), Some(48));
        assert_eq!(KeySpec::EccP521.ecdsa_component_len(), Some(66));
        assert_eq!(KeySpec::Rsa2048.ecdsa_component_len(), None);
    }

    #[test]
    fn test_key_spec_parse_rejects_unknown() {
        assert!(matches!(
            "SYMMETRIC_DEFAULT".parse::<KeySpec>(),
            Err(SignerError::UnsupportedKeySpec(_))
        ));
    }

    #[test]
    fn test_jwk_serialization_shape() {
        let jwk = Jwk::rsa("kid-1".to_owned(), SigningAlgorithm::RS256, &[1, 0, 1], &[1, 0, 1]);
        let json = serde_json::to_value(&jwk).unwrap();
        assert_eq!(json["kty"], "RSA");
        assert_eq!(json["use"], "sig");
        assert_eq!(json["kid"], "kid-1");
        assert_eq!(json["alg"], "RS256");
        assert!(json.get("crv").is_none());
    }
}
