//! Compact JWS envelope assembly.
//!
//! The signer implementations produce raw signature bytes; this module
//! builds the `base64url(header).base64url(payload)` signing input and the
//! final three-part token around them. Keeping the envelope here is what
//! lets a remote key sign without ever materializing locally.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::Serialize;

use super::{SignerError, SigningAlgorithm};

/// Encodes bytes as unpadded base64url.
pub fn b64url(input: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(input)
}

#[derive(Serialize)]
struct Header<'a> {
    alg: SigningAlgorithm,
    kid: &'a str,
    typ: &'static str,
}

/// Builds the signing input `base64url(header).base64url(claims)`.
pub fn signing_input<C: Serialize>(
    alg: SigningAlgorithm,
    kid: &str,
    claims: &C,
) -> Result<String, SignerError> {
    let header = Header {
        alg,
        kid,
        typ: "JWT",
    };
    let header_json = serde_json::to_vec(&header)?;
    let claims_json = serde_json::to_vec(claims)?;
    Ok(format!("{}.{}", b64url(&header_json), b64url(&claims_json)))
}

/// Appends the encoded signature, producing the compact serialization.
pub fn assemble(signing_input: &str, signature: &[u8]) -> String {
    format!("{signing_input}.{}", b64url(signature))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_signing_input_header_fields() {
        let input =
            signing_input(SigningAlgorithm::RS256, "kid-1", &json!({"sub": "s"})).unwrap();
        let header_b64 = input.split('.').next().unwrap();
        let header_json = URL_SAFE_NO_PAD.decode(header_b64).unwrap();
        let header: serde_json::Value = serde_json::from_slice(&header_json).unwrap();

        assert_eq!(header["alg"], "RS256");
        assert_eq!(header["kid"], "kid-1");
        assert_eq!(header["typ"], "JWT");
    }

    #[test]
    fn test_assemble_has_three_parts() {
        let input = signing_input(SigningAlgorithm::ES256, "k", &json!({})).unwrap();
        let token = assemble(&input, &[1, 2, 3]);
        assert_eq!(token.split('.').count(), 3);
        assert!(token.starts_with(&input));
    }

    #[test]
    fn test_b64url_is_unpadded() {
        assert_eq!(b64url(b"hi"), "aGk");
        assert_eq!(b64url(&[0xfb, 0xff]), "-_8");
    }
}
