//! Signing via a remote asymmetric key.

use async_trait::async_trait;

use super::{Jwk, KeySpec, Signer, SignerError, SigningAlgorithm, jws};
use crate::oidc::Claims;

/// The local-side surface of a remote signing key.
///
/// The private half never leaves the backend's trust boundary; the issuer
/// only ever submits payload bytes and receives signature bytes. The backend
/// also describes its key so [`RemoteSigner`] can pick the algorithm and
/// publish the JWK.
#[async_trait]
pub trait SignaturePayload: Send + Sync {
    /// Stable identifier of the key, used as the token `kid`.
    fn key_id(&self) -> &str;

    /// The key's type, fixed for its lifetime.
    fn key_spec(&self) -> KeySpec;

    /// The public half of the key. ECDSA backends commonly return the
    /// signature DER-encoded; coordinates here are raw big-endian bytes.
    fn public_jwk(&self) -> Result<Jwk, SignerError>;

    /// Signs the payload, returning the backend's native signature encoding:
    /// PKCS#1 v1.5 for RSA keys, ASN.1 DER `{R,S}` for ECDSA keys.
    async fn sign(&self, payload: &[u8]) -> Result<Vec<u8>, SignerError>;
}

/// A [`Signer`] that assembles JOSE envelopes around a remote key.
///
/// For ECDSA keys the backend's DER-encoded `{R,S}` signature is converted
/// to the fixed-length `R‖S` concatenation JWS requires.
pub struct RemoteSigner<H> {
    handle: H,
    algorithm: SigningAlgorithm,
    ecdsa_component_len: Option<usize>,
}

impl<H: SignaturePayload> RemoteSigner<H> {
    /// Wraps a signing backend, fixing the algorithm from its key spec.
    pub fn new(handle: H) -> Self {
        let spec = handle.key_spec();
        Self {
            algorithm: spec.algorithm(),
            ecdsa_component_len: spec.ecdsa_component_len(),
            handle,
        }
    }

    /// The algorithm issued tokens will carry.
    pub fn algorithm(&self) -> SigningAlgorithm {
        self.algorithm
    }
}

#[async_trait]
impl<H: SignaturePayload> Signer for RemoteSigner<H> {
    async fn sign(&self, claims: &Claims) -> Result<String, SignerError> {
        let input = jws::signing_input(self.algorithm, self.handle.key_id(), claims)?;
        let raw = self.handle.sign(input.as_bytes()).await?;
        let signature = match self.ecdsa_component_len {
            Some(component_len) => ecdsa_der_to_fixed(&raw, component_len)?,
            None => raw,
        };
        Ok(jws::assemble(&input, &signature))
    }

    fn public_key(&self) -> Result<Jwk, SignerError> {
        self.handle.public_jwk()
    }
}

/// Converts an ASN.1 DER-encoded ECDSA signature to the fixed-length
/// `R‖S` form required by JWS.
///
/// Each integer is left-padded with zeros to `component_len` bytes (32, 48,
/// or 66 for P-256/384/521).
pub fn ecdsa_der_to_fixed(der: &[u8], component_len: usize) -> Result<Vec<u8>, SignerError> {
    let malformed = |what: &str| SignerError::MalformedSignature(what.to_owned());

    let mut reader = DerReader(der);
    let sequence = reader.element(0x30).map_err(|()| malformed("not a DER sequence"))?;
    if !reader.0.is_empty() {
        return Err(malformed("trailing bytes after signature"));
    }

    let mut inner = DerReader(sequence);
    let r = inner.element(0x02).map_err(|()| malformed("missing R integer"))?;
    let s = inner.element(0x02).map_err(|()| malformed("missing S integer"))?;
    if !inner.0.is_empty() {
        return Err(malformed("trailing bytes inside signature"));
    }

    let mut fixed = vec![0u8; 2 * component_len];
    pad_into(&mut fixed[..component_len], r).map_err(|()| malformed("R too large for curve"))?;
    pad_into(&mut fixed[component_len..], s).map_err(|()| malformed("S too large for curve"))?;
    Ok(fixed)
}

/// Minimal DER walker: just enough to take tagged elements off the front.
struct DerReader<'a>(&'a [u8]);

impl<'a> DerReader<'a> {
    fn element(&mut self, tag: u8) -> Result<&'a [u8], ()> {
        let (&found, rest) = self.0.split_first().ok_or(())?;
        if found != tag {
            return Err(());
        }

        let (&first, rest) = rest.split_first().ok_or(())?;
        let (len, rest) = if first < 0x80 {
            (first as usize, rest)
        } else {
            // long-form length; signatures never need more than two bytes
            let count = (first & 0x7f) as usize;
            if count == 0 || count > 2 || rest.len() < count {
                return Err(());
            }
            let (len_bytes, rest) = rest.split_at(count);
            let len = len_bytes.iter().fold(0usize, |acc, &b| (acc << 8) | b as usize);
            (len, rest)
        };

        if rest.len() < len {
            return Err(());
        }
        let (contents, rest) = rest.split_at(len);
        self.0 = rest;
        Ok(contents)
    }
}

/// Writes a big-endian DER integer into `out`, stripping the sign byte and
/// left-padding with zeros.
fn pad_into(out: &mut [u8], integer: &[u8]) -> Result<(), ()> {
    let trimmed = match integer {
        [0, rest @ ..] if !rest.is_empty() => rest,
        other => other,
    };
    if trimmed.len() > out.len() {
        return Err(());
    }
    let offset = out.len() - trimmed.len();
    out[offset..].copy_from_slice(trimmed);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Encodes `{R, S}` as a DER sequence the way an ECDSA backend would.
    fn der_signature(r: &[u8], s: &[u8]) -> Vec<u8> {
        fn integer(value: &[u8]) -> Vec<u8> {
            let mut body = value.to_vec();
            if body.first().is_some_and(|&b| b & 0x80 != 0) {
                body.insert(0, 0);
            }
            let mut out = vec![0x02, body.len() as u8];
            out.extend(body);
            out
        }

        let mut body = integer(r);
        body.extend(integer(s));
        let mut out = vec![0x30];
        if body.len() < 0x80 {
            out.push(body.len() as u8);
        } else {
            out.push(0x81);
            out.push(body.len() as u8);
        }
        out.extend(body);
        out
    }

    #[test]
    fn test_conversion_pads_short_components() {
        let der = der_signature(&[0x01, 0x02], &[0x03]);
        let fixed = ecdsa_der_to_fixed(&der, 32).unwrap();
        assert_eq!(fixed.len(), 64);
        assert_eq!(&fixed[30..32], &[0x01, 0x02]);
        assert_eq!(fixed[63], 0x03);
        assert!(fixed[..30].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_conversion_strips_sign_byte() {
        let r = [0xff; 32];
        let s = [0xee; 32];
        let der = der_signature(&r, &s);
        let fixed = ecdsa_der_to_fixed(&der, 32).unwrap();
        assert_eq!(&fixed[..32], &r);
        assert_eq!(&fixed[32..], &s);
    }

    #[test]
    fn test_conversion_p521_long_form() {
        let r = [0xaa; 66];
        let s = [0xbb; 66];
        let der = der_signature(&r, &s);
        let fixed = ecdsa_der_to_fixed(&der, 66).unwrap();
        assert_eq!(fixed.len(), 132);
        assert_eq!(&fixed[..66], &r);
        assert_eq!(&fixed[66..], &s);
    }

    #[test]
    fn test_conversion_rejects_component_overflow() {
        let der = der_signature(&[0x01; 48], &[0x02; 48]);
        assert!(matches!(
            ecdsa_der_to_fixed(&der, 32),
            Err(SignerError::MalformedSignature(_))
        ));
    }

    #[test]
    fn test_conversion_rejects_trailing_bytes() {
        let mut der = der_signature(&[0x01], &[0x02]);
        der.push(0x00);
        assert!(ecdsa_der_to_fixed(&der, 32).is_err());
    }

    #[test]
    fn test_conversion_rejects_non_sequence() {
        assert!(ecdsa_der_to_fixed(&[0x02, 0x01, 0x01], 32).is_err());
    }

    struct FakeEcdsaKey;

    #[async_trait]
    impl SignaturePayload for FakeEcdsaKey {
        fn key_id(&self) -> &str {
            "remote-key"
        }

        fn key_spec(&self) -> KeySpec {
            KeySpec::EccP256
        }

        fn public_jwk(&self) -> Result<Jwk, SignerError> {
            Ok(Jwk::ec(
                "remote-key".to_owned(),
                SigningAlgorithm::ES256,
                "P-256",
                &[1; 32],
                &[2; 32],
            ))
        }

        async fn sign(&self, _payload: &[u8]) -> Result<Vec<u8>, SignerError> {
            Ok(der_signature(&[0x11; 32], &[0x22; 32]))
        }
    }

    #[tokio::test]
    async fn test_remote_signer_emits_fixed_length_signature() {
        use base64::Engine;
        use base64::engine::general_purpose::URL_SAFE_NO_PAD;
        use std::time::Duration;
        use tailfed_types::{Flow, FlowStatus, SigningSecret, UnixTime};

        let flow = Flow {
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
            tags: vec![],
            authorized: true,
            external: false,
        };
        let claims = Claims::from_flow(
            "https://issuer",
            "audience",
            Duration::from_secs(60),
            &flow,
        );

        let signer = RemoteSigner::new(FakeEcdsaKey);
        assert_eq!(signer.algorithm(), SigningAlgorithm::ES256);

        let token = signer.sign(&claims).await.unwrap();
        let signature_b64 = token.rsplit('.').next().unwrap();
        let signature = URL_SAFE_NO_PAD.decode(signature_b64).unwrap();
        assert_eq!(signature.len(), 64);
        assert_eq!(&signature[..32], &[0x11; 32]);
        assert_eq!(&signature[32..], &[0x22; 32]);
    }
}
