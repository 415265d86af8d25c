//! OIDC claim assembly and the discovery document.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tailfed_types::{Flow, UnixTime};

use crate::signing::SigningAlgorithm;

/// The payload of an issued identity token.
///
/// Standard claims plus the node facts captured when the flow started. The
/// subject encodes the full identity quadruple so consumers can scope trust
/// policies without parsing custom claims.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// The public base URL of the issuer.
    pub iss: String,
    /// The intended consumer of the token.
    pub aud: String,
    /// `tailnet:dns_name:machine_name:node_id`.
    pub sub: String,
    /// When the token was issued, unix seconds.
    pub iat: u64,
    /// Token not valid before, unix seconds.
    pub nbf: u64,
    /// Token expiry, unix seconds.
    pub exp: u64,

    /// Authentication method references: the node's operating system,
    /// authorization and sharing state, then each ACL tag.
    pub amr: Vec<String>,

    pub tailnet: String,
    pub dns_name: String,
    pub machine_name: String,
    pub host_name: String,
    pub os: String,
    pub tags: Vec<String>,
    pub authorized: bool,
    pub external: bool,
}

impl Claims {
    /// Builds the claim set for a verified flow.
    pub fn from_flow(issuer: &str, audience: &str, validity: Duration, flow: &Flow) -> Self {
        let now = UnixTime::now();
        Self::from_flow_at(issuer, audience, validity, flow, now)
    }

    /// [`Claims::from_flow`] with an explicit issuance time.
    pub fn from_flow_at(
        issuer: &str,
        audience: &str,
        validity: Duration,
        flow: &Flow,
        now: UnixTime,
    ) -> Self {
        let mut amr = Vec::with_capacity(3 + flow.tags.len());
        amr.push(format!("os:{}", flow.os));
        amr.push(format!("authorized:{}", flow.authorized));
        amr.push(format!("external:{}", flow.external));
        amr.extend(flow.tags.iter().cloned());

        Self {
            iss: issuer.to_owned(),
            aud: audience.to_owned(),
            sub: format!(
                "{}:{}:{}:{}",
                flow.tailnet, flow.dns_name, flow.machine_name, flow.node
            ),
            iat: now.as_secs(),
            nbf: now.as_secs(),
            exp: (now + validity).as_secs(),
            amr,
            tailnet: flow.tailnet.clone(),
            dns_name: flow.dns_name.clone(),
            machine_name: flow.machine_name.clone(),
            host_name: flow.hostname.clone(),
            os: flow.os.clone(),
            tags: flow.tags.clone(),
            authorized: flow.authorized,
            external: flow.external,
        }
    }
}

/// Names of every claim issued tokens carry, in discovery-document order.
pub const SUPPORTED_CLAIMS: [&str; 14] = [
    "aud",
    "iat",
    "iss",
    "sub",
    "exp",
    "nbf",
    "tailnet",
    "dns_name",
    "machine_name",
    "host_name",
    "os",
    "tags",
    "authorized",
    "external",
];

/// The OpenID Connect discovery document served at
/// `/.well-known/openid-configuration`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryDocument {
    pub issuer: String,
    pub jwks_uri: String,
    pub claims_supported: Vec<String>,
    pub response_types_supported: Vec<String>,
    pub id_token_signing_alg_values_supported: Vec<SigningAlgorithm>,
    pub subject_types_supported: Vec<String>,
}

impl DiscoveryDocument {
    /// Builds the discovery document for an issuer base URL.
    pub fn new(issuer: &str) -> Self {
        Self {
            issuer: issuer.to_owned(),
            jwks_uri: format!("{issuer}/.well-known/jwks.json"),
            claims_supported: SUPPORTED_CLAIMS.iter().map(|s| s.to_string()).collect(),
            response_types_supported: vec!["id_token".to_owned()],
            id_token_signing_alg_values_supported: SigningAlgorithm::ALL.to_vec(),
            subject_types_supported: vec!["public".to_owned()],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tailfed_types::{FlowStatus, SigningSecret};

    fn sample_flow() -> Flow {
        Flow {
            id: "flow-1".to_owned(),
            status: FlowStatus::Success,
            expires_at: UnixTime::from_secs(2_000_000_000),
            secret: SigningSecret::new(vec![0; 64]),
            node: "n_abc".to_owned(),
            public_key: "nodekey:XXXX".to_owned(),
            dns_name: "host.acme.ts.net".to_owned(),
            machine_name: "host".to_owned(),
            hostname: "host.internal".to_owned(),
            tailnet: "acme.ts.net".to_owned(),
            os: "linux".to_owned(),
            tags: vec!["tag:prod".to_owned()],
            authorized: true,
            external: false,
        }
    }

    #[test]
    fn test_subject_quadruple() {
        let claims = Claims::from_flow_at(
            "https://issuer",
            "aud",
            Duration::from_secs(3600),
            &sample_flow(),
            UnixTime::from_secs(1_700_000_000),
        );
        assert_eq!(claims.sub, "acme.ts.net:host.acme.ts.net:host:n_abc");
    }

    #[test]
    fn test_amr_composition() {
        let claims = Claims::from_flow_at(
            "https://issuer",
            "aud",
            Duration::from_secs(3600),
            &sample_flow(),
            UnixTime::from_secs(1_700_000_000),
        );
        assert_eq!(
            claims.amr,
            vec!["os:linux", "authorized:true", "external:false", "tag:prod"]
        );
    }

    #[test]
    fn test_token_window() {
        let now = UnixTime::from_secs(1_700_000_000);
        let claims = Claims::from_flow_at(
            "https://issuer",
            "aud",
            Duration::from_secs(3600),
            &sample_flow(),
            now,
        );
        assert_eq!(claims.iat, now.as_secs());
        assert_eq!(claims.nbf, now.as_secs());
        assert_eq!(claims.exp, now.as_secs() + 3600);
    }

    #[test]
    fn test_discovery_document() {
        let doc = DiscoveryDocument::new("https://tailfed.example.com");
        assert_eq!(
            doc.jwks_uri,
            "https://tailfed.example.com/.well-known/jwks.json"
        );
        assert_eq!(doc.response_types_supported, vec!["id_token"]);
        assert_eq!(doc.subject_types_supported, vec!["public"]);
        assert_eq!(doc.id_token_signing_alg_values_supported.len(), 6);
        assert_eq!(doc.claims_supported.len(), SUPPORTED_CLAIMS.len());
    }
}
