//! Object storage for OIDC metadata documents.
//!
//! The generator writes the discovery document, the JWKS, and the daemon
//! configuration document here; the HTTP surface reads them back. Overwrites
//! are permitted and readers tolerate a stale read during rotation.

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;

mod filesystem;
mod memory;

pub use filesystem::FilesystemMetadata;
pub use memory::MemoryMetadata;

/// Keys of the three documents the generator maintains.
pub const CONFIG_DOCUMENT: &str = "config.json";
pub const JWKS_DOCUMENT: &str = "jwks.json";
pub const DISCOVERY_DOCUMENT: &str = "openid-configuration";

/// Path-keyed JSON document storage.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Reads a document's raw JSON, `None` if it has never been written.
    async fn load_raw(&self, key: &str) -> Result<Option<Vec<u8>>, MetadataError>;

    /// Stores a document's raw JSON, replacing any previous contents.
    async fn save_raw(&self, key: &str, data: Vec<u8>) -> Result<(), MetadataError>;
}

/// Reads and deserializes a document.
///
/// Free function rather than a trait method so [`MetadataStore`] stays
/// object-safe.
pub async fn load<T: DeserializeOwned>(
    store: &dyn MetadataStore,
    key: &str,
) -> Result<Option<T>, MetadataError> {
    match store.load_raw(key).await? {
        Some(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
        None => Ok(None),
    }
}

/// Serializes and stores a document.
pub async fn save<T: Serialize>(
    store: &dyn MetadataStore,
    key: &str,
    data: &T,
) -> Result<(), MetadataError> {
    let encoded = serde_json::to_vec_pretty(data)?;
    store.save_raw(key, encoded).await
}

/// A metadata backend failure.
#[derive(Debug, thiserror::Error)]
pub enum MetadataError {
    /// The document key contains characters the backend cannot store under.
    #[error("invalid document key {0:?}")]
    InvalidKey(String),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub(crate) fn validate_key(key: &str) -> Result<(), MetadataError> {
    let acceptable = !key.is_empty()
        && !key.starts_with('.')
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if acceptable {
        Ok(())
    } else {
        Err(MetadataError::InvalidKey(key.to_owned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_key() {
        assert!(validate_key("jwks.json").is_ok());
        assert!(validate_key("openid-configuration").is_ok());
        assert!(validate_key("").is_err());
        assert!(validate_key(".hidden").is_err());
        assert!(validate_key("a/b").is_err());
    }
}
