//! Persistence for in-flight flows.
//!
//! The flow store is the only state shared between the three stage handlers.
//! Writers do not overlap by design — the initializer creates, the verifier
//! (or launcher) updates status, the finalizer deletes — so backends need no
//! locking, but they must provide read-your-writes.

use async_trait::async_trait;
use tailfed_types::Flow;

mod filesystem;
mod memory;

pub use filesystem::FilesystemStore;
pub use memory::MemoryStore;

/// Keyed persistence for [`Flow`] records.
#[async_trait]
pub trait FlowStore: Send + Sync {
    /// Retrieves a flow by its id, `None` if it does not exist.
    async fn get(&self, id: &str) -> Result<Option<Flow>, StoreError>;

    /// Writes a flow, overwriting any previous record with the same id.
    async fn put(&self, flow: &Flow) -> Result<(), StoreError>;

    /// Permanently deletes a flow. Deleting a missing flow is not an error.
    async fn delete(&self, id: &str) -> Result<(), StoreError>;
}

/// A storage backend failure.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The flow id contains characters the backend cannot key on.
    #[error("invalid flow id {0:?}")]
    InvalidId(String),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Rejects ids that could escape a keyspace (path separators, empty, dots).
pub(crate) fn validate_id(id: &str) -> Result<(), StoreError> {
    let acceptable = !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if acceptable {
        Ok(())
    } else {
        Err(StoreError::InvalidId(id.to_owned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_id() {
        assert!(validate_id("01890f9d-6f9a-7cc3-b785-1f7a3f1b2c3d").is_ok());
        assert!(validate_id("").is_err());
        assert!(validate_id("../escape").is_err());
        assert!(validate_id("a/b").is_err());
        assert!(validate_id("a.json").is_err());
    }
}
