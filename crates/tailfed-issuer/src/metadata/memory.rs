//! In-memory metadata store for development and tests.

use async_trait::async_trait;
use dashmap::DashMap;

use super::{MetadataError, MetadataStore};

/// A [`MetadataStore`] holding documents in process memory.
#[derive(Debug, Default)]
pub struct MemoryMetadata {
    documents: DashMap<String, Vec<u8>>,
}

impl MemoryMetadata {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MetadataStore for MemoryMetadata {
    async fn load_raw(&self, key: &str) -> Result<Option<Vec<u8>>, MetadataError> {
        Ok(self.documents.get(key).map(|entry| entry.value().clone()))
    }

    async fn save_raw(&self, key: &str, data: Vec<u8>) -> Result<(), MetadataError> {
        super::validate_key(key)?;
        self.documents.insert(key.to_owned(), data);
        Ok(())
    }
}
