//! Filesystem-backed metadata store.

use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::PathBuf;

use super::{MetadataError, MetadataStore};

/// A [`MetadataStore`] writing each document to a file in a directory.
///
/// Suitable for serving the `.well-known` documents straight off disk in
/// single-host deployments.
#[derive(Debug)]
pub struct FilesystemMetadata {
    base: PathBuf,
}

impl FilesystemMetadata {
    /// Opens (creating if necessary) the directory documents are stored in.
    pub fn open(base: impl Into<PathBuf>) -> Result<Self, MetadataError> {
        let base = base.into();
        std::fs::create_dir_all(&base)?;
        Ok(Self { base })
    }
}

#[async_trait]
impl MetadataStore for FilesystemMetadata {
    async fn load_raw(&self, key: &str) -> Result<Option<Vec<u8>>, MetadataError> {
        super::validate_key(key)?;
        match tokio::fs::read(self.base.join(key)).await {
            Ok(contents) => Ok(Some(contents)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn save_raw(&self, key: &str, data: Vec<u8>) -> Result<(), MetadataError> {
        super::validate_key(key)?;
        tokio::fs::write(self.base.join(key), data).await?;
        Ok(())
    }
}
