//! Filesystem-backed flow store.

use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tailfed_types::Flow;

use super::{FlowStore, StoreError};

/// A [`FlowStore`] persisting each flow as a JSON file in a directory.
///
/// This is the durable backend for single-host deployments. One file per
/// flow keeps writes to distinct flows independent, which is all the flow
/// lifecycle requires: a single flow never has two concurrent writers.
#[derive(Debug)]
pub struct FilesystemStore {
    base: PathBuf,
}

impl FilesystemStore {
    /// Opens (creating if necessary) the directory the store writes into.
    pub fn open(base: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let base = base.into();
        std::fs::create_dir_all(&base)?;
        Ok(Self { base })
    }

    fn path_for(&self, id: &str) -> Result<PathBuf, StoreError> {
        super::validate_id(id)?;
        Ok(self.base.join(format!("{id}.json")))
    }

    /// The directory flows are stored in.
    pub fn base(&self) -> &Path {
        &self.base
    }
}

#[async_trait]
impl FlowStore for FilesystemStore {
    async fn get(&self, id: &str) -> Result<Option<Flow>, StoreError> {
        let path = self.path_for(id)?;
        let contents = match tokio::fs::read(&path).await {
            Ok(contents) => contents,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        Ok(Some(serde_json::from_slice(&contents)?))
    }

    async fn put(&self, flow: &Flow) -> Result<(), StoreError> {
        let path = self.path_for(&flow.id)?;
        let encoded = serde_json::to_vec_pretty(flow)?;
        tokio::fs::write(&path, encoded).await?;
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        let path = self.path_for(id)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}
