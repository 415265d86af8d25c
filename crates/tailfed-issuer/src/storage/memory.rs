//! In-memory flow store for development and tests.

use async_trait::async_trait;
use dashmap::DashMap;
use tailfed_types::Flow;

use super::{FlowStore, StoreError};

/// A [`FlowStore`] holding flows in process memory.
///
/// Flows do not survive a restart; production deployments use a durable
/// backend such as [`FilesystemStore`](super::FilesystemStore).
#[derive(Debug, Default)]
pub struct MemoryStore {
    flows: DashMap<String, Flow>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of flows currently held. Exposed for tests and diagnostics.
    pub fn len(&self) -> usize {
        self.flows.len()
    }

    /// Whether the store holds no flows.
    pub fn is_empty(&self) -> bool {
        self.flows.is_empty()
    }

    /// Ids of all stored flows. Exposed for tests and diagnostics.
    pub fn ids(&self) -> Vec<String> {
        self.flows.iter().map(|entry| entry.key().clone()).collect()
    }
}

#[async_trait]
impl FlowStore for MemoryStore {
    async fn get(&self, id: &str) -> Result<Option<Flow>, StoreError> {
        Ok(self.flows.get(id).map(|entry| entry.value().clone()))
    }

    async fn put(&self, flow: &Flow) -> Result<(), StoreError> {
        super::validate_id(&flow.id)?;
        self.flows.insert(flow.id.clone(), flow.clone());
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        self.flows.remove(id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tailfed_types::{FlowStatus, SigningSecret, UnixTime};

    fn flow(id: &str) -> Flow {
        Flow {
            id: id.to_owned(),
            status: FlowStatus::Pending,
            expires_at: UnixTime::from_secs(1_700_000_000),
            secret: SigningSecret::new(vec![1; 64]),
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
        }
    }

    #[tokio::test]
    async fn test_read_your_writes() {
        let store = MemoryStore::new();
        let record = flow("flow-1");
        store.put(&record).await.unwrap();
        assert_eq!(store.get("flow-1").await.unwrap(), Some(record));
    }

    #[tokio::test]
    async fn test_get_missing() {
        let store = MemoryStore::new();
        assert_eq!(store.get("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_put_overwrites() {
        let store = MemoryStore::new();
        let mut record = flow("flow-1");
        store.put(&record).await.unwrap();

        record.status = FlowStatus::Success;
        store.put(&record).await.unwrap();
        assert_eq!(
            store.get("flow-1").await.unwrap().unwrap().status,
            FlowStatus::Success
        );
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let store = MemoryStore::new();
        store.put(&flow("flow-1")).await.unwrap();
        store.delete("flow-1").await.unwrap();
        store.delete("flow-1").await.unwrap();
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_put_rejects_bad_id() {
        let store = MemoryStore::new();
        let result = store.put(&flow("../oops")).await;
        assert!(matches!(result, Err(StoreError::InvalidId(_))));
    }
}
