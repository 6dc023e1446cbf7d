//! Overlay persisted as JSON records in a blob store

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use super::MetadataOverlay;
use crate::blobstore::BlobStore;
use crate::models::{BackendNode, MetadataRecord, NodeOptions, NodeView};
use crate::{Error, Result};

/// Stores one [`MetadataRecord`] per node id in a [`BlobStore`], with an
/// optional read-through cache of decoded records.
pub struct PersistedOverlay {
    store: Arc<dyn BlobStore>,
    cache: Option<RwLock<HashMap<String, MetadataRecord>>>,
}

impl PersistedOverlay {
    pub fn new(store: Arc<dyn BlobStore>) -> Self {
        Self { store, cache: None }
    }

    pub fn with_cache(store: Arc<dyn BlobStore>) -> Self {
        Self {
            store,
            cache: Some(RwLock::new(HashMap::new())),
        }
    }

    fn cached(&self, id: &str) -> Option<MetadataRecord> {
        self.cache.as_ref()?.read().get(id).cloned()
    }

    fn remember(&self, id: &str, record: &MetadataRecord) {
        if let Some(cache) = &self.cache {
            cache.write().insert(id.to_string(), record.clone());
        }
    }

    fn read_record(&self, id: &str) -> Result<Option<MetadataRecord>> {
        if let Some(record) = self.cached(id) {
            return Ok(Some(record));
        }
        let Some(bytes) = self.store.get(id)? else {
            return Ok(None);
        };
        let record: MetadataRecord = serde_json::from_slice(&bytes)
            .map_err(|e| Error::Metadata(format!("corrupt record for {}: {}", id, e)))?;
        self.remember(id, &record);
        Ok(Some(record))
    }
}

impl MetadataOverlay for PersistedOverlay {
    fn store(&self, node: &BackendNode, options: &NodeOptions, group: &str) -> Result<NodeView> {
        let record = MetadataRecord::new(group, options);
        let bytes = serde_json::to_vec(&record)
            .map_err(|e| Error::Metadata(format!("cannot encode record for {}: {}", node.id, e)))?;
        self.store.put(&node.id, bytes)?;
        self.remember(&node.id, &record);
        tracing::debug!(node = %node.id, group = %group, "Metadata stored");
        Ok(record.to_view(node))
    }

    fn load(&self, node: &BackendNode) -> Result<Option<NodeView>> {
        Ok(self.read_record(&node.id)?.map(|record| record.to_view(node)))
    }

    fn delete_mapping(&self, id: &str) -> Result<()> {
        if let Some(cache) = &self.cache {
            cache.write().remove(id);
        }
        self.store.remove(id)?;
        Ok(())
    }

    fn delete_all_mappings(&self) -> Result<()> {
        if let Some(cache) = &self.cache {
            cache.write().clear();
        }
        self.store.clear()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blobstore::{FsBlobStore, MemoryBlobStore};
    use crate::models::LoginCredentials;
    use tempfile::TempDir;

    fn options() -> NodeOptions {
        NodeOptions::new()
            .tag("web")
            .metadata("team", "infra")
            .credentials(LoginCredentials::new("root").private_key("KEY"))
    }

    #[test]
    fn test_store_then_load() {
        let overlay = PersistedOverlay::new(Arc::new(MemoryBlobStore::new()));
        let node = BackendNode::new("n-1", "pool");

        overlay.store(&node, &options(), "g1").unwrap();
        let view = overlay.load(&node).unwrap().unwrap();

        assert_eq!(view.group, "g1");
        assert_eq!(view.tags, options().tags);
        assert_eq!(view.credentials, options().credentials);
        assert!(overlay.load(&BackendNode::new("n-2", "pool")).unwrap().is_none());
    }

    #[test]
    fn test_load_merges_live_backend_fields() {
        let overlay = PersistedOverlay::new(Arc::new(MemoryBlobStore::new()));
        overlay
            .store(&BackendNode::new("n-1", "pool"), &options(), "g1")
            .unwrap();

        let moved = BackendNode::new("n-1", "pool").with_public_address("1.2.3.4");
        let view = overlay.load(&moved).unwrap().unwrap();
        assert_eq!(view.public_addresses, vec!["1.2.3.4".to_string()]);
    }

    #[test]
    fn test_cache_invalidated_on_delete() {
        let store = MemoryBlobStore::new();
        let overlay = PersistedOverlay::with_cache(Arc::new(store.clone()));
        let node = BackendNode::new("n-1", "pool");
        overlay.store(&node, &options(), "g1").unwrap();
        assert!(overlay.load(&node).unwrap().is_some());

        overlay.delete_mapping("n-1").unwrap();
        assert!(overlay.load(&node).unwrap().is_none());
        assert!(store.is_empty());

        overlay.store(&node, &options(), "g2").unwrap();
        overlay.delete_all_mappings().unwrap();
        assert!(overlay.load(&node).unwrap().is_none());
    }

    #[test]
    fn test_cache_serves_without_store() {
        let store = MemoryBlobStore::new();
        let overlay = PersistedOverlay::with_cache(Arc::new(store.clone()));
        let node = BackendNode::new("n-1", "pool");
        overlay.store(&node, &options(), "g1").unwrap();

        // Removed behind the overlay's back; the cached record still answers
        store.remove("n-1").unwrap();
        assert_eq!(overlay.load(&node).unwrap().unwrap().group, "g1");
    }

    #[test]
    fn test_corrupt_record_is_metadata_error() {
        let store = MemoryBlobStore::new();
        store.put("n-1", b"not json".to_vec()).unwrap();
        let overlay = PersistedOverlay::new(Arc::new(store));

        let err = overlay.load(&BackendNode::new("n-1", "pool")).unwrap_err();
        assert!(matches!(err, Error::Metadata(_)));
    }

    #[test]
    fn test_records_survive_reopen() {
        let temp = TempDir::new().unwrap();
        let node = BackendNode::new("zrh/n-1", "pool");
        {
            let store = FsBlobStore::open(temp.path()).unwrap();
            PersistedOverlay::new(Arc::new(store))
                .store(&node, &options(), "g1")
                .unwrap();
        }

        let overlay = PersistedOverlay::with_cache(Arc::new(FsBlobStore::open(temp.path()).unwrap()));
        let views = overlay
            .load_all(&[node.clone(), BackendNode::new("other", "pool")])
            .unwrap();
        assert_eq!(views.len(), 1);
        assert_eq!(views[0].user_metadata.get("team").map(String::as_str), Some("infra"));
    }
}
