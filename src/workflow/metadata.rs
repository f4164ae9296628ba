//! Shared store-metadata cache. One snapshot serves every subtask in a
//! turn; entries refresh after the TTL, guarded by a mutex only around the
//! refresh itself.

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::store::{DocumentStore, StoreMetadata};

pub struct MetadataCache {
    store: Arc<dyn DocumentStore>,
    ttl: Duration,
    inner: Mutex<Option<(Instant, StoreMetadata)>>,
}

impl MetadataCache {
    pub fn new(store: Arc<dyn DocumentStore>, ttl: Duration) -> Self {
        Self {
            store,
            ttl,
            inner: Mutex::new(None),
        }
    }

    /// Return the cached snapshot, refreshing from the store when stale.
    pub async fn get(&self) -> Result<StoreMetadata> {
        let mut guard = self.inner.lock().await;
        if let Some((fetched_at, metadata)) = guard.as_ref() {
            if fetched_at.elapsed() < self.ttl {
                return Ok(metadata.clone());
            }
        }

        let metadata = self.store.get_metadata().await?;
        tracing::debug!(
            "Store metadata refreshed: {} sources, {} categories, {} entity types",
            metadata.sources.len(),
            metadata.categories.len(),
            metadata.entity_types.len()
        );
        *guard = Some((Instant::now(), metadata.clone()));
        Ok(metadata)
    }
}
