//! In-memory product cache store.
//!
//! Backs tests and single-process deployments. Data lives in a
//! `RwLock<HashMap>`; no lock is held across an await point.

use async_trait::async_trait;
use favcache_core::{CachedProduct, FavcacheResult, ProductId, StorageError};
use std::collections::HashMap;
use std::sync::RwLock;

use super::traits::{next_fetched_at, ProductCacheStore, StoreStats, StoreStatsSnapshot};

#[derive(Debug, Default)]
pub struct InMemoryProductCache {
    entries: RwLock<HashMap<ProductId, CachedProduct>>,
    stats: StoreStats,
}

impl InMemoryProductCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-populated with records, bypassing the counters.
    pub fn with_products(products: impl IntoIterator<Item = CachedProduct>) -> Self {
        let entries = products.into_iter().map(|p| (p.id, p)).collect();
        Self {
            entries: RwLock::new(entries),
            stats: StoreStats::default(),
        }
    }

    /// Number of cached records.
    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> StoreStatsSnapshot {
        self.stats.snapshot()
    }

    /// Read a record without counting it as a store operation.
    pub fn peek(&self, id: ProductId) -> Option<CachedProduct> {
        self.entries.read().ok().and_then(|e| e.get(&id).cloned())
    }
}

#[async_trait]
impl ProductCacheStore for InMemoryProductCache {
    async fn get_one(&self, id: ProductId) -> FavcacheResult<Option<CachedProduct>> {
        StoreStats::bump(&self.stats.point_reads);
        let entries = self.entries.read().map_err(|_| StorageError::LockPoisoned)?;
        Ok(entries.get(&id).cloned())
    }

    async fn get_many(&self, ids: &[ProductId]) -> FavcacheResult<Vec<CachedProduct>> {
        StoreStats::bump(&self.stats.batch_reads);
        let entries = self.entries.read().map_err(|_| StorageError::LockPoisoned)?;
        let mut seen = std::collections::HashSet::with_capacity(ids.len());
        Ok(ids
            .iter()
            .filter(|id| seen.insert(**id))
            .filter_map(|id| entries.get(id).cloned())
            .collect())
    }

    async fn insert(&self, product: &CachedProduct) -> FavcacheResult<()> {
        let mut entries = self.entries.write().map_err(|_| StorageError::LockPoisoned)?;
        if entries.contains_key(&product.id) {
            return Err(StorageError::Conflict { id: product.id }.into());
        }
        entries.insert(product.id, product.clone());
        StoreStats::bump(&self.stats.inserts);
        Ok(())
    }

    async fn refresh(&self, product: &CachedProduct) -> FavcacheResult<CachedProduct> {
        let mut entries = self.entries.write().map_err(|_| StorageError::LockPoisoned)?;
        let existing = entries
            .get_mut(&product.id)
            .ok_or(StorageError::NotFound { id: product.id })?;

        let fetched_at = next_fetched_at(existing.fetched_at, product.fetched_at);
        *existing = product.clone().with_fetched_at(fetched_at);
        StoreStats::bump(&self.stats.refreshes);
        Ok(existing.clone())
    }
}
