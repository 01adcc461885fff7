//! Product cache store contract.
//!
//! The hydration engine only needs point and bulk reads, a create, and an
//! overwrite. Persistence mechanics behind these are opaque to it.

use async_trait::async_trait;
use favcache_core::{CachedProduct, FavcacheResult, ProductId, Timestamp};
use std::sync::atomic::{AtomicU64, Ordering};

/// Persistent store of cached product records.
///
/// Implementations must be safe to share across tasks. Each operation is
/// atomic at single-record granularity; nothing spans records.
#[async_trait]
pub trait ProductCacheStore: Send + Sync {
    /// Look up one record.
    async fn get_one(&self, id: ProductId) -> FavcacheResult<Option<CachedProduct>>;

    /// Look up many records in one round trip.
    ///
    /// Only hits are returned, in no particular order; callers compute
    /// misses by set difference.
    async fn get_many(&self, ids: &[ProductId]) -> FavcacheResult<Vec<CachedProduct>>;

    /// Create a new record. Fails with `StorageError::Conflict` if the id
    /// is already cached.
    async fn insert(&self, product: &CachedProduct) -> FavcacheResult<()>;

    /// Overwrite an existing record's mutable fields and stamp a new
    /// `fetched_at`. Fails with `StorageError::NotFound` if the id is not
    /// cached. Returns the record as persisted.
    async fn refresh(&self, product: &CachedProduct) -> FavcacheResult<CachedProduct>;
}

/// Pick the `fetched_at` to persist on refresh.
///
/// The stored timestamp strictly increases and never moves backward, even
/// when two refreshes race or a clock steps back.
pub fn next_fetched_at(previous: Timestamp, incoming: Timestamp) -> Timestamp {
    let floor = previous + chrono::Duration::microseconds(1);
    incoming.max(floor)
}

/// Operation counters kept by a store.
#[derive(Debug, Default)]
pub struct StoreStats {
    pub point_reads: AtomicU64,
    pub batch_reads: AtomicU64,
    pub inserts: AtomicU64,
    pub refreshes: AtomicU64,
}

/// Point-in-time copy of [`StoreStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStatsSnapshot {
    pub point_reads: u64,
    pub batch_reads: u64,
    pub inserts: u64,
    pub refreshes: u64,
}

impl StoreStatsSnapshot {
    /// Total writes (inserts plus refreshes).
    pub fn writes(&self) -> u64 {
        self.inserts + self.refreshes
    }
}

impl StoreStats {
    pub fn snapshot(&self) -> StoreStatsSnapshot {
        StoreStatsSnapshot {
            point_reads: self.point_reads.load(Ordering::Relaxed),
            batch_reads: self.batch_reads.load(Ordering::Relaxed),
            inserts: self.inserts.load(Ordering::Relaxed),
            refreshes: self.refreshes.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}
