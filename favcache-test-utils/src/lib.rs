//! Favcache Test Utilities
//!
//! Centralized test infrastructure for the favcache workspace:
//! - A scripted catalog client that counts calls and tracks concurrency
//! - Fixtures for cached products of a given age
//! - Proptest generators for ids and products

// Re-export the in-memory store from its source crate
pub use favcache_storage::InMemoryProductCache;

// Re-export core types for convenience
pub use favcache_core::{
    CachedProduct, CatalogError, FavcacheError, FavcacheResult, FreshnessState, ProductId, Review,
    StorageError, UpstreamError,
};

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::Utc;
use favcache_catalog::CatalogClient;
use favcache_storage::{FreshnessPolicy, ProductCacheStore};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

// ============================================================================
// SCRIPTED CATALOG
// ============================================================================

/// One scripted catalog answer.
#[derive(Debug, Clone)]
pub enum CatalogReply {
    /// Answer with a freshly stamped product for the requested id.
    Found,
    /// Answer with this exact product, re-stamped at call time.
    Product(CachedProduct),
    /// The catalog has no such product.
    NotFound,
    /// Fail with this signal.
    Fail(CatalogError),
}

/// Catalog client driven by per-id scripts.
///
/// Each id has a queue of replies; the last reply in a queue repeats once
/// the others are used up. Ids without a script answer `Found`.
#[derive(Debug, Default)]
pub struct ScriptedCatalogClient {
    scripts: Mutex<HashMap<ProductId, VecDeque<CatalogReply>>>,
    calls: Mutex<HashMap<ProductId, usize>>,
    total_calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    latency: Duration,
}

impl ScriptedCatalogClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call take at least `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Script the replies for `id`, in order.
    pub fn script(self, id: ProductId, replies: Vec<CatalogReply>) -> Self {
        if let Ok(mut scripts) = self.scripts.lock() {
            scripts.insert(id, replies.into());
        }
        self
    }

    /// Shorthand for a catalog that does not know `id`.
    pub fn not_found(self, id: ProductId) -> Self {
        self.script(id, vec![CatalogReply::NotFound])
    }

    /// Calls made for `id`.
    pub fn calls_for(&self, id: ProductId) -> usize {
        self.calls
            .lock()
            .map(|c| c.get(&id).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.total_calls.load(Ordering::SeqCst)
    }

    /// Most calls ever observed running at once.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    fn next_reply(&self, id: ProductId) -> CatalogReply {
        let mut scripts = match self.scripts.lock() {
            Ok(scripts) => scripts,
            Err(_) => return CatalogReply::Fail(CatalogError::Timeout),
        };
        match scripts.get_mut(&id) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap_or(CatalogReply::Found),
            Some(queue) => queue.front().cloned().unwrap_or(CatalogReply::Found),
            None => CatalogReply::Found,
        }
    }
}

/// Decrements the in-flight gauge even if the call is cancelled.
struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl CatalogClient for ScriptedCatalogClient {
    async fn fetch_product(&self, id: ProductId) -> Result<Option<CachedProduct>, CatalogError> {
        self.total_calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut calls) = self.calls.lock() {
            *calls.entry(id).or_insert(0) += 1;
        }

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let _guard = InFlight(&self.in_flight);

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        match self.next_reply(id) {
            CatalogReply::Found => Ok(Some(product(id))),
            CatalogReply::Product(p) => Ok(Some(p.with_fetched_at(Utc::now()))),
            CatalogReply::NotFound => Ok(None),
            CatalogReply::Fail(e) => Err(e),
        }
    }
}

// ============================================================================
// EVICTING STORE
// ============================================================================

/// Store whose batch reads still return records that are already gone.
///
/// `get_many` answers from a fixed snapshot while every other operation
/// hits an initially empty [`InMemoryProductCache`], as if each record was
/// evicted right after the batch read. `refresh` of a snapshot record
/// therefore reports `NotFound`.
#[derive(Debug, Default)]
pub struct EvictedAfterReadStore {
    snapshot: Vec<CachedProduct>,
    backing: InMemoryProductCache,
}

impl EvictedAfterReadStore {
    pub fn new(snapshot: impl IntoIterator<Item = CachedProduct>) -> Self {
        Self {
            snapshot: snapshot.into_iter().collect(),
            backing: InMemoryProductCache::new(),
        }
    }

    pub fn backing(&self) -> &InMemoryProductCache {
        &self.backing
    }
}

#[async_trait]
impl ProductCacheStore for EvictedAfterReadStore {
    async fn get_one(&self, id: ProductId) -> FavcacheResult<Option<CachedProduct>> {
        self.backing.get_one(id).await
    }

    async fn get_many(&self, ids: &[ProductId]) -> FavcacheResult<Vec<CachedProduct>> {
        Ok(self
            .snapshot
            .iter()
            .filter(|p| ids.contains(&p.id))
            .cloned()
            .collect())
    }

    async fn insert(&self, product: &CachedProduct) -> FavcacheResult<()> {
        self.backing.insert(product).await
    }

    async fn refresh(&self, product: &CachedProduct) -> FavcacheResult<CachedProduct> {
        self.backing.refresh(product).await
    }
}

// ============================================================================
// FIXTURES
// ============================================================================

/// A product fetched just now.
pub fn product(id: ProductId) -> CachedProduct {
    CachedProduct::new(
        id,
        format!("Product {}", id),
        format!("https://img.example/{}.jpg", id),
        BigDecimal::from(10 + id.rem_euclid(90)),
        Some(Review::new(BigDecimal::from(4), 100)),
        Utc::now(),
    )
}

/// A product whose `fetched_at` lies `age` in the past.
pub fn product_fetched_ago(id: ProductId, age: chrono::Duration) -> CachedProduct {
    product(id).with_fetched_at(Utc::now() - age)
}

/// Policy with a 5 minute soft TTL and a 30 minute hard TTL.
pub fn default_policy() -> FreshnessPolicy {
    FreshnessPolicy::new(Duration::from_secs(5 * 60), Duration::from_secs(30 * 60))
        .unwrap_or_else(|e| panic!("default policy must be valid: {}", e))
}

// ============================================================================
// GENERATORS
// ============================================================================

pub mod generators {
    use super::*;
    use proptest::prelude::*;

    /// Ids drawn from a small range so batches contain duplicates.
    pub fn arb_product_id() -> impl Strategy<Value = ProductId> {
        1i64..40
    }

    /// An ordered batch of ids, duplicates allowed.
    pub fn arb_id_batch(max_len: usize) -> impl Strategy<Value = Vec<ProductId>> {
        prop::collection::vec(arb_product_id(), 0..=max_len)
    }

    /// Age (in minutes) covering fresh, refreshable and expired records.
    pub fn arb_age_minutes() -> impl Strategy<Value = i64> {
        prop_oneof![0i64..5, 6i64..30, 31i64..2_880]
    }

    /// A cached product of arbitrary age.
    pub fn arb_cached_product() -> impl Strategy<Value = CachedProduct> {
        (arb_product_id(), arb_age_minutes())
            .prop_map(|(id, age)| product_fetched_ago(id, chrono::Duration::minutes(age)))
    }
}
