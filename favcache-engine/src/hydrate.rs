//! Hydration orchestrator.
//!
//! Turns an ordered list of product ids into an ordered list of cached
//! products, stale-while-revalidate style:
//!
//! | state       | served                     | upstream work                          |
//! |-------------|----------------------------|----------------------------------------|
//! | Fresh       | cached record              | none                                   |
//! | Refreshable | cached record              | background refresh, not awaited        |
//! | Expired     | refetched record           | synchronous fetch, then `refresh`      |
//! | Missing     | fetched record             | synchronous fetch, then `insert`       |
//!
//! All synchronous fetches of one batch run concurrently and the batch is
//! all-or-nothing: one failure discards every other result. Output order
//! always matches input order, duplicates included.

use chrono::Utc;
use favcache_catalog::UpstreamGateway;
use favcache_core::{
    CachedProduct, FavcacheError, FavcacheResult, FreshnessState, ProductId, StorageError,
    Timestamp,
};
use favcache_storage::{FreshnessPolicy, ProductCacheStore};
use futures_util::future::try_join_all;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::tasks::BackgroundTaskTracker;
use crate::telemetry::metrics::record_lookup;

/// Coordinates the cache store, the upstream gateway and the background
/// task tracker. Cheap to share behind an `Arc`; holds no per-call state.
pub struct HydrationOrchestrator {
    store: Arc<dyn ProductCacheStore>,
    gateway: Arc<UpstreamGateway>,
    tracker: Arc<BackgroundTaskTracker>,
    policy: FreshnessPolicy,
}

impl HydrationOrchestrator {
    pub fn new(
        store: Arc<dyn ProductCacheStore>,
        gateway: Arc<UpstreamGateway>,
        tracker: Arc<BackgroundTaskTracker>,
        policy: FreshnessPolicy,
    ) -> Self {
        Self {
            store,
            gateway,
            tracker,
            policy,
        }
    }

    pub fn policy(&self) -> &FreshnessPolicy {
        &self.policy
    }

    pub fn gateway(&self) -> &Arc<UpstreamGateway> {
        &self.gateway
    }

    pub fn tracker(&self) -> &Arc<BackgroundTaskTracker> {
        &self.tracker
    }

    /// Resolve `ids` into products, positionally aligned with the input.
    ///
    /// Fails with `ProductNotFound` if an Expired or Missing id is unknown
    /// to the catalog, or with the gateway/store error of the first failed
    /// synchronous resolution. Background refresh failures never surface.
    #[instrument(skip(self, ids), fields(batch = ids.len()))]
    pub async fn hydrate(&self, ids: &[ProductId]) -> FavcacheResult<Vec<CachedProduct>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let now = Utc::now();
        let cached = self.read_batch(ids).await?;

        let mut slots: Vec<Option<CachedProduct>> = Vec::with_capacity(ids.len());
        let mut pending: Vec<(ProductId, FreshnessState)> = Vec::new();
        let mut seen_pending: HashSet<ProductId> = HashSet::new();
        let mut refreshing: HashSet<ProductId> = HashSet::new();

        for id in ids {
            let record = cached.get(id);
            let state = self.policy.classify_record(record, now);
            record_lookup(state);

            match (state, record) {
                (FreshnessState::Fresh, Some(product)) => slots.push(Some(product.clone())),
                (FreshnessState::Refreshable, Some(product)) => {
                    slots.push(Some(product.clone()));
                    if refreshing.insert(*id) {
                        self.schedule_refresh(*id);
                    }
                }
                _ => {
                    slots.push(None);
                    if seen_pending.insert(*id) {
                        pending.push((*id, state));
                    }
                }
            }
        }

        let resolved: HashMap<ProductId, CachedProduct> = try_join_all(
            pending
                .iter()
                .map(|(id, state)| self.resolve(*id, *state)),
        )
        .await?
        .into_iter()
        .map(|p| (p.id, p))
        .collect();

        debug!(
            fetched = resolved.len(),
            background = refreshing.len(),
            "batch hydrated"
        );

        ids.iter()
            .zip(slots)
            .map(|(id, slot)| match slot {
                Some(product) => Ok(product),
                None => resolved
                    .get(id)
                    .cloned()
                    .ok_or(FavcacheError::ProductNotFound { id: *id }),
            })
            .collect()
    }

    /// Hydrate a single product.
    pub async fn hydrate_one(&self, id: ProductId) -> FavcacheResult<CachedProduct> {
        self.hydrate(&[id])
            .await?
            .into_iter()
            .next()
            .ok_or(FavcacheError::ProductNotFound { id })
    }

    /// Classify every position of `ids` as of `now`, without fetching or
    /// scheduling anything. Performs the same single batch read as
    /// [`hydrate`](Self::hydrate).
    pub async fn plan(
        &self,
        ids: &[ProductId],
        now: Timestamp,
    ) -> FavcacheResult<Vec<FreshnessState>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let cached = self.read_batch(ids).await?;
        Ok(ids
            .iter()
            .map(|id| self.policy.classify_record(cached.get(id), now))
            .collect())
    }

    /// One store round trip for the distinct ids of the batch.
    async fn read_batch(&self, ids: &[ProductId]) -> FavcacheResult<HashMap<ProductId, CachedProduct>> {
        let mut seen = HashSet::with_capacity(ids.len());
        let distinct: Vec<ProductId> = ids.iter().copied().filter(|id| seen.insert(*id)).collect();
        let hits = self.store.get_many(&distinct).await?;
        Ok(hits.into_iter().map(|p| (p.id, p)).collect())
    }

    /// Synchronously resolve an Expired or Missing id.
    async fn resolve(&self, id: ProductId, state: FreshnessState) -> FavcacheResult<CachedProduct> {
        let fetched = match self.gateway.fetch_one(id).await? {
            Some(product) => product,
            None => {
                info!(product_id = id, state = %state, "product unknown to catalog");
                return Err(FavcacheError::ProductNotFound { id });
            }
        };

        match state {
            FreshnessState::Missing => match self.store.insert(&fetched).await {
                Ok(()) => Ok(fetched),
                // Another hydration inserted it first; ours is at least as new.
                Err(FavcacheError::Storage(StorageError::Conflict { .. })) => {
                    debug!(product_id = id, "insert raced, refreshing instead");
                    self.store.refresh(&fetched).await
                }
                Err(e) => Err(e),
            },
            _ => match self.store.refresh(&fetched).await {
                Ok(persisted) => Ok(persisted),
                // Evicted between the batch read and now.
                Err(FavcacheError::Storage(StorageError::NotFound { .. })) => {
                    debug!(product_id = id, "record vanished, inserting instead");
                    self.store.insert(&fetched).await?;
                    Ok(fetched)
                }
                Err(e) => Err(e),
            },
        }
    }

    /// Spawn a detached stale-while-revalidate refresh for `id`.
    fn schedule_refresh(&self, id: ProductId) {
        let store = Arc::clone(&self.store);
        let gateway = Arc::clone(&self.gateway);

        let spawned = self.tracker.spawn(format!("refresh-product-{}", id), async move {
            match gateway.fetch_one(id).await? {
                Some(product) => {
                    store.refresh(&product).await?;
                    debug!(product_id = id, "background refresh stored");
                }
                None => debug!(product_id = id, "catalog dropped product, keeping stale record"),
            }
            Ok(())
        });

        if spawned.is_none() {
            warn!(product_id = id, "tracker shut down, background refresh skipped");
        }
    }
}

impl std::fmt::Debug for HydrationOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HydrationOrchestrator")
            .field("policy", &self.policy)
            .field("gateway", &self.gateway)
            .field("tracker", &self.tracker)
            .finish()
    }
}
