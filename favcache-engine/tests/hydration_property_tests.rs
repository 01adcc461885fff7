//! Property-Based Tests for hydration ordering
//!
//! **Property: Order Preservation**
//!
//! For any batch of ids (duplicates allowed) over any mix of fresh,
//! refreshable, expired and missing records, `hydrate` returns exactly one
//! product per input position, and position `i` holds product `ids[i]`.

use favcache_engine::{
    BackgroundTaskTracker, ConcurrencyLimiter, HydrationOrchestrator, ProductCacheStore,
    RetryPolicy, UpstreamGateway,
};
use favcache_test_utils::generators::{arb_cached_product, arb_id_batch};
use favcache_test_utils::{default_policy, InMemoryProductCache, ScriptedCatalogClient};
use proptest::prelude::*;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_hydrate_preserves_order(
        cached in prop::collection::vec(arb_cached_product(), 0..20),
        ids in arb_id_batch(24),
        capacity in 1usize..6,
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let store = Arc::new(InMemoryProductCache::with_products(cached));
            let client = Arc::new(ScriptedCatalogClient::new());
            let gateway = Arc::new(UpstreamGateway::new(
                client.clone(),
                ConcurrencyLimiter::new(capacity),
                RetryPolicy::new(1, Duration::from_millis(1), Duration::from_millis(1)),
            ));
            let tracker = Arc::new(BackgroundTaskTracker::new(tokio::runtime::Handle::current()));
            let orchestrator = HydrationOrchestrator::new(
                store.clone() as Arc<dyn ProductCacheStore>,
                gateway.clone(),
                tracker.clone(),
                default_policy(),
            );

            let products = orchestrator.hydrate(&ids).await.unwrap();

            prop_assert_eq!(products.len(), ids.len());
            for (product, id) in products.iter().zip(&ids) {
                prop_assert_eq!(product.id, *id);
            }

            // At most one synchronous call per distinct id, plus one
            // background refresh per distinct refreshable id.
            let distinct: HashSet<_> = ids.iter().collect();
            tracker.wait_idle().await;
            prop_assert!(client.total_calls() <= distinct.len());
            prop_assert!(gateway.limiter().high_water_mark() <= capacity);

            tracker.shutdown().await;
            prop_assert_eq!(tracker.live_count(), 0);
            Ok(())
        })?;
    }

    #[test]
    fn prop_second_hydrate_needs_no_synchronous_fetch(ids in arb_id_batch(16)) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let client = Arc::new(ScriptedCatalogClient::new());
            let gateway = Arc::new(UpstreamGateway::new(
                client.clone(),
                ConcurrencyLimiter::new(4),
                RetryPolicy::default(),
            ));
            let tracker = Arc::new(BackgroundTaskTracker::new(tokio::runtime::Handle::current()));
            let orchestrator = HydrationOrchestrator::new(
                Arc::new(InMemoryProductCache::new()),
                gateway,
                tracker.clone(),
                default_policy(),
            );

            let first = orchestrator.hydrate(&ids).await.unwrap();
            let calls_after_first = client.total_calls();
            let second = orchestrator.hydrate(&ids).await.unwrap();

            // Everything fetched by the first call is now fresh.
            prop_assert_eq!(client.total_calls(), calls_after_first);
            prop_assert_eq!(first, second);
            prop_assert_eq!(tracker.stats().spawned, 0);
            Ok(())
        })?;
    }
}
