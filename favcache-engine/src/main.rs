//! favcache entry point
//!
//! Hydrates the product ids given on the command line through the
//! PostgreSQL cache and the FakeStore catalog, prints the products as JSON,
//! then drains background refreshes before exiting.
//!
//! ```text
//! favcache 1 5 7
//! ```

use std::sync::Arc;
use std::time::Duration;

use favcache_core::config::env_parse;
use favcache_core::{CachedProduct, ConfigError, FavcacheError, FavcacheResult, ProductId};
use favcache_engine::telemetry::init_tracing;
use favcache_engine::{
    BackgroundTaskTracker, ConcurrencyLimiter, EngineConfig, FakeStoreCatalogClient,
    FreshnessPolicy, HydrationOrchestrator, PgProductCache, RetryPolicy, UpstreamGateway,
};
use favcache_engine::telemetry::PrometheusGatewayObserver;
use tokio::runtime::Handle;

/// How long background refreshes may run after the result is printed.
const DEFAULT_SHUTDOWN_GRACE_MS: u64 = 2_000;

#[tokio::main]
async fn main() -> FavcacheResult<()> {
    let config = EngineConfig::from_env()?;
    init_tracing(&config.telemetry)?;

    let ids = parse_ids(std::env::args().skip(1))?;
    let grace = Duration::from_millis(
        env_parse("FAVCACHE_SHUTDOWN_GRACE_MS")?.unwrap_or(DEFAULT_SHUTDOWN_GRACE_MS),
    );

    let store = PgProductCache::from_config(&config.db)?;
    store.ensure_schema().await?;

    let client = FakeStoreCatalogClient::new(&config.catalog)?;
    let gateway = Arc::new(
        UpstreamGateway::new(
            Arc::new(client),
            ConcurrencyLimiter::new(config.hydration.max_concurrency),
            RetryPolicy::from_config(&config.hydration),
        )
        .with_observer(Arc::new(PrometheusGatewayObserver)),
    );
    let tracker = Arc::new(BackgroundTaskTracker::new(Handle::current()));
    let policy = FreshnessPolicy::from_config(&config.hydration)?;

    let orchestrator =
        HydrationOrchestrator::new(Arc::new(store), gateway, Arc::clone(&tracker), policy);

    tracing::info!(products = ids.len(), "Hydrating favorites");

    let result = tokio::select! {
        result = orchestrator.hydrate(&ids) => Some(result),
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received");
            None
        }
    };

    if let Some(Ok(products)) = &result {
        println!("{}", render(products)?);

        if tokio::time::timeout(grace, tracker.wait_idle()).await.is_err() {
            tracing::info!(
                live = tracker.live_count(),
                "Grace period over, cancelling background refreshes"
            );
        }
    }

    tracker.shutdown().await;
    tracing::info!(stats = ?tracker.stats(), "Background tasks drained");

    match result {
        Some(result) => result.map(|_| ()),
        None => Ok(()),
    }
}

fn render(products: &[CachedProduct]) -> FavcacheResult<String> {
    serde_json::to_string_pretty(products).map_err(|e| FavcacheError::Render {
        reason: format!("Failed to render products: {}", e),
    })
}

fn parse_ids(args: impl Iterator<Item = String>) -> Result<Vec<ProductId>, ConfigError> {
    args.map(|arg| {
        arg.trim()
            .parse::<ProductId>()
            .map_err(|_| ConfigError::InvalidValue {
                field: "product_id".to_string(),
                value: arg.clone(),
                reason: "expected an integer product id".to_string(),
            })
    })
    .collect()
}
