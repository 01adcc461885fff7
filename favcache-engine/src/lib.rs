//! Favcache Engine - Cache Hydration
//!
//! Serves product records from a local cache, refreshing them from the
//! external catalog according to their age:
//!
//! - [`HydrationOrchestrator`]: the `hydrate(ids) -> products` entry point
//! - [`BackgroundTaskTracker`]: owns detached refreshes and drains them on shutdown
//! - [`telemetry`]: tracing subscriber and Prometheus metrics
//! - [`EngineConfig`]: environment-driven configuration for the binary

pub mod config;
pub mod hydrate;
pub mod tasks;
pub mod telemetry;

pub use config::EngineConfig;
pub use hydrate::HydrationOrchestrator;
pub use tasks::{
    BackgroundTask, BackgroundTaskTracker, TaskFailure, TaskId, TaskOutcome, TaskStats, TaskStatus,
};

// Re-exports so callers can wire an engine from this crate alone.
pub use favcache_catalog::{
    CatalogClient, ConcurrencyLimiter, FakeStoreCatalogClient, RetryPolicy, UpstreamGateway,
};
pub use favcache_core::{
    CachedProduct, FavcacheError, FavcacheResult, FreshnessState, ProductId,
};
pub use favcache_storage::{FreshnessPolicy, InMemoryProductCache, PgProductCache, ProductCacheStore};
