//! Product cache layer.
//!
//! Staleness is explicit: every cached record carries `fetched_at`, and the
//! [`FreshnessPolicy`] turns its age into a [`FreshnessState`] that decides
//! whether the record is served, served-and-refreshed, or refetched.
//!
//! [`FreshnessState`]: favcache_core::FreshnessState

pub mod freshness;
pub mod memory;
pub mod postgres;
pub mod traits;

pub use freshness::{age, classify, classify_missing, FreshnessPolicy};
pub use memory::InMemoryProductCache;
pub use postgres::{DbConfig, PgProductCache, SCHEMA_SQL};
pub use traits::{next_fetched_at, ProductCacheStore, StoreStats, StoreStatsSnapshot};
