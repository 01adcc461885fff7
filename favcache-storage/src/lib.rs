//! Favcache Storage - Freshness Policy and Cache Store
//!
//! Defines the product cache contract consumed by the hydration engine,
//! the freshness policy that classifies cached records, and two backends:
//! an in-memory map and a PostgreSQL table.

pub mod cache;

pub use cache::{
    age, classify, classify_missing, next_fetched_at, DbConfig, FreshnessPolicy,
    InMemoryProductCache, PgProductCache, ProductCacheStore, StoreStats, StoreStatsSnapshot,
    SCHEMA_SQL,
};
