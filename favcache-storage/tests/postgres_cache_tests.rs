//! PostgreSQL cache store tests.
//!
//! Require a reachable database configured through `FAVCACHE_DB_*`;
//! enabled with `--features db-tests`.

#![cfg(feature = "db-tests")]

use bigdecimal::BigDecimal;
use chrono::Utc;
use favcache_core::{CachedProduct, FavcacheError, FavcacheResult, Review, StorageError};
use favcache_storage::{DbConfig, PgProductCache, ProductCacheStore};
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

async fn test_store() -> FavcacheResult<PgProductCache> {
    let config = DbConfig::from_env()?;
    let store = PgProductCache::from_config(&config)?;
    store.ensure_schema().await?;
    Ok(store)
}

/// Unique id per test run so repeated runs never collide.
fn unique_id() -> i64 {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    (nanos % 1_000_000_000_000) as i64
}

fn product(id: i64, title: &str) -> CachedProduct {
    CachedProduct::new(
        id,
        title,
        "https://img/test.jpg",
        BigDecimal::from_str("19.99").unwrap(),
        Some(Review::new(BigDecimal::from_str("3.9").unwrap(), 120)),
        Utc::now(),
    )
}

#[tokio::test]
async fn test_pg_insert_get_refresh_cycle() -> FavcacheResult<()> {
    let store = test_store().await?;
    let id = unique_id();

    store.insert(&product(id, "Original")).await?;
    let cached = store.get_one(id).await?.expect("inserted row");
    assert_eq!(cached.price, BigDecimal::from_str("19.99").unwrap());

    let refreshed = store.refresh(&product(id, "Renamed")).await?;
    assert_eq!(refreshed.title, "Renamed");
    assert!(refreshed.fetched_at > cached.fetched_at);

    let many = store.get_many(&[id, -1]).await?;
    assert_eq!(many.len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_pg_duplicate_insert_conflicts() -> FavcacheResult<()> {
    let store = test_store().await?;
    let id = unique_id();

    store.insert(&product(id, "First")).await?;
    let err = store.insert(&product(id, "Second")).await.unwrap_err();
    assert_eq!(err, FavcacheError::Storage(StorageError::Conflict { id }));
    Ok(())
}

#[tokio::test]
async fn test_pg_refresh_unknown_id_not_found() -> FavcacheResult<()> {
    let store = test_store().await?;
    let err = store.refresh(&product(-42, "Ghost")).await.unwrap_err();
    assert_eq!(
        err,
        FavcacheError::Storage(StorageError::NotFound { id: -42 })
    );
    Ok(())
}

#[tokio::test]
async fn test_pg_get_many_binds_id_array() -> FavcacheResult<()> {
    let store = test_store().await?;
    let first = unique_id();
    let second = first + 1;
    store.insert(&product(first, "First")).await?;
    store.insert(&product(second, "Second")).await?;

    // Duplicates and unknown ids in the bound array.
    let mut hits = store.get_many(&[second, -7, first, second, -8]).await?;
    hits.sort_by_key(|p| p.id);
    let ids: Vec<i64> = hits.iter().map(|p| p.id).collect();
    assert_eq!(ids, vec![first, second]);
    assert_eq!(hits[1].title, "Second");
    assert_eq!(hits[0].review.as_ref().map(|r| r.count), Some(120));

    assert!(store.get_many(&[]).await?.is_empty());
    assert!(store.get_many(&[-7, -8]).await?.is_empty());
    Ok(())
}
