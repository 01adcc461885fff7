//! Freshness policy for cached product records.
//!
//! Classification is a pure function of a record's age against two
//! configured thresholds, `soft_ttl <= hard_ttl`:
//!
//! | age                          | state         |
//! |------------------------------|---------------|
//! | `age <= soft_ttl`            | `Fresh`       |
//! | `soft_ttl < age <= hard_ttl` | `Refreshable` |
//! | `age > hard_ttl`             | `Expired`     |
//! | no record                    | `Missing`     |
//!
//! A `fetched_at` in the future has age zero and is therefore `Fresh`.

use favcache_core::{
    CachedProduct, ConfigError, FreshnessState, HydrationConfig, Timestamp,
};
use std::time::Duration;

/// Age of a record at `now`, clamped at zero for future timestamps.
pub fn age(fetched_at: Timestamp, now: Timestamp) -> Duration {
    (now - fetched_at).to_std().unwrap_or(Duration::ZERO)
}

/// Classify a record fetched at `fetched_at` as seen at `now`.
///
/// Total over all inputs; never panics.
pub fn classify(
    fetched_at: Timestamp,
    now: Timestamp,
    soft_ttl: Duration,
    hard_ttl: Duration,
) -> FreshnessState {
    let age = age(fetched_at, now);
    if age <= soft_ttl {
        FreshnessState::Fresh
    } else if age <= hard_ttl {
        FreshnessState::Refreshable
    } else {
        FreshnessState::Expired
    }
}

/// Classification for an id with no cached record.
pub fn classify_missing() -> FreshnessState {
    FreshnessState::Missing
}

/// Validated pair of TTL thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreshnessPolicy {
    soft_ttl: Duration,
    hard_ttl: Duration,
}

impl FreshnessPolicy {
    /// Build a policy; fails when `soft_ttl > hard_ttl`.
    pub fn new(soft_ttl: Duration, hard_ttl: Duration) -> Result<Self, ConfigError> {
        if soft_ttl > hard_ttl {
            return Err(ConfigError::InvalidTtlOrdering { soft_ttl, hard_ttl });
        }
        Ok(Self { soft_ttl, hard_ttl })
    }

    pub fn from_config(config: &HydrationConfig) -> Result<Self, ConfigError> {
        Self::new(config.soft_ttl, config.hard_ttl)
    }

    pub fn soft_ttl(&self) -> Duration {
        self.soft_ttl
    }

    pub fn hard_ttl(&self) -> Duration {
        self.hard_ttl
    }

    pub fn classify(&self, fetched_at: Timestamp, now: Timestamp) -> FreshnessState {
        classify(fetched_at, now, self.soft_ttl, self.hard_ttl)
    }

    /// Classify an optional cache hit.
    pub fn classify_record(
        &self,
        record: Option<&CachedProduct>,
        now: Timestamp,
    ) -> FreshnessState {
        match record {
            Some(product) => self.classify(product.fetched_at, now),
            None => classify_missing(),
        }
    }
}
