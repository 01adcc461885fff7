//! Favcache Core - Entity Types
//!
//! Pure data structures shared by every favcache crate: the cached product
//! record, its freshness classification, the error taxonomy and the
//! configuration types. No I/O lives here.

pub mod config;
pub mod error;

pub use config::{CatalogConfig, HydrationConfig};
pub use error::{
    CatalogError, ConfigError, FavcacheError, FavcacheResult, StorageError, UpstreamError,
};

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// IDENTITY TYPES
// ============================================================================

/// Product identifier as assigned by the external catalog.
pub type ProductId = i64;

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// Fractional digits kept for monetary amounts and rating averages.
pub const DECIMAL_SCALE: i64 = 2;

// ============================================================================
// PRODUCT
// ============================================================================

/// Aggregated review summary for a product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Review {
    /// Average rating, rounded to two fractional digits.
    pub rate: BigDecimal,
    /// Number of ratings the average was computed from.
    pub count: u32,
}

impl Review {
    pub fn new(rate: BigDecimal, count: u32) -> Self {
        Self {
            rate: rate.round(DECIMAL_SCALE),
            count,
        }
    }
}

/// A product record as held by the local cache.
///
/// `fetched_at` records when the catalog last produced this data. It only
/// ever moves forward: every successful refresh replaces it with a later
/// instant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedProduct {
    pub id: ProductId,
    pub title: String,
    pub image_url: String,
    pub price: BigDecimal,
    pub review: Option<Review>,
    pub fetched_at: Timestamp,
}

impl CachedProduct {
    /// Build a product record, normalising the price to two fractional digits.
    pub fn new(
        id: ProductId,
        title: impl Into<String>,
        image_url: impl Into<String>,
        price: BigDecimal,
        review: Option<Review>,
        fetched_at: Timestamp,
    ) -> Self {
        Self {
            id,
            title: title.into(),
            image_url: image_url.into(),
            price: price.round(DECIMAL_SCALE),
            review,
            fetched_at,
        }
    }

    /// Return a copy stamped with a different fetch time.
    pub fn with_fetched_at(mut self, fetched_at: Timestamp) -> Self {
        self.fetched_at = fetched_at;
        self
    }

    /// Compare the caller-visible fields, ignoring `fetched_at`.
    pub fn same_content(&self, other: &CachedProduct) -> bool {
        self.id == other.id
            && self.title == other.title
            && self.image_url == other.image_url
            && self.price == other.price
            && self.review == other.review
    }
}

// ============================================================================
// FRESHNESS
// ============================================================================

/// Freshness of a cached record, derived from its age. Never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FreshnessState {
    /// Young enough to serve with no further action.
    Fresh,
    /// Serve the cached record, refresh it in the background.
    Refreshable,
    /// Too old to serve; refresh synchronously first.
    Expired,
    /// No cached record at all.
    Missing,
}

impl FreshnessState {
    /// Whether this state forces a synchronous upstream fetch.
    pub fn requires_fetch(self) -> bool {
        matches!(self, Self::Expired | Self::Missing)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Fresh => "fresh",
            Self::Refreshable => "refreshable",
            Self::Expired => "expired",
            Self::Missing => "missing",
        }
    }
}

impl fmt::Display for FreshnessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// TESTS
// ============================================================================
