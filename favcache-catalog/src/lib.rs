//! Favcache Catalog - Upstream Product Catalog Gateway
//!
//! The external catalog is rate limited and slow on a bad day. This crate
//! wraps it in:
//!
//! - [`CatalogClient`]: the raw per-call contract a catalog integration implements
//! - [`ConcurrencyLimiter`]: a shared, explicitly owned ceiling on in-flight calls
//! - [`RetryPolicy`]: capped exponential backoff for rate-limit signals
//! - [`UpstreamGateway`]: the classified, bounded, retrying entry point

pub mod gateway;
pub mod limiter;
pub mod providers;
pub mod retry;

pub use gateway::{CallOutcome, GatewayObserver, GatewayStats, GatewayStatsSnapshot, UpstreamGateway};
pub use limiter::{ConcurrencyLimiter, LimiterPermit};
pub use providers::FakeStoreCatalogClient;
pub use retry::RetryPolicy;

use async_trait::async_trait;
use favcache_core::{CachedProduct, CatalogError, ProductId};

/// A single-product lookup against the external catalog.
///
/// `Ok(None)` means the catalog answered "no such product". Every other
/// non-success is reported as a [`CatalogError`] signal and classified by
/// the gateway; implementations must not retry on their own.
#[async_trait]
pub trait CatalogClient: Send + Sync {
    async fn fetch_product(&self, id: ProductId) -> Result<Option<CachedProduct>, CatalogError>;
}
