//! Error types for favcache operations

use crate::ProductId;
use std::time::Duration;
use thiserror::Error;

/// Configuration errors. Fatal at startup, never retried.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid TTL ordering: soft_ttl {soft_ttl:?} exceeds hard_ttl {hard_ttl:?}")]
    InvalidTtlOrdering { soft_ttl: Duration, hard_ttl: Duration },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },
}

/// Cache store errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Product {id} is already cached")]
    Conflict { id: ProductId },

    #[error("Product {id} is not cached")]
    NotFound { id: ProductId },

    #[error("Cache backend error: {reason}")]
    Backend { reason: String },

    #[error("Cache lock poisoned")]
    LockPoisoned,
}

/// Raw failure signals reported by a catalog client for a single call.
///
/// The gateway classifies these: rate limits and timeouts are retried,
/// malformed payloads become "no result", everything else is surfaced.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CatalogError {
    #[error("Catalog rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("Catalog request timed out")]
    Timeout,

    #[error("Malformed catalog payload: {reason}")]
    Malformed { reason: String },

    #[error("Catalog request failed with status {status}: {reason}")]
    Unexpected { status: u16, reason: String },
}

impl CatalogError {
    /// Whether the signal means "slow down and try again".
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, Self::RateLimited { .. } | Self::Timeout)
    }
}

/// Errors surfaced by the upstream gateway.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum UpstreamError {
    #[error("Catalog still rate limiting after {attempts} attempts: {last_cause}")]
    RetryExhausted {
        attempts: u32,
        last_cause: CatalogError,
    },

    #[error("Unexpected catalog failure: {cause}")]
    Unexpected { cause: CatalogError },
}

/// Master error type for all favcache errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FavcacheError {
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Upstream error: {0}")]
    Upstream(#[from] UpstreamError),

    #[error("Product not found: {id}")]
    ProductNotFound { id: ProductId },

    #[error("Telemetry error: {reason}")]
    Telemetry { reason: String },

    #[error("Output error: {reason}")]
    Render { reason: String },
}

/// Result type alias for favcache operations.
pub type FavcacheResult<T> = Result<T, FavcacheError>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_display_ttl_ordering() {
        let err = ConfigError::InvalidTtlOrdering {
            soft_ttl: Duration::from_secs(600),
            hard_ttl: Duration::from_secs(60),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("Invalid TTL ordering"));
        assert!(msg.contains("600s"));
    }

    #[test]
    fn test_retry_exhausted_wraps_last_cause() {
        let err = UpstreamError::RetryExhausted {
            attempts: 3,
            last_cause: CatalogError::RateLimited { retry_after_ms: 250 },
        };
        let msg = format!("{}", err);
        assert!(msg.contains("3 attempts"));
        assert!(msg.contains("250ms"));
    }

    #[test]
    fn test_rate_limit_classification() {
        assert!(CatalogError::Timeout.is_rate_limit());
        assert!(CatalogError::RateLimited { retry_after_ms: 0 }.is_rate_limit());
        assert!(!CatalogError::Malformed {
            reason: "missing title".to_string()
        }
        .is_rate_limit());
        assert!(!CatalogError::Unexpected {
            status: 500,
            reason: "boom".to_string()
        }
        .is_rate_limit());
    }

    #[test]
    fn test_favcache_error_from_storage() {
        let err: FavcacheError = StorageError::Conflict { id: 9 }.into();
        assert!(matches!(err, FavcacheError::Storage(StorageError::Conflict { id: 9 })));
        assert!(format!("{}", err).contains("already cached"));
    }

    #[test]
    fn test_render_error_display() {
        let err = FavcacheError::Render {
            reason: "Failed to render products: key must be a string".to_string(),
        };
        assert_eq!(
            format!("{}", err),
            "Output error: Failed to render products: key must be a string"
        );
        assert!(!matches!(err, FavcacheError::Telemetry { .. }));
    }

    #[test]
    fn test_product_not_found_display() {
        let err = FavcacheError::ProductNotFound { id: 42 };
        assert_eq!(format!("{}", err), "Product not found: 42");
    }
}
