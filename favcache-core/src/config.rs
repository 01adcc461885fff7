//! Configuration types
//!
//! Every struct here has sane defaults, can be loaded from `FAVCACHE_*`
//! environment variables, and validates itself before use.

use crate::error::ConfigError;
use std::str::FromStr;
use std::time::Duration;

/// Default soft TTL: cached data younger than this is served as-is.
pub const DEFAULT_SOFT_TTL_MINUTES: u64 = 5;
/// Default hard TTL: cached data older than this is never served.
pub const DEFAULT_HARD_TTL_MINUTES: u64 = 30;
/// Default ceiling on in-flight catalog calls, process-wide.
pub const DEFAULT_MAX_CONCURRENCY: usize = 8;
/// Default number of attempts made against a rate-limiting catalog.
pub const DEFAULT_MAX_RETRIES: u32 = 3;
/// Default backoff time unit.
pub const DEFAULT_BACKOFF_UNIT_MS: u64 = 1_000;
/// Per-sleep backoff cap, in time units.
pub const BACKOFF_CAP_UNITS: u32 = 4;

/// Read and parse an environment variable.
///
/// Unset variables yield `Ok(None)`; set-but-unparseable ones are a
/// configuration error rather than a silent fallback.
pub fn env_parse<T: FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue {
                field: key.to_string(),
                value: raw.clone(),
                reason: "could not be parsed".to_string(),
            }),
        Err(_) => Ok(None),
    }
}

// ============================================================================
// HYDRATION
// ============================================================================

/// Staleness and upstream-pressure settings for cache hydration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HydrationConfig {
    /// Age up to which cached data is served with no background action.
    pub soft_ttl: Duration,
    /// Age beyond which cached data must be refreshed synchronously.
    pub hard_ttl: Duration,
    /// Maximum concurrent catalog calls across all hydrations.
    pub max_concurrency: usize,
    /// Attempts made while the catalog keeps signalling rate limits.
    pub max_retries: u32,
    /// Initial backoff; doubles per attempt.
    pub backoff_unit: Duration,
    /// Upper bound for a single backoff sleep.
    pub max_backoff: Duration,
}

impl Default for HydrationConfig {
    fn default() -> Self {
        let backoff_unit = Duration::from_millis(DEFAULT_BACKOFF_UNIT_MS);
        Self {
            soft_ttl: Duration::from_secs(DEFAULT_SOFT_TTL_MINUTES * 60),
            hard_ttl: Duration::from_secs(DEFAULT_HARD_TTL_MINUTES * 60),
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            max_retries: DEFAULT_MAX_RETRIES,
            backoff_unit,
            max_backoff: backoff_unit * BACKOFF_CAP_UNITS,
        }
    }
}

/// Whole minutes as a `Duration`, rejecting values that overflow.
fn minutes(field: &str, value: u64) -> Result<Duration, ConfigError> {
    value
        .checked_mul(60)
        .map(Duration::from_secs)
        .ok_or_else(|| ConfigError::InvalidValue {
            field: field.to_string(),
            value: value.to_string(),
            reason: "too many minutes".to_string(),
        })
}

impl HydrationConfig {
    /// Create HydrationConfig from environment variables.
    ///
    /// # Environment Variables
    /// - `FAVCACHE_SOFT_TTL_MINUTES`: Soft TTL in minutes (default: 5)
    /// - `FAVCACHE_HARD_TTL_MINUTES`: Hard TTL in minutes (default: 30)
    /// - `FAVCACHE_CATALOG_MAX_CONCURRENCY`: In-flight catalog calls (default: 8)
    /// - `FAVCACHE_CATALOG_MAX_RETRIES`: Attempts under rate limiting (default: 3)
    /// - `FAVCACHE_CATALOG_BACKOFF_MS`: Backoff time unit (default: 1000)
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let soft_ttl = env_parse::<u64>("FAVCACHE_SOFT_TTL_MINUTES")?
            .map(|m| minutes("soft_ttl", m))
            .transpose()?
            .unwrap_or(defaults.soft_ttl);
        let hard_ttl = env_parse::<u64>("FAVCACHE_HARD_TTL_MINUTES")?
            .map(|m| minutes("hard_ttl", m))
            .transpose()?
            .unwrap_or(defaults.hard_ttl);
        let max_concurrency = env_parse("FAVCACHE_CATALOG_MAX_CONCURRENCY")?
            .unwrap_or(defaults.max_concurrency);
        let max_retries =
            env_parse("FAVCACHE_CATALOG_MAX_RETRIES")?.unwrap_or(defaults.max_retries);
        let backoff_unit = env_parse::<u64>("FAVCACHE_CATALOG_BACKOFF_MS")?
            .map(Duration::from_millis)
            .unwrap_or(defaults.backoff_unit);

        let max_backoff =
            backoff_unit
                .checked_mul(BACKOFF_CAP_UNITS)
                .ok_or_else(|| ConfigError::InvalidValue {
                    field: "backoff_unit".to_string(),
                    value: format!("{}ms", backoff_unit.as_millis()),
                    reason: "backoff cap overflows".to_string(),
                })?;

        let config = Self {
            soft_ttl,
            hard_ttl,
            max_concurrency,
            max_retries,
            backoff_unit,
            max_backoff,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check invariants that the hydration engine relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.soft_ttl > self.hard_ttl {
            return Err(ConfigError::InvalidTtlOrdering {
                soft_ttl: self.soft_ttl,
                hard_ttl: self.hard_ttl,
            });
        }
        if self.max_concurrency == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_concurrency".to_string(),
                value: "0".to_string(),
                reason: "must be a positive integer".to_string(),
            });
        }
        if self.max_backoff < self.backoff_unit {
            return Err(ConfigError::InvalidValue {
                field: "max_backoff".to_string(),
                value: format!("{:?}", self.max_backoff),
                reason: "must not be shorter than backoff_unit".to_string(),
            });
        }
        Ok(())
    }
}

// ============================================================================
// CATALOG
// ============================================================================

/// Connection settings for the external product catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogConfig {
    /// Base URL, e.g. `https://fakestoreapi.com`.
    pub base_url: String,
    /// Per-request timeout. Expiry counts as a rate-limit signal.
    pub timeout: Duration,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            base_url: "https://fakestoreapi.com".to_string(),
            timeout: Duration::from_secs(5),
        }
    }
}

impl CatalogConfig {
    /// Create CatalogConfig from environment variables.
    ///
    /// # Environment Variables
    /// - `FAVCACHE_CATALOG_BASE_URL`: Catalog base URL
    /// - `FAVCACHE_CATALOG_TIMEOUT_SECS`: Request timeout in seconds (default: 5)
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let config = Self {
            base_url: std::env::var("FAVCACHE_CATALOG_BASE_URL").unwrap_or(defaults.base_url),
            timeout: env_parse::<u64>("FAVCACHE_CATALOG_TIMEOUT_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.timeout),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.base_url.trim().is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "base_url".to_string(),
            });
        }
        if self.timeout.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "timeout".to_string(),
                value: "0".to_string(),
                reason: "must be positive".to_string(),
            });
        }
        Ok(())
    }
}
