//! Engine configuration.

use favcache_core::{CatalogConfig, ConfigError, HydrationConfig};
use favcache_storage::DbConfig;

use crate::telemetry::TelemetryConfig;

/// Everything the `favcache` binary needs, loaded in one place.
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    pub hydration: HydrationConfig,
    pub catalog: CatalogConfig,
    pub db: DbConfig,
    pub telemetry: TelemetryConfig,
}

impl EngineConfig {
    /// Load every section from `FAVCACHE_*` environment variables.
    ///
    /// Any invalid section is fatal; nothing falls back silently.
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = Self {
            hydration: HydrationConfig::from_env()?,
            catalog: CatalogConfig::from_env()?,
            db: DbConfig::from_env()?,
            telemetry: TelemetryConfig::from_env()?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.hydration.validate()?;
        self.catalog.validate()?;
        self.db.validate()?;
        self.telemetry.validate()
    }
}
