//! Tracing subscriber initialization
//!
//! Logs go to stderr as JSON by default; set
//! `FAVCACHE_JSON_LOGS=false` for human-readable output. `RUST_LOG`
//! overrides the configured default filter.

use favcache_core::config::env_parse;
use favcache_core::{ConfigError, FavcacheError, FavcacheResult};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Telemetry configuration from environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryConfig {
    /// Service name attached to the startup log line
    pub service_name: String,
    /// Environment (production, staging, development)
    pub environment: String,
    /// Emit JSON lines instead of the pretty formatter
    pub json_logs: bool,
    /// Filter used when `RUST_LOG` is unset
    pub default_filter: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "favcache".to_string(),
            environment: "development".to_string(),
            json_logs: true,
            default_filter: "favcache_engine=info,favcache_catalog=info,favcache_storage=info,warn"
                .to_string(),
        }
    }
}

impl TelemetryConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            service_name: std::env::var("FAVCACHE_SERVICE_NAME")
                .unwrap_or(defaults.service_name),
            environment: std::env::var("FAVCACHE_ENVIRONMENT").unwrap_or(defaults.environment),
            json_logs: env_parse("FAVCACHE_JSON_LOGS")?.unwrap_or(defaults.json_logs),
            default_filter: std::env::var("FAVCACHE_LOG_FILTER")
                .unwrap_or(defaults.default_filter),
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.service_name.trim().is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "service_name".to_string(),
            });
        }
        EnvFilter::try_new(&self.default_filter).map_err(|e| ConfigError::InvalidValue {
            field: "default_filter".to_string(),
            value: self.default_filter.clone(),
            reason: e.to_string(),
        })?;
        Ok(())
    }
}

/// Install the global tracing subscriber.
///
/// Call once at startup, before anything logs. A second call fails because
/// a global subscriber is already set.
pub fn init_tracing(config: &TelemetryConfig) -> FavcacheResult<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.default_filter))
        .map_err(|e| FavcacheError::Telemetry {
            reason: format!("Invalid log filter: {}", e),
        })?;

    let registry = tracing_subscriber::registry().with(env_filter);
    let result = if config.json_logs {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .try_init()
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init()
    };
    result.map_err(|e| FavcacheError::Telemetry {
        reason: format!("Failed to init subscriber: {}", e),
    })?;

    tracing::info!(
        service_name = %config.service_name,
        environment = %config.environment,
        json_logs = config.json_logs,
        "Telemetry initialized"
    );

    Ok(())
}
