//! Telemetry: logging and metrics.
//!
//! - **Logging**: structured JSON/pretty/compact output through `tracing-subscriber`
//! - **Metrics**: Prometheus counters for deltas, merges, catch-up and errors
//!
//! # Example
//!
//! ```rust,no_run
//! use lapsync_core::telemetry::{TelemetryConfig, init_telemetry};
//!
//! let config = TelemetryConfig::default();
//! let _telemetry = init_telemetry(&config).expect("Failed to initialize telemetry");
//! ```

pub mod logging;
pub mod metrics;

pub use logging::{init_logging, LogFormat, LoggingConfig};
pub use metrics::{init_metrics, MetricsConfig, MetricsRegistry, SyncMetrics};

use serde::{Deserialize, Serialize};

/// Unified telemetry configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TelemetryConfig {
    /// Service name attached to metrics and startup logs
    #[serde(default = "default_service_name")]
    pub service_name: String,

    /// Environment (development, production)
    #[serde(default = "default_environment")]
    pub environment: String,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Metrics configuration
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: default_service_name(),
            environment: default_environment(),
            logging: LoggingConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

fn default_service_name() -> String {
    "lapsync".to_string()
}

fn default_environment() -> String {
    std::env::var("LAPSYNC_ENVIRONMENT").unwrap_or_else(|_| "production".to_string())
}

/// Initialize metrics, then logging. Call once at startup.
///
/// # Errors
///
/// Returns an error if either component fails to initialize.
pub fn init_telemetry(config: &TelemetryConfig) -> anyhow::Result<TelemetryHandle> {
    let metrics = init_metrics(&config.metrics, &config.service_name)?;
    init_logging(&config.logging, &config.environment)?;

    ::tracing::info!(
        service_name = %config.service_name,
        environment = %config.environment,
        version = env!("CARGO_PKG_VERSION"),
        "Telemetry initialized"
    );

    Ok(TelemetryHandle { metrics })
}

/// Keeps the metrics registry alive for the life of the process.
pub struct TelemetryHandle {
    pub metrics: MetricsRegistry,
}

impl TelemetryHandle {
    pub fn shutdown(self) {
        ::tracing::info!("Telemetry shutdown complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_telemetry_config_defaults() {
        let config = TelemetryConfig::default();
        assert_eq!(config.service_name, "lapsync");
        assert!(config.metrics.enabled);
    }

    #[test]
    fn test_telemetry_config_from_partial_json() {
        let config: TelemetryConfig =
            serde_json::from_str(r#"{"logging": {"format": "pretty"}}"#).unwrap();
        assert_eq!(config.logging.format, LogFormat::Pretty);
        assert_eq!(config.service_name, "lapsync");
    }
}
