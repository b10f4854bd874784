//! Structured logging setup for the Neural Ledger

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Telemetry configuration
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Service name stamped on every log line
    pub service_name: String,
    pub service_version: String,
    /// Emit JSON instead of human-readable lines
    pub json_format: bool,
    /// Log level filter, `RUST_LOG` syntax
    pub log_level: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "neural-ledger".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            json_format: false,
            log_level: "info".to_string(),
        }
    }
}

impl TelemetryConfig {
    pub fn from_env() -> Self {
        Self {
            service_name: std::env::var("LEDGER_SERVICE_NAME")
                .unwrap_or_else(|_| "neural-ledger".to_string()),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            json_format: std::env::var("LOG_JSON")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),
            log_level: std::env::var("LOG_LEVEL")
                .or_else(|_| std::env::var("RUST_LOG"))
                .unwrap_or_else(|_| "info".to_string()),
        }
    }
}

/// Install the global tracing subscriber.
///
/// Call once at startup. A second call returns an error from the subscriber
/// registry, which is deliberately not treated as fatal here so tests can
/// race to initialize.
pub fn init_telemetry(config: &TelemetryConfig) {
    let filter = EnvFilter::try_new(&config.log_level)
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(filter);

    let result = if config.json_format {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_target(true))
            .try_init()
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .try_init()
    };

    if result.is_ok() {
        tracing::info!(
            service = %config.service_name,
            version = %config.service_version,
            "telemetry initialized"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TelemetryConfig::default();
        assert_eq!(config.service_name, "neural-ledger");
        assert!(!config.json_format);
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_double_init_is_harmless() {
        let config = TelemetryConfig::default();
        init_telemetry(&config);
        init_telemetry(&config);
    }
}
