//! Environment-driven service configuration

use std::time::Duration;

use crate::consumer::ConsumerConfig;
use crate::infra::error::{LedgerError, Result};
use crate::infra::ProcessorConfig;

fn env_ms(name: &str, default_ms: u64) -> Result<Duration> {
    match std::env::var(name) {
        Ok(raw) => raw
            .parse::<u64>()
            .map(Duration::from_millis)
            .map_err(|_| LedgerError::Configuration(format!("{name} must be an integer, got {raw:?}"))),
        Err(_) => Ok(Duration::from_millis(default_ms)),
    }
}

fn env_u32(name: &str, default: u32) -> Result<u32> {
    match std::env::var(name) {
        Ok(raw) => raw
            .parse::<u32>()
            .map_err(|_| LedgerError::Configuration(format!("{name} must be an integer, got {raw:?}"))),
        Err(_) => Ok(default),
    }
}

/// Top-level ledger configuration
#[derive(Debug, Clone)]
pub struct LedgerConfig {
    /// Durable tier database URL, e.g. `sqlite://ledger.db?mode=rwc`
    pub durable_url: String,
    pub durable_timeout: Duration,
    pub realtime_timeout: Duration,
    pub analytical_timeout: Duration,
    pub signing_timeout: Duration,
    pub max_link_retries: u32,
    /// Interval between reconciliation drains
    pub reconcile_interval: Duration,
    /// Replay attempts before an analytical write is abandoned
    pub reconcile_max_attempts: u32,
    pub consumer_poll_interval: Duration,
    pub consumer_max_attempts: u32,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            durable_url: "sqlite://neural_ledger.db?mode=rwc".to_string(),
            durable_timeout: Duration::from_secs(5),
            realtime_timeout: Duration::from_millis(500),
            analytical_timeout: Duration::from_secs(10),
            signing_timeout: Duration::from_secs(2),
            max_link_retries: 5,
            reconcile_interval: Duration::from_secs(30),
            reconcile_max_attempts: 10,
            consumer_poll_interval: Duration::from_millis(100),
            consumer_max_attempts: 5,
        }
    }
}

impl LedgerConfig {
    /// Read configuration from `LEDGER_*` environment variables, falling
    /// back to defaults for anything unset. Set but unparsable values are a
    /// configuration error, not a silent default.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            durable_url: std::env::var("LEDGER_DURABLE_URL").unwrap_or(defaults.durable_url),
            durable_timeout: env_ms("LEDGER_DURABLE_TIMEOUT_MS", 5_000)?,
            realtime_timeout: env_ms("LEDGER_REALTIME_TIMEOUT_MS", 500)?,
            analytical_timeout: env_ms("LEDGER_ANALYTICAL_TIMEOUT_MS", 10_000)?,
            signing_timeout: env_ms("LEDGER_SIGNING_TIMEOUT_MS", 2_000)?,
            max_link_retries: env_u32("LEDGER_MAX_LINK_RETRIES", 5)?,
            reconcile_interval: env_ms("LEDGER_RECONCILE_INTERVAL_MS", 30_000)?,
            reconcile_max_attempts: env_u32("LEDGER_RECONCILE_MAX_ATTEMPTS", 10)?,
            consumer_poll_interval: env_ms("LEDGER_CONSUMER_POLL_MS", 100)?,
            consumer_max_attempts: env_u32("LEDGER_CONSUMER_MAX_ATTEMPTS", 5)?,
        })
    }

    pub fn processor_config(&self) -> ProcessorConfig {
        ProcessorConfig {
            max_link_retries: self.max_link_retries,
            durable_timeout: self.durable_timeout,
            realtime_timeout: self.realtime_timeout,
            analytical_timeout: self.analytical_timeout,
            signing_timeout: self.signing_timeout,
            ..ProcessorConfig::default()
        }
    }

    pub fn consumer_config(&self) -> ConsumerConfig {
        ConsumerConfig {
            poll_interval: self.consumer_poll_interval,
            max_attempts: self.consumer_max_attempts,
        }
    }
}
