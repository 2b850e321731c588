//! Engine configuration
//!
//! Loaded from a TOML file; every section has defaults so a minimal file
//! (or none at all) yields a working configuration. Durations are given in
//! milliseconds in the file and converted once at load.

use searchsync_core_resilience::circuit_breaker::CircuitBreakerConfig;
use searchsync_core_resilience::retry::RetryConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Queue names and the table the validator accepts
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub sync_queue: String,
    pub dlq_queue: String,
    pub expected_table: String,
    /// Message TTL on the dead-letter queue, in days
    pub dlq_ttl_days: u32,
    /// Maximum parked messages before the broker drops the oldest
    pub dlq_max_length: u32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            sync_queue: "elasticsearch.sync".to_string(),
            dlq_queue: "elasticsearch.sync.dlq".to_string(),
            expected_table: "listings".to_string(),
            dlq_ttl_days: 7,
            dlq_max_length: 10_000,
        }
    }
}

/// Circuit breaker settings shared by both dependency breakers
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerSettings {
    pub failure_threshold: u32,
    pub success_threshold: u32,
    pub recovery_timeout_ms: u64,
    pub monitoring_window_ms: u64,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        let defaults = CircuitBreakerConfig::default();
        Self {
            failure_threshold: defaults.failure_threshold,
            success_threshold: defaults.success_threshold,
            recovery_timeout_ms: defaults.recovery_timeout.as_millis() as u64,
            monitoring_window_ms: defaults.monitoring_window.as_millis() as u64,
        }
    }
}

impl BreakerSettings {
    pub fn to_breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.failure_threshold,
            success_threshold: self.success_threshold,
            recovery_timeout: Duration::from_millis(self.recovery_timeout_ms),
            monitoring_window: Duration::from_millis(self.monitoring_window_ms),
        }
    }
}

/// Retry backoff settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        let defaults = RetryConfig::default();
        Self {
            max_retries: defaults.max_retries,
            base_delay_ms: defaults.base_delay.as_millis() as u64,
            max_delay_ms: defaults.max_delay.as_millis() as u64,
            backoff_multiplier: defaults.backoff_multiplier,
        }
    }
}

impl RetrySettings {
    pub fn to_retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_retries: self.max_retries,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            backoff_multiplier: self.backoff_multiplier,
        }
    }
}

/// Health aggregator settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthSettings {
    pub history_limit: usize,
    pub probe_timeout_ms: u64,
    /// How often the embedding host should run the aggregate check
    pub check_interval_ms: u64,
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self {
            history_limit: 1000,
            probe_timeout_ms: 5000,
            check_interval_ms: 30_000,
        }
    }
}

impl HealthSettings {
    pub fn to_health_config(&self) -> crate::health::HealthConfig {
        crate::health::HealthConfig {
            history_limit: self.history_limit,
            probe_timeout: Duration::from_millis(self.probe_timeout_ms),
        }
    }
}

/// Top-level engine configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub queue: QueueConfig,
    pub circuit_breaker: BreakerSettings,
    pub retry: RetrySettings,
    pub health: HealthSettings,
}

impl EngineConfig {
    /// Load and validate a TOML config file
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let config: EngineConfig = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queue.sync_queue.is_empty() {
            return Err(ConfigError::Invalid("queue.sync_queue must not be empty".into()));
        }
        if self.queue.dlq_queue == self.queue.sync_queue {
            return Err(ConfigError::Invalid(
                "queue.dlq_queue must differ from queue.sync_queue".into(),
            ));
        }
        if self.queue.expected_table.is_empty() {
            return Err(ConfigError::Invalid("queue.expected_table must not be empty".into()));
        }
        if self.circuit_breaker.failure_threshold == 0 {
            return Err(ConfigError::Invalid(
                "circuit_breaker.failure_threshold must be at least 1".into(),
            ));
        }
        if self.circuit_breaker.success_threshold == 0 {
            return Err(ConfigError::Invalid(
                "circuit_breaker.success_threshold must be at least 1".into(),
            ));
        }
        if self.retry.backoff_multiplier < 1.0 {
            return Err(ConfigError::Invalid(
                "retry.backoff_multiplier must be at least 1.0".into(),
            ));
        }
        if self.retry.max_delay_ms < self.retry.base_delay_ms {
            return Err(ConfigError::Invalid(
                "retry.max_delay_ms must not be below retry.base_delay_ms".into(),
            ));
        }
        if self.health.history_limit == 0 {
            return Err(ConfigError::Invalid("health.history_limit must be at least 1".into()));
        }
        if self.health.check_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "health.check_interval_ms must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
