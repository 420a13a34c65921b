//! Cache configuration — typed, serde-backed, with defaults for every field.
//!
//! Durations are expressed in milliseconds in the serialized form and exposed
//! as [`Duration`] through accessor methods.
//!
//! ```json
//! {
//!   "capacity": 10000,
//!   "fresh_ttl_ms": 30000,
//!   "stale_ttl_ms": 300000,
//!   "fetch_timeout_ms": 5000,
//!   "refresh": { "workers": 4, "queue_depth": 1024, "max_attempts": 3 }
//! }
//! ```

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::background::{QueueConfig, RetryPolicy};

/// Errors produced while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Top-level cache settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum number of entries held; the least recently used is evicted beyond it.
    pub capacity: usize,
    /// How long after a fetch an entry is served without a refresh.
    pub fresh_ttl_ms: u64,
    /// Grace window after `fresh_ttl_ms` during which the old value is still
    /// served while a background refresh runs.
    pub stale_ttl_ms: u64,
    /// Upper bound for a single origin fetch.
    pub fetch_timeout_ms: u64,
    pub refresh: RefreshConfig,
}

/// Background refresh worker settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RefreshConfig {
    pub workers: usize,
    pub queue_depth: usize,
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: 10_000,
            fresh_ttl_ms: 30_000,
            stale_ttl_ms: 300_000,
            fetch_timeout_ms: 5_000,
            refresh: RefreshConfig::default(),
        }
    }
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_depth: 1024,
            max_attempts: 3,
            backoff_base_ms: 100,
            backoff_max_ms: 5_000,
        }
    }
}

impl CacheConfig {
    /// Parses and validates a JSON document. Missing fields take their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Json`] for malformed JSON and
    /// [`ConfigError::Invalid`] when [`validate`](Self::validate) fails.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a JSON config file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        Self::from_json_str(&raw)
    }

    /// Checks the invariants the cache relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.capacity == 0 {
            return Err(ConfigError::Invalid("capacity must be greater than zero".into()));
        }
        if self.fresh_ttl_ms == 0 {
            return Err(ConfigError::Invalid("fresh_ttl_ms must be greater than zero".into()));
        }
        if self.fetch_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "fetch_timeout_ms must be greater than zero".into(),
            ));
        }
        self.refresh.validate()
    }

    pub fn fresh_ttl(&self) -> Duration {
        Duration::from_millis(self.fresh_ttl_ms)
    }

    pub fn stale_ttl(&self) -> Duration {
        Duration::from_millis(self.stale_ttl_ms)
    }

    /// Age at which an entry stops being servable at all.
    pub fn max_age(&self) -> Duration {
        self.fresh_ttl() + self.stale_ttl()
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }

    #[must_use]
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    #[must_use]
    pub fn with_fresh_ttl(mut self, ttl: Duration) -> Self {
        self.fresh_ttl_ms = duration_ms(ttl);
        self
    }

    #[must_use]
    pub fn with_stale_ttl(mut self, ttl: Duration) -> Self {
        self.stale_ttl_ms = duration_ms(ttl);
        self
    }

    #[must_use]
    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout_ms = duration_ms(timeout);
        self
    }

    #[must_use]
    pub fn with_refresh(mut self, refresh: RefreshConfig) -> Self {
        self.refresh = refresh;
        self
    }
}

impl RefreshConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::Invalid("refresh.workers must be greater than zero".into()));
        }
        if self.queue_depth == 0 {
            return Err(ConfigError::Invalid(
                "refresh.queue_depth must be greater than zero".into(),
            ));
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "refresh.max_attempts must be greater than zero".into(),
            ));
        }
        if self.backoff_base_ms > self.backoff_max_ms {
            return Err(ConfigError::Invalid(format!(
                "refresh.backoff_base_ms ({}) exceeds refresh.backoff_max_ms ({})",
                self.backoff_base_ms, self.backoff_max_ms
            )));
        }
        Ok(())
    }

    /// Worker pool shape for the background queue.
    pub fn queue_config(&self) -> QueueConfig {
        QueueConfig {
            workers: self.workers,
            depth: self.queue_depth,
            retry: RetryPolicy {
                max_attempts: self.max_attempts,
                base_delay: Duration::from_millis(self.backoff_base_ms),
                max_delay: Duration::from_millis(self.backoff_max_ms),
            },
        }
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
