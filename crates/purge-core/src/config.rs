//! Engine configuration
//!
//! Every knob has a default; a TOML file only needs the fields it changes.
//!
//! ```toml
//! batch_size = 25
//! concurrency = 4
//! max_attempts = 10
//!
//! [backoff]
//! base_delay_ms = 1000
//! max_delay_ms = 10000
//! jitter_min_ms = 100
//! jitter_max_ms = 500
//! ```

use crate::error::ConfigError;
use crate::store::MAX_BATCH_SIZE;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Purge engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PurgeConfig {
    /// Requests per batch-write call
    pub batch_size: usize,
    /// Batch-write calls allowed in flight at once
    pub concurrency: usize,
    /// Rounds with leftovers before failing terminally
    pub max_attempts: u32,
    /// Delay between rounds
    pub backoff: BackoffConfig,
}

impl PurgeConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With batch size
    #[inline]
    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// With concurrency degree
    #[inline]
    #[must_use]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// With retry ceiling
    #[inline]
    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// With backoff settings
    #[inline]
    #[must_use]
    pub fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }

    /// Parse from TOML and validate
    ///
    /// # Errors
    /// [`ConfigError::Parse`] on malformed TOML, [`ConfigError::Invalid`] if a
    /// field is out of range.
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Read a TOML file and validate
    ///
    /// # Errors
    /// [`ConfigError::Io`] if the file cannot be read, otherwise as
    /// [`from_toml_str`](Self::from_toml_str).
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_toml_str(&source)
    }

    /// Render as TOML
    ///
    /// # Errors
    /// [`ConfigError::Parse`] if serialization fails.
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Reject values the engine cannot run with
    ///
    /// # Errors
    /// [`ConfigError::Invalid`] naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 || self.batch_size > MAX_BATCH_SIZE {
            return Err(ConfigError::invalid(
                "batch_size",
                format!("must be between 1 and {MAX_BATCH_SIZE}, got {}", self.batch_size),
            ));
        }
        if self.concurrency == 0 {
            return Err(ConfigError::invalid("concurrency", "must be at least 1"));
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::invalid("max_attempts", "must be at least 1"));
        }
        self.backoff.validate()
    }
}

impl Default for PurgeConfig {
    fn default() -> Self {
        Self {
            batch_size: MAX_BATCH_SIZE,
            concurrency: 4,
            max_attempts: 10,
            backoff: BackoffConfig::default(),
        }
    }
}

/// Exponential backoff settings, in milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    /// Delay before the first retry
    pub base_delay_ms: u64,
    /// Upper bound on the exponential part
    pub max_delay_ms: u64,
    /// Smallest jitter added
    pub jitter_min_ms: u64,
    /// Largest jitter added
    pub jitter_max_ms: u64,
}

impl BackoffConfig {
    /// No jitter, for deterministic timing
    #[inline]
    #[must_use]
    pub fn without_jitter(mut self) -> Self {
        self.jitter_min_ms = 0;
        self.jitter_max_ms = 0;
        self
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.base_delay_ms > self.max_delay_ms {
            return Err(ConfigError::invalid(
                "backoff.base_delay_ms",
                format!(
                    "{} exceeds max_delay_ms {}",
                    self.base_delay_ms, self.max_delay_ms
                ),
            ));
        }
        if self.jitter_min_ms > self.jitter_max_ms {
            return Err(ConfigError::invalid(
                "backoff.jitter_min_ms",
                format!(
                    "{} exceeds jitter_max_ms {}",
                    self.jitter_min_ms, self.jitter_max_ms
                ),
            ));
        }
        Ok(())
    }
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 1_000,
            max_delay_ms: 10_000,
            jitter_min_ms: 100,
            jitter_max_ms: 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn defaults_match_store_limits() {
        let config = PurgeConfig::default();
        assert_eq!(config.batch_size, 25);
        assert_eq!(config.concurrency, 4);
        assert_eq!(config.max_attempts, 10);
        assert_eq!(config.backoff.base_delay_ms, 1_000);
        assert_eq!(config.backoff.max_delay_ms, 10_000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = PurgeConfig::from_toml_str(
            r"
            concurrency = 8

            [backoff]
            jitter_max_ms = 250
            ",
        )
        .unwrap();

        assert_eq!(config.concurrency, 8);
        assert_eq!(config.batch_size, 25);
        assert_eq!(config.backoff.jitter_max_ms, 250);
        assert_eq!(config.backoff.jitter_min_ms, 100);
    }

    #[test]
    fn rejects_oversized_batches() {
        let err = PurgeConfig::new().with_batch_size(26).validate().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "batch_size", .. }));
    }

    #[test]
    fn rejects_zero_concurrency_and_attempts() {
        assert!(PurgeConfig::new().with_concurrency(0).validate().is_err());
        assert!(PurgeConfig::new().with_max_attempts(0).validate().is_err());
    }

    #[test]
    fn rejects_inverted_jitter() {
        let backoff = BackoffConfig {
            jitter_min_ms: 600,
            ..BackoffConfig::default()
        };
        assert!(PurgeConfig::new().with_backoff(backoff).validate().is_err());
    }

    #[test]
    fn malformed_toml_is_parse_error() {
        let err = PurgeConfig::from_toml_str("concurrency = \"many\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn toml_round_trip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("purge.toml");
        let config = PurgeConfig::new().with_concurrency(2).with_max_attempts(3);
        std::fs::write(&path, config.to_toml_string().unwrap()).unwrap();

        assert_eq!(PurgeConfig::from_toml_file(&path).unwrap(), config);
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = PurgeConfig::from_toml_file("/nonexistent/purge.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
