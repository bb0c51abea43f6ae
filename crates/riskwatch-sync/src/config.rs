//! Synchronization configuration
//!
//! Loaded from TOML; every key is optional and falls back to its default.
//!
//! ```toml
//! stats_freshness_window_secs = 300
//! login_settle_delay_ms = 150
//! job_poll_interval_ms = 2000
//! failed_job_retention_secs = 30
//!
//! [cache]
//! freshness_window_secs = 300
//! fetch_timeout_ms = 30000
//! page_size = 100
//! ```

use crate::error::ConfigError;
use riskwatch_cache::CacheConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default statistics freshness window (5 minutes)
pub const DEFAULT_STATS_FRESHNESS_WINDOW_SECS: u64 = 300;

/// Default delay between a login event and the forced refresh
pub const DEFAULT_LOGIN_SETTLE_DELAY_MS: u64 = 150;

/// Default bulk job poll interval
pub const DEFAULT_JOB_POLL_INTERVAL_MS: u64 = 2_000;

/// Default retention of failed bulk jobs before automatic removal
pub const DEFAULT_FAILED_JOB_RETENTION_SECS: u64 = 30;

/// Synchronization layer configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Age after which the statistics snapshot is refetched
    pub stats_freshness_window_secs: u64,
    /// Wait after a login event before forcing a refresh
    pub login_settle_delay_ms: u64,
    /// Interval between bulk job polls
    pub job_poll_interval_ms: u64,
    /// Time a failed job stays visible; 0 keeps it until dismissed
    pub failed_job_retention_secs: u64,
    /// Prediction cache settings
    pub cache: CacheConfig,
}

impl SyncConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With prediction cache settings
    #[inline]
    #[must_use]
    pub fn with_cache(mut self, cache: CacheConfig) -> Self {
        self.cache = cache;
        self
    }

    /// With statistics freshness window
    #[inline]
    #[must_use]
    pub fn with_stats_freshness_window(mut self, window: Duration) -> Self {
        self.stats_freshness_window_secs = window.as_secs();
        self
    }

    /// With login settle delay
    #[inline]
    #[must_use]
    pub fn with_login_settle_delay(mut self, delay: Duration) -> Self {
        self.login_settle_delay_ms = millis(delay);
        self
    }

    /// With job poll interval
    #[inline]
    #[must_use]
    pub fn with_job_poll_interval(mut self, interval: Duration) -> Self {
        self.job_poll_interval_ms = millis(interval);
        self
    }

    /// With failed job retention (`None` keeps failed jobs)
    #[inline]
    #[must_use]
    pub fn with_failed_job_retention(mut self, retention: Option<Duration>) -> Self {
        self.failed_job_retention_secs = retention.map_or(0, |r| r.as_secs());
        self
    }

    /// Statistics freshness window
    #[inline]
    #[must_use]
    pub fn stats_freshness_window(&self) -> Duration {
        Duration::from_secs(self.stats_freshness_window_secs)
    }

    /// Login settle delay
    #[inline]
    #[must_use]
    pub fn login_settle_delay(&self) -> Duration {
        Duration::from_millis(self.login_settle_delay_ms)
    }

    /// Job poll interval
    #[inline]
    #[must_use]
    pub fn job_poll_interval(&self) -> Duration {
        Duration::from_millis(self.job_poll_interval_ms)
    }

    /// Failed job retention, if bounded
    #[inline]
    #[must_use]
    pub fn failed_job_retention(&self) -> Option<Duration> {
        (self.failed_job_retention_secs > 0)
            .then(|| Duration::from_secs(self.failed_job_retention_secs))
    }

    /// Reject values the runtime cannot work with
    ///
    /// # Errors
    /// Returns `ConfigError::Invalid` naming the first bad field
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.job_poll_interval_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "job_poll_interval_ms",
                reason: "must be positive".to_string(),
            });
        }
        if self.cache.page_size == 0 {
            return Err(ConfigError::Invalid {
                field: "cache.page_size",
                reason: "must be positive".to_string(),
            });
        }
        Ok(())
    }

    /// Parse and validate TOML
    ///
    /// # Errors
    /// Returns `ConfigError` on malformed TOML or invalid values
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(input).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Render as TOML
    ///
    /// # Errors
    /// Returns `ConfigError::Serialize` if rendering fails
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            stats_freshness_window_secs: DEFAULT_STATS_FRESHNESS_WINDOW_SECS,
            login_settle_delay_ms: DEFAULT_LOGIN_SETTLE_DELAY_MS,
            job_poll_interval_ms: DEFAULT_JOB_POLL_INTERVAL_MS,
            failed_job_retention_secs: DEFAULT_FAILED_JOB_RETENTION_SECS,
            cache: CacheConfig::default(),
        }
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn defaults() {
        let config = SyncConfig::default();
        assert_eq!(config.stats_freshness_window(), Duration::from_secs(300));
        assert_eq!(config.login_settle_delay(), Duration::from_millis(150));
        assert_eq!(config.job_poll_interval(), Duration::from_secs(2));
        assert_eq!(config.failed_job_retention(), Some(Duration::from_secs(30)));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn empty_toml_is_default() {
        assert_eq!(SyncConfig::from_toml_str("").unwrap(), SyncConfig::default());
    }

    #[test]
    fn partial_toml_overrides() {
        let config = SyncConfig::from_toml_str(
            r"
            failed_job_retention_secs = 0

            [cache]
            fetch_timeout_ms = 5000
            ",
        )
        .unwrap();
        assert_eq!(config.failed_job_retention(), None);
        assert_eq!(config.cache.fetch_timeout(), Some(Duration::from_secs(5)));
        assert_eq!(config.cache.page_size, 100);
        assert_eq!(config.job_poll_interval_ms, DEFAULT_JOB_POLL_INTERVAL_MS);
    }

    #[test]
    fn toml_roundtrip() {
        let config = SyncConfig::new()
            .with_login_settle_delay(Duration::from_millis(200))
            .with_failed_job_retention(None);
        let text = config.to_toml_string().unwrap();
        assert_eq!(SyncConfig::from_toml_str(&text).unwrap(), config);
    }

    #[test]
    fn rejects_zero_poll_interval() {
        let err = SyncConfig::from_toml_str("job_poll_interval_ms = 0").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                field: "job_poll_interval_ms",
                ..
            }
        ));
    }

    #[test]
    fn rejects_malformed_toml() {
        assert!(matches!(
            SyncConfig::from_toml_str("job_poll_interval_ms = \"soon\""),
            Err(ConfigError::Parse(_))
        ));
    }
}
