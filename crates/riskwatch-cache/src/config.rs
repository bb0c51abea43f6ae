//! Cache configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default freshness window (5 minutes)
pub const DEFAULT_FRESHNESS_WINDOW_SECS: u64 = 300;

/// Default fetch batch timeout (30 seconds)
pub const DEFAULT_FETCH_TIMEOUT_MS: u64 = 30_000;

/// Default page size for list requests
pub const DEFAULT_PAGE_SIZE: u32 = 100;

/// Prediction cache configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Age after which cached partitions are refetched
    pub freshness_window_secs: u64,
    /// Upper bound on a whole fetch batch; 0 disables the bound
    pub fetch_timeout_ms: u64,
    /// Records requested per list call
    pub page_size: u32,
}

impl CacheConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With freshness window
    #[inline]
    #[must_use]
    pub fn with_freshness_window(mut self, window: Duration) -> Self {
        self.freshness_window_secs = window.as_secs();
        self
    }

    /// With fetch timeout (`None` disables it)
    #[inline]
    #[must_use]
    pub fn with_fetch_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.fetch_timeout_ms =
            timeout.map_or(0, |t| u64::try_from(t.as_millis()).unwrap_or(u64::MAX));
        self
    }

    /// With page size
    #[inline]
    #[must_use]
    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size;
        self
    }

    /// Freshness window as a duration
    #[inline]
    #[must_use]
    pub fn freshness_window(&self) -> Duration {
        Duration::from_secs(self.freshness_window_secs)
    }

    /// Fetch timeout, if bounded
    #[inline]
    #[must_use]
    pub fn fetch_timeout(&self) -> Option<Duration> {
        (self.fetch_timeout_ms > 0).then(|| Duration::from_millis(self.fetch_timeout_ms))
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            freshness_window_secs: DEFAULT_FRESHNESS_WINDOW_SECS,
            fetch_timeout_ms: DEFAULT_FETCH_TIMEOUT_MS,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = CacheConfig::new();
        assert_eq!(config.freshness_window(), Duration::from_secs(300));
        assert_eq!(config.fetch_timeout(), Some(Duration::from_secs(30)));
        assert_eq!(config.page_size, 100);
    }

    #[test]
    fn timeout_can_be_disabled() {
        let config = CacheConfig::new().with_fetch_timeout(None);
        assert_eq!(config.fetch_timeout_ms, 0);
        assert_eq!(config.fetch_timeout(), None);
    }

    #[test]
    fn builder() {
        let config = CacheConfig::new()
            .with_freshness_window(Duration::from_secs(60))
            .with_fetch_timeout(Some(Duration::from_millis(1500)))
            .with_page_size(25);
        assert_eq!(config.freshness_window_secs, 60);
        assert_eq!(config.fetch_timeout_ms, 1500);
        assert_eq!(config.page_size, 25);
    }
}
