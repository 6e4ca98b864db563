//! Cache configuration.
//!
//! Controls the response cache via the `[cache]` section of `fpcache.toml`.

use std::num::NonZeroUsize;
use std::time::Duration;

use serde::Deserialize;

// Default values for cache configuration
const DEFAULT_MAX_ENTRIES: usize = 10_000;
const DEFAULT_TTL_SECONDS: u64 = 0;
const DEFAULT_SWEEP_INTERVAL_SECONDS: u64 = 60;
const DEFAULT_INVALIDATION_LOG_LIMIT: usize = 1_024;
pub const DEFAULT_BLANKET_TAG: &str = "FPC";
pub const DEFAULT_VARIANT_HEADERS: [&str; 2] = ["store", "content-currency"];

/// Cache configuration from `fpcache.toml`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Serve and store responses. When false every request passes through.
    pub enabled: bool,
    /// Maximum number of stored responses before LRU eviction.
    pub max_entries: usize,
    /// Lifetime of a stored response; zero keeps it until invalidated.
    pub default_ttl_seconds: u64,
    /// Interval of the background expiry/reconciliation sweep.
    pub sweep_interval_seconds: u64,
    /// Marker tag that makes a response eligible for storage.
    pub blanket_tag: String,
    /// Request headers that become variant context dimensions.
    pub variant_headers: Vec<String>,
    /// How many past invalidations are remembered to reject stale puts.
    pub invalidation_log_limit: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: DEFAULT_MAX_ENTRIES,
            default_ttl_seconds: DEFAULT_TTL_SECONDS,
            sweep_interval_seconds: DEFAULT_SWEEP_INTERVAL_SECONDS,
            blanket_tag: DEFAULT_BLANKET_TAG.to_string(),
            variant_headers: DEFAULT_VARIANT_HEADERS
                .iter()
                .map(|name| name.to_string())
                .collect(),
            invalidation_log_limit: DEFAULT_INVALIDATION_LOG_LIMIT,
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            enabled: settings.enabled,
            max_entries: settings.max_entries.get(),
            default_ttl_seconds: settings.default_ttl.map_or(0, |ttl| ttl.as_secs()),
            sweep_interval_seconds: settings.sweep_interval.as_secs(),
            blanket_tag: settings.blanket_tag.clone(),
            variant_headers: settings.variant_headers.clone(),
            invalidation_log_limit: settings.invalidation_log_limit.get(),
        }
    }
}

impl CacheConfig {
    /// Returns the entry limit as NonZeroUsize, clamping to 1 if zero.
    pub fn max_entries_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.max_entries).unwrap_or(NonZeroUsize::MIN)
    }

    /// Returns the invalidation log limit as NonZeroUsize, clamping to 1 if zero.
    pub fn invalidation_log_limit_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.invalidation_log_limit).unwrap_or(NonZeroUsize::MIN)
    }

    /// `None` means entries never expire on their own.
    pub fn default_ttl(&self) -> Option<Duration> {
        (self.default_ttl_seconds > 0).then(|| Duration::from_secs(self.default_ttl_seconds))
    }

    /// Sweep cadence, clamped to at least one second.
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_seconds.max(1))
    }
}
