use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::builder::CacheOptionsBuilder;

pub const DEFAULT_MAX_SIZE_BYTES: u64 = 500 * 1024 * 1024; // 500MB
pub const DEFAULT_MAX_ITEMS: usize = 50;
pub const DEFAULT_TTL_MILLIS: u64 = 24 * 60 * 60 * 1000; // 24 hours
pub const DEFAULT_NETWORK_SPEED_THRESHOLD_KBPS: f64 = 1000.0; // 1Mbps
pub const DEFAULT_PREFETCH_LOOKAHEAD_SECS: u64 = 120; // 2 minutes

/// Size assumed for a request that carries no size hint.
pub const DEFAULT_SIZE_ESTIMATE: u64 = 5 * 1024 * 1024; // 5MB

/// Budget and behaviour options for a cache instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheOptions {
    /// Hard ceiling on the total payload bytes held by the store
    pub max_size_bytes: u64,

    /// Hard ceiling on the number of entries held by the store
    pub max_items: usize,

    /// Entries older than this are stale and evicted first; 0 disables age staleness
    pub ttl_millis: u64,

    /// Below this measured throughput the look-ahead window shrinks
    pub network_speed_threshold_kbps: f64,

    /// How far ahead, in content time, resources are prefetched
    pub prefetch_lookahead_secs: u64,

    /// Emit per-item diagnostic events
    pub debug_logging: bool,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            max_size_bytes: DEFAULT_MAX_SIZE_BYTES,
            max_items: DEFAULT_MAX_ITEMS,
            ttl_millis: DEFAULT_TTL_MILLIS,
            network_speed_threshold_kbps: DEFAULT_NETWORK_SPEED_THRESHOLD_KBPS,
            prefetch_lookahead_secs: DEFAULT_PREFETCH_LOOKAHEAD_SECS,
            debug_logging: false,
        }
    }
}

impl CacheOptions {
    pub fn builder() -> CacheOptionsBuilder {
        CacheOptionsBuilder::new()
    }

    /// Staleness threshold, `None` when age-based staleness is disabled.
    pub fn ttl(&self) -> Option<Duration> {
        (self.ttl_millis > 0).then(|| Duration::from_millis(self.ttl_millis))
    }

    pub fn prefetch_lookahead(&self) -> Duration {
        Duration::from_secs(self.prefetch_lookahead_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = CacheOptions::default();
        assert_eq!(options.max_size_bytes, 500 * 1024 * 1024);
        assert_eq!(options.max_items, 50);
        assert_eq!(options.ttl(), Some(Duration::from_secs(24 * 60 * 60)));
        assert_eq!(options.prefetch_lookahead(), Duration::from_secs(120));
        assert!(!options.debug_logging);
    }

    #[test]
    fn test_zero_ttl_disables_staleness() {
        let options = CacheOptions {
            ttl_millis: 0,
            ..Default::default()
        };
        assert_eq!(options.ttl(), None);
    }

    #[test]
    fn test_partial_json_falls_back_to_defaults() {
        let options: CacheOptions =
            serde_json::from_str(r#"{ "max_items": 10, "debug_logging": true }"#).unwrap();
        assert_eq!(options.max_items, 10);
        assert!(options.debug_logging);
        assert_eq!(options.max_size_bytes, DEFAULT_MAX_SIZE_BYTES);
        assert_eq!(options.prefetch_lookahead_secs, DEFAULT_PREFETCH_LOOKAHEAD_SECS);
    }
}
