//! # Builder for CacheOptions
//!
//! Fluent construction of [`CacheOptions`] instances.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use prefetch_cache::CacheOptions;
//!
//! let options = CacheOptions::builder()
//!     .with_max_size_bytes(64 * 1024 * 1024)
//!     .with_max_items(20)
//!     .with_ttl(Duration::from_secs(600))
//!     .with_prefetch_lookahead(Duration::from_secs(60))
//!     .with_debug_logging(true)
//!     .build();
//!
//! assert_eq!(options.max_items, 20);
//! assert_eq!(options.prefetch_lookahead_secs, 60);
//! ```

use std::time::Duration;

use crate::CacheOptions;

/// Builder for creating CacheOptions instances with a fluent API
#[derive(Debug, Clone)]
pub struct CacheOptionsBuilder {
    options: CacheOptions,
}

impl CacheOptionsBuilder {
    /// Create a new builder with default options
    pub fn new() -> Self {
        Self {
            options: CacheOptions::default(),
        }
    }

    pub fn with_max_size_bytes(mut self, max_size_bytes: u64) -> Self {
        self.options.max_size_bytes = max_size_bytes;
        self
    }

    pub fn with_max_items(mut self, max_items: usize) -> Self {
        self.options.max_items = max_items;
        self
    }

    /// Set the staleness threshold. A zero duration disables age-based staleness.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.options.ttl_millis = ttl.as_millis().try_into().unwrap_or(u64::MAX);
        self
    }

    pub fn with_network_speed_threshold_kbps(mut self, threshold: f64) -> Self {
        self.options.network_speed_threshold_kbps = threshold;
        self
    }

    /// Stored in whole seconds, rounded up so a sub-second window never
    /// collapses to zero.
    pub fn with_prefetch_lookahead(mut self, lookahead: Duration) -> Self {
        let secs = lookahead.as_secs() + u64::from(lookahead.subsec_nanos() > 0);
        self.options.prefetch_lookahead_secs = secs;
        self
    }

    pub fn with_debug_logging(mut self, enabled: bool) -> Self {
        self.options.debug_logging = enabled;
        self
    }

    pub fn build(self) -> CacheOptions {
        self.options
    }
}

impl Default for CacheOptionsBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookahead_rounds_sub_second_parts_up() {
        let options = CacheOptionsBuilder::new()
            .with_prefetch_lookahead(Duration::from_millis(500))
            .build();
        assert_eq!(options.prefetch_lookahead_secs, 1);

        let options = CacheOptionsBuilder::new()
            .with_prefetch_lookahead(Duration::from_millis(90_001))
            .build();
        assert_eq!(options.prefetch_lookahead_secs, 91);
    }

    #[test]
    fn test_whole_second_lookahead_is_kept() {
        let options = CacheOptionsBuilder::new()
            .with_prefetch_lookahead(Duration::from_secs(45))
            .build();
        assert_eq!(options.prefetch_lookahead(), Duration::from_secs(45));

        let options = CacheOptionsBuilder::new()
            .with_prefetch_lookahead(Duration::ZERO)
            .build();
        assert_eq!(options.prefetch_lookahead_secs, 0);
    }
}
