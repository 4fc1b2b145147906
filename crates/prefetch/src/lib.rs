//! # Prefetch Cache
//!
//! A predictive prefetching cache. Collaborators hand in resources they expect
//! to need next, tagged with a priority hint; the cache fetches them ahead of
//! use and keeps them in memory under a byte and item budget.
//!
//! ## Features
//!
//! - Priority, popularity and recency aware eviction with batched victims
//! - Budget adaptation from live network and storage probes
//! - Per-resource cancellation of in-flight fetches
//! - Exact hit/miss accounting and a serializable statistics snapshot
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use prefetch_cache::{
//!     CacheItemRequest, CacheOptions, HttpFetcher, HttpFetcherConfig, Priority,
//!     PrefetchOrchestrator, StaticProbe,
//! };
//!
//! # async fn run() -> Result<(), prefetch_cache::CacheError> {
//! let fetcher = Arc::new(HttpFetcher::new(&HttpFetcherConfig::default())?);
//! let probe = StaticProbe::unavailable();
//! let orchestrator = PrefetchOrchestrator::new(CacheOptions::default(), fetcher, &probe).await;
//!
//! let items = vec![
//!     CacheItemRequest::new("https://cdn.example.com/lesson/1.ts", Priority::High),
//!     CacheItemRequest::new("https://cdn.example.com/lesson/2.ts", Priority::Medium),
//! ];
//! let stats = orchestrator.run_prefetch_batch(&items).await?;
//! println!("{} items cached", stats.total_items);
//!
//! if let Some(bytes) = orchestrator.lookup("https://cdn.example.com/lesson/1.ts") {
//!     println!("cache hit: {} bytes", bytes.len());
//! }
//! # Ok(())
//! # }
//! ```

pub mod builder;
pub mod config;
pub mod error;
pub mod eviction;
pub mod fetcher;
pub mod orchestrator;
pub mod probe;
pub mod stats;
pub mod store;
pub mod types;

#[cfg(test)]
mod test_utils;

pub use builder::CacheOptionsBuilder;
pub use config::CacheOptions;
pub use error::{CacheError, ProbeError};
pub use eviction::{EvictionPolicy, EvictionTarget};
pub use fetcher::{HttpFetcher, HttpFetcherConfig, ResourceFetcher, create_client};
pub use orchestrator::{PrefetchOrchestrator, rank_requests};
pub use probe::{
    DiskProbe, EnvironmentProbe, HttpProbe, NetworkCondition, StaticProbe, StorageEstimate,
    SystemProbe, adapt_options,
};
pub use stats::{CacheStats, HumanSize, StatisticsReporter};
pub use store::{CacheStore, SharedStore};
pub use types::{AggregateStats, CacheEntry, CacheItemRequest, Priority};
