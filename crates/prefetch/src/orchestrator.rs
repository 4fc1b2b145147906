//! # Prefetch Orchestrator
//!
//! Turns candidate lists into cache population. Items are ranked by priority,
//! fetched one at a time and committed to the store unless their fetch was
//! aborted. The store outlives [`PrefetchOrchestrator::shutdown`]: lookups and
//! statistics keep working, only new prefetches are refused.

use std::cmp::Reverse;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use bytes::Bytes;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{CacheOptions, DEFAULT_SIZE_ESTIMATE};
use crate::error::CacheError;
use crate::fetcher::ResourceFetcher;
use crate::probe::{EnvironmentProbe, adapt_options};
use crate::stats::{CacheStats, HumanSize, StatisticsReporter};
use crate::store::{CacheStore, SharedStore};
use crate::types::{AggregateStats, CacheEntry, CacheItemRequest};

struct InFlight {
    id: u64,
    token: CancellationToken,
}

/// Removes the in-flight record on every exit path, including a dropped future.
struct InFlightGuard<'a> {
    in_flight: &'a Mutex<HashMap<String, InFlight>>,
    key: &'a str,
    id: u64,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        let mut in_flight = self.in_flight.lock();
        if in_flight.get(self.key).is_some_and(|record| record.id == self.id) {
            in_flight.remove(self.key);
        }
    }
}

#[derive(Debug, Default)]
struct BatchSummary {
    fetched: usize,
    already_cached: usize,
    deferred: usize,
    cancelled: usize,
    failed: usize,
}

/// Ranks prefetch candidates and drives fetch-and-insert for the ones not
/// already cached. Fetches within a batch run one at a time, in ranked order.
pub struct PrefetchOrchestrator {
    store: SharedStore,
    fetcher: Arc<dyn ResourceFetcher>,
    options: CacheOptions,
    in_flight: Mutex<HashMap<String, InFlight>>,
    root: CancellationToken,
    next_id: AtomicU64,
    shut_down: AtomicBool,
}

impl PrefetchOrchestrator {
    /// Adapt `options` to the measured environment once, then build a fresh store.
    pub async fn new(
        options: CacheOptions,
        fetcher: Arc<dyn ResourceFetcher>,
        probe: &dyn EnvironmentProbe,
    ) -> Self {
        let options = adapt_options(options, probe).await;
        let store = CacheStore::shared(&options);
        Self::with_store(options, fetcher, store)
    }

    /// Use an existing store. `options` are taken as-is, without probing.
    pub fn with_store(
        options: CacheOptions,
        fetcher: Arc<dyn ResourceFetcher>,
        store: SharedStore,
    ) -> Self {
        info!(
            max_size = %HumanSize(options.max_size_bytes),
            max_items = options.max_items,
            lookahead_secs = options.prefetch_lookahead_secs,
            "Prefetch orchestrator initialized"
        );

        Self {
            store,
            fetcher,
            options,
            in_flight: Mutex::new(HashMap::new()),
            root: CancellationToken::new(),
            next_id: AtomicU64::new(0),
            shut_down: AtomicBool::new(false),
        }
    }

    pub fn options(&self) -> &CacheOptions {
        &self.options
    }

    pub fn store(&self) -> SharedStore {
        Arc::clone(&self.store)
    }

    /// Store delegations stay available after [`shutdown`](Self::shutdown);
    /// the store may be shared and outlives the orchestrator.
    pub fn lookup(&self, key: &str) -> Option<Bytes> {
        self.store.lock().lookup(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.store.lock().contains(key)
    }

    pub fn clear(&self) {
        self.store.lock().clear();
    }

    pub fn snapshot(&self) -> AggregateStats {
        self.store.lock().snapshot()
    }

    pub fn stats(&self) -> CacheStats {
        StatisticsReporter::report(&self.snapshot())
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    /// Whether a fetch for `key` is currently running.
    pub fn is_in_flight(&self, key: &str) -> bool {
        self.in_flight.lock().contains_key(key)
    }

    /// Prefetch `items` in priority order and return the resulting statistics.
    ///
    /// Per-item failures are logged and never abort the batch.
    pub async fn run_prefetch_batch(
        &self,
        items: &[CacheItemRequest],
    ) -> Result<AggregateStats, CacheError> {
        self.run_prefetch_batch_with_scope(items, &CancellationToken::new())
            .await
    }

    /// Like [`run_prefetch_batch`](Self::run_prefetch_batch), stopping early
    /// once `scope` is cancelled.
    pub async fn run_prefetch_batch_with_scope(
        &self,
        items: &[CacheItemRequest],
        scope: &CancellationToken,
    ) -> Result<AggregateStats, CacheError> {
        self.ensure_running()?;

        let lookahead = self.options.prefetch_lookahead();
        let mut summary = BatchSummary::default();

        for item in rank_requests(items) {
            if scope.is_cancelled() || self.is_shut_down() {
                debug!("Prefetch batch cancelled, skipping remaining items");
                break;
            }

            if item.starts_in.is_some_and(|starts_in| starts_in > lookahead) {
                if self.options.debug_logging {
                    debug!(key = %item.key, "Outside look-ahead window, deferring");
                }
                summary.deferred += 1;
                continue;
            }

            let cached = self.store.lock().lookup(&item.key).is_some();
            if cached {
                summary.already_cached += 1;
                continue;
            }

            match self.fetch_and_store(item, scope).await {
                Ok(()) => summary.fetched += 1,
                Err(CacheError::Cancelled) => {
                    if self.options.debug_logging {
                        debug!(key = %item.key, "Prefetch aborted");
                    }
                    summary.cancelled += 1;
                }
                Err(CacheError::AlreadyInFlight(key)) => {
                    debug!(key = %key, "Prefetch already in flight, skipping");
                }
                Err(CacheError::ShutDown) => break,
                Err(e) => {
                    warn!(key = %item.key, error = %e, "Failed to prefetch");
                    summary.failed += 1;
                }
            }
        }

        let stats = self.snapshot();
        info!(
            fetched = summary.fetched,
            already_cached = summary.already_cached,
            deferred = summary.deferred,
            cancelled = summary.cancelled,
            failed = summary.failed,
            total_items = stats.total_items,
            total_size = %HumanSize(stats.total_size_bytes),
            "Prefetch batch finished"
        );
        Ok(stats)
    }

    /// Prefetch a single item, surfacing its outcome to the caller.
    pub async fn prefetch_item(&self, item: &CacheItemRequest) -> Result<(), CacheError> {
        self.fetch_and_store(item, &CancellationToken::new()).await
    }

    /// Cancel the in-flight fetch for `key`, if any.
    pub fn abort_prefetch(&self, key: &str) {
        // Cancel under the table lock so a concurrent commit observes it
        let mut in_flight = self.in_flight.lock();
        if let Some(record) = in_flight.remove(key) {
            record.token.cancel();
            debug!(key = %key, "Prefetch abort requested");
        }
    }

    /// Cancel every outstanding fetch. Safe to call more than once.
    pub fn shutdown(&self) {
        let mut in_flight = self.in_flight.lock();
        let was_running = !self.shut_down.swap(true, Ordering::AcqRel);
        self.root.cancel();
        let outstanding = in_flight.len();
        in_flight.clear();

        if was_running {
            info!(outstanding, "Prefetch orchestrator shut down");
        }
    }

    fn ensure_running(&self) -> Result<(), CacheError> {
        if self.is_shut_down() {
            return Err(CacheError::ShutDown);
        }
        Ok(())
    }

    /// Register a token for `key`, refusing a second fetch of the same key.
    fn register(&self, key: &str) -> Result<(u64, CancellationToken), CacheError> {
        let mut in_flight = self.in_flight.lock();
        // Checked under the lock so shutdown cannot race a new registration
        self.ensure_running()?;
        if in_flight.contains_key(key) {
            return Err(CacheError::AlreadyInFlight(key.to_owned()));
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let token = self.root.child_token();
        in_flight.insert(
            key.to_owned(),
            InFlight {
                id,
                token: token.clone(),
            },
        );
        Ok((id, token))
    }

    async fn fetch_and_store(
        &self,
        item: &CacheItemRequest,
        scope: &CancellationToken,
    ) -> Result<(), CacheError> {
        let (id, token) = self.register(&item.key)?;
        let _guard = InFlightGuard {
            in_flight: &self.in_flight,
            key: &item.key,
            id,
        };

        let estimated = item.size_hint.unwrap_or(DEFAULT_SIZE_ESTIMATE);
        let reserved = self.store.lock().reserve(estimated);
        match reserved {
            Ok(evicted) if !evicted.is_empty() && self.options.debug_logging => {
                debug!(key = %item.key, evicted = evicted.len(), "Made room for prefetch");
            }
            Ok(_) => {}
            // The hint may overestimate; the actual size is checked on insert
            Err(e) => debug!(key = %item.key, error = %e, "Reservation not fully satisfied"),
        }

        if self.options.debug_logging {
            debug!(key = %item.key, priority = ?item.priority, "Prefetching");
        }

        let payload = tokio::select! {
            biased;
            _ = token.cancelled() => Err(CacheError::Cancelled),
            _ = scope.cancelled() => Err(CacheError::Cancelled),
            result = self.fetcher.fetch(&item.key) => result,
        }?;

        let entry = CacheEntry::from_request(item, payload);
        let size = entry.size_bytes;

        // Commit while holding the table lock: an abort either happened before
        // this point and is seen here, or happens after the entry is complete.
        let in_flight = self.in_flight.lock();
        if token.is_cancelled() || scope.is_cancelled() {
            return Err(CacheError::Cancelled);
        }
        self.store.lock().admit(item.key.as_str(), entry)?;
        drop(in_flight);

        if self.options.debug_logging {
            debug!(key = %item.key, size = %HumanSize(size), "Successfully cached");
        }
        Ok(())
    }
}

impl Drop for PrefetchOrchestrator {
    fn drop(&mut self) {
        self.root.cancel();
    }
}

/// Highest priority first; input order is kept among equal priorities.
pub fn rank_requests(items: &[CacheItemRequest]) -> Vec<&CacheItemRequest> {
    let mut ranked: Vec<&CacheItemRequest> = items.iter().collect();
    ranked.sort_by_key(|item| Reverse(item.priority));
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::{NetworkCondition, StaticProbe, StorageEstimate};
    use crate::test_utils::init_tracing;
    use crate::types::Priority;
    use async_trait::async_trait;
    use std::time::Duration;
    use tokio::sync::Notify;

    #[derive(Clone)]
    enum MockResponse {
        Payload(Bytes),
        Fail,
        /// Signals `started`, then never completes
        Hang,
    }

    #[derive(Default)]
    struct MockFetcher {
        responses: HashMap<String, MockResponse>,
        calls: Mutex<Vec<String>>,
        started: Notify,
    }

    impl MockFetcher {
        fn with(mut self, key: &str, response: MockResponse) -> Self {
            self.responses.insert(key.to_string(), response);
            self
        }

        fn payload(self, key: &str, size: usize) -> Self {
            self.with(key, MockResponse::Payload(Bytes::from(vec![1u8; size])))
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().clone()
        }
    }

    #[async_trait]
    impl ResourceFetcher for MockFetcher {
        async fn fetch(&self, key: &str) -> Result<Bytes, CacheError> {
            self.calls.lock().push(key.to_string());
            match self.responses.get(key).cloned() {
                Some(MockResponse::Payload(bytes)) => Ok(bytes),
                Some(MockResponse::Hang) => {
                    self.started.notify_one();
                    std::future::pending().await
                }
                Some(MockResponse::Fail) | None => {
                    Err(CacheError::FetchFailed(format!("Client error 404 for {key}")))
                }
            }
        }
    }

    fn options() -> CacheOptions {
        CacheOptions {
            max_size_bytes: 1_000,
            max_items: 10,
            ..Default::default()
        }
    }

    fn orchestrator(fetcher: Arc<MockFetcher>) -> PrefetchOrchestrator {
        PrefetchOrchestrator::with_store(options(), fetcher, CacheStore::shared(&options()))
    }

    fn request(key: &str, priority: Priority) -> CacheItemRequest {
        CacheItemRequest::new(key, priority).with_size_hint(10)
    }

    #[test]
    fn test_rank_is_stable_by_priority() {
        let items = vec![
            request("low-1", Priority::Low),
            request("high-1", Priority::High),
            request("medium-1", Priority::Medium),
            request("high-2", Priority::High),
            request("low-2", Priority::Low),
        ];
        let ranked: Vec<&str> = rank_requests(&items).iter().map(|i| i.key.as_str()).collect();
        assert_eq!(ranked, vec!["high-1", "high-2", "medium-1", "low-1", "low-2"]);
    }

    #[tokio::test]
    async fn test_batch_fetches_in_ranked_order() {
        init_tracing();
        let fetcher = Arc::new(
            MockFetcher::default()
                .payload("a", 10)
                .payload("b", 20)
                .payload("c", 30),
        );
        let orchestrator = orchestrator(Arc::clone(&fetcher));

        let stats = orchestrator
            .run_prefetch_batch(&[
                request("a", Priority::Low),
                request("b", Priority::High),
                request("c", Priority::Medium),
            ])
            .await
            .unwrap();

        assert_eq!(fetcher.calls(), vec!["b", "c", "a"]);
        assert_eq!(stats.total_items, 3);
        assert_eq!(stats.total_size_bytes, 60);
    }

    #[tokio::test]
    async fn test_cached_items_are_not_refetched() {
        let fetcher = Arc::new(MockFetcher::default().payload("a", 10));
        let orchestrator = orchestrator(Arc::clone(&fetcher));
        let items = [request("a", Priority::High)];

        orchestrator.run_prefetch_batch(&items).await.unwrap();
        let changed_hint = [CacheItemRequest::new("a", Priority::High).with_size_hint(999)];
        let stats = orchestrator.run_prefetch_batch(&changed_hint).await.unwrap();

        assert_eq!(fetcher.calls(), vec!["a"]);
        assert_eq!(stats.hit_count, 1);
        assert_eq!(stats.total_size_bytes, 10);
    }

    #[tokio::test]
    async fn test_failure_does_not_abort_batch() {
        init_tracing();
        let fetcher = Arc::new(
            MockFetcher::default()
                .with("broken", MockResponse::Fail)
                .payload("ok", 10),
        );
        let orchestrator = orchestrator(Arc::clone(&fetcher));

        let stats = orchestrator
            .run_prefetch_batch(&[request("broken", Priority::High), request("ok", Priority::Low)])
            .await
            .unwrap();

        assert_eq!(fetcher.calls(), vec!["broken", "ok"]);
        assert_eq!(stats.total_items, 1);
        assert!(orchestrator.contains("ok"));
        assert!(!orchestrator.is_in_flight("broken"));
    }

    #[tokio::test]
    async fn test_too_large_item_is_skipped() {
        let fetcher = Arc::new(MockFetcher::default().payload("huge", 2_000).payload("ok", 5));
        let orchestrator = orchestrator(Arc::clone(&fetcher));

        let stats = orchestrator
            .run_prefetch_batch(&[request("huge", Priority::High), request("ok", Priority::High)])
            .await
            .unwrap();

        assert!(!orchestrator.contains("huge"));
        assert!(orchestrator.contains("ok"));
        assert_eq!(stats.total_size_bytes, 5);
    }

    #[tokio::test]
    async fn test_prefetch_item_surfaces_errors() {
        let fetcher = Arc::new(MockFetcher::default().payload("huge", 2_000));
        let orchestrator = orchestrator(fetcher);

        let err = orchestrator
            .prefetch_item(&request("huge", Priority::High))
            .await
            .unwrap_err();
        assert_eq!(err, CacheError::ItemTooLarge { size: 2_000, max: 1_000 });

        let err = orchestrator
            .prefetch_item(&request("unknown", Priority::High))
            .await
            .unwrap_err();
        assert!(matches!(err, CacheError::FetchFailed(_)));
    }

    #[tokio::test]
    async fn test_eviction_during_batch_keeps_budget() {
        let fetcher = Arc::new(
            MockFetcher::default()
                .payload("first", 600)
                .payload("second", 600),
        );
        let orchestrator = orchestrator(fetcher);

        let stats = orchestrator
            .run_prefetch_batch(&[
                CacheItemRequest::new("first", Priority::Low).with_size_hint(600),
                CacheItemRequest::new("second", Priority::Low).with_size_hint(600),
            ])
            .await
            .unwrap();

        assert!(stats.total_size_bytes <= 1_000);
        assert!(!orchestrator.contains("first"));
        assert!(orchestrator.contains("second"));
    }

    #[tokio::test]
    async fn test_abort_in_flight_prefetch() {
        init_tracing();
        let fetcher = Arc::new(
            MockFetcher::default()
                .with("slow", MockResponse::Hang)
                .payload("next", 10),
        );
        let orchestrator = Arc::new(orchestrator(Arc::clone(&fetcher)));

        let batch = {
            let orchestrator = Arc::clone(&orchestrator);
            tokio::spawn(async move {
                orchestrator
                    .run_prefetch_batch(&[
                        request("slow", Priority::High),
                        request("next", Priority::Low),
                    ])
                    .await
            })
        };

        fetcher.started.notified().await;
        assert!(orchestrator.is_in_flight("slow"));
        orchestrator.abort_prefetch("slow");

        let stats = tokio::time::timeout(Duration::from_secs(5), batch)
            .await
            .unwrap()
            .unwrap()
            .unwrap();

        // Cancelling one item leaves the rest of the batch alone
        assert_eq!(stats.total_items, 1);
        assert!(orchestrator.contains("next"));
        assert!(orchestrator.lookup("slow").is_none());
        assert!(!orchestrator.is_in_flight("slow"));
    }

    #[tokio::test]
    async fn test_abort_without_in_flight_is_noop() {
        let orchestrator = orchestrator(Arc::new(MockFetcher::default()));
        orchestrator.abort_prefetch("nothing");
        assert_eq!(orchestrator.snapshot(), AggregateStats::default());
    }

    #[tokio::test]
    async fn test_shutdown_cancels_and_is_idempotent() {
        let fetcher = Arc::new(MockFetcher::default().with("slow", MockResponse::Hang));
        let orchestrator = Arc::new(orchestrator(Arc::clone(&fetcher)));

        let pending = {
            let orchestrator = Arc::clone(&orchestrator);
            tokio::spawn(async move {
                orchestrator
                    .prefetch_item(&request("slow", Priority::High))
                    .await
            })
        };

        fetcher.started.notified().await;
        orchestrator.shutdown();
        orchestrator.shutdown();

        let result = tokio::time::timeout(Duration::from_secs(5), pending)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(result, Err(CacheError::Cancelled));
        assert!(orchestrator.lookup("slow").is_none());

        let err = orchestrator.run_prefetch_batch(&[]).await.unwrap_err();
        assert_eq!(err, CacheError::ShutDown);
    }

    #[tokio::test]
    async fn test_shutdown_with_nothing_outstanding() {
        let orchestrator = orchestrator(Arc::new(MockFetcher::default()));
        orchestrator.shutdown();
        orchestrator.shutdown();
        assert!(orchestrator.is_shut_down());
    }

    #[tokio::test]
    async fn test_store_stays_readable_after_shutdown() {
        let fetcher = Arc::new(MockFetcher::default().payload("a", 10).payload("b", 10));
        let orchestrator = orchestrator(Arc::clone(&fetcher));
        orchestrator
            .prefetch_item(&request("a", Priority::High))
            .await
            .unwrap();

        orchestrator.shutdown();

        assert_eq!(orchestrator.lookup("a").map(|b| b.len()), Some(10));
        assert_eq!(orchestrator.snapshot().total_items, 1);
        let err = orchestrator
            .prefetch_item(&request("b", Priority::High))
            .await
            .unwrap_err();
        assert_eq!(err, CacheError::ShutDown);
        assert_eq!(fetcher.calls(), vec!["a".to_string()]);

        orchestrator.clear();
        assert_eq!(orchestrator.snapshot().total_items, 0);
    }

    #[tokio::test]
    async fn test_cancelled_scope_stops_batch() {
        let fetcher = Arc::new(MockFetcher::default().payload("a", 10).payload("b", 10));
        let orchestrator = orchestrator(Arc::clone(&fetcher));
        let scope = CancellationToken::new();
        scope.cancel();

        let stats = orchestrator
            .run_prefetch_batch_with_scope(
                &[request("a", Priority::High), request("b", Priority::Low)],
                &scope,
            )
            .await
            .unwrap();

        assert!(fetcher.calls().is_empty());
        assert_eq!(stats.total_items, 0);
    }

    #[tokio::test]
    async fn test_items_beyond_lookahead_are_deferred() {
        let fetcher = Arc::new(MockFetcher::default().payload("near", 10).payload("far", 10));
        let orchestrator = orchestrator(Arc::clone(&fetcher));

        orchestrator
            .run_prefetch_batch(&[
                request("near", Priority::High).with_starts_in(Duration::from_secs(10)),
                request("far", Priority::High).with_starts_in(Duration::from_secs(600)),
            ])
            .await
            .unwrap();

        assert_eq!(fetcher.calls(), vec!["near"]);
    }

    #[tokio::test]
    async fn test_duplicate_in_flight_key_is_rejected() {
        let fetcher = Arc::new(MockFetcher::default().with("slow", MockResponse::Hang));
        let orchestrator = Arc::new(orchestrator(Arc::clone(&fetcher)));

        let first = {
            let orchestrator = Arc::clone(&orchestrator);
            tokio::spawn(async move {
                orchestrator
                    .prefetch_item(&request("slow", Priority::High))
                    .await
            })
        };
        fetcher.started.notified().await;

        let err = orchestrator
            .prefetch_item(&request("slow", Priority::High))
            .await
            .unwrap_err();
        assert_eq!(err, CacheError::AlreadyInFlight("slow".to_string()));
        assert_eq!(fetcher.calls().len(), 1);

        orchestrator.abort_prefetch("slow");
        let result = first.await.unwrap();
        assert_eq!(result, Err(CacheError::Cancelled));
    }

    #[tokio::test]
    async fn test_construction_adapts_to_slow_network() {
        let probe = StaticProbe::new(
            Some(NetworkCondition {
                throughput_kbps: 500.0,
                latency: Duration::from_millis(120),
            }),
            Some(StorageEstimate {
                available_bytes: 2_000,
                total_bytes: 10_000,
            }),
        );
        let options = CacheOptions {
            max_size_bytes: 10_000,
            network_speed_threshold_kbps: 1000.0,
            prefetch_lookahead_secs: 300,
            ..Default::default()
        };

        let orchestrator =
            PrefetchOrchestrator::new(options, Arc::new(MockFetcher::default()), &probe).await;

        assert!(orchestrator.options().prefetch_lookahead_secs <= 30);
        assert_eq!(orchestrator.options().max_size_bytes, 1_000);
        assert_eq!(orchestrator.store().lock().max_size_bytes(), 1_000);
    }

    #[tokio::test]
    async fn test_stats_report() {
        let fetcher = Arc::new(MockFetcher::default().payload("a", 10));
        let orchestrator = orchestrator(fetcher);
        orchestrator.prefetch_item(&request("a", Priority::Medium)).await.unwrap();

        orchestrator.lookup("a");
        orchestrator.lookup("missing");

        let stats = orchestrator.stats();
        assert_eq!(stats.hit_rate, 0.5);
        assert_eq!(stats.miss_rate, 0.5);

        orchestrator.clear();
        orchestrator.clear();
        assert_eq!(orchestrator.stats(), CacheStats::default());
    }
}
