//! Cache-backed page fetching with request coalescing.
//!
//! The fetcher is the only writer of the shared [`CacheStore`]. Identical
//! concurrent requests (same scope, filters, and pagination) share one
//! underlying network call: the first caller spawns the fetch, every caller
//! awaits the same shared channel, and the result fans out to all of them.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use futures::channel::oneshot;
use futures::future::Shared;
use metrics::{counter, histogram};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::SyncError;
use crate::events::SyncRecord;
use crate::filter::{FilterState, KeyBuilder};
use crate::lock::mutex_lock;
use crate::page::{Page, RawPage};
use crate::store::CacheStore;

const SOURCE: &str = "sync::fetch";

const METRIC_FETCH_MS: &str = "comanda_sync_fetch_ms";
const METRIC_FETCH_COALESCED: &str = "comanda_sync_fetch_coalesced_total";

/// The injected transport boundary.
///
/// Must reject on transport or server errors and must *not* reject on "no
/// results" — an empty result set is a normal page.
#[async_trait]
pub trait FetchAdapter<T>: Send + Sync {
    async fn fetch_page(
        &self,
        filters: &FilterState,
        page: u32,
        page_size: u32,
    ) -> Result<RawPage<T>, SyncError>;
}

type FetchResult<T> = Result<Page<T>, SyncError>;
type InFlightChannel<T> = Shared<oneshot::Receiver<FetchResult<T>>>;
type InFlightMap<T> = Arc<Mutex<HashMap<String, InFlightChannel<T>>>>;

/// Deduplicating, cache-populating fetcher for one entity scope.
pub struct PagedFetcher<T: SyncRecord> {
    adapter: Arc<dyn FetchAdapter<T>>,
    store: Arc<CacheStore<Page<T>>>,
    keys: KeyBuilder,
    ttl: Duration,
    in_flight: InFlightMap<T>,
}

impl<T: SyncRecord> PagedFetcher<T> {
    pub fn new(
        adapter: Arc<dyn FetchAdapter<T>>,
        store: Arc<CacheStore<Page<T>>>,
        keys: KeyBuilder,
        ttl: Duration,
    ) -> Self {
        Self {
            adapter,
            store,
            keys,
            ttl,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn keys(&self) -> &KeyBuilder {
        &self.keys
    }

    pub fn store(&self) -> &Arc<CacheStore<Page<T>>> {
        &self.store
    }

    /// Fetch a page, serving from cache when fresh.
    pub async fn fetch(
        &self,
        filters: &FilterState,
        page: u32,
        page_size: u32,
    ) -> FetchResult<T> {
        let key = self.keys.build(filters, page, page_size)?;
        if let Some(cached) = self.store.get(&key) {
            return Ok(cached);
        }
        self.fetch_keyed(key, filters, page, page_size).await
    }

    /// Fetch a page from the network even when a fresh cache entry exists.
    ///
    /// Still coalesces with an identical in-flight request and repopulates
    /// the cache on success.
    pub async fn refetch(
        &self,
        filters: &FilterState,
        page: u32,
        page_size: u32,
    ) -> FetchResult<T> {
        let key = self.keys.build(filters, page, page_size)?;
        self.fetch_keyed(key, filters, page, page_size).await
    }

    async fn fetch_keyed(
        &self,
        key: String,
        filters: &FilterState,
        page: u32,
        page_size: u32,
    ) -> FetchResult<T> {
        let channel = {
            let mut in_flight = mutex_lock(&self.in_flight, SOURCE, "fetch_keyed");
            match in_flight.get(&key) {
                Some(channel) => {
                    counter!(METRIC_FETCH_COALESCED).increment(1);
                    debug!(cache_key = %key, "Joining in-flight fetch");
                    channel.clone()
                }
                None => {
                    let (sender, receiver) = oneshot::channel();
                    let channel = receiver.shared();
                    in_flight.insert(key.clone(), channel.clone());
                    self.spawn_fetch(key, filters.clone(), page, page_size, sender);
                    channel
                }
            }
        };

        match channel.await {
            Ok(result) => result,
            // The fetch task can only go away without sending if it panicked.
            Err(_canceled) => Err(SyncError::transport("fetch task dropped before completing")),
        }
    }

    fn spawn_fetch(
        &self,
        key: String,
        filters: FilterState,
        page: u32,
        page_size: u32,
        sender: oneshot::Sender<FetchResult<T>>,
    ) {
        let adapter = Arc::clone(&self.adapter);
        let store = Arc::clone(&self.store);
        let in_flight = Arc::clone(&self.in_flight);
        let ttl = self.ttl;

        tokio::spawn(async move {
            let started_at = Instant::now();
            let result = adapter
                .fetch_page(&filters, page, page_size)
                .await
                .map(|raw| raw.normalize(page, page_size));
            histogram!(METRIC_FETCH_MS).record(started_at.elapsed().as_secs_f64() * 1000.0);

            match &result {
                Ok(fetched) => {
                    store.set(key.clone(), fetched.clone(), ttl);
                }
                Err(err) => {
                    warn!(cache_key = %key, error = %err, "Page fetch failed");
                }
            }

            // Clear the marker before resolving so a retry can start cleanly.
            mutex_lock(&in_flight, SOURCE, "complete").remove(&key);
            let _ = sender.send(result);
        });
    }
}

#[cfg(test)]
mod tests {
    use std::num::NonZeroUsize;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use super::*;
    use crate::page::RawBody;

    #[derive(Debug, Clone, PartialEq)]
    struct TestRecord(u32);

    impl SyncRecord for TestRecord {
        fn record_id(&self) -> uuid::Uuid {
            uuid::Uuid::from_u128(u128::from(self.0))
        }

        fn matches(&self, _filters: &FilterState) -> bool {
            true
        }
    }

    struct CountingAdapter {
        calls: AtomicUsize,
        fail: AtomicBool,
        delay: Duration,
    }

    impl CountingAdapter {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail: AtomicBool::new(false),
                delay: Duration::from_millis(10),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl FetchAdapter<TestRecord> for CountingAdapter {
        async fn fetch_page(
            &self,
            _filters: &FilterState,
            page: u32,
            page_size: u32,
        ) -> Result<RawPage<TestRecord>, SyncError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            if self.fail.load(Ordering::SeqCst) {
                return Err(SyncError::transport("HTTP 502"));
            }
            Ok(RawPage::Body(RawBody {
                items: vec![TestRecord(call as u32)],
                total: Some(1),
                page: Some(page),
                page_size: Some(page_size),
                total_pages: None,
            }))
        }
    }

    fn fetcher(adapter: Arc<CountingAdapter>) -> PagedFetcher<TestRecord> {
        let store = Arc::new(CacheStore::new(
            NonZeroUsize::new(10).expect("non-zero bound"),
        ));
        PagedFetcher::new(
            adapter,
            store,
            KeyBuilder::new("orders"),
            Duration::from_secs(60),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn identical_concurrent_fetches_share_one_call() {
        let adapter = Arc::new(CountingAdapter::new());
        let fetcher = fetcher(Arc::clone(&adapter));
        let filters = FilterState::new().with("status", crate::filter::FilterValue::text("pending"));

        let (first, second) = tokio::join!(
            fetcher.fetch(&filters, 1, 20),
            fetcher.fetch(&filters, 1, 20),
        );

        assert_eq!(adapter.calls(), 1);
        assert_eq!(first.expect("first page"), second.expect("second page"));
    }

    #[tokio::test(start_paused = true)]
    async fn distinct_keys_do_not_coalesce() {
        let adapter = Arc::new(CountingAdapter::new());
        let fetcher = fetcher(Arc::clone(&adapter));
        let filters = FilterState::new();

        let (_, _) = tokio::join!(
            fetcher.fetch(&filters, 1, 20),
            fetcher.fetch(&filters, 2, 20),
        );

        assert_eq!(adapter.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn cache_hit_skips_the_network() {
        let adapter = Arc::new(CountingAdapter::new());
        let fetcher = fetcher(Arc::clone(&adapter));
        let filters = FilterState::new();

        let first = fetcher.fetch(&filters, 1, 20).await.expect("first fetch");
        let second = fetcher.fetch(&filters, 1, 20).await.expect("second fetch");

        assert_eq!(adapter.calls(), 1);
        assert_eq!(first, second);
    }

    #[tokio::test(start_paused = true)]
    async fn refetch_bypasses_cache_and_repopulates() {
        let adapter = Arc::new(CountingAdapter::new());
        let fetcher = fetcher(Arc::clone(&adapter));
        let filters = FilterState::new();

        fetcher.fetch(&filters, 1, 20).await.expect("initial fetch");
        let refreshed = fetcher.refetch(&filters, 1, 20).await.expect("refetch");
        assert_eq!(adapter.calls(), 2);

        // The refetched result replaced the cached page.
        let cached = fetcher.fetch(&filters, 1, 20).await.expect("cached fetch");
        assert_eq!(adapter.calls(), 2);
        assert_eq!(cached, refreshed);
    }

    #[tokio::test(start_paused = true)]
    async fn failure_propagates_and_clears_the_marker() {
        let adapter = Arc::new(CountingAdapter::new());
        adapter.fail.store(true, Ordering::SeqCst);
        let fetcher = fetcher(Arc::clone(&adapter));
        let filters = FilterState::new();

        let err = fetcher.fetch(&filters, 1, 20).await.expect_err("rejected");
        assert!(err.is_retryable());
        assert!(fetcher.store().is_empty());

        // A retry issues a fresh network call and succeeds.
        adapter.fail.store(false, Ordering::SeqCst);
        fetcher.fetch(&filters, 1, 20).await.expect("retried fetch");
        assert_eq!(adapter.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn coalesced_waiters_observe_the_same_failure() {
        let adapter = Arc::new(CountingAdapter::new());
        adapter.fail.store(true, Ordering::SeqCst);
        let fetcher = fetcher(Arc::clone(&adapter));
        let filters = FilterState::new();

        let (first, second) = tokio::join!(
            fetcher.fetch(&filters, 1, 20),
            fetcher.fetch(&filters, 1, 20),
        );

        assert_eq!(adapter.calls(), 1);
        assert_eq!(first.expect_err("first failure"), second.expect_err("second failure"));
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_filters_never_reach_the_network() {
        let adapter = Arc::new(CountingAdapter::new());
        let fetcher = fetcher(Arc::clone(&adapter));
        let filters = FilterState::new().with("bad name", crate::filter::FilterValue::text("x"));

        let err = fetcher.fetch(&filters, 1, 20).await.expect_err("rejected");
        assert!(matches!(err, SyncError::Validation(_)));
        assert_eq!(adapter.calls(), 0);
    }
}
