//! Live list session: the state machine behind every synchronized view.
//!
//! A session owns the materialized page a view is rendering, drives fetches
//! through the [`PagedFetcher`], and merges push events into the visible
//! list without ever letting count/pagination metadata drift from it.
//!
//! The race-prevention invariant: only the result of the most recently
//! initiated fetch is ever rendered. Every fetch captures a sequence number;
//! a result whose number no longer matches the session counter is dropped.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use metrics::counter;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::SyncConfig;
use crate::debounce::Debouncer;
use crate::error::SyncError;
use crate::events::{ChangeEvent, EventAdapter, Subscription, SyncRecord};
use crate::fetch::{FetchAdapter, PagedFetcher};
use crate::filter::{FilterState, KeyBuilder};
use crate::lock::mutex_lock;
use crate::page::Page;
use crate::scheduler::VisibilityScheduler;
use crate::store::CacheStore;

const SOURCE: &str = "sync::session";

const METRIC_STALE_DISCARDED: &str = "comanda_sync_stale_discarded_total";

/// Where a matching created record enters the visible page.
///
/// The backend's ordering convention, not an invariant of the engine: the
/// order dashboard surfaces new orders at the top, other views may append.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertPosition {
    Top,
    Bottom,
}

/// Render-facing session status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStatus {
    Idle,
    Loading,
    Ready,
    Error,
}

/// Sink invoked synchronously on every state change.
///
/// Must not call back into the session: it runs under the session lock.
pub type RenderFn<T> = Box<dyn Fn(&Page<T>, SyncStatus) + Send + Sync>;

struct SessionState<T> {
    filters: FilterState,
    page: Page<T>,
    status: SyncStatus,
}

struct SessionInner<T: SyncRecord> {
    fetcher: PagedFetcher<T>,
    store: Arc<CacheStore<Page<T>>>,
    keys: KeyBuilder,
    page_size: u32,
    insert_position: InsertPosition,
    fetch_seq: AtomicU64,
    state: Mutex<SessionState<T>>,
    subscription: Mutex<Option<Subscription>>,
    render: RenderFn<T>,
}

/// One synchronized list view. Created on view mount, dropped on teardown;
/// dropping releases the event subscription. Clones share the same session.
pub struct SyncSession<T: SyncRecord> {
    inner: Arc<SessionInner<T>>,
}

impl<T: SyncRecord> Clone for SyncSession<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: SyncRecord> SyncSession<T> {
    pub fn new(
        adapter: Arc<dyn FetchAdapter<T>>,
        store: Arc<CacheStore<Page<T>>>,
        scope: impl Into<String>,
        config: &SyncConfig,
        insert_position: InsertPosition,
        render: RenderFn<T>,
    ) -> Self {
        let keys = KeyBuilder::new(scope);
        let page_size = config.page_size_non_zero();
        let fetcher = PagedFetcher::new(adapter, Arc::clone(&store), keys.clone(), config.ttl());
        Self {
            inner: Arc::new(SessionInner {
                fetcher,
                store,
                keys,
                page_size,
                insert_position,
                fetch_seq: AtomicU64::new(0),
                state: Mutex::new(SessionState {
                    filters: FilterState::new(),
                    page: Page::empty(page_size),
                    status: SyncStatus::Idle,
                }),
                subscription: Mutex::new(None),
                render,
            }),
        }
    }

    /// Replace the active filters and fetch page 1 under them.
    ///
    /// Validation failures are returned before any state change; fetch
    /// failures surface through the render callback as [`SyncStatus::Error`].
    pub async fn set_filters(&self, filters: FilterState) -> Result<(), SyncError> {
        self.inner.keys.validate(&filters)?;
        let (seq, ()) = self.inner.begin(|state| {
            state.filters = filters.clone();
            state.page.page = 1;
        });
        let result = self.inner.fetcher.fetch(&filters, 1, self.inner.page_size).await;
        self.inner.adopt(seq, result);
        Ok(())
    }

    /// Navigate to a page, clamped to `1..=total_pages`. Filters are kept.
    pub async fn set_page(&self, page: u32) -> Result<(), SyncError> {
        let (seq, (filters, target)) = self.inner.begin(|state| {
            let target = page.clamp(1, state.page.total_pages.max(1));
            (state.filters.clone(), target)
        });
        let result = self
            .inner
            .fetcher
            .fetch(&filters, target, self.inner.page_size)
            .await;
        self.inner.adopt(seq, result);
        Ok(())
    }

    /// Force a network fetch of the current page, bypassing the cache.
    ///
    /// Used after a local mutation the user performed; repopulates the cache.
    pub async fn refresh(&self) -> Result<(), SyncError> {
        let (seq, (filters, page)) = self
            .inner
            .begin(|state| (state.filters.clone(), state.page.page.max(1)));
        let result = self
            .inner
            .fetcher
            .refetch(&filters, page, self.inner.page_size)
            .await;
        self.inner.adopt(seq, result);
        Ok(())
    }

    /// Merge a push event into the current page. Synchronous and idempotent
    /// per record id.
    pub fn apply_event(&self, event: ChangeEvent<T>) {
        self.inner.apply_event(event);
    }

    /// Subscribe this session to a push-event source.
    ///
    /// The subscription is released when the session is dropped.
    pub fn attach_events(&self, adapter: &dyn EventAdapter<T>) {
        let weak = Arc::downgrade(&self.inner);
        let subscription = adapter.subscribe(Box::new(move |event| {
            if let Some(inner) = weak.upgrade() {
                inner.apply_event(event);
            }
        }));
        *mutex_lock(&self.inner.subscription, SOURCE, "attach_events") = Some(subscription);
    }

    /// Debounced variant of [`set_filters`](Self::set_filters), for wiring
    /// directly to text inputs and date pickers.
    pub fn queue_filters(&self, debounce: &Debouncer, filters: FilterState) {
        let session = self.clone();
        debounce.call(async move {
            if let Err(err) = session.set_filters(filters).await {
                warn!(error = %err, "Debounced filter change rejected");
            }
        });
    }

    /// Drive periodic refreshes through a visibility-gated scheduler.
    pub fn start_auto_refresh(&self, scheduler: &VisibilityScheduler, interval: Duration) {
        let session = self.clone();
        scheduler.start(interval, move || {
            let session = session.clone();
            async move {
                if let Err(err) = session.refresh().await {
                    warn!(error = %err, "Scheduled refresh failed");
                }
            }
        });
    }

    pub fn status(&self) -> SyncStatus {
        mutex_lock(&self.inner.state, SOURCE, "status").status
    }

    pub fn current_page(&self) -> Page<T> {
        mutex_lock(&self.inner.state, SOURCE, "current_page")
            .page
            .clone()
    }

    pub fn filters(&self) -> FilterState {
        mutex_lock(&self.inner.state, SOURCE, "filters")
            .filters
            .clone()
    }
}

impl<T: SyncRecord> SessionInner<T> {
    /// Apply a pre-fetch mutation, render the loading state, and hand out
    /// the sequence number the resulting fetch must present on completion.
    fn begin<R>(&self, prepare: impl FnOnce(&mut SessionState<T>) -> R) -> (u64, R) {
        let mut state = mutex_lock(&self.state, SOURCE, "begin");
        let prepared = prepare(&mut state);
        state.status = SyncStatus::Loading;
        (self.render)(&state.page, state.status);
        let seq = self.fetch_seq.fetch_add(1, Ordering::SeqCst) + 1;
        (seq, prepared)
    }

    fn adopt(&self, seq: u64, result: Result<Page<T>, SyncError>) {
        let mut state = mutex_lock(&self.state, SOURCE, "adopt");
        let current = self.fetch_seq.load(Ordering::SeqCst);
        if current != seq {
            counter!(METRIC_STALE_DISCARDED).increment(1);
            debug!(
                fetch_seq = seq,
                current_seq = current,
                scope = self.keys.scope(),
                "Superseded fetch result discarded"
            );
            return;
        }
        match result {
            Ok(page) => {
                state.page = page;
                state.status = SyncStatus::Ready;
            }
            Err(err) => {
                // Stale-while-error: keep the last rendered page on screen.
                warn!(
                    error = %err,
                    scope = self.keys.scope(),
                    "List fetch failed; keeping last known page"
                );
                state.status = SyncStatus::Error;
            }
        }
        (self.render)(&state.page, state.status);
    }

    fn apply_event(&self, event: ChangeEvent<T>) {
        let mut state = mutex_lock(&self.state, SOURCE, "apply_event");
        let changed = match event {
            ChangeEvent::Deleted(id) => self.apply_deleted(&mut state, id),
            ChangeEvent::Created(record) => self.apply_created(&mut state, record),
            ChangeEvent::Updated(record) => self.apply_updated(&mut state, record),
        };
        if changed {
            (self.render)(&state.page, state.status);
        }
    }

    fn apply_deleted(&self, state: &mut SessionState<T>, id: Uuid) -> bool {
        // Counts changed server-side whether or not the record is on screen.
        self.invalidate_scope();
        let Some(index) = state
            .page
            .items
            .iter()
            .position(|record| record.record_id() == id)
        else {
            return false;
        };
        state.page.items.remove(index);
        state.page.total = state.page.total.saturating_sub(1);
        state.page.recompute_total_pages();
        debug!(record_id = %id, scope = self.keys.scope(), "Record removed after delete event");
        true
    }

    fn apply_created(&self, state: &mut SessionState<T>, record: T) -> bool {
        self.invalidate_scope();
        if !record.matches(&state.filters) || state.page.page != 1 {
            return false;
        }
        let id = record.record_id();
        if state
            .page
            .items
            .iter()
            .any(|existing| existing.record_id() == id)
        {
            return false;
        }
        match self.insert_position {
            InsertPosition::Top => state.page.items.insert(0, record),
            InsertPosition::Bottom => state.page.items.push(record),
        }
        state.page.items.truncate(self.page_size as usize);
        state.page.total += 1;
        state.page.recompute_total_pages();
        debug!(record_id = %id, scope = self.keys.scope(), "Record merged after create event");
        true
    }

    fn apply_updated(&self, state: &mut SessionState<T>, record: T) -> bool {
        let id = record.record_id();
        let Some(index) = state
            .page
            .items
            .iter()
            .position(|existing| existing.record_id() == id)
        else {
            // Possibly cached on another page; only the visible page's key
            // is knowable here.
            self.invalidate_current_key(state);
            return false;
        };
        if record.matches(&state.filters) {
            state.page.items[index] = record;
            self.invalidate_current_key(state);
            true
        } else {
            // Stopped matching the active filters: fold into a deletion.
            state.page.items.remove(index);
            state.page.total = state.page.total.saturating_sub(1);
            state.page.recompute_total_pages();
            self.invalidate_scope();
            true
        }
    }

    fn invalidate_scope(&self) {
        let prefix = self.keys.scope_prefix();
        self.store.invalidate_where(|key| key.starts_with(&prefix));
    }

    fn invalidate_current_key(&self, state: &SessionState<T>) {
        if let Ok(key) = self
            .keys
            .build(&state.filters, state.page.page, self.page_size)
        {
            self.store.invalidate(&key);
        }
    }
}
