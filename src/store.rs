//! Request-keyed result cache with TTL expiry and LRU-bounded eviction.
//!
//! One store is shared by every session of an entity type; only the fetcher
//! writes to it. Entries are replaced, never edited in place.

use std::num::NonZeroUsize;
use std::sync::RwLock;
use std::time::Duration;

use lru::LruCache;
use metrics::counter;
use tokio::time::Instant;

use crate::lock::{rw_read, rw_write};

const SOURCE: &str = "sync::store";

const METRIC_CACHE_HIT: &str = "comanda_sync_cache_hit_total";
const METRIC_CACHE_MISS: &str = "comanda_sync_cache_miss_total";
const METRIC_CACHE_EVICT: &str = "comanda_sync_cache_evict_total";
const METRIC_CACHE_EXPIRED: &str = "comanda_sync_cache_expired_total";

struct CacheEntry<V> {
    value: V,
    stored_at: Instant,
    ttl: Duration,
}

impl<V> CacheEntry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        now.duration_since(self.stored_at) >= self.ttl
    }
}

/// Key-addressed page cache with per-entry TTL and a strict LRU bound.
///
/// All operations are total: unknown or malformed keys behave as misses, and
/// expiry/eviction are silent. Lookups refresh recency; expired entries are
/// removed lazily on access.
pub struct CacheStore<V> {
    entries: RwLock<LruCache<String, CacheEntry<V>>>,
}

impl<V: Clone> CacheStore<V> {
    pub fn new(max_entries: NonZeroUsize) -> Self {
        Self {
            entries: RwLock::new(LruCache::new(max_entries)),
        }
    }

    /// Fresh value for `key`, refreshing its recency.
    pub fn get(&self, key: &str) -> Option<V> {
        let mut entries = rw_write(&self.entries, SOURCE, "get");
        let expired = match entries.get(key) {
            Some(entry) if entry.is_expired(Instant::now()) => true,
            Some(entry) => {
                counter!(METRIC_CACHE_HIT).increment(1);
                return Some(entry.value.clone());
            }
            None => {
                counter!(METRIC_CACHE_MISS).increment(1);
                return None;
            }
        };
        if expired {
            entries.pop(key);
            counter!(METRIC_CACHE_EXPIRED).increment(1);
            counter!(METRIC_CACHE_MISS).increment(1);
        }
        None
    }

    /// Store a value, evicting the least-recently-used entry when full.
    pub fn set(&self, key: impl Into<String>, value: V, ttl: Duration) {
        let key = key.into();
        let entry = CacheEntry {
            value,
            stored_at: Instant::now(),
            ttl,
        };
        let displaced = rw_write(&self.entries, SOURCE, "set").push(key.clone(), entry);
        if let Some((displaced_key, _)) = displaced
            && displaced_key != key
        {
            counter!(METRIC_CACHE_EVICT).increment(1);
        }
    }

    pub fn invalidate(&self, key: &str) {
        rw_write(&self.entries, SOURCE, "invalidate").pop(key);
    }

    /// Remove every entry whose key satisfies the predicate.
    ///
    /// Used for scope-wide invalidation, e.g. all cached pages of one entity
    /// type after a push event changed its counts.
    pub fn invalidate_where(&self, predicate: impl Fn(&str) -> bool) {
        let mut entries = rw_write(&self.entries, SOURCE, "invalidate_where");
        let doomed: Vec<String> = entries
            .iter()
            .filter(|(key, _)| predicate(key))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &doomed {
            entries.pop(key);
        }
    }

    pub fn clear(&self) {
        rw_write(&self.entries, SOURCE, "clear").clear();
    }

    pub fn len(&self) -> usize {
        rw_read(&self.entries, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use std::panic::{AssertUnwindSafe, catch_unwind};

    use super::*;

    const TTL: Duration = Duration::from_secs(60);

    fn store(max: usize) -> CacheStore<u32> {
        CacheStore::new(NonZeroUsize::new(max).expect("non-zero bound"))
    }

    #[test]
    fn set_get_round_trip() {
        let store = store(10);

        assert!(store.get("orders|page=1|size=20").is_none());
        store.set("orders|page=1|size=20", 7, TTL);
        assert_eq!(store.get("orders|page=1|size=20"), Some(7));
    }

    #[test]
    fn malformed_keys_are_misses() {
        let store = store(10);
        assert!(store.get("").is_none());
        assert!(store.get("not a real key").is_none());
    }

    #[test]
    fn lru_eviction_respects_access_order() {
        let store = store(2);

        store.set("k1", 1, TTL);
        store.set("k2", 2, TTL);
        store.set("k3", 3, TTL); // evicts k1

        assert!(store.get("k1").is_none());
        assert_eq!(store.get("k2"), Some(2));

        // k2 was just touched, so k3 is now least recently used.
        store.set("k4", 4, TTL);
        assert!(store.get("k3").is_none());
        assert_eq!(store.get("k2"), Some(2));
        assert_eq!(store.get("k4"), Some(4));
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn access_refreshes_recency_before_insert() {
        let store = store(2);

        store.set("k1", 1, TTL);
        store.set("k2", 2, TTL);
        store.get("k1");
        store.set("k3", 3, TTL); // k2 is the LRU victim

        assert_eq!(store.get("k1"), Some(1));
        assert!(store.get("k2").is_none());
        assert_eq!(store.get("k3"), Some(3));
    }

    #[test]
    fn bound_holds_after_every_insert() {
        let store = store(3);
        for n in 0..50 {
            store.set(format!("k{n}"), n, TTL);
            assert!(store.len() <= 3);
        }
    }

    #[test]
    fn replacing_a_key_is_not_an_eviction() {
        let store = store(2);
        store.set("k1", 1, TTL);
        store.set("k2", 2, TTL);
        store.set("k1", 10, TTL);

        assert_eq!(store.get("k1"), Some(10));
        assert_eq!(store.get("k2"), Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn entries_expire_after_ttl() {
        let store = store(10);
        store.set("k", 1, Duration::from_millis(1_000));

        tokio::time::advance(Duration::from_millis(999)).await;
        assert_eq!(store.get("k"), Some(1));

        tokio::time::advance(Duration::from_millis(2)).await;
        assert!(store.get("k").is_none());
        assert_eq!(store.len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn expiry_is_lazy_and_per_entry() {
        let store = store(10);
        store.set("short", 1, Duration::from_millis(100));
        store.set("long", 2, Duration::from_millis(10_000));

        tokio::time::advance(Duration::from_millis(500)).await;
        assert_eq!(store.len(), 2); // nothing removed until touched
        assert!(store.get("short").is_none());
        assert_eq!(store.get("long"), Some(2));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn invalidate_removes_single_key() {
        let store = store(10);
        store.set("orders|page=1|size=20", 1, TTL);
        store.set("orders|page=2|size=20", 2, TTL);

        store.invalidate("orders|page=1|size=20");
        assert!(store.get("orders|page=1|size=20").is_none());
        assert_eq!(store.get("orders|page=2|size=20"), Some(2));
    }

    #[test]
    fn invalidate_where_sweeps_a_scope() {
        let store = store(10);
        store.set("orders|page=1|size=20", 1, TTL);
        store.set("orders|status=pending|page=1|size=20", 2, TTL);
        store.set("products|page=1|size=20", 3, TTL);

        store.invalidate_where(|key| key.starts_with("orders|"));

        assert!(store.get("orders|page=1|size=20").is_none());
        assert!(store.get("orders|status=pending|page=1|size=20").is_none());
        assert_eq!(store.get("products|page=1|size=20"), Some(3));
    }

    #[test]
    fn clear_empties_the_store() {
        let store = store(10);
        store.set("k1", 1, TTL);
        store.set("k2", 2, TTL);
        store.clear();
        assert!(store.is_empty());
    }

    #[test]
    fn store_recovers_from_poisoned_lock() {
        let store = store(10);

        let _ = catch_unwind(AssertUnwindSafe(|| {
            let _guard = store.entries.write().expect("entries lock should be acquired");
            panic!("poison entries lock");
        }));

        store.set("k", 1, TTL);
        assert_eq!(store.get("k"), Some(1));
    }
}
