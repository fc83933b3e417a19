//! Process-local (L1) store.
//!
//! ## Design
//!
//! - `DashMap` shards the key space; readers proceed concurrently, writers to the
//!   same shard are serialized
//! - Expiry is checked on every read, so no entry is ever returned past its deadline
//! - A background sweep bounds memory for keys that are written once and never read again
//!
//! Plain [`LocalStore::get`] does not touch the hit/miss counters. Composed read paths
//! use it so they do not skew the rate reported through [`LocalStore::get_with_stats`].

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::stats::HitCounters;

/// Cached entry with expiration time.
#[derive(Debug, Clone)]
struct LocalEntry<V> {
    value: V,
    /// `None` when the TTL is too large to represent; such entries never expire.
    expires_at: Option<Instant>,
}

impl<V> LocalEntry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// In-process key/value store with per-entry TTL.
///
/// The store is generic over its value type; one store per logical value type keeps
/// reads statically typed. Use `Arc<T>` as `V` when values are expensive to clone.
pub struct LocalStore<V> {
    entries: DashMap<String, LocalEntry<V>>,
    default_ttl: Duration,
    counters: Arc<HitCounters>,
}

impl<V> LocalStore<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Create a store with its own hit/miss counters.
    pub fn new(default_ttl: Duration) -> Self {
        Self::with_counters(default_ttl, Arc::new(HitCounters::new()))
    }

    /// Create a store reporting into shared counters.
    pub fn with_counters(default_ttl: Duration, counters: Arc<HitCounters>) -> Self {
        Self {
            entries: DashMap::new(),
            default_ttl,
            counters,
        }
    }

    /// Store a value. A zero `ttl` means the store's default TTL.
    pub fn set(&self, key: impl Into<String>, value: V, ttl: Duration) {
        let ttl = if ttl.is_zero() { self.default_ttl } else { ttl };
        self.entries.insert(
            key.into(),
            LocalEntry {
                value,
                expires_at: Instant::now().checked_add(ttl),
            },
        );
    }

    /// Get a live value. Expired entries are removed and reported as absent.
    pub fn get(&self, key: &str) -> Option<V> {
        let now = Instant::now();
        match self.entries.get(key) {
            Some(entry) if !entry.is_expired(now) => return Some(entry.value.clone()),
            Some(_) => {}
            None => return None,
        }

        // Re-check under the write lock: a concurrent set may have replaced the entry.
        self.entries.remove_if(key, |_, entry| entry.is_expired(now));
        None
    }

    /// Like [`get`](Self::get), but counts the lookup as a hit or a miss.
    pub fn get_with_stats(&self, key: &str) -> Option<V> {
        let value = self.get(key);
        if value.is_some() {
            self.counters.record_hit();
            crate::metrics::record_cache_hit("l1");
        } else {
            self.counters.record_miss();
            crate::metrics::record_cache_miss();
        }
        value
    }

    pub fn delete(&self, key: &str) {
        self.entries.remove(key);
    }

    /// Remove every entry.
    pub fn flush(&self) {
        self.entries.clear();
    }

    /// Remove expired entries, returning how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut removed = 0;

        self.entries.retain(|_, entry| {
            if entry.is_expired(now) {
                removed += 1;
                false
            } else {
                true
            }
        });

        removed
    }

    /// Number of stored entries, including expired ones not yet purged.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn counters(&self) -> &Arc<HitCounters> {
        &self.counters
    }

    /// Spawn the periodic expired-entry sweep. It stops when `shutdown` is cancelled.
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        every: Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            // The first tick completes immediately.
            ticker.tick().await;
            tracing::debug!(interval_ms = every.as_millis() as u64, "local cache sweeper started");

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let removed = store.purge_expired();
                        if removed > 0 {
                            tracing::debug!(removed, "purged expired local cache entries");
                        }
                        crate::metrics::set_cache_entries("l1", store.len());
                    }
                }
            }

            tracing::debug!("local cache sweeper stopped");
        })
    }
}

/// Namespaced, typed view over a [`LocalStore`].
///
/// Keys are stored as `"{prefix}:{key}"`, so several views can share one store
/// without colliding.
pub struct Namespaced<V> {
    prefix: String,
    store: Arc<LocalStore<V>>,
}

impl<V> Clone for Namespaced<V> {
    fn clone(&self) -> Self {
        Self {
            prefix: self.prefix.clone(),
            store: Arc::clone(&self.store),
        }
    }
}

impl<V> Namespaced<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn new(prefix: impl Into<String>, store: Arc<LocalStore<V>>) -> Self {
        Self {
            prefix: prefix.into(),
            store,
        }
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}:{}", self.prefix, key)
    }

    pub fn get(&self, key: &str) -> Option<V> {
        self.store.get(&self.full_key(key))
    }

    pub fn set(&self, key: &str, value: V, ttl: Duration) {
        self.store.set(self.full_key(key), value, ttl);
    }

    pub fn delete(&self, key: &str) {
        self.store.delete(&self.full_key(key));
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_and_get() {
        let store = LocalStore::new(Duration::from_secs(60));
        store.set("post:1", "hello".to_string(), Duration::from_secs(60));

        assert_eq!(store.get("post:1").as_deref(), Some("hello"));
        assert_eq!(store.get("post:2"), None);
    }

    #[tokio::test]
    async fn test_expired_entry_reports_miss_and_is_removed() {
        let store = LocalStore::new(Duration::from_secs(60));
        store.set("k", 1u32, Duration::from_millis(50));
        assert_eq!(store.get("k"), Some(1));

        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(store.get("k"), None);
        assert!(store.is_empty());
    }

    #[test]
    fn test_plain_get_does_not_touch_stats() {
        let store = LocalStore::new(Duration::from_secs(60));
        store.set("k", 1u32, Duration::from_secs(60));
        store.get("k");
        store.get("missing");

        let stats = store.counters().snapshot();
        assert_eq!(stats.hits, 0);
        assert_eq!(stats.misses, 0);
    }

    #[test]
    fn test_get_with_stats_counts_hits_and_misses() {
        let store = LocalStore::new(Duration::from_secs(60));
        store.set("k", 1u32, Duration::from_secs(60));

        assert!(store.get_with_stats("k").is_some());
        assert!(store.get_with_stats("k").is_some());
        assert!(store.get_with_stats("missing").is_none());

        let stats = store.counters().snapshot();
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn test_shared_counters_aggregate_across_stores() {
        let counters = Arc::new(HitCounters::new());
        let numbers = LocalStore::<u64>::with_counters(Duration::from_secs(60), counters.clone());
        let names = LocalStore::<String>::with_counters(Duration::from_secs(60), counters.clone());

        numbers.get_with_stats("a");
        names.set("b", "bee".to_string(), Duration::ZERO);
        names.get_with_stats("b");

        assert_eq!(counters.snapshot().hits, 1);
        assert_eq!(counters.snapshot().misses, 1);
    }

    #[test]
    fn test_delete_and_flush() {
        let store = LocalStore::new(Duration::from_secs(60));
        for i in 0..5 {
            store.set(format!("k{i}"), i, Duration::from_secs(60));
        }

        store.delete("k0");
        assert_eq!(store.get("k0"), None);
        assert_eq!(store.len(), 4);

        store.flush();
        assert!(store.is_empty());
    }

    #[test]
    fn test_overwrite_replaces_value_and_deadline() {
        let store = LocalStore::new(Duration::from_secs(60));
        store.set("k", "old", Duration::from_millis(1));
        store.set("k", "new", Duration::from_secs(60));

        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(store.get("k"), Some("new"));
    }

    #[test]
    fn test_unrepresentable_ttl_never_expires() {
        let store = LocalStore::new(Duration::MAX);
        store.set("explicit", 1, Duration::MAX);
        store.set("default", 2, Duration::ZERO);

        assert_eq!(store.get("explicit"), Some(1));
        assert_eq!(store.get("default"), Some(2));
        assert_eq!(store.purge_expired(), 0);
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let store = LocalStore::new(Duration::from_secs(60));
        for i in 0..3 {
            store.set(format!("short{i}"), i, Duration::from_millis(10));
        }
        store.set("long", 99, Duration::from_secs(60));

        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(store.purge_expired(), 3);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_sweeper_purges_and_stops_on_cancel() {
        let store = Arc::new(LocalStore::new(Duration::from_secs(60)));
        store.set("k", 1u8, Duration::from_millis(10));

        let shutdown = CancellationToken::new();
        let handle = store.spawn_sweeper(Duration::from_millis(20), shutdown.clone());

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(store.is_empty());

        shutdown.cancel();
        handle.await.expect("sweeper task panicked");
    }

    #[test]
    fn test_namespaced_views_do_not_collide() {
        let store = Arc::new(LocalStore::new(Duration::from_secs(60)));
        let users = Namespaced::new("user", store.clone());
        let posts = Namespaced::new("post", store.clone());

        users.set("1", 10u64, Duration::from_secs(60));
        posts.set("1", 20u64, Duration::from_secs(60));

        assert_eq!(users.get("1"), Some(10));
        assert_eq!(posts.get("1"), Some(20));
        assert_eq!(store.get("user:1"), Some(10));

        users.delete("1");
        assert_eq!(users.get("1"), None);
        assert_eq!(posts.get("1"), Some(20));
    }
}
