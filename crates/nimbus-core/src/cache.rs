//! Generic key/value cache with per-entry time-to-live.
//!
//! Used for authorizer decisions (keyed by authorizer and credential) and for
//! authorization codes (keyed by the code, valued by the access token).
//!
//! An entry set with a TTL of `t` is visible while `now < inserted_at + t`
//! and is treated as absent from that instant on. Expired entries are never
//! returned; they are swept lazily, whenever the store has doubled in size
//! since the last sweep.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use parking_lot::RwLock;

/// Smallest store size at which `set` sweeps expired entries.
const SWEEP_THRESHOLD: usize = 1_024;

/// Cache statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of lookups that found a live entry.
    pub hits: u64,
    /// Number of lookups that found nothing, or only an expired entry.
    pub misses: u64,
    /// Number of entries currently stored, expired or not.
    pub size: usize,
}

#[derive(Debug, Clone)]
struct Entry<V> {
    value: V,
    expires_at: Option<Instant>,
}

impl<V> Entry<V> {
    fn new(value: V, ttl: Duration) -> Self {
        Self {
            value,
            // An unrepresentable deadline is as good as no deadline at all.
            expires_at: Instant::now().checked_add(ttl),
        }
    }

    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |deadline| now < deadline)
    }
}

/// A concurrent key/value store with per-entry expiry.
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use nimbus_core::ExpiringCache;
///
/// let cache = ExpiringCache::new();
/// cache.set("code-123".to_string(), "token-abc".to_string(), Duration::from_secs(60));
///
/// assert_eq!(cache.get("code-123"), Some("token-abc".to_string()));
/// assert_eq!(cache.get("unknown"), None);
/// ```
#[derive(Debug)]
pub struct ExpiringCache<K, V> {
    entries: RwLock<HashMap<K, Entry<V>>>,
    // Only read and written under the `entries` write lock.
    next_sweep: AtomicUsize,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<K, V> Default for ExpiringCache<K, V>
where
    K: Eq + Hash,
{
    fn default() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            next_sweep: AtomicUsize::new(SWEEP_THRESHOLD),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }
}

impl<K, V> ExpiringCache<K, V>
where
    K: Eq + Hash,
    V: Clone,
{
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `value` under `key`, visible until `ttl` elapses.
    ///
    /// Replaces any previous entry for the key, live or expired. A zero TTL
    /// stores an entry that is never observable.
    pub fn set(&self, key: K, value: V, ttl: Duration) {
        let mut entries = self.entries.write();
        if entries.len() >= self.next_sweep.load(Ordering::Relaxed) {
            let now = Instant::now();
            entries.retain(|_, entry| entry.is_live(now));
            let next = entries.len().saturating_mul(2).max(SWEEP_THRESHOLD);
            self.next_sweep.store(next, Ordering::Relaxed);
        }
        entries.insert(key, Entry::new(value, ttl));
    }

    /// Returns the live value stored under `key`.
    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: std::borrow::Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        let now = Instant::now();
        let found = self
            .entries
            .read()
            .get(key)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.value.clone());
        self.record(found.is_some());
        found
    }

    /// Removes the entry under `key`, returning its value if it was still live.
    ///
    /// This is the single-use read: a second `take` for the same key never
    /// observes the value again.
    pub fn take<Q>(&self, key: &Q) -> Option<V>
    where
        K: std::borrow::Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        let now = Instant::now();
        let found = self
            .entries
            .write()
            .remove(key)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.value);
        self.record(found.is_some());
        found
    }

    /// Removes the entry under `key` regardless of expiry.
    pub fn remove<Q>(&self, key: &Q) -> bool
    where
        K: std::borrow::Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        self.entries.write().remove(key).is_some()
    }

    /// Drops every expired entry, returning how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, entry| entry.is_live(now));
        before - entries.len()
    }

    /// Clears every entry.
    pub fn clear(&self) {
        self.entries.write().clear();
    }

    /// Number of stored entries, including expired ones not yet swept.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns `true` if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Hit/miss counters and current size.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            size: self.len(),
        }
    }

    fn record(&self, hit: bool) {
        if hit {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_get_after_set() {
        let cache = ExpiringCache::new();
        assert!(cache.get("key").is_none());

        cache.set("key".to_string(), 42, Duration::from_secs(60));
        assert_eq!(cache.get("key"), Some(42));
    }

    #[test]
    fn test_set_replaces_value() {
        let cache = ExpiringCache::new();
        cache.set("key".to_string(), 1, Duration::from_secs(60));
        cache.set("key".to_string(), 2, Duration::from_secs(60));
        assert_eq!(cache.get("key"), Some(2));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_zero_ttl_is_never_visible() {
        let cache = ExpiringCache::new();
        cache.set("key".to_string(), "value".to_string(), Duration::ZERO);
        assert!(cache.get("key").is_none());
        assert!(cache.take("key").is_none());
    }

    #[test]
    fn test_entry_expires_at_ttl() {
        let cache = ExpiringCache::new();
        cache.set("key".to_string(), "value", Duration::from_millis(50));
        assert_eq!(cache.get("key"), Some("value"));

        std::thread::sleep(Duration::from_millis(80));
        assert!(cache.get("key").is_none());
        assert_eq!(cache.len(), 1, "expired entries are swept lazily");
        assert_eq!(cache.purge_expired(), 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_take_is_single_use() {
        let cache = ExpiringCache::new();
        cache.set("code".to_string(), "token".to_string(), Duration::from_secs(60));

        assert_eq!(cache.take("code"), Some("token".to_string()));
        assert!(cache.take("code").is_none());
        assert!(cache.get("code").is_none());
    }

    #[test]
    fn test_remove_and_clear() {
        let cache = ExpiringCache::new();
        cache.set("a".to_string(), 1, Duration::from_secs(60));
        cache.set("b".to_string(), 2, Duration::from_secs(60));

        assert!(cache.remove("a"));
        assert!(!cache.remove("a"));
        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_stats() {
        let cache = ExpiringCache::new();
        cache.get("key"); // miss
        cache.set("key".to_string(), 1, Duration::from_secs(60));
        cache.get("key"); // hit
        cache.get("key"); // hit

        let stats = cache.stats();
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.size, 1);
    }

    #[test]
    fn test_sweep_runs_when_store_doubles() {
        let cache = ExpiringCache::new();
        for i in 0..SWEEP_THRESHOLD {
            cache.set(i, i, Duration::from_millis(20));
        }
        std::thread::sleep(Duration::from_millis(40));
        cache.set(usize::MAX, 0, Duration::from_secs(60));
        assert_eq!(cache.len(), 1);

        let cache = ExpiringCache::new();
        for i in 0..=SWEEP_THRESHOLD {
            cache.set(i, i, Duration::from_secs(60));
        }
        assert_eq!(
            cache.next_sweep.load(Ordering::Relaxed),
            SWEEP_THRESHOLD * 2
        );

        // Live entries below the next sweep point are stored without
        // rescanning the whole map.
        for i in 0..SWEEP_THRESHOLD / 2 {
            cache.set(SWEEP_THRESHOLD + 1 + i, i, Duration::from_secs(60));
        }
        assert_eq!(
            cache.next_sweep.load(Ordering::Relaxed),
            SWEEP_THRESHOLD * 2
        );
        assert_eq!(cache.len(), SWEEP_THRESHOLD + 1 + SWEEP_THRESHOLD / 2);
    }

    #[test]
    fn test_concurrent_writers_and_readers() {
        let cache = Arc::new(ExpiringCache::new());
        let handles: Vec<_> = (0..8)
            .map(|worker| {
                let cache = Arc::clone(&cache);
                std::thread::spawn(move || {
                    for i in 0..200 {
                        let key = format!("{worker}-{i}");
                        cache.set(key.clone(), i, Duration::from_secs(60));
                        assert_eq!(cache.get(&key), Some(i));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(cache.len(), 1_600);
    }
}
