//! Size bounded map with per-entry expiry and LRU eviction.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use tokio::time::Instant;

struct Entry<V> {
    value: V,
    inserted: Instant,
    ttl: Duration,
    last_used: u64,
}

impl<V> Entry<V> {
    fn expired(&self, now: Instant) -> bool {
        now.duration_since(self.inserted) > self.ttl
    }
}

struct Inner<V> {
    entries: HashMap<String, Entry<V>>,
    tick: u64,
}

impl<V> Inner<V> {
    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    fn purge_expired(&mut self, now: Instant) {
        self.entries.retain(|_, entry| !entry.expired(now));
    }

    fn evict_lru(&mut self) {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|(_, entry)| entry.last_used)
            .map(|(key, _)| key.clone());
        if let Some(key) = oldest {
            self.entries.remove(&key);
        }
    }
}

/// Thread-safe TTL cache.
///
/// `get` refreshes recency; inserting into a full cache first drops expired
/// entries, then the least recently used ones.
pub struct TtlCache<V> {
    max_size: usize,
    default_ttl: Duration,
    inner: Mutex<Inner<V>>,
}

impl<V: Clone> TtlCache<V> {
    pub fn new(max_size: usize, default_ttl: Duration) -> Self {
        Self {
            max_size: max_size.max(1),
            default_ttl,
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                tick: 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner<V>> {
        // A panic while holding the lock cannot leave the map half-updated.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn get(&self, key: &str) -> Option<V> {
        let mut inner = self.lock();
        let now = Instant::now();
        let tick = inner.next_tick();
        match inner.entries.get_mut(key) {
            Some(entry) if !entry.expired(now) => {
                entry.last_used = tick;
                Some(entry.value.clone())
            }
            Some(_) => {
                inner.entries.remove(key);
                None
            }
            None => None,
        }
    }

    /// Insert with the default TTL.
    pub fn insert(&self, key: impl Into<String>, value: V) {
        self.insert_with_ttl(key, value, self.default_ttl);
    }

    pub fn insert_with_ttl(&self, key: impl Into<String>, value: V, ttl: Duration) {
        let key = key.into();
        let mut inner = self.lock();
        let now = Instant::now();
        inner.entries.remove(&key);
        inner.purge_expired(now);
        while inner.entries.len() >= self.max_size {
            inner.evict_lru();
        }
        let tick = inner.next_tick();
        inner.entries.insert(
            key,
            Entry {
                value,
                inserted: now,
                ttl,
                last_used: tick,
            },
        );
    }

    pub fn remove(&self, key: &str) -> bool {
        self.lock().entries.remove(key).is_some()
    }

    /// Drop every key for which `predicate` returns true.
    pub fn remove_where(&self, predicate: impl Fn(&str) -> bool) -> usize {
        let mut inner = self.lock();
        let before = inner.entries.len();
        inner.entries.retain(|key, _| !predicate(key));
        before - inner.entries.len()
    }

    pub fn clear(&self) {
        self.lock().entries.clear();
    }

    /// Live entries; expired ones are purged first.
    pub fn len(&self) -> usize {
        let mut inner = self.lock();
        inner.purge_expired(Instant::now());
        inner.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn keys(&self) -> Vec<String> {
        let mut inner = self.lock();
        inner.purge_expired(Instant::now());
        inner.entries.keys().cloned().collect()
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }
}
