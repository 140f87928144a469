//! Bounded TTL cache with insertion-order eviction.

use std::collections::{HashMap, VecDeque};
use std::hash::Hash;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tokio::time::Instant;

/// A cached value and its expiry.
#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    expires_at: Instant,
    /// Insertion sequence number; matches at most one slot in `order`.
    seq: u64,
}

impl<V> CacheEntry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

#[derive(Debug)]
struct Store<K, V> {
    entries: HashMap<K, CacheEntry<V>>,
    /// Keys in insertion order. Slots whose sequence number no longer matches
    /// the live entry are stale and skipped.
    order: VecDeque<(K, u64)>,
    next_seq: u64,
}

impl<K: Eq + Hash + Clone, V> Store<K, V> {
    fn evict_expired(&mut self, now: Instant) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, e| !e.is_expired(now));
        before - self.entries.len()
    }

    /// Remove the oldest-inserted live entry.
    fn evict_oldest(&mut self) -> Option<K> {
        while let Some((key, seq)) = self.order.pop_front() {
            let live = self.entries.get(&key).is_some_and(|e| e.seq == seq);
            if live {
                self.entries.remove(&key);
                return Some(key);
            }
        }
        None
    }

    fn compact_order(&mut self) {
        let entries = &self.entries;
        self.order
            .retain(|(key, seq)| entries.get(key).is_some_and(|e| e.seq == *seq));
    }
}

/// Thread-safe cache bounded by entry count and per-entry time-to-live.
///
/// Expired entries read as absent. When an insert would exceed capacity,
/// expired entries are purged first; if the store is still full the single
/// oldest-inserted entry is evicted. Reads do not affect eviction order.
#[derive(Debug)]
pub struct TtlCache<K, V> {
    store: RwLock<Store<K, V>>,
    default_ttl: Duration,
    max_entries: usize,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Create a cache. A capacity of zero is treated as one.
    pub fn new(default_ttl: Duration, max_entries: usize) -> Self {
        Self {
            store: RwLock::new(Store {
                entries: HashMap::new(),
                order: VecDeque::new(),
                next_seq: 0,
            }),
            default_ttl,
            max_entries: max_entries.max(1),
        }
    }

    // Poisoning is ignored: stale `order` slots are already tolerated.
    fn read(&self) -> RwLockReadGuard<'_, Store<K, V>> {
        self.store.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Store<K, V>> {
        self.store.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Get a live value. Expired entries are purged on the way out.
    pub fn get(&self, key: &K) -> Option<V> {
        let now = Instant::now();
        {
            let store = self.read();
            let entry = store.entries.get(key)?;
            if !entry.is_expired(now) {
                return Some(entry.value.clone());
            }
        }

        let mut store = self.write();
        if store.entries.get(key).is_some_and(|e| e.is_expired(now)) {
            store.entries.remove(key);
        }
        None
    }

    /// Store a value with the default TTL.
    pub fn put(&self, key: K, value: V) {
        self.put_with_ttl(key, value, self.default_ttl);
    }

    /// Store a value with an explicit TTL.
    pub fn put_with_ttl(&self, key: K, value: V, ttl: Duration) {
        let now = Instant::now();
        let mut store = self.write();

        if store.entries.len() >= self.max_entries && !store.entries.contains_key(&key) {
            store.evict_expired(now);
            while store.entries.len() >= self.max_entries {
                if store.evict_oldest().is_none() {
                    break;
                }
            }
        }

        let seq = store.next_seq;
        store.next_seq += 1;
        store.order.push_back((key.clone(), seq));
        store.entries.insert(
            key,
            CacheEntry {
                value,
                expires_at: now + ttl,
                seq,
            },
        );

        if store.order.len() > self.max_entries.saturating_mul(2) {
            store.compact_order();
        }
    }

    /// Remove every expired entry. Returns how many were removed.
    pub fn evict_expired(&self) -> usize {
        let now = Instant::now();
        let mut store = self.write();
        let removed = store.evict_expired(now);
        store.compact_order();
        removed
    }

    /// Number of stored entries, including expired ones not yet purged.
    pub fn len(&self) -> usize {
        self.read().entries.len()
    }

    /// Check if the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Clear all entries from the cache.
    pub fn clear(&self) {
        let mut store = self.write();
        store.entries.clear();
        store.order.clear();
    }
}
