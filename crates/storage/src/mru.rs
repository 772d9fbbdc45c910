//! TTL'd most-recently-used cache
//!
//! Small bounded map used for the read-nodes cache of a node repository and
//! as the building block of the process-global L1 cache. Entries expire
//! lazily on access; eviction drops the least recently touched key once
//! capacity is exceeded.

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::collections::VecDeque;
use std::hash::Hash;
use std::time::{Duration, Instant};

struct Entry<V> {
    value: V,
    expires_at: Option<Instant>,
}

struct Inner<K, V> {
    map: FxHashMap<K, Entry<V>>,
    // Most recent at the front. Touch cost is linear, which is fine for the
    // small capacities this cache is used with.
    order: VecDeque<K>,
}

/// Bounded MRU map with optional per-entry TTL.
pub struct Mru<K, V> {
    inner: Mutex<Inner<K, V>>,
    capacity: usize,
}

impl<K: Eq + Hash + Clone, V: Clone> Mru<K, V> {
    /// Create a cache holding at most `capacity` entries.
    pub fn new(capacity: usize) -> Self {
        Mru {
            inner: Mutex::new(Inner {
                map: FxHashMap::default(),
                order: VecDeque::new(),
            }),
            capacity,
        }
    }

    /// Fetch a value, refreshing its recency. Expired entries are removed
    /// and reported as misses.
    pub fn get(&self, key: &K) -> Option<V> {
        let mut inner = self.inner.lock();
        let expired = match inner.map.get(key) {
            Some(entry) => match entry.expires_at {
                Some(at) => Instant::now() >= at,
                None => false,
            },
            None => return None,
        };
        if expired {
            inner.map.remove(key);
            inner.order.retain(|k| k != key);
            return None;
        }
        inner.order.retain(|k| k != key);
        inner.order.push_front(key.clone());
        inner.map.get(key).map(|e| e.value.clone())
    }

    /// Insert or replace a value, evicting the least recently used entry
    /// when over capacity.
    pub fn set(&self, key: K, value: V, ttl: Option<Duration>) {
        let mut inner = self.inner.lock();
        let expires_at = ttl.map(|d| Instant::now() + d);
        inner.order.retain(|k| k != &key);
        inner.order.push_front(key.clone());
        inner.map.insert(key, Entry { value, expires_at });
        while inner.map.len() > self.capacity {
            if let Some(oldest) = inner.order.pop_back() {
                inner.map.remove(&oldest);
            } else {
                break;
            }
        }
    }

    /// Remove a key. Returns true when it was present.
    pub fn delete(&self, key: &K) -> bool {
        let mut inner = self.inner.lock();
        inner.order.retain(|k| k != key);
        inner.map.remove(key).is_some()
    }

    /// Number of live entries (expired ones may still be counted until
    /// touched).
    pub fn len(&self) -> usize {
        self.inner.lock().map.len()
    }

    /// Whether the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop everything.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.map.clear();
        inner.order.clear();
    }
}
