//! Bounded LRU tier with hit/miss accounting.

use std::hash::Hash;
use std::num::NonZeroUsize;

use lru::LruCache;
use serde::Serialize;

/// One independently bounded LRU cache.
///
/// A capacity of zero disables the tier: every lookup is a miss and
/// inserts are dropped.
pub(crate) struct LruTier<K: Hash + Eq, V> {
    entries: Option<LruCache<K, V>>,
    capacity: usize,
    hits: u64,
    misses: u64,
    backend_calls: u64,
    evictions: u64,
}

impl<K: Hash + Eq, V: Clone> LruTier<K, V> {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: NonZeroUsize::new(capacity).map(LruCache::new),
            capacity,
            hits: 0,
            misses: 0,
            backend_calls: 0,
            evictions: 0,
        }
    }

    /// Look up and promote. Counts a hit or a miss.
    pub fn get(&mut self, key: &K) -> Option<V> {
        let found = self.entries.as_mut().and_then(|e| e.get(key)).cloned();
        match found {
            Some(_) => self.hits += 1,
            None => self.misses += 1,
        }
        found
    }

    /// Insert as most recently used, evicting the least recently used entry
    /// when full.
    pub fn insert(&mut self, key: K, value: V) {
        let Some(entries) = self.entries.as_mut() else {
            return;
        };
        let replaces = entries.contains(&key);
        if entries.push(key, value).is_some() && !replaces {
            self.evictions += 1;
        }
    }

    /// Record one call into the producing backend.
    pub fn record_backend_call(&mut self) {
        self.backend_calls += 1;
    }

    pub fn len(&self) -> usize {
        self.entries.as_ref().map_or(0, LruCache::len)
    }

    /// Drop all entries and reset every counter.
    pub fn clear(&mut self) {
        if let Some(entries) = self.entries.as_mut() {
            entries.clear();
        }
        self.hits = 0;
        self.misses = 0;
        self.backend_calls = 0;
        self.evictions = 0;
    }

    pub fn metrics(&self) -> TierMetrics {
        TierMetrics {
            hits: self.hits,
            misses: self.misses,
            backend_calls: self.backend_calls,
            evictions: self.evictions,
            size: self.len(),
            capacity: self.capacity,
        }
    }
}

/// Counters for one tier at a point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TierMetrics {
    /// Lookups answered from the tier.
    pub hits: u64,
    /// Lookups not answered from the tier.
    pub misses: u64,
    /// Calls into the backend that produces this tier's values.
    pub backend_calls: u64,
    /// Entries displaced by capacity pressure.
    pub evictions: u64,
    /// Current entry count.
    pub size: usize,
    /// Maximum entry count.
    pub capacity: usize,
}

impl TierMetrics {
    /// `hits / (hits + misses)`, or 0 when the tier was never accessed.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}
