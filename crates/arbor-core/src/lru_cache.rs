//! Ordered key/value cache with most-recently-used reordering

use std::borrow::Borrow;
use std::fmt;
use std::hash::Hash;

/// LRU-ordered map with an advisory capacity.
///
/// `put` never evicts on its own; the owner asks for [`overflow`](LruCache::overflow)
/// and [`lru_keys`](LruCache::lru_keys) and decides what to drop.
pub struct LruCache<K: Hash + Eq, V> {
    entries: lru::LruCache<K, V>,
    capacity: Option<usize>,
}

impl<K: Hash + Eq, V> LruCache<K, V> {
    pub fn new(capacity: usize) -> Self {
        Self::with_capacity(Some(capacity))
    }

    pub fn unbounded() -> Self {
        Self::with_capacity(None)
    }

    pub fn with_capacity(capacity: Option<usize>) -> Self {
        LruCache {
            entries: lru::LruCache::unbounded(),
            capacity,
        }
    }

    /// Look up and mark as most recently used.
    pub fn get<Q>(&mut self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries.get(key)
    }

    /// Look up without touching the order.
    pub fn peek<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries.peek(key)
    }

    pub fn contains<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries.contains(key)
    }

    /// Insert as most recently used, returning the previous value.
    pub fn put(&mut self, key: K, value: V) -> Option<V> {
        self.entries.put(key, value)
    }

    pub fn remove<Q>(&mut self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries.pop(key)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    pub fn set_capacity(&mut self, capacity: Option<usize>) {
        self.capacity = capacity;
    }

    /// Number of entries above capacity.
    pub fn overflow(&self) -> usize {
        match self.capacity {
            Some(capacity) => self.entries.len().saturating_sub(capacity),
            None => 0,
        }
    }

    /// Entries from most to least recently used.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = (&K, &V)> {
        self.entries.iter()
    }
}

impl<K: Hash + Eq + Clone, V> LruCache<K, V> {
    /// Keys from least to most recently used: eviction candidates first.
    pub fn lru_keys(&self) -> Vec<K> {
        self.entries.iter().rev().map(|(k, _)| k.clone()).collect()
    }
}

impl<K: Hash + Eq + Clone, V: Clone> LruCache<K, V> {
    /// Copy of all entries, most recently used first.
    pub fn snapshot(&self) -> Vec<(K, V)> {
        self.entries
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

impl<K: Hash + Eq + fmt::Debug, V: fmt::Debug> fmt::Debug for LruCache<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.entries.iter()).finish()
    }
}
