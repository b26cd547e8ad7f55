/* src/memo.rs */

//! Write-once-per-key memoisation for pure lookups.
//!
//! Route matching is pure and the configuration never changes after startup,
//! so the `(path, method) -> route` lookup is cached here. Reads take the
//! shared lock; a miss computes outside any lock and then inserts. Two tasks
//! missing on the same key may both run the underlying function, but only the
//! first result is kept, and a pure function makes them identical anyway.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::hash::Hash;

pub(crate) struct Memo<K, V> {
    cache: RwLock<HashMap<K, V>>,
}

impl<K, V> Memo<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub(crate) fn new() -> Self {
        Self {
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the cached value for `key`, computing it with `compute` on the
    /// first sighting.
    pub(crate) fn get_or_compute<F>(&self, key: &K, compute: F) -> V
    where
        F: FnOnce() -> V,
    {
        if let Some(value) = self.cache.read().get(key) {
            return value.clone();
        }
        let value = compute();
        self.cache
            .write()
            .entry(key.clone())
            .or_insert(value)
            .clone()
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.cache.read().len()
    }
}
