//! Per-key mutual exclusion.

use std::{
    collections::HashMap,
    hash::Hash,
    sync::{Arc, Mutex, MutexGuard},
};

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// One lock per key, created on first use and removed once nobody holds or
/// waits for it. Work under different keys proceeds in parallel.
pub(crate) struct KeyedLocks<K> {
    table: Mutex<HashMap<K, Arc<Mutex<()>>>>,
}

impl<K> Default for KeyedLocks<K> {
    fn default() -> Self {
        Self {
            table: Mutex::new(HashMap::new()),
        }
    }
}

impl<K: Hash + Eq + Clone> KeyedLocks<K> {
    /// Run `f` while holding the lock of `key`.
    pub(crate) fn with_lock<R>(&self, key: &K, f: impl FnOnce() -> R) -> R {
        let entry = lock(&self.table).entry(key.clone()).or_default().clone();
        let result = {
            let _guard = lock(&entry);
            f()
        };

        // Clones are only handed out under the table lock, so a count of two
        // (the table's and ours) means no other caller holds or awaits it.
        let mut table = lock(&self.table);
        if Arc::strong_count(&entry) == 2 {
            table.remove(key);
        }
        result
    }

    /// Keys with a live lock.
    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        lock(&self.table).len()
    }
}
