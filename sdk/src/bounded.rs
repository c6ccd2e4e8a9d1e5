//! Fixed‑capacity map with least‑recently‑used eviction.
//!
//! Used for the skipped message key cache of a chain and for the receiver
//! chains of a session. Inserting into a full map evicts exactly one entry,
//! the least recently inserted or looked up, and hands it back to the caller.

use {
    lru::LruCache,
    serde::{ser::SerializeStruct, Deserialize, Deserializer, Serialize, Serializer},
    std::{fmt, hash::Hash, num::NonZeroUsize},
};

pub struct BoundedLru<K: Hash + Eq, V> {
    inner: LruCache<K, V>,
}

impl<K: Hash + Eq, V> BoundedLru<K, V> {
    /// A zero `capacity` is treated as one.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: LruCache::new(NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN)),
        }
    }

    /// Insert `value` under `key` and mark it most recently used.
    ///
    /// Returns the entry evicted to make room, if any. Replacing an existing
    /// key never evicts.
    pub fn insert(&mut self, key: K, value: V) -> Option<(K, V)> {
        if self.inner.contains(&key) {
            self.inner.put(key, value);
            return None;
        }
        self.inner.push(key, value)
    }

    /// Look up `key` and promote it to most recently used.
    pub fn get(&mut self, key: &K) -> Option<&V> {
        self.inner.get(key)
    }

    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        self.inner.get_mut(key)
    }

    /// Look up `key` without touching the recency order.
    pub fn peek(&self, key: &K) -> Option<&V> {
        self.inner.peek(key)
    }

    pub fn contains(&self, key: &K) -> bool {
        self.inner.contains(key)
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        self.inner.pop(key)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.inner.cap().get()
    }

    /// Entries from most to least recently used.
    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.inner.iter()
    }
}

impl<K: Hash + Eq + Clone, V: Clone> Clone for BoundedLru<K, V> {
    fn clone(&self) -> Self {
        let mut inner = LruCache::new(self.inner.cap());
        // Oldest first so the copy keeps the same recency order.
        for (key, value) in self.inner.iter().rev() {
            inner.push(key.clone(), value.clone());
        }
        Self { inner }
    }
}

impl<K: Hash + Eq + fmt::Debug, V> fmt::Debug for BoundedLru<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundedLru")
            .field("len", &self.len())
            .field("capacity", &self.capacity())
            .finish()
    }
}

// === Serialisation ===

// Entries are written oldest first so that replaying them rebuilds the same
// recency order.
impl<K: Hash + Eq + Serialize, V: Serialize> Serialize for BoundedLru<K, V> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let entries: Vec<(&K, &V)> = self.inner.iter().rev().collect();
        let mut state = serializer.serialize_struct("BoundedLru", 2)?;
        state.serialize_field("capacity", &self.capacity())?;
        state.serialize_field("entries", &entries)?;
        state.end()
    }
}

#[derive(Deserialize)]
struct BoundedLruRepr<K, V> {
    capacity: usize,
    entries: Vec<(K, V)>,
}

impl<'de, K, V> Deserialize<'de> for BoundedLru<K, V>
where
    K: Hash + Eq + Deserialize<'de>,
    V: Deserialize<'de>,
{
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let repr = BoundedLruRepr::<K, V>::deserialize(deserializer)?;
        let mut map = BoundedLru::new(repr.capacity);
        for (key, value) in repr.entries {
            map.insert(key, value);
        }
        Ok(map)
    }
}
