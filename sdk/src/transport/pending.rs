//! Requests awaiting a response from the reader task.
//!
//! A caller registers an id before sending, then awaits the returned
//! receiver without holding any socket lock. The reader task resolves the id
//! when the matching response frame arrives.

use {
    log::warn,
    std::{
        collections::HashMap,
        hash::Hash,
        sync::{Mutex, MutexGuard},
    },
    tokio::sync::oneshot,
};

pub struct PendingRequests<K, T> {
    waiting: Mutex<HashMap<K, oneshot::Sender<T>>>,
}

impl<K, T> Default for PendingRequests<K, T> {
    fn default() -> Self {
        Self {
            waiting: Mutex::new(HashMap::new()),
        }
    }
}

impl<K: Hash + Eq + std::fmt::Debug, T> PendingRequests<K, T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `id`. Registering an id twice replaces the earlier waiter,
    /// whose receiver then resolves to an error.
    ///
    /// Waiters whose receiver was dropped are pruned here.
    pub fn register(&self, id: K) -> oneshot::Receiver<T> {
        let (tx, rx) = oneshot::channel();
        let mut waiting = self.lock();
        waiting.retain(|_, tx| !tx.is_closed());
        if waiting.insert(id, tx).is_some() {
            warn!("pending: request id registered twice, dropping the older waiter");
        }
        rx
    }

    /// Forget the waiter of `id`, e.g. after the caller timed out. Returns
    /// `false` if `id` was not registered.
    pub fn cancel(&self, id: &K) -> bool {
        self.lock().remove(id).is_some()
    }

    /// Deliver `response` to the waiter of `id`. Returns `false` if nobody
    /// was waiting or the waiter has gone away.
    pub fn resolve(&self, id: &K, response: T) -> bool {
        let Some(tx) = self.lock().remove(id) else {
            warn!("pending: response for unknown request {id:?}");
            return false;
        };
        tx.send(response).is_ok()
    }

    /// Drop every waiter, e.g. when the connection closes.
    pub fn cancel_all(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<K, oneshot::Sender<T>>> {
        self.waiting.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
