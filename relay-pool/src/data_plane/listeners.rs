//! Observer registries keyed by stable tokens.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Handle returned by every `on_*` registration; pass it back to the matching `off_*`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ListenerToken(u64);

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

pub(crate) struct ListenerRegistry<T: ?Sized> {
    next_token: AtomicU64,
    callbacks: Mutex<BTreeMap<ListenerToken, Callback<T>>>,
}

impl<T: ?Sized> ListenerRegistry<T> {
    pub(crate) fn new() -> Self {
        Self {
            next_token: AtomicU64::new(0),
            callbacks: Mutex::new(BTreeMap::new()),
        }
    }

    fn callbacks(&self) -> MutexGuard<'_, BTreeMap<ListenerToken, Callback<T>>> {
        self.callbacks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn add(&self, callback: impl Fn(&T) + Send + Sync + 'static) -> ListenerToken {
        let token = ListenerToken(self.next_token.fetch_add(1, Ordering::Relaxed));
        self.callbacks().insert(token, Arc::new(callback));
        token
    }

    pub(crate) fn remove(&self, token: ListenerToken) -> bool {
        self.callbacks().remove(&token).is_some()
    }

    /// Invokes every callback in registration order.
    ///
    /// Callbacks run after the lock is released, so they may add or remove
    /// listeners (or stop the subscription) without deadlocking.
    pub(crate) fn notify(&self, value: &T) {
        let callbacks: Vec<Callback<T>> = self.callbacks().values().cloned().collect();
        for callback in callbacks {
            callback(value);
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.callbacks().len()
    }
}
