//! Write listeners.
//!
//! Each orchestrator owns its registry. Listeners run synchronously, in
//! registration order, after a value has been stored.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use stash_core::{Args, Key, StashResult};

/// Handle returned by registration, used to remove a listener again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

/// A freshly stored value and the call that produced it.
#[derive(Debug)]
pub struct WriteNotification<'a, V> {
    pub key: &'a Key,
    pub value: &'a V,
    pub args: &'a Args,
}

/// Callback invoked for every successful write.
pub type Listener<V> = Arc<dyn Fn(&WriteNotification<'_, V>) -> StashResult<()> + Send + Sync>;

pub(crate) struct ListenerRegistry<V> {
    next_id: AtomicU64,
    entries: Mutex<Vec<(ListenerId, Listener<V>)>>,
}

impl<V> Default for ListenerRegistry<V> {
    fn default() -> Self {
        Self {
            next_id: AtomicU64::new(0),
            entries: Mutex::new(Vec::new()),
        }
    }
}

impl<V> ListenerRegistry<V> {
    pub(crate) fn register(&self, listener: Listener<V>) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, listener));
        id
    }

    pub(crate) fn remove(&self, id: ListenerId) -> bool {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|(existing, _)| *existing != id);
        entries.len() != before
    }

    pub(crate) fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Invoke every listener; the first error stops the chain.
    ///
    /// The lock is released before any listener runs, so listeners may
    /// register or remove listeners themselves.
    pub(crate) fn notify(&self, notification: &WriteNotification<'_, V>) -> StashResult<()> {
        let snapshot: Vec<Listener<V>> = self
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        for listener in snapshot {
            listener(notification)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stash_core::StashError;

    fn notification<'a>(key: &'a Key, value: &'a i32, args: &'a Args) -> WriteNotification<'a, i32> {
        WriteNotification { key, value, args }
    }

    #[test]
    fn test_listeners_run_in_registration_order() {
        let registry = ListenerRegistry::<i32>::default();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for tag in 0..3 {
            let seen = Arc::clone(&seen);
            registry.register(Arc::new(move |n: &WriteNotification<'_, i32>| {
                seen.lock().expect("lock").push((tag, *n.value));
                Ok(())
            }));
        }

        let key = Key::from("fn_x");
        let args = Args::new();
        registry
            .notify(&notification(&key, &7, &args))
            .expect("notify should succeed");
        assert_eq!(*seen.lock().expect("lock"), vec![(0, 7), (1, 7), (2, 7)]);
    }

    #[test]
    fn test_remove_listener() {
        let registry = ListenerRegistry::<i32>::default();
        let id = registry.register(Arc::new(|_: &WriteNotification<'_, i32>| Ok(())));
        assert_eq!(registry.len(), 1);
        assert!(registry.remove(id));
        assert!(!registry.remove(id));
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn test_listener_error_stops_chain() {
        let registry = ListenerRegistry::<i32>::default();
        let reached = Arc::new(Mutex::new(false));
        registry.register(Arc::new(|_: &WriteNotification<'_, i32>| {
            Err(StashError::computation("listener failed"))
        }));
        let flag = Arc::clone(&reached);
        registry.register(Arc::new(move |_: &WriteNotification<'_, i32>| {
            *flag.lock().expect("lock") = true;
            Ok(())
        }));

        let key = Key::from("fn_x");
        let args = Args::new();
        let result = registry.notify(&notification(&key, &1, &args));
        assert!(result.is_err());
        assert!(!*reached.lock().expect("lock"));
    }
}
