//! Status listeners.

use crate::state::SyncStatus;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::{Arc, Weak};

type Listener = Arc<dyn Fn(&SyncStatus) + Send + Sync>;

#[derive(Default)]
struct Registry {
    next_id: u64,
    listeners: BTreeMap<u64, Listener>,
}

/// Registered status listeners.
#[derive(Default)]
pub(crate) struct StatusListeners {
    registry: Arc<Mutex<Registry>>,
}

impl StatusListeners {
    pub(crate) fn subscribe<F>(&self, listener: F) -> StatusSubscription
    where
        F: Fn(&SyncStatus) + Send + Sync + 'static,
    {
        let mut registry = self.registry.lock();
        let id = registry.next_id;
        registry.next_id += 1;
        registry.listeners.insert(id, Arc::new(listener));
        StatusSubscription {
            id,
            registry: Arc::downgrade(&self.registry),
            active: true,
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.registry.lock().listeners.is_empty()
    }

    /// Calls every listener outside the registry lock, so listeners may
    /// subscribe or unsubscribe.
    pub(crate) fn notify(&self, status: &SyncStatus) {
        let listeners: Vec<Listener> = self.registry.lock().listeners.values().cloned().collect();
        for listener in listeners {
            listener(status);
        }
    }
}

/// Handle of a status listener.
///
/// The listener is removed by [`StatusSubscription::unsubscribe`] or when
/// the handle is dropped. Use [`StatusSubscription::detach`] to keep it for
/// the lifetime of the engine.
#[must_use = "dropping the subscription removes the listener"]
pub struct StatusSubscription {
    id: u64,
    registry: Weak<Mutex<Registry>>,
    active: bool,
}

impl StatusSubscription {
    /// Removes the listener.
    pub fn unsubscribe(mut self) {
        self.remove();
    }

    /// Keeps the listener registered after the handle is gone.
    pub fn detach(mut self) {
        self.active = false;
    }

    fn remove(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;
        if let Some(registry) = self.registry.upgrade() {
            registry.lock().listeners.remove(&self.id);
        }
    }
}

impl Drop for StatusSubscription {
    fn drop(&mut self) {
        self.remove();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::SyncState;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn status() -> SyncStatus {
        SyncStatus {
            state: SyncState::Idle,
            is_online: true,
            last_sync_time: None,
            pending_changes: 0,
            sync_in_progress: false,
            sync_error: None,
            conflicts: Vec::new(),
            data_consistent: true,
        }
    }

    fn counting(listeners: &StatusListeners) -> (Arc<AtomicUsize>, StatusSubscription) {
        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&count);
        let subscription = listeners.subscribe(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        });
        (count, subscription)
    }

    #[test]
    fn unsubscribe_stops_notifications() {
        let listeners = StatusListeners::default();
        let (count, subscription) = counting(&listeners);

        listeners.notify(&status());
        subscription.unsubscribe();
        listeners.notify(&status());

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(listeners.is_empty());
    }

    #[test]
    fn drop_unsubscribes() {
        let listeners = StatusListeners::default();
        let (count, subscription) = counting(&listeners);
        drop(subscription);
        listeners.notify(&status());
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn detached_listener_stays() {
        let listeners = StatusListeners::default();
        let (count, subscription) = counting(&listeners);
        subscription.detach();
        listeners.notify(&status());
        listeners.notify(&status());
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn subscription_outlives_registry() {
        let listeners = StatusListeners::default();
        let (_count, subscription) = counting(&listeners);
        drop(listeners);
        subscription.unsubscribe();
    }
}
