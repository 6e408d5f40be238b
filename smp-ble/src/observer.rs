use std::sync::{Arc, Mutex};

use proto::PeripheralState;

/// Listener for connection lifecycle changes
///
/// Called synchronously from the transport's event handling; implementations
/// must return promptly and must not call back into the transport.
pub trait ConnectionObserver: Send + Sync {
    /// The peripheral moved to a new lifecycle state
    fn peripheral_state_changed(&self, state: PeripheralState);
}

/// Registered-listener list notified on every state change
///
/// Registrations are owned `Arc`s removed only by explicit request, compared
/// by pointer identity; nothing expires silently.
#[derive(Default)]
pub(crate) struct ObserverList {
    observers: Mutex<Vec<Arc<dyn ConnectionObserver>>>,
}

impl ObserverList {
    pub(crate) fn add(&self, observer: Arc<dyn ConnectionObserver>) {
        self.observers.lock().unwrap().push(observer);
    }

    /// Remove a previously added observer; `false` if it was never registered
    pub(crate) fn remove(&self, observer: &Arc<dyn ConnectionObserver>) -> bool {
        let mut observers = self.observers.lock().unwrap();
        let before = observers.len();
        observers.retain(|o| !Arc::ptr_eq(o, observer));
        observers.len() != before
    }

    pub(crate) fn notify(&self, state: PeripheralState) {
        // Snapshot under the lock, call outside it, so an observer may
        // add or remove registrations from its callback
        let snapshot: Vec<_> = self.observers.lock().unwrap().clone();
        for observer in snapshot {
            observer.peripheral_state_changed(state);
        }
    }
}
