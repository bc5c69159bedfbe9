//! Subscriber registry: event name to an ordered list of callbacks.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tether_ipc::{EventRecord, Value};
use tracing::{error, trace};

/// Callback invoked with an event's payload.
pub type Callback = Arc<dyn Fn(&Value) + Send + Sync>;

/// Identifies one subscription, for [`SubscriberRegistry::unsubscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

#[derive(Default)]
struct Subscribers {
    by_event: HashMap<String, Vec<(SubscriptionId, Callback)>>,
    next_id: u64,
}

/// Registry of event subscribers.
///
/// Callbacks for one event run in registration order. Dispatch takes a
/// snapshot of the callback list and releases the lock before calling, so a
/// callback may subscribe or unsubscribe without deadlocking.
#[derive(Default)]
pub struct SubscriberRegistry {
    subscribers: Mutex<Subscribers>,
    closed: AtomicBool,
}

impl std::fmt::Debug for SubscriberRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let subscribers = self.subscribers.lock();
        f.debug_struct("SubscriberRegistry")
            .field("event_count", &subscribers.by_event.len())
            .field("next_id", &subscribers.next_id)
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish()
    }
}

impl SubscriberRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback for an event. Duplicate registrations are kept
    /// and each one is invoked.
    pub fn subscribe<F>(&self, event: &str, callback: F) -> SubscriptionId
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        let mut subscribers = self.subscribers.lock();
        let id = SubscriptionId(subscribers.next_id);
        subscribers.next_id += 1;
        subscribers
            .by_event
            .entry(event.to_string())
            .or_default()
            .push((id, Arc::new(callback)));

        trace!(event, id = id.0, "Subscriber registered");
        id
    }

    /// Remove a subscription. Returns false if it was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.subscribers.lock();
        let mut removed = false;

        subscribers.by_event.retain(|_, callbacks| {
            let before = callbacks.len();
            callbacks.retain(|(existing, _)| *existing != id);
            removed |= callbacks.len() != before;
            !callbacks.is_empty()
        });

        removed
    }

    /// Number of subscribers for an event.
    pub fn subscriber_count(&self, event: &str) -> usize {
        self.subscribers
            .lock()
            .by_event
            .get(event)
            .map_or(0, Vec::len)
    }

    /// Invoke every subscriber of the event's name with its payload.
    ///
    /// Returns the number of callbacks invoked. A panicking callback is
    /// logged and does not prevent the remaining ones from running.
    pub fn dispatch(&self, event: &EventRecord) -> usize {
        let callbacks: Vec<Callback> = {
            let subscribers = self.subscribers.lock();
            match subscribers.by_event.get(&event.name) {
                Some(callbacks) => callbacks.iter().map(|(_, cb)| Arc::clone(cb)).collect(),
                None => return 0,
            }
        };

        let mut invoked = 0;
        for callback in callbacks {
            if self.closed.load(Ordering::SeqCst) {
                break;
            }
            let result = panic::catch_unwind(AssertUnwindSafe(|| callback(&event.payload)));
            if result.is_err() {
                error!(event = %event.name, "Subscriber panicked");
            }
            invoked += 1;
        }

        invoked
    }

    /// Drop all subscribers and refuse further dispatch.
    ///
    /// A dispatch in progress on another thread stops before its next
    /// callback.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.subscribers.lock().by_event.clear();
    }

    /// Returns true once [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
