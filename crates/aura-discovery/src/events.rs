//! Endpoint event notification
//!
//! Listeners register against an [`EventKey`] and are invoked synchronously,
//! in registration order, for every matching [`EndpointEvent`]. Dropping
//! interest is explicit: pass the [`Subscription`] back to
//! [`EventRegistry::unsubscribe`].

use crate::envelope::{Envelope, SenderInfo};
use crate::error::TransportError;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Notification surfaced by an endpoint
#[derive(Debug, Clone)]
pub enum EndpointEvent {
    /// Application event carrying a payload
    Named {
        /// Event name
        event: String,
        /// Application payload
        payload: Value,
        /// Full decoded envelope
        envelope: Envelope,
        /// Datagram origin
        sender: SenderInfo,
    },
    /// Envelope without both an event name and a payload
    Message(Envelope),
    /// Start-time failure
    Error(Arc<TransportError>),
}

impl EndpointEvent {
    /// Registry key this event is dispatched under
    pub fn key(&self) -> EventKey {
        match self {
            Self::Named { event, .. } => EventKey::Named(event.clone()),
            Self::Message(_) => EventKey::Message,
            Self::Error(_) => EventKey::Error,
        }
    }
}

/// What a listener subscribes to
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventKey {
    /// A named application event
    Named(String),
    /// Generic `message` channel
    Message,
    /// Error channel
    Error,
}

impl EventKey {
    /// Key for a named application event
    pub fn named(event: impl Into<String>) -> Self {
        Self::Named(event.into())
    }
}

/// Handle identifying one registered listener
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Subscription {
    key: EventKey,
    id: u64,
}

impl Subscription {
    /// Key the listener is registered under
    pub fn key(&self) -> &EventKey {
        &self.key
    }
}

/// Listener callback
pub type Listener = Arc<dyn Fn(&EndpointEvent) + Send + Sync>;

/// Registry mapping event keys to ordered listener lists
#[derive(Default)]
pub struct EventRegistry {
    listeners: Mutex<HashMap<EventKey, Vec<(u64, Listener)>>>,
    next_id: AtomicU64,
}

impl std::fmt::Debug for EventRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let listeners = self.listeners.lock();
        f.debug_struct("EventRegistry")
            .field("keys", &listeners.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl EventRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener for `key`
    pub fn subscribe<F>(&self, key: EventKey, listener: F) -> Subscription
    where
        F: Fn(&EndpointEvent) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners
            .lock()
            .entry(key.clone())
            .or_default()
            .push((id, Arc::new(listener)));
        Subscription { key, id }
    }

    /// Remove a listener. Returns `false` if it was already gone.
    pub fn unsubscribe(&self, subscription: &Subscription) -> bool {
        let mut listeners = self.listeners.lock();
        let Some(list) = listeners.get_mut(&subscription.key) else {
            return false;
        };
        let before = list.len();
        list.retain(|(id, _)| *id != subscription.id);
        let removed = list.len() != before;
        if list.is_empty() {
            listeners.remove(&subscription.key);
        }
        removed
    }

    /// Number of listeners registered for `key`
    pub fn listener_count(&self, key: &EventKey) -> usize {
        self.listeners.lock().get(key).map_or(0, Vec::len)
    }

    /// Invoke every listener registered for the event's key.
    ///
    /// Returns how many listeners ran. The list is snapshotted first, so
    /// listeners may subscribe or unsubscribe while being called.
    pub fn dispatch(&self, event: &EndpointEvent) -> usize {
        let snapshot: Vec<Listener> = self
            .listeners
            .lock()
            .get(&event.key())
            .map(|list| list.iter().map(|(_, l)| l.clone()).collect())
            .unwrap_or_default();

        for listener in &snapshot {
            listener(event);
        }
        snapshot.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{InstanceId, ProcessId};

    fn message() -> EndpointEvent {
        EndpointEvent::Message(Envelope::new(
            "hello",
            ProcessId::generate(),
            InstanceId::generate(),
            "h",
        ))
    }

    #[test]
    fn test_dispatch_in_registration_order() {
        let registry = EventRegistry::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for tag in ["first", "second", "third"] {
            let seen = seen.clone();
            registry.subscribe(EventKey::Message, move |_| seen.lock().push(tag));
        }

        assert_eq!(registry.dispatch(&message()), 3);
        assert_eq!(*seen.lock(), vec!["first", "second", "third"]);
    }

    #[test]
    fn test_dispatch_only_matching_key() {
        let registry = EventRegistry::new();
        let hits = Arc::new(AtomicU64::new(0));
        let counter = hits.clone();
        registry.subscribe(EventKey::named("job"), move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(registry.dispatch(&message()), 0);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_unsubscribe() {
        let registry = EventRegistry::new();
        let keep = registry.subscribe(EventKey::Message, |_| {});
        let drop_me = registry.subscribe(EventKey::Message, |_| {});
        assert_eq!(registry.listener_count(&EventKey::Message), 2);

        assert!(registry.unsubscribe(&drop_me));
        assert!(!registry.unsubscribe(&drop_me));
        assert_eq!(registry.listener_count(&EventKey::Message), 1);
        assert_eq!(keep.key(), &EventKey::Message);
    }

    #[test]
    fn test_listener_may_unsubscribe_itself() {
        let registry = Arc::new(EventRegistry::new());
        let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));

        let reg = registry.clone();
        let own = slot.clone();
        let sub = registry.subscribe(EventKey::Message, move |_| {
            if let Some(sub) = own.lock().take() {
                reg.unsubscribe(&sub);
            }
        });
        *slot.lock() = Some(sub);

        assert_eq!(registry.dispatch(&message()), 1);
        assert_eq!(registry.dispatch(&message()), 0);
    }
}
