//! Event sinks
//!
//! Publish/subscribe channel between the worker thread and whatever presents
//! the data. Subscribing returns a [`Subscription`] handle; dispatch copies the
//! subscriber list first and invokes the callbacks without holding the lock, so
//! a callback may subscribe or unsubscribe without deadlocking or racing the
//! notification in flight.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::RwLock;
use serde::Serialize;

use crate::codec::Value;

/// Decoded values of one poll cycle, in batch order
pub type ReadResult = IndexMap<String, Value>;

/// Connection state change or fatal error report
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionEvent {
    pub connected: bool,
    /// Set when the transition was caused by a failure
    pub error: Option<String>,
}

impl ConnectionEvent {
    pub fn connected() -> Self {
        Self {
            connected: true,
            error: None,
        }
    }

    pub fn disconnected() -> Self {
        Self {
            connected: false,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            connected: false,
            error: Some(error.into()),
        }
    }
}

/// Which sink list a subscription belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SinkKind {
    Data,
    Connection,
}

/// Handle returned by a subscribe call
///
/// Dropping the handle keeps the callback registered; pass it to
/// [`EventBus::unsubscribe`] to remove it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Subscription {
    id: u64,
    kind: SinkKind,
}

impl Subscription {
    pub fn kind(&self) -> SinkKind {
        self.kind
    }
}

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct SinkList<T> {
    entries: RwLock<Vec<(u64, Callback<T>)>>,
}

impl<T> SinkList<T> {
    fn new() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
        }
    }

    fn add(&self, id: u64, callback: Callback<T>) {
        self.entries.write().push((id, callback));
    }

    fn remove(&self, id: u64) -> bool {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|(entry_id, _)| *entry_id != id);
        entries.len() != before
    }

    fn dispatch(&self, event: &T) {
        let snapshot: Vec<Callback<T>> = self
            .entries
            .read()
            .iter()
            .map(|(_, callback)| Arc::clone(callback))
            .collect();
        for callback in snapshot {
            callback(event);
        }
    }

    fn len(&self) -> usize {
        self.entries.read().len()
    }
}

/// Thread-safe sink registry
pub struct EventBus {
    next_id: AtomicU64,
    data: SinkList<ReadResult>,
    connection: SinkList<ConnectionEvent>,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("data_sinks", &self.data.len())
            .field("connection_sinks", &self.connection.len())
            .finish()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            data: SinkList::new(),
            connection: SinkList::new(),
        }
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Register a callback for every successful poll cycle
    pub fn subscribe_data<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&ReadResult) + Send + Sync + 'static,
    {
        let id = self.next_id();
        self.data.add(id, Arc::new(callback));
        Subscription {
            id,
            kind: SinkKind::Data,
        }
    }

    /// Register a callback for connection transitions and fatal errors
    pub fn subscribe_connection<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&ConnectionEvent) + Send + Sync + 'static,
    {
        let id = self.next_id();
        self.connection.add(id, Arc::new(callback));
        Subscription {
            id,
            kind: SinkKind::Connection,
        }
    }

    /// Remove a callback; returns `false` if it was already removed
    pub fn unsubscribe(&self, subscription: Subscription) -> bool {
        match subscription.kind {
            SinkKind::Data => self.data.remove(subscription.id),
            SinkKind::Connection => self.connection.remove(subscription.id),
        }
    }

    pub fn publish_data(&self, values: &ReadResult) {
        self.data.dispatch(values);
    }

    pub fn publish_connection(&self, event: &ConnectionEvent) {
        self.connection.dispatch(event);
    }

    pub fn data_subscribers(&self) -> usize {
        self.data.len()
    }

    pub fn connection_subscribers(&self) -> usize {
        self.connection.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn test_publish_reaches_all_subscribers() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for tag in ["a", "b"] {
            let seen = Arc::clone(&seen);
            bus.subscribe_connection(move |event| {
                seen.lock().push((tag, event.connected));
            });
        }

        bus.publish_connection(&ConnectionEvent::connected());
        assert_eq!(*seen.lock(), vec![("a", true), ("b", true)]);
    }

    #[test]
    fn test_unsubscribe_stops_delivery() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&count);
        let sub = bus.subscribe_data(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        bus.publish_data(&ReadResult::new());
        assert!(bus.unsubscribe(sub));
        assert!(!bus.unsubscribe(sub));
        bus.publish_data(&ReadResult::new());

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(bus.data_subscribers(), 0);
    }

    #[test]
    fn test_dropping_handle_keeps_subscription() {
        let bus = EventBus::new();
        {
            let _sub = bus.subscribe_connection(|_| {});
        }
        assert_eq!(bus.connection_subscribers(), 1);
    }

    #[test]
    fn test_callback_may_unsubscribe_itself() {
        let bus = Arc::new(EventBus::new());
        let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));
        let calls = Arc::new(AtomicU64::new(0));

        let sub = {
            let bus_ref = Arc::clone(&bus);
            let slot = Arc::clone(&slot);
            let calls = Arc::clone(&calls);
            bus.subscribe_connection(move |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                if let Some(own) = slot.lock().take() {
                    bus_ref.unsubscribe(own);
                }
            })
        };
        *slot.lock() = Some(sub);

        bus.publish_connection(&ConnectionEvent::failed("boom"));
        bus.publish_connection(&ConnectionEvent::failed("boom"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_connection_event_constructors() {
        assert_eq!(ConnectionEvent::failed("x").error.as_deref(), Some("x"));
        assert!(ConnectionEvent::connected().connected);
        assert!(ConnectionEvent::disconnected().error.is_none());
    }
}
