//! Typed publish/subscribe event bus.
//!
//! Publishers know nothing about their subscribers. Two kinds of listener are
//! supported:
//!
//! - Synchronous handlers registered with [`EventBus::subscribe`], run in
//!   subscription order on the publishing thread. Renderers use these.
//! - Async receivers from [`EventBus::stream`], backed by a tokio broadcast
//!   channel. The SSE endpoint uses these.
//!
//! Publishing never blocks and never waits for acknowledgment.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use tokio::sync::broadcast;
use tracing::{error, trace};

/// Buffered events per async receiver before lagging receivers skip ahead.
const DEFAULT_STREAM_CAPACITY: usize = 64;

/// Handle returned by [`EventBus::subscribe`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Handler<E> = Arc<dyn Fn(&E) + Send + Sync>;

/// An application-wide event bus for events of type `E`.
pub struct EventBus<E> {
    handlers: RwLock<Vec<(SubscriptionId, Handler<E>)>>,
    next_id: AtomicU64,
    sender: broadcast::Sender<E>,
}

impl<E: Clone + Send + 'static> Default for EventBus<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Clone + Send + 'static> EventBus<E> {
    /// Create a bus whose async receivers buffer up to
    /// `DEFAULT_STREAM_CAPACITY` events each.
    #[must_use]
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(DEFAULT_STREAM_CAPACITY);
        Self {
            handlers: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
            sender,
        }
    }

    /// Register a synchronous handler.
    pub fn subscribe<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        if let Ok(mut handlers) = self.handlers.write() {
            handlers.push((id, Arc::new(handler)));
        }
        id
    }

    /// Remove a handler. Returns `false` if it was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let Ok(mut handlers) = self.handlers.write() else {
            return false;
        };
        let before = handlers.len();
        handlers.retain(|(handler_id, _)| *handler_id != id);
        handlers.len() != before
    }

    /// Receive events asynchronously.
    #[must_use]
    pub fn stream(&self) -> broadcast::Receiver<E> {
        self.sender.subscribe()
    }

    /// Deliver `event` to every listener.
    ///
    /// A panicking handler is logged and skipped; later handlers still run.
    pub fn publish(&self, event: E) {
        let handlers: Vec<Handler<E>> = self
            .handlers
            .read()
            .map(|h| h.iter().map(|(_, handler)| Arc::clone(handler)).collect())
            .unwrap_or_default();

        for handler in handlers {
            if catch_unwind(AssertUnwindSafe(|| handler(&event))).is_err() {
                error!("Event handler panicked");
            }
        }

        // No receivers is fine
        if self.sender.send(event).is_err() {
            trace!("No async receivers for event");
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[test]
    fn test_publish_reaches_all_handlers_in_order() {
        let bus = EventBus::<u32>::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let first = Arc::clone(&seen);
        bus.subscribe(move |n| first.lock().unwrap().push(("first", *n)));
        let second = Arc::clone(&seen);
        bus.subscribe(move |n| second.lock().unwrap().push(("second", *n)));

        bus.publish(7);

        assert_eq!(*seen.lock().unwrap(), vec![("first", 7), ("second", 7)]);
    }

    #[test]
    fn test_unsubscribe() {
        let bus = EventBus::<u32>::new();
        let count = Arc::new(AtomicU64::new(0));
        let c = Arc::clone(&count);
        let id = bus.subscribe(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        bus.publish(1);
        assert!(bus.unsubscribe(id));
        assert!(!bus.unsubscribe(id));
        bus.publish(2);

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_panicking_handler_is_isolated() {
        let bus = EventBus::<u32>::new();
        let count = Arc::new(AtomicU64::new(0));
        bus.subscribe(|_| panic!("renderer bug"));
        let c = Arc::clone(&count);
        bus.subscribe(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        bus.publish(1);

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stream_receives_events() {
        let bus = EventBus::<String>::new();
        let mut rx = bus.stream();

        bus.publish("hello".to_string());

        assert_eq!(rx.recv().await.unwrap(), "hello");
    }
}
