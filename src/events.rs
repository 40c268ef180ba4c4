//! Push-event contract between the backend stream and live sessions.
//!
//! Events arrive asynchronously, in delivery order, and are applied the
//! moment they are received. Duplicate delivery is tolerated: list merges
//! are idempotent per record id.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use tracing::debug;
use uuid::Uuid;

use crate::filter::FilterState;
use crate::lock::{rw_read, rw_write};

const SOURCE: &str = "sync::events";

/// A record that can live in a synchronized list.
pub trait SyncRecord: Clone + Send + Sync + 'static {
    fn record_id(&self) -> Uuid;

    /// Client-side approximation of the server-side list filter predicate.
    fn matches(&self, filters: &FilterState) -> bool;
}

/// An incremental change pushed by the backend.
#[derive(Debug, Clone)]
pub enum ChangeEvent<T> {
    Created(T),
    Updated(T),
    Deleted(Uuid),
}

impl<T: SyncRecord> ChangeEvent<T> {
    pub fn record_id(&self) -> Uuid {
        match self {
            ChangeEvent::Created(record) | ChangeEvent::Updated(record) => record.record_id(),
            ChangeEvent::Deleted(id) => *id,
        }
    }
}

/// Handler invoked for each delivered event.
pub type EventHandler<T> = Box<dyn Fn(ChangeEvent<T>) + Send + Sync>;

/// Source of push events for one entity type.
///
/// Implementations wrap the actual transport (websocket client, SSE stream).
/// The returned [`Subscription`] unsubscribes when dropped, so a session
/// teardown can never leak a listener.
pub trait EventAdapter<T>: Send + Sync {
    fn subscribe(&self, handler: EventHandler<T>) -> Subscription;
}

/// Guard for a registered event handler; releases it on drop.
pub struct Subscription {
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            release: Some(Box::new(release)),
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

type HandlerMap<T> = Arc<RwLock<BTreeMap<u64, EventHandler<T>>>>;

/// In-process event fan-out.
///
/// Dispatches synchronously to handlers in registration order. This is the
/// adapter used in tests and by hosts that translate their own socket
/// messages into [`ChangeEvent`]s.
pub struct InMemoryEvents<T> {
    handlers: HandlerMap<T>,
    next_id: AtomicU64,
}

impl<T: Clone> InMemoryEvents<T> {
    pub fn new() -> Self {
        Self {
            handlers: Arc::new(RwLock::new(BTreeMap::new())),
            next_id: AtomicU64::new(0),
        }
    }

    /// Deliver an event to every current subscriber, in arrival order.
    pub fn publish(&self, event: ChangeEvent<T>) {
        let handlers = rw_read(&self.handlers, SOURCE, "publish");
        debug!(subscriber_count = handlers.len(), "Push event delivered");
        for handler in handlers.values() {
            handler(event.clone());
        }
    }

    pub fn subscriber_count(&self) -> usize {
        rw_read(&self.handlers, SOURCE, "subscriber_count").len()
    }
}

impl<T: Clone> Default for InMemoryEvents<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send + Sync + 'static> EventAdapter<T> for InMemoryEvents<T> {
    fn subscribe(&self, handler: EventHandler<T>) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        rw_write(&self.handlers, SOURCE, "subscribe").insert(id, handler);

        let handlers = Arc::clone(&self.handlers);
        Subscription::new(move || {
            rw_write(&handlers, SOURCE, "unsubscribe").remove(&id);
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    #[test]
    fn publish_reaches_all_subscribers() {
        let events: InMemoryEvents<u32> = InMemoryEvents::new();
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        let first_count = Arc::clone(&first);
        let _sub_a = events.subscribe(Box::new(move |_| {
            first_count.fetch_add(1, Ordering::SeqCst);
        }));
        let second_count = Arc::clone(&second);
        let _sub_b = events.subscribe(Box::new(move |_| {
            second_count.fetch_add(1, Ordering::SeqCst);
        }));

        events.publish(ChangeEvent::Deleted(Uuid::nil()));
        events.publish(ChangeEvent::Created(7));

        assert_eq!(first.load(Ordering::SeqCst), 2);
        assert_eq!(second.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn dropping_subscription_unsubscribes() {
        let events: InMemoryEvents<u32> = InMemoryEvents::new();
        let seen = Arc::new(AtomicUsize::new(0));

        let seen_count = Arc::clone(&seen);
        let subscription = events.subscribe(Box::new(move |_| {
            seen_count.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(events.subscriber_count(), 1);

        drop(subscription);
        assert_eq!(events.subscriber_count(), 0);

        events.publish(ChangeEvent::Created(1));
        assert_eq!(seen.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn events_are_delivered_in_publish_order() {
        let events: InMemoryEvents<u32> = InMemoryEvents::new();
        let log: Arc<RwLock<Vec<u32>>> = Arc::new(RwLock::new(Vec::new()));

        let sink = Arc::clone(&log);
        let _sub = events.subscribe(Box::new(move |event| {
            if let ChangeEvent::Created(value) = event {
                sink.write().expect("log lock").push(value);
            }
        }));

        for value in [3, 1, 2] {
            events.publish(ChangeEvent::Created(value));
        }

        assert_eq!(*log.read().expect("log lock"), vec![3, 1, 2]);
    }
}
