#![forbid(unsafe_code)]

//! Value fan-out over a single upstream subscription.
//!
//! [`Multicast<S>`] wraps an Event Source so that any number of local value
//! listeners share one upstream `subscribe_value`. The upstream subscription
//! is opened on the first local value subscription and released when the
//! last `Multicast` handle is dropped. The most recent value event is kept
//! and handed to every late subscriber before it goes live.
//!
//! Child subscriptions pass straight through to the wrapped source.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use keyjoin_core::{ChildEvent, EventSource, ListenerRegistry, Subscription, ValueEvent};
use tracing::debug;

struct MulticastInner<S: EventSource> {
    source: S,
    values: ListenerRegistry<ValueEvent<S::Value>>,
    last: RefCell<Option<ValueEvent<S::Value>>>,
    upstream: RefCell<Option<Subscription>>,
}

impl<S: EventSource + 'static> MulticastInner<S> {
    fn on_upstream(&self, event: &ValueEvent<S::Value>) {
        *self.last.borrow_mut() = Some(event.clone());
        self.values.notify(event);
    }
}

/// Shared value subscription to one source.
///
/// Cloning a `Multicast` creates a new handle to the **same** fan-out.
pub struct Multicast<S: EventSource> {
    inner: Rc<MulticastInner<S>>,
}

impl<S: EventSource> Clone for Multicast<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<S: EventSource> fmt::Debug for Multicast<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Multicast")
            .field("connected", &self.inner.upstream.borrow().is_some())
            .field("listeners", &self.inner.values.len())
            .finish()
    }
}

impl<S: EventSource + 'static> Multicast<S> {
    /// Wrap `source`. No upstream subscription is opened yet.
    #[must_use]
    pub fn new(source: S) -> Self {
        Self {
            inner: Rc::new(MulticastInner {
                source,
                values: ListenerRegistry::new(),
                last: RefCell::new(None),
                upstream: RefCell::new(None),
            }),
        }
    }

    /// Whether the upstream value subscription is open.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.inner.upstream.borrow().is_some()
    }

    /// Number of local value listeners.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.inner.values.len()
    }

    /// Most recent upstream value event.
    #[must_use]
    pub fn last_event(&self) -> Option<ValueEvent<S::Value>> {
        self.inner.last.borrow().clone()
    }

    /// The wrapped source.
    #[must_use]
    pub fn source(&self) -> &S {
        &self.inner.source
    }

    fn connect(&self) {
        if self.is_connected() {
            return;
        }
        debug!(message = "multicast.connect");
        let weak: Weak<MulticastInner<S>> = Rc::downgrade(&self.inner);
        let subscription = self.inner.source.subscribe_value(move |event| {
            if let Some(inner) = weak.upgrade() {
                inner.on_upstream(event);
            }
        });
        *self.inner.upstream.borrow_mut() = Some(subscription);
    }
}

impl<S: EventSource + 'static> EventSource for Multicast<S> {
    type Value = S::Value;

    fn subscribe_children<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&ChildEvent<S::Value>) + 'static,
    {
        self.inner.source.subscribe_children(listener)
    }

    fn subscribe_value<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&ValueEvent<S::Value>) + 'static,
    {
        self.connect();
        let last = self.inner.last.borrow().clone();
        if let Some(event) = last {
            listener(&event);
        }
        self.inner.values.subscribe(listener)
    }
}
