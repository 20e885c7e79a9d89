#![forbid(unsafe_code)]

//! Recording listeners.
//!
//! A [`Recorder`] hands out callbacks that append every event they receive
//! to a shared log, for assertions after the fact.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use keyjoin_core::{ChildEvent, EventSource, Subscription, ValueEvent};
use keyjoin_runtime::ListEvent;

/// Shared, append-only event log.
pub struct Recorder<E> {
    events: Rc<RefCell<Vec<E>>>,
}

impl<E> Clone for Recorder<E> {
    fn clone(&self) -> Self {
        Self {
            events: Rc::clone(&self.events),
        }
    }
}

impl<E: fmt::Debug> fmt::Debug for Recorder<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.events.borrow().iter()).finish()
    }
}

impl<E: Clone + 'static> Default for Recorder<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Clone + 'static> Recorder<E> {
    /// Create an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self {
            events: Rc::new(RefCell::new(Vec::new())),
        }
    }

    /// A callback that appends to this log.
    pub fn sink(&self) -> impl Fn(&E) + 'static {
        let events = Rc::clone(&self.events);
        move |event| events.borrow_mut().push(event.clone())
    }

    /// Every event so far.
    #[must_use]
    pub fn events(&self) -> Vec<E> {
        self.events.borrow().clone()
    }

    /// Drain the log.
    pub fn take(&self) -> Vec<E> {
        std::mem::take(&mut *self.events.borrow_mut())
    }

    /// Most recent event.
    #[must_use]
    pub fn last(&self) -> Option<E> {
        self.events.borrow().last().cloned()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.events.borrow().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<V: Clone + 'static> Recorder<ListEvent<V>> {
    /// Only the events that change membership or order.
    #[must_use]
    pub fn structural(&self) -> Vec<ListEvent<V>> {
        self.events
            .borrow()
            .iter()
            .filter(|e| e.is_structural())
            .cloned()
            .collect()
    }
}

/// Subscribe a fresh recorder to `source`'s child events.
pub fn record_children<S: EventSource>(source: &S) -> (Recorder<ChildEvent<S::Value>>, Subscription) {
    let recorder = Recorder::new();
    let subscription = source.subscribe_children(recorder.sink());
    (recorder, subscription)
}

/// Subscribe a fresh recorder to `source`'s value events.
pub fn record_values<S: EventSource>(source: &S) -> (Recorder<ValueEvent<S::Value>>, Subscription) {
    let recorder = Recorder::new();
    let subscription = source.subscribe_value(recorder.sink());
    (recorder, subscription)
}
