#![forbid(unsafe_code)]

//! The Event Source contract.
//!
//! Anything that can deliver [`ChildEvent`]s and [`ValueEvent`]s for one
//! reference implements [`EventSource`]. Raw transports, ordered mirrors and
//! join engines all do, so they compose: a mirror can mirror a join, a join
//! can select from a mirror.
//!
//! [`Reference`] adds addressing: deriving the reference of a keyed child.

use std::rc::Rc;

use crate::event::{ChildEvent, ValueEvent};
use crate::subscription::Subscription;

/// A provider of structural and value events for one reference.
///
/// Implementations may deliver events synchronously from inside
/// `subscribe_*` (to prime a new listener with current state) and must
/// tolerate listeners that subscribe or unsubscribe from inside a callback.
pub trait EventSource {
    /// Payload carried by events.
    type Value: Clone + 'static;

    /// Register for child events. Dropping the guard detaches.
    fn subscribe_children<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&ChildEvent<Self::Value>) + 'static;

    /// Register for value events. Dropping the guard detaches.
    fn subscribe_value<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&ValueEvent<Self::Value>) + 'static;
}

/// An addressable Event Source.
pub trait Reference: EventSource + Clone + 'static {
    /// Reference to the child stored under `key`.
    #[must_use]
    fn child(&self, key: &str) -> Self;

    /// Human-readable location, used in logs.
    fn path(&self) -> String;
}

impl<S: EventSource + ?Sized> EventSource for Rc<S> {
    type Value = S::Value;

    fn subscribe_children<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&ChildEvent<Self::Value>) + 'static,
    {
        (**self).subscribe_children(listener)
    }

    fn subscribe_value<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&ValueEvent<Self::Value>) + 'static,
    {
        (**self).subscribe_value(listener)
    }
}
