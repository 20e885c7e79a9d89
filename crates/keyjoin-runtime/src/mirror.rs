#![forbid(unsafe_code)]

//! Ordered mirror: a local, key-unique, ordered copy of a source's children.
//!
//! # Design
//!
//! [`OrderedMirror<V>`] subscribes to one [`EventSource`] and replays its
//! child events into a `Vec<Record<V>>`. Every applied event is announced
//! twice:
//!
//! - as a positional [`ListEvent`] to the single listener set with
//!   [`set_listener`](OrderedMirror::set_listener), and
//! - as a [`ChildEvent`] (with `after` recomputed from the local order) to
//!   every child subscriber, so a mirror is itself an Event Source.
//!
//! All source callbacks go through a per-instance [`Inbox`], so an event is
//! applied to completion before the next one starts. No state borrow is held
//! while listeners run; a listener may query the mirror or detach itself.
//!
//! # Invariants
//!
//! 1. Keys are unique.
//! 2. `count()` equals the number of keys added and not yet removed.
//! 3. Each key's index equals the position implied by replaying every
//!    `after` relation in arrival order.
//! 4. Positions never change on `changed`.
//!
//! # Failure Modes
//!
//! - **Divergence**: an event names a key (or an `after` key) that is not
//!   present, or re-adds a present key. The mirror logs at `error`, releases
//!   its upstream subscriptions, announces [`ListEvent::Failed`] and moves
//!   to [`MirrorStatus::Failed`]. Later events are dropped. The records stay
//!   as they were before the offending event, for inspection.
//! - **Upstream cancellation**: forwarded verbatim; no retry.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use keyjoin_core::position::{after_key_for, position_of};
use keyjoin_core::registry::Callback;
use keyjoin_core::{
    AfterKeyPolicy, ChildEvent, EventSource, KeyjoinError, ListenerRegistry, Record, Result,
    Snapshot, Subscription, ValueEvent,
};
use tracing::{debug, error, trace, warn};

use crate::config::MirrorConfig;
use crate::dispatch::Inbox;
use crate::list_event::{ListEvent, ListenerSlot};

/// Lifecycle of a mirror.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MirrorStatus {
    /// Not attached to a source. Events may still be applied directly.
    Detached,
    /// Consuming a source.
    Attached,
    /// Diverged from its source; see [`OrderedMirror::failure`].
    Failed,
    /// Torn down by its owner.
    TornDown,
}

impl MirrorStatus {
    const fn accepts_events(self) -> bool {
        matches!(self, Self::Detached | Self::Attached)
    }
}

enum Inbound<V> {
    Child(ChildEvent<V>),
    Value(ValueEvent<V>),
}

/// What one applied child event announces.
struct Applied<V> {
    list: ListEvent<V>,
    child: ChildEvent<V>,
}

struct MirrorState<V> {
    records: Vec<Record<V>>,
    status: MirrorStatus,
    failure: Option<KeyjoinError>,
    last_snapshot: Option<Snapshot<V>>,
}

impl<V: Clone> MirrorState<V> {
    fn keys(&self) -> impl Iterator<Item = &str> + Clone {
        self.records.iter().map(|r| r.key.as_str())
    }

    fn index_of(&self, key: &str, op: &'static str) -> Result<usize> {
        position_of(self.keys(), key).ok_or_else(|| KeyjoinError::KeyNotFound {
            key: key.to_owned(),
            op,
        })
    }

    fn after_of(&self, index: usize) -> Option<String> {
        after_key_for(self.keys(), index).map(str::to_owned)
    }

    fn apply(&mut self, event: &ChildEvent<V>) -> Result<Option<Applied<V>>> {
        let applied = match event {
            ChildEvent::Added { key, value, after } => {
                if position_of(self.keys(), key).is_some() {
                    return Err(KeyjoinError::DuplicateKey { key: key.clone() });
                }
                let index =
                    AfterKeyPolicy::Strict.insertion_index(self.keys(), after.as_deref(), "added")?;
                self.records.insert(index, Record::new(key.clone(), value.clone()));
                Applied {
                    list: ListEvent::Added { index },
                    child: ChildEvent::Added {
                        key: key.clone(),
                        value: value.clone(),
                        after: self.after_of(index),
                    },
                }
            }
            ChildEvent::Changed { key, value, .. } => {
                let index = self.index_of(key, "changed")?;
                self.records[index].value = value.clone();
                Applied {
                    list: ListEvent::Changed { index },
                    child: ChildEvent::Changed {
                        key: key.clone(),
                        value: value.clone(),
                        after: self.after_of(index),
                    },
                }
            }
            ChildEvent::Removed { key, .. } => {
                let index = self.index_of(key, "removed")?;
                let record = self.records.remove(index);
                Applied {
                    child: ChildEvent::Removed {
                        key: record.key.clone(),
                        value: record.value.clone(),
                    },
                    list: ListEvent::Removed { index, record },
                }
            }
            ChildEvent::Moved { key, value, after } => {
                let from = self.index_of(key, "moved")?;
                let record = self.records.remove(from);
                let to = match AfterKeyPolicy::Strict.insertion_index(
                    self.keys(),
                    after.as_deref(),
                    "moved",
                ) {
                    Ok(to) => to,
                    Err(err) => {
                        self.records.insert(from, record);
                        return Err(err);
                    }
                };
                self.records.insert(to, Record::new(record.key, value.clone()));
                Applied {
                    list: ListEvent::Moved { from, to },
                    child: ChildEvent::Moved {
                        key: key.clone(),
                        value: value.clone(),
                        after: self.after_of(to),
                    },
                }
            }
            ChildEvent::Cancelled(_) => return Ok(None),
        };
        Ok(Some(applied))
    }
}

struct MirrorInner<V> {
    config: MirrorConfig,
    state: RefCell<MirrorState<V>>,
    inbox: Inbox<Inbound<V>>,
    listener: ListenerSlot<V>,
    children: ListenerRegistry<ChildEvent<V>>,
    values: ListenerRegistry<ValueEvent<V>>,
    upstream: RefCell<Vec<Subscription>>,
}

impl<V: Clone + 'static> MirrorInner<V> {
    fn deliver(&self, inbound: Inbound<V>) {
        self.inbox.deliver(inbound, |inbound| match inbound {
            Inbound::Child(event) => match self.apply_child(&event) {
                Ok(()) => {}
                Err(KeyjoinError::Detached) => {
                    trace!(message = "mirror.dropped", kind = event.kind().as_str());
                }
                Err(err) => self.fail(err),
            },
            Inbound::Value(event) => self.apply_value(event),
        });
    }

    fn apply_child(&self, event: &ChildEvent<V>) -> Result<()> {
        let applied = {
            let mut state = self.state.borrow_mut();
            if !state.status.accepts_events() {
                return Err(KeyjoinError::Detached);
            }
            state.apply(event)?
        };

        match applied {
            Some(applied) => {
                trace!(
                    message = "mirror.apply",
                    kind = event.kind().as_str(),
                    key = event.key().unwrap_or_default(),
                    index = applied.list.index()
                );
                self.listener.emit(&applied.list);
                self.children.notify(&applied.child);
            }
            None => {
                if let ChildEvent::Cancelled(cancellation) = event {
                    warn!(
                        message = "mirror.cancelled",
                        reason = cancellation.reason.as_str(),
                        detail = %cancellation.message
                    );
                    self.listener
                        .emit(&ListEvent::Cancelled(cancellation.clone()));
                    self.children.notify(event);
                }
            }
        }
        Ok(())
    }

    fn apply_value(&self, event: ValueEvent<V>) {
        {
            let mut state = self.state.borrow_mut();
            if !state.status.accepts_events() {
                trace!(message = "mirror.dropped", kind = "value");
                return;
            }
            if let (true, ValueEvent::Value(snapshot)) = (self.config.track_snapshot, &event) {
                state.last_snapshot = Some(snapshot.clone());
            }
        }

        match &event {
            ValueEvent::Value(snapshot) => {
                self.listener.emit(&ListEvent::DataChanged(snapshot.clone()));
            }
            ValueEvent::Cancelled(cancellation) => {
                warn!(
                    message = "mirror.cancelled",
                    reason = cancellation.reason.as_str(),
                    detail = %cancellation.message
                );
                self.listener
                    .emit(&ListEvent::Cancelled(cancellation.clone()));
            }
        }
        self.values.notify(&event);
    }

    fn fail(&self, err: KeyjoinError) {
        {
            let mut state = self.state.borrow_mut();
            state.status = MirrorStatus::Failed;
            state.failure = Some(err.clone());
        }
        error!(message = "mirror.diverged", error = %err);
        let upstream: Vec<Subscription> = self.upstream.borrow_mut().drain(..).collect();
        drop(upstream);
        self.inbox.clear();
        self.listener.emit(&ListEvent::Failed(err));
    }
}

/// A local ordered copy of an Event Source's children.
///
/// Cloning an `OrderedMirror` creates a new handle to the **same** mirror.
pub struct OrderedMirror<V> {
    inner: Rc<MirrorInner<V>>,
}

impl<V> Clone for OrderedMirror<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<V> fmt::Debug for OrderedMirror<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.borrow();
        f.debug_struct("OrderedMirror")
            .field("count", &state.records.len())
            .field("status", &state.status)
            .field("listeners", &self.inner.children.len())
            .finish()
    }
}

impl<V: Clone + 'static> Default for OrderedMirror<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: Clone + 'static> OrderedMirror<V> {
    /// Create a detached, empty mirror with the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(MirrorConfig::default())
    }

    /// Create a detached, empty mirror.
    #[must_use]
    pub fn with_config(config: MirrorConfig) -> Self {
        Self {
            inner: Rc::new(MirrorInner {
                config,
                state: RefCell::new(MirrorState {
                    records: Vec::new(),
                    status: MirrorStatus::Detached,
                    failure: None,
                    last_snapshot: None,
                }),
                inbox: Inbox::new(),
                listener: ListenerSlot::new(),
                children: ListenerRegistry::new(),
                values: ListenerRegistry::new(),
                upstream: RefCell::new(Vec::new()),
            }),
        }
    }

    /// Create a mirror already attached to `source`.
    ///
    /// Errors only if the source's initial replay diverges.
    pub fn attached<S>(source: &S) -> Result<Self>
    where
        S: EventSource<Value = V>,
    {
        let mirror = Self::new();
        mirror.attach(source)?;
        Ok(mirror)
    }

    /// Start consuming `source`. Single use.
    ///
    /// Sources usually replay their current children synchronously; those
    /// events are applied before this returns.
    pub fn attach<S>(&self, source: &S) -> Result<()>
    where
        S: EventSource<Value = V>,
    {
        {
            let mut state = self.inner.state.borrow_mut();
            match state.status {
                MirrorStatus::Detached => state.status = MirrorStatus::Attached,
                MirrorStatus::Attached => return Err(KeyjoinError::AlreadyAttached),
                MirrorStatus::Failed | MirrorStatus::TornDown => {
                    return Err(KeyjoinError::Detached);
                }
            }
        }
        debug!(message = "mirror.attach", value_events = self.inner.config.forward_value_events);

        let weak: Weak<MirrorInner<V>> = Rc::downgrade(&self.inner);
        let child_sub = source.subscribe_children(move |event| {
            if let Some(inner) = weak.upgrade() {
                inner.deliver(Inbound::Child(event.clone()));
            }
        });
        self.keep_upstream(child_sub);

        if self.inner.config.forward_value_events {
            let weak: Weak<MirrorInner<V>> = Rc::downgrade(&self.inner);
            let value_sub = source.subscribe_value(move |event| {
                if let Some(inner) = weak.upgrade() {
                    inner.deliver(Inbound::Value(event.clone()));
                }
            });
            self.keep_upstream(value_sub);
        }

        match self.failure() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Hold `sub` unless the mirror stopped while it was being opened.
    fn keep_upstream(&self, sub: Subscription) {
        if self.status() == MirrorStatus::Attached {
            self.inner.upstream.borrow_mut().push(sub);
        }
    }

    /// Apply one child event directly, bypassing any source.
    ///
    /// Errors are fatal exactly as they are for source-delivered events: the
    /// mirror moves to [`MirrorStatus::Failed`].
    pub fn apply(&self, event: &ChildEvent<V>) -> Result<()> {
        match self.inner.apply_child(event) {
            Err(KeyjoinError::Detached) => Err(KeyjoinError::Detached),
            Err(err) => {
                self.inner.fail(err.clone());
                Err(err)
            }
            Ok(()) => Ok(()),
        }
    }

    /// Detach from the source. Idempotent.
    pub fn teardown(&self) {
        {
            let mut state = self.inner.state.borrow_mut();
            if state.status == MirrorStatus::TornDown {
                return;
            }
            state.status = MirrorStatus::TornDown;
        }
        debug!(message = "mirror.teardown", count = self.count());
        let upstream: Vec<Subscription> = self.inner.upstream.borrow_mut().drain(..).collect();
        drop(upstream);
        self.inner.inbox.clear();
    }

    /// Set the positional listener, replacing any previous one.
    pub fn set_listener(&self, listener: impl Fn(&ListEvent<V>) + 'static) {
        self.inner.listener.set(Rc::new(listener));
    }

    /// Remove the positional listener.
    pub fn clear_listener(&self) {
        self.inner.listener.clear();
    }

    /// Number of present records.
    #[must_use]
    pub fn count(&self) -> usize {
        self.inner.state.borrow().records.len()
    }

    /// Whether the mirror holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    /// Record at `index`.
    pub fn get(&self, index: usize) -> Result<Record<V>> {
        let state = self.inner.state.borrow();
        state
            .records
            .get(index)
            .cloned()
            .ok_or(KeyjoinError::IndexOutOfRange {
                index,
                len: state.records.len(),
            })
    }

    /// Key at `index`, for consumers that derive per-item references.
    pub fn key_at(&self, index: usize) -> Result<String> {
        let state = self.inner.state.borrow();
        state
            .records
            .get(index)
            .map(|r| r.key.clone())
            .ok_or(KeyjoinError::IndexOutOfRange {
                index,
                len: state.records.len(),
            })
    }

    /// Current position of `key`.
    #[must_use]
    pub fn index_of(&self, key: &str) -> Option<usize> {
        position_of(self.inner.state.borrow().keys(), key)
    }

    /// Keys in order.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.inner.state.borrow().keys().map(str::to_owned).collect()
    }

    /// Records in order.
    #[must_use]
    pub fn records(&self) -> Vec<Record<V>> {
        self.inner.state.borrow().records.clone()
    }

    /// Lifecycle state.
    #[must_use]
    pub fn status(&self) -> MirrorStatus {
        self.inner.state.borrow().status
    }

    /// The divergence that stopped the mirror, if any.
    #[must_use]
    pub fn failure(&self) -> Option<KeyjoinError> {
        self.inner.state.borrow().failure.clone()
    }

    /// Last bulk snapshot delivered by the source.
    #[must_use]
    pub fn last_snapshot(&self) -> Option<Snapshot<V>> {
        self.inner.state.borrow().last_snapshot.clone()
    }

    /// Emit an `Added` for every record, in order, with chained `after`
    /// keys. Feeding the output into an empty mirror reproduces this one.
    pub fn replay(&self, listener: &dyn Fn(&ChildEvent<V>)) {
        let records = self.records();
        debug!(message = "mirror.replay", count = records.len());
        let mut after: Option<String> = None;
        for record in records {
            let key = record.key.clone();
            listener(&ChildEvent::Added {
                key: record.key,
                value: record.value,
                after: after.take(),
            });
            after = Some(key);
        }
    }
}

impl<V: Clone + 'static> EventSource for OrderedMirror<V> {
    type Value = V;

    /// Replays current records, then streams live child events.
    fn subscribe_children<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&ChildEvent<V>) + 'static,
    {
        let callback: Callback<ChildEvent<V>> = Rc::new(listener);
        self.replay(&*callback);
        self.inner.children.subscribe_shared(callback)
    }

    /// Primes the listener with the last snapshot, then streams live value
    /// events.
    fn subscribe_value<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&ValueEvent<V>) + 'static,
    {
        if let Some(snapshot) = self.last_snapshot() {
            listener(&ValueEvent::Value(snapshot));
        }
        self.inner.values.subscribe(listener)
    }
}
