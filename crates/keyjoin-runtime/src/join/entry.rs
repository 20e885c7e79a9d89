#![forbid(unsafe_code)]

//! Per-key subscription entries.
//!
//! A [`SelectionEntry`] owns the value subscription to one target reference.
//! It is created the first time its key enters the selection and retained
//! across stop/start cycles. Deliveries go to an injected [`TargetSink`]
//! tagged with the entry's key and the epoch of the start that opened the
//! subscription, so the engine can discard deliveries from an earlier
//! membership episode.
//!
//! # Invariants
//!
//! 1. At most one live subscription per entry: `start` on an active entry is
//!    a no-op.
//! 2. `stop` on an inactive entry is a no-op.
//! 3. `start` clears the resolved value; a stale value never survives into a
//!    new membership episode.

use std::fmt;
use std::rc::Rc;

use keyjoin_core::{Reference, Snapshot, Subscription, ValueEvent};

/// Receiver of target deliveries.
pub(crate) trait TargetSink<V> {
    fn deliver(&self, key: &str, epoch: u64, event: &ValueEvent<V>);
}

/// Whether the next delivery for an entry surfaces it or updates it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchMode {
    /// The next value emits a downstream `added`.
    AwaitingFirst,
    /// Values emit downstream `changed`.
    SteadyState,
}

/// Whether an entry currently holds a target subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activity {
    Inactive,
    Active,
}

/// Diagnostic view of one entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryState {
    pub subscription: Activity,
    pub dispatch: DispatchMode,
    /// A target value has been delivered since the last start.
    pub resolved: bool,
    /// The key is currently part of the selection.
    pub selected: bool,
}

enum SubscriptionState {
    Inactive,
    Active(Subscription),
}

pub(crate) struct SelectionEntry<R: Reference> {
    key: String,
    target: R,
    resolved: Option<Snapshot<R::Value>>,
    subscription: SubscriptionState,
    dispatch: DispatchMode,
    after: Option<String>,
    epoch: u64,
    sink: Rc<dyn TargetSink<R::Value>>,
}

impl<R: Reference> SelectionEntry<R> {
    pub(crate) fn new(key: String, target: R, sink: Rc<dyn TargetSink<R::Value>>) -> Self {
        Self {
            key,
            target,
            resolved: None,
            subscription: SubscriptionState::Inactive,
            dispatch: DispatchMode::AwaitingFirst,
            after: None,
            epoch: 0,
            sink,
        }
    }

    /// Open the target subscription. Returns false if already active.
    pub(crate) fn start(&mut self, epoch: u64) -> bool {
        if self.is_active() {
            return false;
        }
        self.resolved = None;
        self.epoch = epoch;
        let sink = Rc::clone(&self.sink);
        let key = self.key.clone();
        let subscription = self
            .target
            .subscribe_value(move |event| sink.deliver(&key, epoch, event));
        self.subscription = SubscriptionState::Active(subscription);
        true
    }

    /// Drop the target subscription. Returns false if already inactive.
    pub(crate) fn stop(&mut self) -> bool {
        match std::mem::replace(&mut self.subscription, SubscriptionState::Inactive) {
            SubscriptionState::Active(subscription) => {
                subscription.unsubscribe();
                true
            }
            SubscriptionState::Inactive => false,
        }
    }

    /// Reset for a new membership episode positioned after `after`.
    pub(crate) fn await_first(&mut self, after: Option<String>) {
        self.dispatch = DispatchMode::AwaitingFirst;
        self.after = after;
    }

    pub(crate) fn is_active(&self) -> bool {
        matches!(self.subscription, SubscriptionState::Active(_))
    }

    pub(crate) fn key(&self) -> &str {
        &self.key
    }

    pub(crate) fn target_path(&self) -> String {
        self.target.path()
    }

    pub(crate) fn epoch(&self) -> u64 {
        self.epoch
    }

    pub(crate) fn dispatch(&self) -> DispatchMode {
        self.dispatch
    }

    pub(crate) fn set_dispatch(&mut self, dispatch: DispatchMode) {
        self.dispatch = dispatch;
    }

    pub(crate) fn set_after(&mut self, after: Option<String>) {
        self.after = after;
    }

    pub(crate) fn after(&self) -> Option<&str> {
        self.after.as_deref()
    }

    pub(crate) fn resolve(&mut self, snapshot: Snapshot<R::Value>) {
        self.resolved = Some(snapshot);
    }

    pub(crate) fn unresolve(&mut self) {
        self.resolved = None;
    }

    /// The target's current scalar value.
    pub(crate) fn value(&self) -> Option<R::Value> {
        self.resolved.as_ref().and_then(|s| s.value.clone())
    }

    pub(crate) fn state(&self, selected: bool) -> EntryState {
        EntryState {
            subscription: if self.is_active() {
                Activity::Active
            } else {
                Activity::Inactive
            },
            dispatch: self.dispatch,
            resolved: self.resolved.is_some(),
            selected,
        }
    }
}

impl<R: Reference> fmt::Debug for SelectionEntry<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SelectionEntry")
            .field("key", &self.key)
            .field("active", &self.is_active())
            .field("dispatch", &self.dispatch)
            .field("epoch", &self.epoch)
            .finish()
    }
}
