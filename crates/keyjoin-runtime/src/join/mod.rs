#![forbid(unsafe_code)]

//! Join engine: a live collection of target values ordered by a selection.
//!
//! # Design
//!
//! [`JoinEngine<R>`] consumes the child events of a *selection* (any
//! [`EventSource`], usually an [`OrderedMirror`](crate::OrderedMirror)) and
//! reads only their keys. For each selected key it holds a
//! [`SelectionEntry`] subscribed to `root.child(key)`. Target values are
//! re-emitted downstream in selection order:
//!
//! ```text
//! selection ──keys──▶ order list ──▶ entries ──subscribe_value──▶ targets
//!                                       │
//!                 downstream ◀── Added / Changed / Moved / Removed
//! ```
//!
//! An entry is *surfaced* once its target has delivered a value. Only
//! surfaced entries are visible downstream: `count`, `get`, replay and every
//! emitted index and `after` key are computed over the surfaced entries in
//! selection order, so a downstream mirror never sees a key it does not
//! hold.
//!
//! # Invariants
//!
//! 1. The order list holds each selected key once, in selection order.
//! 2. An entry's first accepted value emits exactly one downstream `added`;
//!    later values emit `changed`.
//! 3. An entry that never resolved produces no downstream `removed`.
//! 4. Deliveries from a previous membership episode (stale epoch) or for a
//!    stopped entry are dropped.
//!
//! # Failure Modes
//!
//! - **Target cancellation**: the entry stops and every engine listener
//!   receives the cancellation. The entry's last value stays visible.
//! - **Selection protocol violations** (duplicate `added`, unknown
//!   `removed`/`moved`): logged at `warn` and ignored.

mod entry;

pub use entry::{Activity, DispatchMode, EntryState};

use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};

use keyjoin_core::position::position_of;
use keyjoin_core::registry::Callback;
use keyjoin_core::{
    AfterKeyPolicy, Cancellation, ChildEvent, EventSource, KeyjoinError, ListenerRegistry, Record,
    Reference, Result, Snapshot, Subscription, ValueEvent,
};
use tracing::{debug, trace, warn};

use crate::config::JoinConfig;
use crate::dispatch::Inbox;
use crate::list_event::{ListEvent, ListenerSlot};

use entry::{SelectionEntry, TargetSink};

/// Value type of a join's output: `None` for a target that holds nothing.
pub type Joined<R> = Option<<R as EventSource>::Value>;

/// A selection child event with its payload dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
enum SelectionOp {
    Added { key: String, after: Option<String> },
    Changed { key: String, after: Option<String> },
    Removed { key: String },
    Moved { key: String, after: Option<String> },
    Cancelled(Cancellation),
}

impl SelectionOp {
    fn from_event<V>(event: &ChildEvent<V>) -> Self {
        match event {
            ChildEvent::Added { key, after, .. } => Self::Added {
                key: key.clone(),
                after: after.clone(),
            },
            ChildEvent::Changed { key, after, .. } => Self::Changed {
                key: key.clone(),
                after: after.clone(),
            },
            ChildEvent::Removed { key, .. } => Self::Removed { key: key.clone() },
            ChildEvent::Moved { key, after, .. } => Self::Moved {
                key: key.clone(),
                after: after.clone(),
            },
            ChildEvent::Cancelled(cancellation) => Self::Cancelled(cancellation.clone()),
        }
    }
}

enum JoinInput<V> {
    Selection(SelectionOp),
    Target {
        key: String,
        epoch: u64,
        event: ValueEvent<V>,
    },
}

/// One downstream notification, built under the state borrow and emitted
/// after it is released.
enum Downstream<V> {
    Structural {
        list: ListEvent<Option<V>>,
        child: ChildEvent<Option<V>>,
    },
    Cancelled(Cancellation),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Running,
    TornDown,
}

struct JoinState<R: Reference> {
    root: R,
    config: JoinConfig,
    sink: Rc<dyn TargetSink<R::Value>>,
    order: Vec<String>,
    entries: HashMap<String, SelectionEntry<R>>,
    lifecycle: Lifecycle,
    next_epoch: u64,
}

impl<R: Reference> JoinState<R> {
    fn lenient_index(&self, after: Option<&str>, op: &'static str) -> usize {
        AfterKeyPolicy::Lenient
            .insertion_index(self.order.iter().map(String::as_str), after, op)
            .unwrap_or(0)
    }

    fn bump_epoch(&mut self) -> u64 {
        self.next_epoch += 1;
        self.next_epoch
    }

    fn is_steady(&self, key: &str) -> bool {
        self.entries
            .get(key)
            .is_some_and(|e| e.dispatch() == DispatchMode::SteadyState)
    }

    fn is_selected(&self, key: &str) -> bool {
        self.order.iter().any(|k| k == key)
    }

    /// Index of `key` among surfaced entries, if it is surfaced.
    fn surfaced_index(&self, key: &str) -> Option<usize> {
        let mut index = 0;
        for k in &self.order {
            let steady = self.is_steady(k);
            if k == key {
                return steady.then_some(index);
            }
            if steady {
                index += 1;
            }
        }
        None
    }

    /// Nearest surfaced predecessor of `key` in selection order.
    fn downstream_after(&self, key: &str) -> Option<String> {
        let mut after = None;
        for k in &self.order {
            if k == key {
                break;
            }
            if self.is_steady(k) {
                after = Some(k);
            }
        }
        after.cloned()
    }

    fn surfaced(&self) -> Vec<Record<Option<R::Value>>> {
        self.order
            .iter()
            .filter(|k| self.is_steady(k))
            .filter_map(|k| self.entries.get(k))
            .map(|e| Record::new(e.key(), e.value()))
            .collect()
    }

    fn value_of(&self, key: &str) -> Option<R::Value> {
        self.entries.get(key).and_then(SelectionEntry::value)
    }

    /// Add `key` to the selection at `index` and open its subscription.
    fn select(&mut self, index: usize, key: &str, after: Option<String>) {
        self.order.insert(index, key.to_owned());
        let epoch = self.bump_epoch();
        let root = &self.root;
        let sink = &self.sink;
        let entry = self.entries.entry(key.to_owned()).or_insert_with(|| {
            SelectionEntry::new(key.to_owned(), root.child(key), Rc::clone(sink))
        });
        entry.await_first(after);
        if entry.start(epoch) {
            debug!(
                message = "join.start",
                key,
                epoch,
                after = ?entry.after(),
                path = %entry.target_path()
            );
        }
    }

    fn stop_entry(&mut self, key: &str) {
        if let Some(entry) = self.entries.get_mut(key)
            && entry.stop()
        {
            debug!(message = "join.stop", key);
        }
    }

    /// Downstream `removed` for `key`, if it is surfaced. Call before the
    /// key leaves the order list.
    fn removal(&self, key: &str) -> Option<Downstream<R::Value>> {
        let index = self.surfaced_index(key)?;
        let value = self.value_of(key);
        Some(Downstream::Structural {
            list: ListEvent::Removed {
                index,
                record: Record::new(key, value.clone()),
            },
            child: ChildEvent::Removed {
                key: key.to_owned(),
                value,
            },
        })
    }

    fn on_selection(&mut self, op: SelectionOp) -> Vec<Downstream<R::Value>> {
        trace!(message = "join.selection", op = ?op);
        match op {
            SelectionOp::Added { key, after } => {
                if self.is_selected(&key) {
                    warn!(message = "join.duplicate_selection", key = %key);
                    return Vec::new();
                }
                let index = self.lenient_index(after.as_deref(), "added");
                self.select(index, &key, after);
                Vec::new()
            }
            SelectionOp::Changed { key, after } => {
                let slot = self.lenient_index(after.as_deref(), "changed");
                let Some(old) = self.order.get(slot).cloned() else {
                    debug!(message = "join.changed_as_added", key = %key, slot);
                    if self.is_selected(&key) {
                        warn!(message = "join.duplicate_selection", key = %key);
                        return Vec::new();
                    }
                    self.select(slot, &key, after);
                    return Vec::new();
                };
                if old == key {
                    return Vec::new();
                }
                if self.is_selected(&key) {
                    warn!(message = "join.duplicate_selection", key = %key);
                    return Vec::new();
                }

                let out: Vec<_> = self.removal(&old).into_iter().collect();
                self.stop_entry(&old);
                if let Some(entry) = self.entries.get_mut(&old) {
                    entry.set_dispatch(DispatchMode::AwaitingFirst);
                }
                debug!(message = "join.swap", old = %old, new = %key, slot);
                self.order.remove(slot);
                self.select(slot, &key, after);
                out
            }
            SelectionOp::Moved { key, after } => {
                let Some(from) = position_of(self.order.iter().map(String::as_str), &key) else {
                    warn!(message = "join.unknown_selection", op = "moved", key = %key);
                    return Vec::new();
                };
                let old_index = self.surfaced_index(&key);
                let moved = self.order.remove(from);
                let to = self.lenient_index(after.as_deref(), "moved");
                self.order.insert(to, moved);
                if let Some(entry) = self.entries.get_mut(&key) {
                    entry.set_after(after);
                }

                match (old_index, self.surfaced_index(&key)) {
                    (Some(from), Some(to)) => {
                        let value = self.value_of(&key);
                        vec![Downstream::Structural {
                            list: ListEvent::Moved { from, to },
                            child: ChildEvent::Moved {
                                after: self.downstream_after(&key),
                                key,
                                value,
                            },
                        }]
                    }
                    _ => Vec::new(),
                }
            }
            SelectionOp::Removed { key } => {
                let Some(pos) = position_of(self.order.iter().map(String::as_str), &key) else {
                    warn!(message = "join.unknown_selection", op = "removed", key = %key);
                    return Vec::new();
                };
                let out: Vec<_> = self.removal(&key).into_iter().collect();
                self.order.remove(pos);
                self.stop_entry(&key);
                if self.config.evict_on_remove {
                    self.entries.remove(&key);
                } else if let Some(entry) = self.entries.get_mut(&key) {
                    entry.set_dispatch(DispatchMode::AwaitingFirst);
                }
                out
            }
            SelectionOp::Cancelled(cancellation) => {
                warn!(
                    message = "join.selection_cancelled",
                    reason = cancellation.reason.as_str(),
                    detail = %cancellation.message
                );
                vec![Downstream::Cancelled(cancellation)]
            }
        }
    }

    fn on_target(
        &mut self,
        key: &str,
        epoch: u64,
        event: ValueEvent<R::Value>,
    ) -> Vec<Downstream<R::Value>> {
        let live = self.is_selected(key)
            && self
                .entries
                .get(key)
                .is_some_and(|e| e.is_active() && e.epoch() == epoch);
        if !live {
            trace!(message = "join.stale_delivery", key, epoch);
            return Vec::new();
        }

        let snapshot = match event {
            ValueEvent::Value(snapshot) => snapshot,
            ValueEvent::Cancelled(cancellation) => {
                warn!(
                    message = "join.target_cancelled",
                    key,
                    reason = cancellation.reason.as_str(),
                    detail = %cancellation.message
                );
                self.stop_entry(key);
                return vec![Downstream::Cancelled(cancellation)];
            }
        };

        if snapshot.value.is_none() && !self.config.surface_null_targets {
            let out: Vec<_> = self.removal(key).into_iter().collect();
            if let Some(entry) = self.entries.get_mut(key) {
                entry.unresolve();
                entry.set_dispatch(DispatchMode::AwaitingFirst);
            }
            trace!(message = "join.awaiting_value", key);
            return out;
        }

        let was = match self.entries.get_mut(key) {
            Some(entry) => {
                let was = entry.dispatch();
                entry.resolve(snapshot);
                entry.set_dispatch(DispatchMode::SteadyState);
                was
            }
            None => return Vec::new(),
        };
        let Some(index) = self.surfaced_index(key) else {
            return Vec::new();
        };
        let value = self.value_of(key);
        let after = self.downstream_after(key);
        let (list, child) = match was {
            DispatchMode::AwaitingFirst => (
                ListEvent::Added { index },
                ChildEvent::Added {
                    key: key.to_owned(),
                    value,
                    after,
                },
            ),
            DispatchMode::SteadyState => (
                ListEvent::Changed { index },
                ChildEvent::Changed {
                    key: key.to_owned(),
                    value,
                    after,
                },
            ),
        };
        trace!(
            message = "join.resolve",
            key,
            index,
            first = (was == DispatchMode::AwaitingFirst)
        );
        vec![Downstream::Structural { list, child }]
    }

    fn stop_all(&mut self) {
        for entry in self.entries.values_mut() {
            entry.stop();
        }
    }
}

/// Keeps the selection alive for as long as the engine listens to it.
struct SelectionLink {
    _subscription: Subscription,
    _source: Box<dyn Any>,
}

struct JoinInner<R: Reference> {
    state: RefCell<JoinState<R>>,
    inbox: Inbox<JoinInput<R::Value>>,
    listener: ListenerSlot<Joined<R>>,
    children: ListenerRegistry<ChildEvent<Joined<R>>>,
    values: ListenerRegistry<ValueEvent<Joined<R>>>,
    selection: RefCell<Option<SelectionLink>>,
}

impl<R: Reference> JoinInner<R> {
    fn deliver(&self, input: JoinInput<R::Value>) {
        self.inbox.deliver(input, |input| {
            let (out, with_values) = {
                let mut state = self.state.borrow_mut();
                if state.lifecycle == Lifecycle::TornDown {
                    trace!(message = "join.dropped");
                    return;
                }
                let out = match input {
                    JoinInput::Selection(op) => state.on_selection(op),
                    JoinInput::Target { key, epoch, event } => state.on_target(&key, epoch, event),
                };
                (out, state.config.value_after_each_change)
            };
            for downstream in out {
                self.emit(downstream, with_values);
            }
        });
    }

    fn emit(&self, downstream: Downstream<R::Value>, with_values: bool) {
        match downstream {
            Downstream::Structural { list, child } => {
                self.listener.emit(&list);
                self.children.notify(&child);
                if with_values
                    && let Some(key) = child.key()
                {
                    let snapshot = Snapshot::scalar(key, child.value().cloned());
                    self.listener.emit(&ListEvent::DataChanged(snapshot.clone()));
                    self.values.notify(&ValueEvent::Value(snapshot));
                }
            }
            Downstream::Cancelled(cancellation) => {
                self.listener
                    .emit(&ListEvent::Cancelled(cancellation.clone()));
                self.children
                    .notify(&ChildEvent::Cancelled(cancellation.clone()));
                self.values.notify(&ValueEvent::Cancelled(cancellation));
            }
        }
    }
}

struct EngineSink<R: Reference> {
    inner: Weak<JoinInner<R>>,
}

impl<R: Reference> TargetSink<R::Value> for EngineSink<R> {
    fn deliver(&self, key: &str, epoch: u64, event: &ValueEvent<R::Value>) {
        if let Some(inner) = self.inner.upgrade() {
            inner.deliver(JoinInput::Target {
                key: key.to_owned(),
                epoch,
                event: event.clone(),
            });
        }
    }
}

/// A live join of a selection's keys against children of `root`.
///
/// Cloning a `JoinEngine` creates a new handle to the **same** engine.
pub struct JoinEngine<R: Reference> {
    inner: Rc<JoinInner<R>>,
}

impl<R: Reference> Clone for JoinEngine<R> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<R: Reference> fmt::Debug for JoinEngine<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.borrow();
        f.debug_struct("JoinEngine")
            .field("root", &state.root.path())
            .field("selected", &state.order.len())
            .field("entries", &state.entries.len())
            .field("lifecycle", &state.lifecycle)
            .finish()
    }
}

impl<R: Reference> JoinEngine<R> {
    /// Join `selection` against the children of `root`.
    pub fn new<S>(selection: S, root: R) -> Self
    where
        S: EventSource + 'static,
    {
        Self::with_config(selection, root, JoinConfig::default())
    }

    /// Join with explicit configuration.
    ///
    /// The engine keeps `selection` alive. Its current children are
    /// replayed before this returns.
    pub fn with_config<S>(selection: S, root: R, config: JoinConfig) -> Self
    where
        S: EventSource + 'static,
    {
        debug!(message = "join.attach", root = %root.path());
        let inner = Rc::new_cyclic(|weak: &Weak<JoinInner<R>>| {
            let sink: Rc<dyn TargetSink<R::Value>> = Rc::new(EngineSink {
                inner: weak.clone(),
            });
            JoinInner {
                state: RefCell::new(JoinState {
                    root,
                    config,
                    sink,
                    order: Vec::new(),
                    entries: HashMap::new(),
                    lifecycle: Lifecycle::Running,
                    next_epoch: 0,
                }),
                inbox: Inbox::new(),
                listener: ListenerSlot::new(),
                children: ListenerRegistry::new(),
                values: ListenerRegistry::new(),
                selection: RefCell::new(None),
            }
        });

        let weak = Rc::downgrade(&inner);
        let subscription = selection.subscribe_children(move |event| {
            if let Some(inner) = weak.upgrade() {
                inner.deliver(JoinInput::Selection(SelectionOp::from_event(event)));
            }
        });
        *inner.selection.borrow_mut() = Some(SelectionLink {
            _subscription: subscription,
            _source: Box::new(selection),
        });
        Self { inner }
    }

    /// Stop every target subscription and detach from the selection.
    /// Idempotent.
    pub fn teardown(&self) {
        {
            let mut state = self.inner.state.borrow_mut();
            if state.lifecycle == Lifecycle::TornDown {
                return;
            }
            state.lifecycle = Lifecycle::TornDown;
            state.stop_all();
        }
        debug!(message = "join.teardown");
        let link = self.inner.selection.borrow_mut().take();
        drop(link);
        self.inner.inbox.clear();
    }

    /// Whether [`teardown`](Self::teardown) has run.
    #[must_use]
    pub fn is_torn_down(&self) -> bool {
        self.inner.state.borrow().lifecycle == Lifecycle::TornDown
    }

    /// Set the positional listener, replacing any previous one.
    pub fn set_listener(&self, listener: impl Fn(&ListEvent<Joined<R>>) + 'static) {
        self.inner.listener.set(Rc::new(listener));
    }

    /// Remove the positional listener.
    pub fn clear_listener(&self) {
        self.inner.listener.clear();
    }

    /// Number of surfaced elements.
    #[must_use]
    pub fn count(&self) -> usize {
        let state = self.inner.state.borrow();
        state.order.iter().filter(|k| state.is_steady(k)).count()
    }

    /// Whether nothing is surfaced.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    /// Surfaced element at `index`: the selection key and its target value.
    pub fn get(&self, index: usize) -> Result<Record<Joined<R>>> {
        let records = self.inner.state.borrow().surfaced();
        let len = records.len();
        records
            .into_iter()
            .nth(index)
            .ok_or(KeyjoinError::IndexOutOfRange { index, len })
    }

    /// Surfaced keys in selection order.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        let state = self.inner.state.borrow();
        state
            .order
            .iter()
            .filter(|k| state.is_steady(k))
            .cloned()
            .collect()
    }

    /// Every selected key, surfaced or not, in selection order.
    #[must_use]
    pub fn selection_keys(&self) -> Vec<String> {
        self.inner.state.borrow().order.clone()
    }

    /// Diagnostic state of the entry for `key`, if one is held.
    #[must_use]
    pub fn entry_state(&self, key: &str) -> Option<EntryState> {
        let state = self.inner.state.borrow();
        state
            .entries
            .get(key)
            .map(|e| e.state(state.is_selected(key)))
    }

    /// Emit an `Added` for every surfaced element, in order, with chained
    /// `after` keys.
    pub fn replay(&self, listener: &dyn Fn(&ChildEvent<Joined<R>>)) {
        let records = self.inner.state.borrow().surfaced();
        debug!(message = "join.replay", count = records.len());
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

impl<R: Reference> EventSource for JoinEngine<R> {
    type Value = Joined<R>;

    /// Replays surfaced elements, then streams live child events.
    fn subscribe_children<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&ChildEvent<Joined<R>>) + 'static,
    {
        let callback: Callback<ChildEvent<Joined<R>>> = Rc::new(listener);
        self.replay(&*callback);
        self.inner.children.subscribe_shared(callback)
    }

    fn subscribe_value<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&ValueEvent<Joined<R>>) + 'static,
    {
        self.inner.values.subscribe(listener)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ManualRef;
    use keyjoin_core::CancelReason;

    struct Fixture {
        selection: ManualRef<()>,
        targets: ManualRef<String>,
        engine: JoinEngine<ManualRef<String>>,
        log: Rc<RefCell<Vec<ListEvent<Option<String>>>>>,
    }

    fn fixture(config: JoinConfig) -> Fixture {
        let selection = ManualRef::<()>::root();
        let targets = ManualRef::<String>::root();
        let engine = JoinEngine::with_config(selection.clone(), targets.clone(), config);
        let log = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&log);
        engine.set_listener(move |e| sink.borrow_mut().push(e.clone()));
        Fixture {
            selection,
            targets,
            engine,
            log,
        }
    }

    fn structural(log: &RefCell<Vec<ListEvent<Option<String>>>>) -> Vec<ListEvent<Option<String>>> {
        log.borrow()
            .iter()
            .filter(|e| e.is_structural())
            .cloned()
            .collect()
    }

    fn quiet() -> JoinConfig {
        JoinConfig::default().with_value_after_each_change(false)
    }

    #[test]
    fn first_value_adds_then_changes() {
        let f = fixture(quiet());
        f.selection.emit_child(ChildEvent::added("x", (), None));
        assert_eq!(f.engine.count(), 0);

        f.targets.child("x").set_value(Some("V1".into()));
        f.targets.child("x").set_value(Some("V2".into()));

        assert_eq!(
            structural(&f.log),
            vec![ListEvent::Added { index: 0 }, ListEvent::Changed { index: 0 }]
        );
        assert_eq!(f.engine.get(0).unwrap(), Record::new("x", Some("V2".into())));
    }

    #[test]
    fn synchronous_target_value_is_queued_and_surfaced() {
        let f = fixture(quiet());
        f.targets.child("x").set_value(Some("ready".into()));
        f.selection.emit_child(ChildEvent::added("x", (), None));
        assert_eq!(f.engine.keys(), vec!["x"]);
        assert_eq!(structural(&f.log), vec![ListEvent::Added { index: 0 }]);
    }

    #[test]
    fn swap_of_unresolved_key_emits_nothing_for_old_key() {
        let f = fixture(quiet());
        f.selection.emit_child(ChildEvent::added("x", (), None));
        f.selection.emit_child(ChildEvent::changed("y", (), None));

        assert_eq!(f.engine.selection_keys(), vec!["y"]);
        let x = f.engine.entry_state("x").unwrap();
        assert_eq!(x.subscription, Activity::Inactive);
        assert!(!x.selected);

        f.targets.child("x").set_value(Some("late".into()));
        f.targets.child("y").set_value(Some("Y".into()));
        assert_eq!(structural(&f.log), vec![ListEvent::Added { index: 0 }]);
        assert_eq!(f.engine.keys(), vec!["y"]);
    }

    #[test]
    fn swap_of_surfaced_key_removes_it_downstream() {
        let f = fixture(quiet());
        f.targets.child("x").set_value(Some("X".into()));
        f.selection.emit_child(ChildEvent::added("x", (), None));
        f.selection.emit_child(ChildEvent::changed("y", (), None));

        assert_eq!(
            structural(&f.log),
            vec![
                ListEvent::Added { index: 0 },
                ListEvent::Removed {
                    index: 0,
                    record: Record::new("x", Some("X".into())),
                },
            ]
        );
        assert!(f.engine.is_empty());
    }

    #[test]
    fn move_reuses_cached_value() {
        let f = fixture(quiet());
        f.selection.emit_child(ChildEvent::added("x", (), None));
        f.selection.emit_child(ChildEvent::added("y", (), Some("x")));
        f.targets.child("x").set_value(Some("X".into()));
        f.targets.child("y").set_value(Some("Y".into()));
        let listeners = f.targets.child("x").value_listeners();

        f.selection.emit_child(ChildEvent::moved("x", (), Some("y")));
        assert_eq!(
            structural(&f.log).last(),
            Some(&ListEvent::Moved { from: 0, to: 1 })
        );
        assert_eq!(f.engine.get(1).unwrap(), Record::new("x", Some("X".into())));
        assert_eq!(f.targets.child("x").value_listeners(), listeners);
    }

    #[test]
    fn removal_of_unresolved_key_is_silent() {
        let f = fixture(quiet());
        f.selection.emit_child(ChildEvent::added("x", (), None));
        f.selection.emit_child(ChildEvent::removed("x", ()));
        assert!(structural(&f.log).is_empty());
        assert_eq!(f.targets.child("x").value_listeners(), 0);
        assert_eq!(f.engine.entry_state("x"), None);
    }

    #[test]
    fn removal_without_eviction_keeps_entry() {
        let f = fixture(quiet().with_evict_on_remove(false));
        f.selection.emit_child(ChildEvent::added("x", (), None));
        f.selection.emit_child(ChildEvent::removed("x", ()));
        let state = f.engine.entry_state("x").unwrap();
        assert_eq!(state.subscription, Activity::Inactive);
        assert!(!state.selected);
    }

    #[test]
    fn stale_epoch_deliveries_are_dropped() {
        let f = fixture(quiet().with_evict_on_remove(false));
        f.selection.emit_child(ChildEvent::added("x", (), None));
        // Capture the first episode's epoch, then start a second episode.
        let first_epoch = f.engine.inner.state.borrow().entries["x"].epoch();
        f.selection.emit_child(ChildEvent::removed("x", ()));
        f.selection.emit_child(ChildEvent::added("x", (), None));

        f.engine.inner.deliver(JoinInput::Target {
            key: "x".into(),
            epoch: first_epoch,
            event: ValueEvent::Value(Snapshot::scalar("x", Some("old".into()))),
        });
        assert!(f.engine.is_empty());
    }

    #[test]
    fn target_cancellation_reaches_all_listeners() {
        let f = fixture(quiet());
        let child_log = Rc::new(RefCell::new(Vec::new()));
        let value_log = Rc::new(RefCell::new(Vec::new()));
        let c = Rc::clone(&child_log);
        let _children = f
            .engine
            .subscribe_children(move |e| c.borrow_mut().push(e.clone()));
        let v = Rc::clone(&value_log);
        let _values = f
            .engine
            .subscribe_value(move |e| v.borrow_mut().push(e.clone()));

        f.selection.emit_child(ChildEvent::added("x", (), None));
        let cancellation = Cancellation::new(CancelReason::PermissionDenied, "no read");
        f.targets.child("x").cancel(cancellation.clone());

        assert_eq!(
            f.log.borrow().last(),
            Some(&ListEvent::Cancelled(cancellation.clone()))
        );
        assert_eq!(
            child_log.borrow().last(),
            Some(&ChildEvent::Cancelled(cancellation.clone()))
        );
        assert_eq!(
            value_log.borrow().last(),
            Some(&ValueEvent::Cancelled(cancellation))
        );
        assert_eq!(
            f.engine.entry_state("x").unwrap().subscription,
            Activity::Inactive
        );
    }

    #[test]
    fn selection_cancellation_reaches_all_listeners() {
        let f = fixture(quiet());
        let child_log = Rc::new(RefCell::new(Vec::new()));
        let value_log = Rc::new(RefCell::new(Vec::new()));
        let c = Rc::clone(&child_log);
        let _children = f
            .engine
            .subscribe_children(move |e| c.borrow_mut().push(e.clone()));
        let v = Rc::clone(&value_log);
        let _values = f
            .engine
            .subscribe_value(move |e| v.borrow_mut().push(e.clone()));

        let cancellation = Cancellation::new(CancelReason::Disconnected, "gone");
        f.selection
            .emit_child(ChildEvent::Cancelled(cancellation.clone()));

        assert_eq!(
            *f.log.borrow(),
            vec![ListEvent::Cancelled(cancellation.clone())]
        );
        assert_eq!(
            *child_log.borrow(),
            vec![ChildEvent::Cancelled(cancellation.clone())]
        );
        assert_eq!(*value_log.borrow(), vec![ValueEvent::Cancelled(cancellation)]);
        assert!(!f.engine.is_torn_down());
    }

    #[test]
    fn null_target_surfaces_by_default() {
        let f = fixture(quiet());
        f.selection.emit_child(ChildEvent::added("x", (), None));
        f.targets.child("x").set_value(None);
        assert_eq!(f.engine.get(0).unwrap(), Record::new("x", None));
    }

    #[test]
    fn null_target_hidden_when_configured() {
        let f = fixture(quiet().with_surface_null_targets(false));
        f.selection.emit_child(ChildEvent::added("x", (), None));
        f.targets.child("x").set_value(None);
        assert!(f.engine.is_empty());

        f.targets.child("x").set_value(Some("X".into()));
        f.targets.child("x").set_value(None);
        assert_eq!(
            structural(&f.log),
            vec![
                ListEvent::Added { index: 0 },
                ListEvent::Removed {
                    index: 0,
                    record: Record::new("x", Some("X".into())),
                },
            ]
        );
        assert_eq!(
            f.engine.entry_state("x").unwrap().dispatch,
            DispatchMode::AwaitingFirst
        );
    }

    #[test]
    fn indices_skip_unresolved_entries() {
        let f = fixture(quiet());
        f.selection.emit_child(ChildEvent::added("a", (), None));
        f.selection.emit_child(ChildEvent::added("b", (), Some("a")));
        f.selection.emit_child(ChildEvent::added("c", (), Some("b")));

        f.targets.child("c").set_value(Some("C".into()));
        f.targets.child("a").set_value(Some("A".into()));
        assert_eq!(
            structural(&f.log),
            vec![ListEvent::Added { index: 0 }, ListEvent::Added { index: 0 }]
        );
        assert_eq!(f.engine.keys(), vec!["a", "c"]);
        assert_eq!(f.engine.selection_keys(), vec!["a", "b", "c"]);
    }

    #[test]
    fn unknown_after_key_resolves_to_front() {
        let f = fixture(quiet());
        f.selection.emit_child(ChildEvent::added("a", (), None));
        f.selection.emit_child(ChildEvent::added("b", (), Some("ghost")));
        assert_eq!(f.engine.selection_keys(), vec!["b", "a"]);
    }

    #[test]
    fn duplicate_selection_add_is_ignored() {
        let f = fixture(quiet());
        f.selection.emit_child(ChildEvent::added("a", (), None));
        f.selection.emit_child(ChildEvent::added("a", (), None));
        assert_eq!(f.engine.selection_keys(), vec!["a"]);
        assert_eq!(f.targets.child("a").value_listeners(), 1);
    }

    #[test]
    fn value_after_each_change_follows_structural_event() {
        let f = fixture(JoinConfig::default());
        f.selection.emit_child(ChildEvent::added("x", (), None));
        f.targets.child("x").set_value(Some("X".into()));
        assert_eq!(
            *f.log.borrow(),
            vec![
                ListEvent::Added { index: 0 },
                ListEvent::DataChanged(Snapshot::scalar("x", Some(Some("X".to_string())))),
            ]
        );
    }

    #[test]
    fn teardown_releases_everything() {
        let f = fixture(quiet());
        f.selection.emit_child(ChildEvent::added("x", (), None));
        assert_eq!(f.selection.child_listeners(), 1);

        f.engine.teardown();
        f.engine.teardown();
        assert!(f.engine.is_torn_down());
        assert_eq!(f.selection.child_listeners(), 0);
        assert_eq!(f.targets.child("x").value_listeners(), 0);

        f.selection.emit_child(ChildEvent::added("y", (), None));
        assert_eq!(f.engine.selection_keys(), vec!["x"]);
    }

    #[test]
    fn replay_chains_surfaced_keys() {
        let f = fixture(quiet());
        for (key, after) in [("a", None), ("b", Some("a")), ("c", Some("b"))] {
            f.selection.emit_child(ChildEvent::added(key, (), after));
        }
        f.targets.child("a").set_value(Some("A".into()));
        f.targets.child("c").set_value(Some("C".into()));

        let seen = RefCell::new(Vec::new());
        f.engine.replay(&|e| seen.borrow_mut().push(e.clone()));
        assert_eq!(
            seen.into_inner(),
            vec![
                ChildEvent::added("a", Some("A".to_string()), None),
                ChildEvent::added("c", Some("C".to_string()), Some("a")),
            ]
        );
    }

    #[test]
    fn out_of_range_get() {
        let f = fixture(quiet());
        assert_eq!(
            f.engine.get(0),
            Err(KeyjoinError::IndexOutOfRange { index: 0, len: 0 })
        );
    }
}
