//! Hand-driven Event Source for unit tests.
//!
//! Every path owns one node with a child and a value registry. Nodes are
//! created on first use and shared by every `ManualRef` with the same path.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use keyjoin_core::{
    Cancellation, ChildEvent, EventSource, ListenerRegistry, Record, Reference, Snapshot,
    Subscription, ValueEvent,
};

struct Node<V> {
    children: ListenerRegistry<ChildEvent<V>>,
    values: ListenerRegistry<ValueEvent<V>>,
    records: RefCell<Vec<Record<V>>>,
    value: RefCell<Option<Snapshot<V>>>,
}

impl<V: 'static> Node<V> {
    fn new() -> Self {
        Self {
            children: ListenerRegistry::new(),
            values: ListenerRegistry::new(),
            records: RefCell::new(Vec::new()),
            value: RefCell::new(None),
        }
    }
}

type Hub<V> = RefCell<HashMap<String, Rc<Node<V>>>>;

pub(crate) struct ManualRef<V> {
    path: String,
    hub: Rc<Hub<V>>,
}

impl<V> Clone for ManualRef<V> {
    fn clone(&self) -> Self {
        Self {
            path: self.path.clone(),
            hub: Rc::clone(&self.hub),
        }
    }
}

impl<V: Clone + 'static> ManualRef<V> {
    pub(crate) fn root() -> Self {
        Self {
            path: String::new(),
            hub: Rc::new(RefCell::new(HashMap::new())),
        }
    }

    fn node(&self) -> Rc<Node<V>> {
        Rc::clone(
            self.hub
                .borrow_mut()
                .entry(self.path.clone())
                .or_insert_with(|| Rc::new(Node::new())),
        )
    }

    /// Store a child for future replays and announce it.
    pub(crate) fn push_child(&self, key: &str, value: V, after: Option<&str>) {
        let node = self.node();
        {
            let mut records = node.records.borrow_mut();
            let index = after
                .and_then(|a| records.iter().position(|r| r.key == a))
                .map_or(0, |i| i + 1);
            records.insert(index, Record::new(key, value.clone()));
        }
        node.children.notify(&ChildEvent::added(key, value, after));
    }

    /// Announce a child event without touching stored state.
    pub(crate) fn emit_child(&self, event: ChildEvent<V>) {
        self.node().children.notify(&event);
    }

    /// Announce a value event without touching stored state.
    pub(crate) fn emit_value(&self, event: ValueEvent<V>) {
        self.node().values.notify(&event);
    }

    /// Store a scalar value for future replays and announce it.
    pub(crate) fn set_value(&self, value: Option<V>) {
        let key = self.path.rsplit('/').next().unwrap_or_default().to_owned();
        let snapshot = Snapshot::scalar(key, value);
        *self.node().value.borrow_mut() = Some(snapshot.clone());
        self.emit_value(ValueEvent::Value(snapshot));
    }

    pub(crate) fn cancel(&self, cancellation: Cancellation) {
        self.emit_value(ValueEvent::Cancelled(cancellation));
    }

    pub(crate) fn child_listeners(&self) -> usize {
        self.node().children.len()
    }

    pub(crate) fn value_listeners(&self) -> usize {
        self.node().values.len()
    }
}

impl<V: Clone + 'static> EventSource for ManualRef<V> {
    type Value = V;

    fn subscribe_children<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&ChildEvent<V>) + 'static,
    {
        let node = self.node();
        let records = node.records.borrow().clone();
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
        node.children.subscribe(listener)
    }

    fn subscribe_value<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&ValueEvent<V>) + 'static,
    {
        let node = self.node();
        let current = node.value.borrow().clone();
        if let Some(snapshot) = current {
            listener(&ValueEvent::Value(snapshot));
        }
        node.values.subscribe(listener)
    }
}

impl<V: Clone + 'static> Reference for ManualRef<V> {
    fn child(&self, key: &str) -> Self {
        Self {
            path: format!("{}/{}", self.path, key),
            hub: Rc::clone(&self.hub),
        }
    }

    fn path(&self) -> String {
        if self.path.is_empty() {
            "/".to_owned()
        } else {
            self.path.clone()
        }
    }
}
