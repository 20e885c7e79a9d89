#![forbid(unsafe_code)]

//! Deterministic in-memory Event Source.
//!
//! [`MemoryStore`] is a tree of nodes addressed by `/`-separated paths. Every
//! node holds an optional scalar value and an ordered list of keyed children;
//! the child stored under `key` at path `p` is the node at `p/key`, and its
//! record in the parent always carries that node's value.
//!
//! A write to a child announces, in order:
//!
//! 1. the child event on the parent,
//! 2. a value event on the child node,
//! 3. a value event on the parent.
//!
//! Writing a scalar with [`MemoryRef::set_value`] on a non-root node also
//! adds, changes or removes that node in its parent's child list. Effects do
//! not propagate past the parent.
//!
//! No store borrow is held while listeners run, so listeners may write back
//! into the store or (un)subscribe.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use keyjoin_core::position::position_of;
use keyjoin_core::{
    AfterKeyPolicy, Cancellation, ChildEvent, EventSource, KeyjoinError, ListenerRegistry, Record,
    Reference, Result, Snapshot, Subscription, ValueEvent,
};
use tracing::{debug, trace};

/// When a new value subscription is primed with the current snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReplayValues {
    /// Always, including for empty nodes.
    #[default]
    Always,
    /// Only if the node holds a value or children.
    WhenPresent,
    /// Never; only live writes are delivered.
    Never,
}

/// Replay behavior of a [`MemoryStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryConfig {
    /// Prime child subscriptions with the current children as `added`.
    pub replay_children: bool,
    /// Prime value subscriptions with the current snapshot.
    pub replay_values: ReplayValues,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            replay_children: true,
            replay_values: ReplayValues::Always,
        }
    }
}

impl MemoryConfig {
    /// Toggle child replay.
    #[must_use]
    pub fn with_replay_children(mut self, enabled: bool) -> Self {
        self.replay_children = enabled;
        self
    }

    /// Set value replay behavior.
    #[must_use]
    pub fn with_replay_values(mut self, replay: ReplayValues) -> Self {
        self.replay_values = replay;
        self
    }
}

struct Node<V> {
    value: RefCell<Option<V>>,
    children: RefCell<Vec<Record<V>>>,
    child_listeners: ListenerRegistry<ChildEvent<V>>,
    value_listeners: ListenerRegistry<ValueEvent<V>>,
}

impl<V: 'static> Node<V> {
    fn new() -> Self {
        Self {
            value: RefCell::new(None),
            children: RefCell::new(Vec::new()),
            child_listeners: ListenerRegistry::new(),
            value_listeners: ListenerRegistry::new(),
        }
    }
}

/// A structural write to one child.
enum ChildWrite<V> {
    Insert {
        key: String,
        value: V,
        after: Option<String>,
    },
    Append {
        key: String,
        value: V,
    },
    Change {
        key: String,
        value: V,
    },
    Remove {
        key: String,
    },
    Move {
        key: String,
        after: Option<String>,
    },
}

struct StoreInner<V> {
    config: MemoryConfig,
    nodes: RefCell<BTreeMap<String, Rc<Node<V>>>>,
}

fn keys_of<V>(children: &[Record<V>]) -> impl Iterator<Item = &str> + Clone {
    children.iter().map(|r| r.key.as_str())
}

fn child_path(parent: &str, key: &str) -> String {
    format!("{parent}/{key}")
}

/// Split `path` into its parent path and last segment.
fn split_path(path: &str) -> Option<(&str, &str)> {
    if path.is_empty() {
        return None;
    }
    path.rsplit_once('/')
}

/// Normalize a user-supplied path: leading slash, no trailing slash, no
/// empty segments. The root is the empty string.
fn normalize(path: &str) -> String {
    path.split('/')
        .filter(|segment| !segment.is_empty())
        .fold(String::new(), |mut out, segment| {
            out.push('/');
            out.push_str(segment);
            out
        })
}

impl<V: Clone + 'static> StoreInner<V> {
    fn node(&self, path: &str) -> Rc<Node<V>> {
        Rc::clone(
            self.nodes
                .borrow_mut()
                .entry(path.to_owned())
                .or_insert_with(|| Rc::new(Node::new())),
        )
    }

    fn snapshot(&self, path: &str) -> Snapshot<V> {
        let node = self.node(path);
        let value = node.value.borrow().clone();
        let children = node.children.borrow().clone();
        Snapshot {
            key: split_path(path).map(|(_, key)| key.to_owned()),
            value,
            children,
        }
    }

    /// Apply `write` under the node borrows and return the child event to
    /// announce. The child node's value is kept in step with its record.
    fn stage(&self, parent: &str, write: ChildWrite<V>) -> Result<ChildEvent<V>> {
        let node = self.node(parent);
        let mut children = node.children.borrow_mut();

        let (event, child_value) = match write {
            ChildWrite::Insert { key, value, after } => {
                if position_of(keys_of(&children), &key).is_some() {
                    return Err(KeyjoinError::DuplicateKey { key });
                }
                let index = AfterKeyPolicy::Strict.insertion_index(
                    keys_of(&children),
                    after.as_deref(),
                    "added",
                )?;
                children.insert(index, Record::new(key.clone(), value.clone()));
                (
                    ChildEvent::Added {
                        key,
                        value: value.clone(),
                        after,
                    },
                    Some(value),
                )
            }
            ChildWrite::Append { key, value } => {
                if position_of(keys_of(&children), &key).is_some() {
                    return Err(KeyjoinError::DuplicateKey { key });
                }
                let after = children.last().map(|r| r.key.clone());
                children.push(Record::new(key.clone(), value.clone()));
                (
                    ChildEvent::Added {
                        key,
                        value: value.clone(),
                        after,
                    },
                    Some(value),
                )
            }
            ChildWrite::Change { key, value } => {
                let index = position_of(keys_of(&children), &key).ok_or_else(|| {
                    KeyjoinError::KeyNotFound {
                        key: key.clone(),
                        op: "changed",
                    }
                })?;
                children[index].value = value.clone();
                let after = index
                    .checked_sub(1)
                    .map(|prev| children[prev].key.clone());
                (
                    ChildEvent::Changed {
                        key,
                        value: value.clone(),
                        after,
                    },
                    Some(value),
                )
            }
            ChildWrite::Remove { key } => {
                let index = position_of(keys_of(&children), &key).ok_or_else(|| {
                    KeyjoinError::KeyNotFound {
                        key: key.clone(),
                        op: "removed",
                    }
                })?;
                let record = children.remove(index);
                (
                    ChildEvent::Removed {
                        key: record.key,
                        value: record.value,
                    },
                    None,
                )
            }
            ChildWrite::Move { key, after } => {
                let from = position_of(keys_of(&children), &key).ok_or_else(|| {
                    KeyjoinError::KeyNotFound {
                        key: key.clone(),
                        op: "moved",
                    }
                })?;
                let record = children.remove(from);
                let to = match AfterKeyPolicy::Strict.insertion_index(
                    keys_of(&children),
                    after.as_deref(),
                    "moved",
                ) {
                    Ok(to) => to,
                    Err(err) => {
                        children.insert(from, record);
                        return Err(err);
                    }
                };
                let value = record.value.clone();
                children.insert(to, record);
                (
                    ChildEvent::Moved {
                        key,
                        value: value.clone(),
                        after,
                    },
                    Some(value),
                )
            }
        };
        drop(children);

        if let Some(key) = event.key() {
            let child = self.node(&child_path(parent, key));
            *child.value.borrow_mut() = child_value;
        }
        Ok(event)
    }

    fn write_child(&self, parent: &str, write: ChildWrite<V>) -> Result<()> {
        let event = self.stage(parent, write)?;
        trace!(
            message = "memory.child",
            path = parent,
            kind = event.kind().as_str(),
            key = event.key().unwrap_or_default()
        );

        let parent_node = self.node(parent);
        parent_node.child_listeners.notify(&event);
        if let Some(key) = event.key() {
            let path = child_path(parent, key);
            let child = self.node(&path);
            child
                .value_listeners
                .notify(&ValueEvent::Value(self.snapshot(&path)));
        }
        parent_node
            .value_listeners
            .notify(&ValueEvent::Value(self.snapshot(parent)));
        Ok(())
    }

    fn set_value(&self, path: &str, value: Option<V>) -> Result<()> {
        let Some((parent, key)) = split_path(path) else {
            *self.node(path).value.borrow_mut() = value;
            trace!(message = "memory.set", path = "/");
            let snapshot = self.snapshot(path);
            self.node(path)
                .value_listeners
                .notify(&ValueEvent::Value(snapshot));
            return Ok(());
        };

        let listed = {
            let parent_node = self.node(parent);
            let children = parent_node.children.borrow();
            position_of(children.iter().map(|r| r.key.as_str()), key).is_some()
        };
        let key = key.to_owned();
        match (listed, value) {
            (true, Some(value)) => self.write_child(parent, ChildWrite::Change { key, value }),
            (false, Some(value)) => self.write_child(parent, ChildWrite::Append { key, value }),
            (true, None) => self.write_child(parent, ChildWrite::Remove { key }),
            (false, None) => {
                *self.node(path).value.borrow_mut() = None;
                trace!(message = "memory.set", path);
                self.node(path)
                    .value_listeners
                    .notify(&ValueEvent::Value(self.snapshot(path)));
                Ok(())
            }
        }
    }
}

/// Root of an in-memory tree.
///
/// Cloning creates a new handle to the **same** store.
pub struct MemoryStore<V> {
    inner: Rc<StoreInner<V>>,
}

impl<V> Clone for MemoryStore<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<V> fmt::Debug for MemoryStore<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryStore")
            .field("nodes", &self.inner.nodes.borrow().len())
            .field("config", &self.inner.config)
            .finish()
    }
}

impl<V: Clone + 'static> Default for MemoryStore<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: Clone + 'static> MemoryStore<V> {
    /// Create an empty store with the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(MemoryConfig::default())
    }

    /// Create an empty store.
    #[must_use]
    pub fn with_config(config: MemoryConfig) -> Self {
        debug!(message = "memory.open", replay_children = config.replay_children);
        Self {
            inner: Rc::new(StoreInner {
                config,
                nodes: RefCell::new(BTreeMap::new()),
            }),
        }
    }

    /// Reference to the root node.
    #[must_use]
    pub fn root(&self) -> MemoryRef<V> {
        self.reference("")
    }

    /// Reference to the node at `path` (`"/users/u1"`, `"users/u1"` and
    /// `"/users/u1/"` are the same node).
    #[must_use]
    pub fn reference(&self, path: &str) -> MemoryRef<V> {
        MemoryRef {
            store: Rc::clone(&self.inner),
            path: normalize(path),
        }
    }

    /// Configuration in effect.
    #[must_use]
    pub fn config(&self) -> MemoryConfig {
        self.inner.config
    }
}

/// Handle to one node of a [`MemoryStore`].
pub struct MemoryRef<V> {
    store: Rc<StoreInner<V>>,
    path: String,
}

impl<V> Clone for MemoryRef<V> {
    fn clone(&self) -> Self {
        Self {
            store: Rc::clone(&self.store),
            path: self.path.clone(),
        }
    }
}

impl<V> fmt::Debug for MemoryRef<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("MemoryRef").field(&self.path).finish()
    }
}

impl<V: Clone + 'static> MemoryRef<V> {
    /// Insert a child immediately after `after` (front when `None`).
    pub fn insert_child(&self, key: &str, value: V, after: Option<&str>) -> Result<()> {
        self.store.write_child(
            &self.path,
            ChildWrite::Insert {
                key: key.to_owned(),
                value,
                after: after.map(str::to_owned),
            },
        )
    }

    /// Append a child after the current last one.
    pub fn push_child(&self, key: &str, value: V) -> Result<()> {
        self.store.write_child(
            &self.path,
            ChildWrite::Append {
                key: key.to_owned(),
                value,
            },
        )
    }

    /// Replace a child's value in place.
    pub fn change_child(&self, key: &str, value: V) -> Result<()> {
        self.store.write_child(
            &self.path,
            ChildWrite::Change {
                key: key.to_owned(),
                value,
            },
        )
    }

    /// Remove a child.
    pub fn remove_child(&self, key: &str) -> Result<()> {
        self.store.write_child(
            &self.path,
            ChildWrite::Remove {
                key: key.to_owned(),
            },
        )
    }

    /// Move a child to immediately after `after` (front when `None`).
    pub fn move_child(&self, key: &str, after: Option<&str>) -> Result<()> {
        self.store.write_child(
            &self.path,
            ChildWrite::Move {
                key: key.to_owned(),
                after: after.map(str::to_owned),
            },
        )
    }

    /// Write this node's scalar value; `None` deletes it from its parent.
    pub fn set_value(&self, value: Option<V>) -> Result<()> {
        self.store.set_value(&self.path, value)
    }

    /// Report a cancellation to every listener of this node.
    pub fn cancel(&self, cancellation: Cancellation) {
        debug!(
            message = "memory.cancel",
            path = %self.path,
            reason = cancellation.reason.as_str()
        );
        let node = self.store.node(&self.path);
        node.child_listeners
            .notify(&ChildEvent::Cancelled(cancellation.clone()));
        node.value_listeners
            .notify(&ValueEvent::Cancelled(cancellation));
    }

    /// Current content of this node.
    #[must_use]
    pub fn snapshot(&self) -> Snapshot<V> {
        self.store.snapshot(&self.path)
    }

    /// Current scalar value of this node.
    #[must_use]
    pub fn value(&self) -> Option<V> {
        self.store.node(&self.path).value.borrow().clone()
    }

    /// Current child keys, in order.
    #[must_use]
    pub fn child_keys(&self) -> Vec<String> {
        self.store
            .node(&self.path)
            .children
            .borrow()
            .iter()
            .map(|r| r.key.clone())
            .collect()
    }

    /// Number of live child subscriptions on this node.
    #[must_use]
    pub fn child_listener_count(&self) -> usize {
        self.store.node(&self.path).child_listeners.len()
    }

    /// Number of live value subscriptions on this node.
    #[must_use]
    pub fn value_listener_count(&self) -> usize {
        self.store.node(&self.path).value_listeners.len()
    }
}

impl<V: Clone + 'static> EventSource for MemoryRef<V> {
    type Value = V;

    fn subscribe_children<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&ChildEvent<V>) + 'static,
    {
        let node = self.store.node(&self.path);
        if self.store.config.replay_children {
            let records = node.children.borrow().clone();
            trace!(message = "memory.replay", path = %self.path, count = records.len());
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
        node.child_listeners.subscribe(listener)
    }

    fn subscribe_value<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&ValueEvent<V>) + 'static,
    {
        let snapshot = self.store.snapshot(&self.path);
        let prime = match self.store.config.replay_values {
            ReplayValues::Always => true,
            ReplayValues::WhenPresent => !snapshot.is_empty(),
            ReplayValues::Never => false,
        };
        if prime {
            listener(&ValueEvent::Value(snapshot));
        }
        self.store
            .node(&self.path)
            .value_listeners
            .subscribe(listener)
    }
}

impl<V: Clone + 'static> Reference for MemoryRef<V> {
    fn child(&self, key: &str) -> Self {
        Self {
            store: Rc::clone(&self.store),
            path: child_path(&self.path, key),
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
