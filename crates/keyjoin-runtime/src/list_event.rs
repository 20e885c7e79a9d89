#![forbid(unsafe_code)]

//! Positional events for list consumers.
//!
//! Child events name keys; list consumers (view bindings, adapters) want
//! indices. [`ListEvent`] is what [`OrderedMirror`](crate::OrderedMirror)
//! and [`JoinEngine`](crate::JoinEngine) hand to their single positional
//! listener.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use keyjoin_core::{Cancellation, KeyjoinError, Record, Snapshot};

/// A positional change notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListEvent<V> {
    /// A record was inserted at `index`.
    Added { index: usize },
    /// The record at `index` has a new value.
    Changed { index: usize },
    /// `record` was removed from `index`.
    Removed { index: usize, record: Record<V> },
    /// The record at `from` now lives at `to`.
    Moved { from: usize, to: usize },
    /// A batch of updates completed; carries the source's bulk snapshot.
    DataChanged(Snapshot<V>),
    /// The source cancelled. Forwarded verbatim.
    Cancelled(Cancellation),
    /// The instance diverged from its source and stopped.
    Failed(KeyjoinError),
}

impl<V> ListEvent<V> {
    /// The index a list binding should refresh, if any.
    #[must_use]
    pub fn index(&self) -> Option<usize> {
        match self {
            Self::Added { index } | Self::Changed { index } | Self::Removed { index, .. } => {
                Some(*index)
            }
            Self::Moved { to, .. } => Some(*to),
            Self::DataChanged(_) | Self::Cancelled(_) | Self::Failed(_) => None,
        }
    }

    /// Whether this event changes membership or order.
    #[must_use]
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            Self::Added { .. } | Self::Changed { .. } | Self::Removed { .. } | Self::Moved { .. }
        )
    }
}

/// Shared form of a positional listener.
pub type ListListener<V> = Rc<dyn Fn(&ListEvent<V>)>;

/// Holder for the single positional listener of an instance.
///
/// Setting a listener replaces the previous one. Emitting with no listener
/// set is a no-op.
pub(crate) struct ListenerSlot<V> {
    slot: RefCell<Option<ListListener<V>>>,
}

impl<V> ListenerSlot<V> {
    pub(crate) fn new() -> Self {
        Self {
            slot: RefCell::new(None),
        }
    }

    pub(crate) fn set(&self, listener: ListListener<V>) {
        *self.slot.borrow_mut() = Some(listener);
    }

    pub(crate) fn clear(&self) {
        self.slot.borrow_mut().take();
    }

    pub(crate) fn is_set(&self) -> bool {
        self.slot.borrow().is_some()
    }

    /// Deliver without holding the slot borrowed, so the listener may
    /// replace or clear itself.
    pub(crate) fn emit(&self, event: &ListEvent<V>) {
        let listener = self.slot.borrow().clone();
        if let Some(listener) = listener {
            listener(event);
        }
    }
}

impl<V> fmt::Debug for ListenerSlot<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerSlot")
            .field("set", &self.is_set())
            .finish()
    }
}
