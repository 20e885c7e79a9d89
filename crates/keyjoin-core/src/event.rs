#![forbid(unsafe_code)]

//! Canonical event vocabulary shared by every source, mirror and join.
//!
//! An Event Source speaks two protocols for a reference:
//!
//! - **Child events** ([`ChildEvent`]) describe membership and order of the
//!   reference's keyed children. `after` names the key of the element that
//!   immediately precedes the affected one; `None` means "first".
//! - **Value events** ([`ValueEvent`]) carry a [`Snapshot`] of the
//!   reference's whole content, or a cancellation.

use crate::error::Cancellation;

/// A keyed element of an ordered collection.
///
/// Position is never stored on the record; it is implied by sequence order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record<V> {
    /// Key, unique within its collection.
    pub key: String,
    /// Opaque payload.
    pub value: V,
}

impl<V> Record<V> {
    /// Create a record.
    #[must_use]
    pub fn new(key: impl Into<String>, value: V) -> Self {
        Self {
            key: key.into(),
            value,
        }
    }
}

/// Point-in-time content of a reference.
///
/// `value` is `None` when the reference currently holds nothing. `children`
/// lists the ordered keyed children when the reference is a collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot<V> {
    /// Last path segment of the reference, `None` for a root.
    pub key: Option<String>,
    /// Scalar content, if any.
    pub value: Option<V>,
    /// Ordered children, if any.
    pub children: Vec<Record<V>>,
}

impl<V> Snapshot<V> {
    /// A snapshot of a scalar reference.
    #[must_use]
    pub fn scalar(key: impl Into<String>, value: Option<V>) -> Self {
        Self {
            key: Some(key.into()),
            value,
            children: Vec::new(),
        }
    }

    /// Whether the reference held neither a value nor any children.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.value.is_none() && self.children.is_empty()
    }
}

impl<V> Default for Snapshot<V> {
    fn default() -> Self {
        Self {
            key: None,
            value: None,
            children: Vec::new(),
        }
    }
}

/// Kind of a structural change, without its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChildEventKind {
    Added,
    Changed,
    Removed,
    Moved,
    Cancelled,
}

impl ChildEventKind {
    /// Stable lowercase name, used as a log field.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Added => "added",
            Self::Changed => "changed",
            Self::Removed => "removed",
            Self::Moved => "moved",
            Self::Cancelled => "cancelled",
        }
    }
}

/// A structural notification about a reference's keyed children.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChildEvent<V> {
    /// `key` appeared immediately after `after` (front when `None`).
    Added {
        key: String,
        value: V,
        after: Option<String>,
    },
    /// The element at the position after `after` now has this key and value.
    Changed {
        key: String,
        value: V,
        after: Option<String>,
    },
    /// `key` disappeared; `value` is its last known payload.
    Removed { key: String, value: V },
    /// `key` now sits immediately after `after` (front when `None`).
    Moved {
        key: String,
        value: V,
        after: Option<String>,
    },
    /// The source stopped delivering events for this reference.
    Cancelled(Cancellation),
}

impl<V> ChildEvent<V> {
    /// Convenience constructor for [`ChildEvent::Added`].
    pub fn added(key: impl Into<String>, value: V, after: Option<&str>) -> Self {
        Self::Added {
            key: key.into(),
            value,
            after: after.map(str::to_owned),
        }
    }

    /// Convenience constructor for [`ChildEvent::Changed`].
    pub fn changed(key: impl Into<String>, value: V, after: Option<&str>) -> Self {
        Self::Changed {
            key: key.into(),
            value,
            after: after.map(str::to_owned),
        }
    }

    /// Convenience constructor for [`ChildEvent::Removed`].
    pub fn removed(key: impl Into<String>, value: V) -> Self {
        Self::Removed {
            key: key.into(),
            value,
        }
    }

    /// Convenience constructor for [`ChildEvent::Moved`].
    pub fn moved(key: impl Into<String>, value: V, after: Option<&str>) -> Self {
        Self::Moved {
            key: key.into(),
            value,
            after: after.map(str::to_owned),
        }
    }

    /// The event kind.
    #[must_use]
    pub const fn kind(&self) -> ChildEventKind {
        match self {
            Self::Added { .. } => ChildEventKind::Added,
            Self::Changed { .. } => ChildEventKind::Changed,
            Self::Removed { .. } => ChildEventKind::Removed,
            Self::Moved { .. } => ChildEventKind::Moved,
            Self::Cancelled(_) => ChildEventKind::Cancelled,
        }
    }

    /// The affected key, `None` for cancellations.
    #[must_use]
    pub fn key(&self) -> Option<&str> {
        match self {
            Self::Added { key, .. }
            | Self::Changed { key, .. }
            | Self::Removed { key, .. }
            | Self::Moved { key, .. } => Some(key),
            Self::Cancelled(_) => None,
        }
    }

    /// The carried payload, `None` for cancellations.
    #[must_use]
    pub fn value(&self) -> Option<&V> {
        match self {
            Self::Added { value, .. }
            | Self::Changed { value, .. }
            | Self::Removed { value, .. }
            | Self::Moved { value, .. } => Some(value),
            Self::Cancelled(_) => None,
        }
    }

    /// The preceding key carried by `Added`, `Changed` and `Moved`.
    #[must_use]
    pub fn after(&self) -> Option<&str> {
        match self {
            Self::Added { after, .. } | Self::Changed { after, .. } | Self::Moved { after, .. } => {
                after.as_deref()
            }
            Self::Removed { .. } | Self::Cancelled(_) => None,
        }
    }
}

/// A notification about a reference's whole content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueEvent<V> {
    /// The reference's content at this point.
    Value(Snapshot<V>),
    /// The source stopped delivering events for this reference.
    Cancelled(Cancellation),
}

impl<V> ValueEvent<V> {
    /// The snapshot, if this is a value delivery.
    #[must_use]
    pub fn snapshot(&self) -> Option<&Snapshot<V>> {
        match self {
            Self::Value(snapshot) => Some(snapshot),
            Self::Cancelled(_) => None,
        }
    }
}
