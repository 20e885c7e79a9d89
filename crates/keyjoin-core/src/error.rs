#![forbid(unsafe_code)]

//! Error taxonomy for mirrors and joins.
//!
//! # Failure Modes
//!
//! - **Divergence** ([`KeyjoinError::KeyNotFound`]): a structural event names
//!   a key the local copy does not hold. The source and the mirror no longer
//!   agree; the mirror stops processing that stream. Re-adding a present key
//!   ([`KeyjoinError::DuplicateKey`]) is divergence too.
//! - **Bad access** ([`KeyjoinError::IndexOutOfRange`]): caller error, fatal
//!   to the call only.
//! - **Upstream cancellation** ([`KeyjoinError::UpstreamCancelled`]): the
//!   source reported a permission or connectivity failure. It is forwarded
//!   verbatim; nothing in this workspace retries.

use std::fmt;

/// Why a source stopped delivering events for a reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum CancelReason {
    /// Security rules no longer allow reading the reference.
    PermissionDenied,
    /// The transport went away.
    Disconnected,
    /// Credentials expired.
    Expired,
    /// Anything else the source reports.
    #[default]
    Other,
}

impl CancelReason {
    /// Stable lowercase name, used as a log field.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PermissionDenied => "permission_denied",
            Self::Disconnected => "disconnected",
            Self::Expired => "expired",
            Self::Other => "other",
        }
    }
}

/// A source-reported cancellation, forwarded verbatim to listeners.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cancellation {
    /// Classified reason.
    pub reason: CancelReason,
    /// Human-readable detail from the source.
    pub message: String,
}

impl Cancellation {
    /// Create a cancellation.
    #[must_use]
    pub fn new(reason: CancelReason, message: impl Into<String>) -> Self {
        Self {
            reason,
            message: message.into(),
        }
    }
}

impl fmt::Display for Cancellation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.reason.as_str(), self.message)
    }
}

/// Errors surfaced by mirrors and joins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyjoinError {
    /// A structural event referenced a key absent from the local sequence.
    KeyNotFound {
        /// The missing key.
        key: String,
        /// Event kind that referenced it (`added`, `changed`, ...).
        op: &'static str,
    },
    /// Random access outside `[0, len)`.
    IndexOutOfRange { index: usize, len: usize },
    /// The event source cancelled the subscription.
    UpstreamCancelled(Cancellation),
    /// `attach` was called on an instance that was already attached.
    AlreadyAttached,
    /// The instance was torn down or failed and accepts no further events.
    Detached,
    /// An `added` event named a key that is already present.
    DuplicateKey { key: String },
}

impl fmt::Display for KeyjoinError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::KeyNotFound { key, op } => {
                write!(f, "key '{}' not found while applying {}", key, op)
            }
            Self::IndexOutOfRange { index, len } => {
                write!(f, "index {} out of range (len {})", index, len)
            }
            Self::UpstreamCancelled(cancellation) => {
                write!(f, "upstream cancelled: {}", cancellation)
            }
            Self::AlreadyAttached => write!(f, "already attached to a source"),
            Self::Detached => write!(f, "detached from its source"),
            Self::DuplicateKey { key } => write!(f, "key '{}' added twice", key),
        }
    }
}

impl std::error::Error for KeyjoinError {}

impl From<Cancellation> for KeyjoinError {
    fn from(cancellation: Cancellation) -> Self {
        Self::UpstreamCancelled(cancellation)
    }
}

/// Result alias for fallible keyjoin operations.
pub type Result<T> = std::result::Result<T, KeyjoinError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages() {
        let err = KeyjoinError::KeyNotFound {
            key: "a".into(),
            op: "removed",
        };
        assert_eq!(err.to_string(), "key 'a' not found while applying removed");

        let err = KeyjoinError::IndexOutOfRange { index: 3, len: 2 };
        assert_eq!(err.to_string(), "index 3 out of range (len 2)");

        let err: KeyjoinError =
            Cancellation::new(CancelReason::PermissionDenied, "rules changed").into();
        assert_eq!(
            err.to_string(),
            "upstream cancelled: permission_denied: rules changed"
        );
    }
}
