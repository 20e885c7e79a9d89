#![forbid(unsafe_code)]

//! Core: event vocabulary, the Event Source contract, subscriptions and
//! per-instance listener registries.

pub mod error;
pub mod event;
pub mod logging;
pub mod position;
pub mod registry;
pub mod source;
pub mod subscription;

pub use error::{CancelReason, Cancellation, KeyjoinError, Result};
pub use event::{ChildEvent, ChildEventKind, Record, Snapshot, ValueEvent};
pub use position::AfterKeyPolicy;
pub use registry::ListenerRegistry;
pub use source::{EventSource, Reference};
pub use subscription::Subscription;
