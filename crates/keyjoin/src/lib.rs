#![forbid(unsafe_code)]

//! Keyjoin public facade crate.
//!
//! Re-exports the event vocabulary and, with the default `runtime`
//! feature, the ordered mirror and join engine.

pub use keyjoin_core as core;
#[cfg(feature = "harness")]
pub use keyjoin_harness as harness;
#[cfg(feature = "runtime")]
pub use keyjoin_runtime as runtime;

pub mod prelude {
    pub use keyjoin_core::{
        CancelReason, Cancellation, ChildEvent, EventSource, KeyjoinError, Record, Reference,
        Snapshot, Subscription, ValueEvent,
    };
    #[cfg(feature = "runtime")]
    pub use keyjoin_runtime::{
        JoinConfig, JoinEngine, ListEvent, MirrorConfig, Multicast, OrderedMirror,
    };
}
