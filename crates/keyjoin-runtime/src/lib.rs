#![forbid(unsafe_code)]

//! Runtime: ordered mirrors, live key joins and the dispatch machinery they
//! share.
//!
//! Everything here is single-threaded (`Rc`/`RefCell`). Each instance owns
//! its listeners and serializes its own callbacks through an [`Inbox`].

pub mod config;
pub mod dispatch;
pub mod join;
pub mod list_event;
pub mod mirror;
pub mod multicast;

#[cfg(test)]
mod testing;

pub use config::{JoinConfig, MirrorConfig};
pub use dispatch::Inbox;
pub use join::{Activity, DispatchMode, EntryState, JoinEngine, Joined};
pub use list_event::{ListEvent, ListListener};
pub use mirror::{MirrorStatus, OrderedMirror};
pub use multicast::Multicast;
