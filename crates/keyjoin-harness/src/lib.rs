#![forbid(unsafe_code)]

//! Test harness for keyjoin: a deterministic in-memory Event Source,
//! recording listeners, JSON event scripts and a step-sequence minimizer.

pub mod memory;
pub mod recorder;
pub mod script;
pub mod shrink;

pub use memory::{MemoryConfig, MemoryRef, MemoryStore, ReplayValues};
pub use recorder::{Recorder, record_children, record_values};
pub use script::{EventScript, ScriptError, ScriptStep};
