#![forbid(unsafe_code)]

//! Logging shim.
//!
//! With the `tracing` feature the usual `tracing` macros are re-exported
//! here. Without it, same-named no-op macros are exported at the crate root so
//! call sites compile unchanged:
//!
//! ```ignore
//! #[cfg(feature = "tracing")]
//! use crate::logging::trace;
//! #[cfg(not(feature = "tracing"))]
//! use crate::trace;
//! ```

#[cfg(feature = "tracing")]
pub use tracing::{debug, error, trace, warn};

#[cfg(not(feature = "tracing"))]
#[doc(hidden)]
#[macro_export]
macro_rules! trace {
    ($($arg:tt)*) => {};
}

#[cfg(not(feature = "tracing"))]
#[doc(hidden)]
#[macro_export]
macro_rules! debug {
    ($($arg:tt)*) => {};
}

#[cfg(not(feature = "tracing"))]
#[doc(hidden)]
#[macro_export]
macro_rules! warn {
    ($($arg:tt)*) => {};
}

#[cfg(not(feature = "tracing"))]
#[doc(hidden)]
#[macro_export]
macro_rules! error {
    ($($arg:tt)*) => {};
}
