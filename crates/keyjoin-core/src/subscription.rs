#![forbid(unsafe_code)]

//! RAII subscription guard.
//!
//! Every registration against an Event Source, a mirror or a join returns a
//! [`Subscription`]. Dropping it (or calling [`Subscription::unsubscribe`])
//! runs the detach hook exactly once. A detached listener receives no
//! deliveries dispatched after the detach point.

use std::fmt;

/// Guard that detaches a listener when dropped.
#[must_use = "dropping a Subscription immediately detaches its listener"]
pub struct Subscription {
    detach: Option<Box<dyn FnOnce()>>,
}

impl Subscription {
    /// Wrap a detach hook.
    pub fn new(detach: impl FnOnce() + 'static) -> Self {
        Self {
            detach: Some(Box::new(detach)),
        }
    }

    /// A subscription with nothing to detach.
    ///
    /// Returned by sources that are already closed.
    pub fn inert() -> Self {
        Self { detach: None }
    }

    /// Whether the detach hook has not run yet.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.detach.is_some()
    }

    /// Detach now.
    pub fn unsubscribe(mut self) {
        self.run_detach();
    }

    fn run_detach(&mut self) {
        if let Some(detach) = self.detach.take() {
            detach();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.run_detach();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.is_active())
            .finish()
    }
}
