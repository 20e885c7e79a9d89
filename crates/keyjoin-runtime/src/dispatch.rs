#![forbid(unsafe_code)]

//! Serialized per-instance dispatch.
//!
//! Mirrors and joins receive callbacks from sources they do not control. A
//! source may call back synchronously while the instance is still handling
//! an earlier event (for example a target that delivers its current value
//! from inside `subscribe_value`). [`Inbox`] turns that reentrancy into a
//! queue: the outermost delivery drains events one at a time, each handled
//! to completion before the next starts.
//!
//! # Invariants
//!
//! 1. Events are handled in arrival order.
//! 2. At most one event is being handled per inbox at any time.
//! 3. A reentrant delivery returns immediately after enqueueing.
//! 4. A panic inside the handler does not leave the inbox stuck in the
//!    draining state.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fmt;

/// FIFO of pending events plus a draining flag.
pub struct Inbox<E> {
    queue: RefCell<VecDeque<E>>,
    draining: Cell<bool>,
}

/// Resets the draining flag when the outermost drain unwinds.
struct DrainGuard<'a> {
    draining: &'a Cell<bool>,
}

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.draining.set(false);
    }
}

impl<E> Inbox<E> {
    /// Create an empty inbox.
    #[must_use]
    pub fn new() -> Self {
        Self {
            queue: RefCell::new(VecDeque::new()),
            draining: Cell::new(false),
        }
    }

    /// Enqueue `event`; if no drain is in progress, drain with `handle`.
    ///
    /// Returns the number of events handled by this call (zero for a
    /// reentrant delivery).
    pub fn deliver(&self, event: E, mut handle: impl FnMut(E)) -> usize {
        self.queue.borrow_mut().push_back(event);
        if self.draining.get() {
            return 0;
        }
        self.draining.set(true);
        let _guard = DrainGuard {
            draining: &self.draining,
        };

        let mut handled = 0;
        loop {
            let next = self.queue.borrow_mut().pop_front();
            let Some(event) = next else {
                break;
            };
            handle(event);
            handled += 1;
        }
        handled
    }

    /// Whether a drain is in progress further up the stack.
    #[must_use]
    pub fn is_draining(&self) -> bool {
        self.draining.get()
    }

    /// Number of queued, unhandled events.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.queue.borrow().len()
    }

    /// Drop every queued event.
    pub fn clear(&self) {
        self.queue.borrow_mut().clear();
    }
}

impl<E> Default for Inbox<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> fmt::Debug for Inbox<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Inbox")
            .field("pending", &self.pending())
            .field("draining", &self.is_draining())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;

    #[test]
    fn handles_single_event() {
        let inbox = Inbox::new();
        let mut seen = Vec::new();
        let handled = inbox.deliver(1, |e| seen.push(e));
        assert_eq!(handled, 1);
        assert_eq!(seen, vec![1]);
        assert!(!inbox.is_draining());
    }

    #[test]
    fn reentrant_delivery_is_queued_behind_current_event() {
        let inbox = Rc::new(Inbox::new());
        let log = Rc::new(RefCell::new(Vec::new()));

        fn handle(inbox: &Rc<Inbox<u32>>, log: &Rc<RefCell<Vec<&'static str>>>, e: u32) {
            match e {
                1 => {
                    log.borrow_mut().push("start 1");
                    let handled = inbox.deliver(2, |e| handle(inbox, log, e));
                    assert_eq!(handled, 0);
                    log.borrow_mut().push("end 1");
                }
                _ => log.borrow_mut().push("handle 2"),
            }
        }

        let handled = inbox.deliver(1, |e| handle(&inbox, &log, e));
        assert_eq!(handled, 2);
        assert_eq!(*log.borrow(), vec!["start 1", "end 1", "handle 2"]);
        assert_eq!(inbox.pending(), 0);
    }

    #[test]
    fn panic_in_handler_releases_drain_flag() {
        let inbox = Inbox::new();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            inbox.deliver(1, |_| panic!("handler failed"));
        }));
        assert!(result.is_err());
        assert!(!inbox.is_draining());

        let mut seen = Vec::new();
        inbox.deliver(2, |e| seen.push(e));
        assert_eq!(seen, vec![2]);
    }

    #[test]
    fn clear_drops_pending() {
        let inbox = Inbox::new();
        inbox.queue.borrow_mut().push_back(5);
        assert_eq!(inbox.pending(), 1);
        inbox.clear();
        assert_eq!(inbox.pending(), 0);
    }
}
