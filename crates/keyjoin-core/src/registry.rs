#![forbid(unsafe_code)]

//! Per-instance observer registry.
//!
//! Each mirror, join and source owns its own [`ListenerRegistry`]; there is no
//! process-wide registry.
//!
//! # Invariants
//!
//! 1. Listeners are notified in registration order.
//! 2. Registering or detaching from inside a callback never panics. The
//!    registry is not borrowed while callbacks run.
//! 3. A listener detached during a dispatch is skipped for the rest of that
//!    dispatch.
//! 4. A listener registered during a dispatch first hears the next event.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use crate::subscription::Subscription;

#[cfg(feature = "tracing")]
use crate::logging::trace;
#[cfg(not(feature = "tracing"))]
use crate::trace;

/// Shared form of a registered callback.
pub type Callback<E> = Rc<dyn Fn(&E)>;

struct Slot<E> {
    id: u64,
    live: Rc<Cell<bool>>,
    callback: Callback<E>,
}

struct RegistryInner<E> {
    next_id: Cell<u64>,
    slots: RefCell<Vec<Slot<E>>>,
}

impl<E> RegistryInner<E> {
    fn detach(&self, id: u64) {
        let mut slots = self.slots.borrow_mut();
        if let Some(pos) = slots.iter().position(|slot| slot.id == id) {
            let slot = slots.remove(pos);
            slot.live.set(false);
        }
    }
}

/// Ordered set of callbacks for one event type.
pub struct ListenerRegistry<E> {
    inner: Rc<RegistryInner<E>>,
}

impl<E: 'static> ListenerRegistry<E> {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Rc::new(RegistryInner {
                next_id: Cell::new(1),
                slots: RefCell::new(Vec::new()),
            }),
        }
    }

    /// Register a listener.
    pub fn subscribe(&self, listener: impl Fn(&E) + 'static) -> Subscription {
        self.subscribe_shared(Rc::new(listener))
    }

    /// Register an already shared listener.
    ///
    /// Used when the caller needs to replay state into the same callback
    /// before it goes live.
    pub fn subscribe_shared(&self, callback: Callback<E>) -> Subscription {
        let id = self.inner.next_id.get();
        self.inner.next_id.set(id + 1);
        let live = Rc::new(Cell::new(true));
        self.inner.slots.borrow_mut().push(Slot {
            id,
            live,
            callback,
        });

        let weak: Weak<RegistryInner<E>> = Rc::downgrade(&self.inner);
        Subscription::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.detach(id);
            }
        })
    }

    /// Deliver `event` to every live listener.
    pub fn notify(&self, event: &E) {
        let snapshot: Vec<(Rc<Cell<bool>>, Callback<E>)> = self
            .inner
            .slots
            .borrow()
            .iter()
            .map(|slot| (Rc::clone(&slot.live), Rc::clone(&slot.callback)))
            .collect();
        trace!(message = "registry.notify", listeners = snapshot.len());
        for (live, callback) in snapshot {
            if live.get() {
                callback(event);
            }
        }
    }

    /// Detach every listener.
    ///
    /// Outstanding [`Subscription`] guards become no-ops.
    pub fn clear(&self) {
        let drained: Vec<Slot<E>> = self.inner.slots.borrow_mut().drain(..).collect();
        for slot in drained {
            slot.live.set(false);
        }
    }
}

impl<E> ListenerRegistry<E> {
    /// Number of registered listeners.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.slots.borrow().len()
    }

    /// Whether no listener is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<E: 'static> Default for ListenerRegistry<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> fmt::Debug for ListenerRegistry<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("listeners", &self.inner.slots.borrow().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notifies_in_registration_order() {
        let registry = ListenerRegistry::<u32>::new();
        let log = Rc::new(RefCell::new(Vec::new()));

        let l1 = Rc::clone(&log);
        let _s1 = registry.subscribe(move |v| l1.borrow_mut().push(("first", *v)));
        let l2 = Rc::clone(&log);
        let _s2 = registry.subscribe(move |v| l2.borrow_mut().push(("second", *v)));

        registry.notify(&7);
        assert_eq!(*log.borrow(), vec![("first", 7), ("second", 7)]);
    }

    /// Counting needs no `'static` bound, so generic owners can report it.
    fn listener_count<E>(registry: &ListenerRegistry<E>) -> usize {
        registry.len()
    }

    #[test]
    fn len_works_for_any_event_type() {
        let registry = ListenerRegistry::<u32>::new();
        assert_eq!(listener_count(&registry), 0);
        let _sub = registry.subscribe(|_| {});
        assert_eq!(listener_count(&registry), 1);
        assert!(!registry.is_empty());
    }

    #[test]
    fn dropping_subscription_detaches() {
        let registry = ListenerRegistry::<u32>::new();
        let hits = Rc::new(Cell::new(0u32));
        let h = Rc::clone(&hits);
        let sub = registry.subscribe(move |_| h.set(h.get() + 1));

        registry.notify(&1);
        drop(sub);
        registry.notify(&2);

        assert_eq!(hits.get(), 1);
        assert!(registry.is_empty());
    }

    #[test]
    fn self_detach_inside_callback() {
        let registry = ListenerRegistry::<u32>::new();
        let slot: Rc<RefCell<Option<Subscription>>> = Rc::new(RefCell::new(None));
        let hits = Rc::new(Cell::new(0u32));

        let slot_in = Rc::clone(&slot);
        let h = Rc::clone(&hits);
        let sub = registry.subscribe(move |_| {
            h.set(h.get() + 1);
            // Drop our own guard mid-dispatch.
            slot_in.borrow_mut().take();
        });
        *slot.borrow_mut() = Some(sub);

        registry.notify(&1);
        registry.notify(&2);
        assert_eq!(hits.get(), 1);
    }

    #[test]
    fn detach_of_later_listener_skips_it_in_same_dispatch() {
        let registry = Rc::new(ListenerRegistry::<u32>::new());
        let victim: Rc<RefCell<Option<Subscription>>> = Rc::new(RefCell::new(None));
        let victim_hits = Rc::new(Cell::new(0u32));

        let v = Rc::clone(&victim);
        let _killer = registry.subscribe(move |_| {
            v.borrow_mut().take();
        });
        let vh = Rc::clone(&victim_hits);
        *victim.borrow_mut() = Some(registry.subscribe(move |_| vh.set(vh.get() + 1)));

        registry.notify(&1);
        assert_eq!(victim_hits.get(), 0);
    }

    #[test]
    fn subscribe_inside_callback_hears_next_event() {
        let registry = Rc::new(ListenerRegistry::<u32>::new());
        let late_hits = Rc::new(RefCell::new(Vec::new()));
        let held: Rc<RefCell<Vec<Subscription>>> = Rc::new(RefCell::new(Vec::new()));

        let reg = Rc::clone(&registry);
        let lh = Rc::clone(&late_hits);
        let hd = Rc::clone(&held);
        let _first = registry.subscribe(move |v| {
            if *v == 1 {
                let lh = Rc::clone(&lh);
                hd.borrow_mut()
                    .push(reg.subscribe(move |v| lh.borrow_mut().push(*v)));
            }
        });

        registry.notify(&1);
        registry.notify(&2);
        assert_eq!(*late_hits.borrow(), vec![2]);
    }

    #[test]
    fn clear_makes_guards_inert() {
        let registry = ListenerRegistry::<u32>::new();
        let sub = registry.subscribe(|_| {});
        assert_eq!(registry.len(), 1);
        registry.clear();
        assert!(registry.is_empty());
        drop(sub);
        assert!(registry.is_empty());
    }
}
