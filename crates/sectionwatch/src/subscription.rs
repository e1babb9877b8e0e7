//! Active-state change subscriptions.
//!
//! Subscribing returns a [`Subscription`] guard; dropping it unsubscribes.
//! Callbacks run on the tracker's thread, in subscription order, and may
//! drop their own (or any other) subscription while running.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::Arc;

use crate::resolver::ActiveState;

type Callback = Box<dyn FnMut(&Arc<ActiveState>)>;

struct Slot {
    live: Cell<bool>,
    callback: RefCell<Callback>,
}

#[derive(Default)]
struct SlotList {
    slots: Vec<Rc<Slot>>,
}

impl SlotList {
    fn prune(&mut self) {
        self.slots.retain(|slot| slot.live.get());
    }
}

/// The set of active-state observers.
#[derive(Default)]
pub(crate) struct Subscribers {
    list: Rc<RefCell<SlotList>>,
}

impl Subscribers {
    pub(crate) fn subscribe(&self, callback: impl FnMut(&Arc<ActiveState>) + 'static) -> Subscription {
        let slot = Rc::new(Slot {
            live: Cell::new(true),
            callback: RefCell::new(Box::new(callback)),
        });
        self.list.borrow_mut().slots.push(Rc::clone(&slot));
        Subscription {
            slot: Rc::downgrade(&slot),
            list: Rc::downgrade(&self.list),
        }
    }

    pub(crate) fn notify(&self, state: &Arc<ActiveState>) {
        let slots: Vec<Rc<Slot>> = {
            let mut list = self.list.borrow_mut();
            list.prune();
            list.slots.clone()
        };
        for slot in slots {
            if !slot.live.get() {
                continue;
            }
            // A callback cannot be re-entered from inside itself.
            if let Ok(mut callback) = slot.callback.try_borrow_mut() {
                callback(state);
            }
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.list
            .borrow()
            .slots
            .iter()
            .filter(|slot| slot.live.get())
            .count()
    }
}

impl fmt::Debug for Subscribers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscribers")
            .field("len", &self.len())
            .finish()
    }
}

/// Handle to an active-state subscription.
///
/// Dropping the handle (or calling [`dispose`](Self::dispose)) unsubscribes.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    slot: Weak<Slot>,
    list: Weak<RefCell<SlotList>>,
}

impl Subscription {
    /// Unsubscribe now.
    pub fn dispose(self) {}

    /// Whether the callback will still be invoked.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.slot.upgrade().is_some_and(|slot| slot.live.get())
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(slot) = self.slot.upgrade() {
            slot.live.set(false);
        }
        if let Some(list) = self.list.upgrade() {
            if let Ok(mut list) = list.try_borrow_mut() {
                list.prune();
            }
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.is_active())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::ResolveReason;

    fn state(id: &str) -> Arc<ActiveState> {
        Arc::new(ActiveState::new(id.into(), 1, ResolveReason::HighestRatio))
    }

    #[test]
    fn test_subscribe_and_notify() {
        let subscribers = Subscribers::default();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        let _subscription = subscribers.subscribe(move |state| {
            sink.borrow_mut().push(state.active.clone());
        });

        subscribers.notify(&state("a"));
        subscribers.notify(&state("b"));

        assert_eq!(seen.borrow().len(), 2);
        assert_eq!(subscribers.len(), 1);
    }

    #[test]
    fn test_drop_unsubscribes() {
        let subscribers = Subscribers::default();
        let count = Rc::new(Cell::new(0));
        let counter = Rc::clone(&count);
        let subscription = subscribers.subscribe(move |_| counter.set(counter.get() + 1));

        subscribers.notify(&state("a"));
        assert!(subscription.is_active());
        subscription.dispose();
        subscribers.notify(&state("b"));

        assert_eq!(count.get(), 1);
        assert_eq!(subscribers.len(), 0);
    }

    #[test]
    fn test_unsubscribe_from_inside_callback() {
        let subscribers = Subscribers::default();
        let holder: Rc<RefCell<Option<Subscription>>> = Rc::new(RefCell::new(None));
        let count = Rc::new(Cell::new(0));

        let inner_holder = Rc::clone(&holder);
        let counter = Rc::clone(&count);
        let subscription = subscribers.subscribe(move |_| {
            counter.set(counter.get() + 1);
            inner_holder.borrow_mut().take();
        });
        *holder.borrow_mut() = Some(subscription);

        subscribers.notify(&state("a"));
        subscribers.notify(&state("b"));

        assert_eq!(count.get(), 1);
        assert_eq!(subscribers.len(), 0);
    }

    #[test]
    fn test_subscription_outliving_subscribers() {
        let subscribers = Subscribers::default();
        let subscription = subscribers.subscribe(|_| {});
        drop(subscribers);
        assert!(!subscription.is_active());
        drop(subscription);
    }
}
