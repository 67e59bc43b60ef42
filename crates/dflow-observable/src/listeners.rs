#![forbid(unsafe_code)]

//! Listener registration, notification, and activation hooks.
//!
//! Every observable embeds an [`ObservableCore`]: its realm, a shared
//! listener table, and the disposed flag. Callbacks are stored as `Rc`
//! closures and notified in registration order; notification works on a
//! snapshot of the table, so listeners may subscribe or unsubscribe while a
//! notification is in flight.
//!
//! # Activation
//!
//! Composites want to attach to their upstreams only while someone listens
//! to them. The table calls [`Lifecycle::first_listener_added`] when the
//! number of change and stale listeners goes from zero to one and
//! [`Lifecycle::last_listener_removed`] on the way back. Dispose listeners do
//! not count.
//!
//! # Invariants
//!
//! 1. A listener is called once per fired event, in registration order.
//! 2. Dropping a [`Subscription`] removes the callback before the next
//!    notification cycle.
//! 3. The table holds no borrow while user callbacks run.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use dflow_core::error::{ObservableError, Result};
use dflow_core::logging::trace;
use dflow_core::realm::Realm;

// ─── Subscription ────────────────────────────────────────────────────────────

/// RAII guard for a registered listener; dropping it unsubscribes.
#[must_use = "dropping a Subscription immediately unsubscribes the listener"]
pub struct Subscription {
    release: Option<Box<dyn FnOnce()>>,
}

impl Subscription {
    pub(crate) fn new(release: impl FnOnce() + 'static) -> Self {
        Self {
            release: Some(Box::new(release)),
        }
    }

    /// A subscription that was never attached (e.g. to a disposed source).
    pub fn empty() -> Self {
        Self { release: None }
    }

    pub fn is_attached(&self) -> bool {
        self.release.is_some()
    }

    /// Explicitly unsubscribe; equivalent to dropping.
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("attached", &self.is_attached())
            .finish()
    }
}

// ─── Lifecycle hooks ─────────────────────────────────────────────────────────

pub(crate) trait Lifecycle {
    fn first_listener_added(&self);
    fn last_listener_removed(&self);
}

struct NoHooks;

impl Lifecycle for NoHooks {
    fn first_listener_added(&self) {}
    fn last_listener_removed(&self) {}
}

// ─── Listener table ──────────────────────────────────────────────────────────

#[derive(Clone, Copy, PartialEq, Eq)]
enum Kind {
    Change,
    Stale,
    Dispose,
}

type ChangeFn<D> = Rc<dyn Fn(&D)>;
type SignalFn = Rc<dyn Fn()>;

struct ListenerTable<D: 'static> {
    change: RefCell<Vec<(u64, ChangeFn<D>)>>,
    stale: RefCell<Vec<(u64, SignalFn)>>,
    dispose: RefCell<Vec<(u64, SignalFn)>>,
    next_id: Cell<u64>,
    hooks: Weak<dyn Lifecycle>,
}

impl<D: 'static> ListenerTable<D> {
    fn counted(&self) -> usize {
        self.change.borrow().len() + self.stale.borrow().len()
    }

    fn next_id(&self) -> u64 {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        id
    }

    fn remove(&self, kind: Kind, id: u64) {
        let was_active = self.counted() > 0;
        match kind {
            Kind::Change => self.change.borrow_mut().retain(|(slot, _)| *slot != id),
            Kind::Stale => self.stale.borrow_mut().retain(|(slot, _)| *slot != id),
            Kind::Dispose => self.dispose.borrow_mut().retain(|(slot, _)| *slot != id),
        }
        if kind != Kind::Dispose
            && was_active
            && self.counted() == 0
            && let Some(hooks) = self.hooks.upgrade()
        {
            hooks.last_listener_removed();
        }
    }

    fn clear(&self) {
        let change = std::mem::take(&mut *self.change.borrow_mut());
        let stale = std::mem::take(&mut *self.stale.borrow_mut());
        let dispose = std::mem::take(&mut *self.dispose.borrow_mut());
        drop((change, stale, dispose));
    }
}

// ─── ObservableCore ──────────────────────────────────────────────────────────

/// Realm, listeners, and disposal state shared by every observable.
pub(crate) struct ObservableCore<D: 'static> {
    realm: Realm,
    table: Rc<ListenerTable<D>>,
    disposed: Cell<bool>,
}

impl<D: 'static> ObservableCore<D> {
    /// A core that reports activation changes to `hooks`.
    pub(crate) fn new(realm: &Realm, hooks: Weak<dyn Lifecycle>) -> Self {
        Self {
            realm: realm.clone(),
            table: Rc::new(ListenerTable {
                change: RefCell::new(Vec::new()),
                stale: RefCell::new(Vec::new()),
                dispose: RefCell::new(Vec::new()),
                next_id: Cell::new(1),
                hooks,
            }),
            disposed: Cell::new(false),
        }
    }

    /// A core without activation hooks.
    pub(crate) fn passive(realm: &Realm) -> Self {
        Self::new(realm, Weak::<NoHooks>::new())
    }

    #[inline]
    pub(crate) fn realm(&self) -> &Realm {
        &self.realm
    }

    /// Getter precondition.
    ///
    /// # Panics
    ///
    /// Panics when called outside the owning realm.
    #[track_caller]
    pub(crate) fn getter_called(&self) {
        self.realm.assert_current();
    }

    /// Mutator precondition: not disposed, inside the owning realm.
    pub(crate) fn check_mutation(&self) -> Result<()> {
        if self.disposed.get() {
            return Err(ObservableError::Disposed);
        }
        self.realm.check()
    }

    #[inline]
    pub(crate) fn is_disposed(&self) -> bool {
        self.disposed.get()
    }

    pub(crate) fn has_listeners(&self) -> bool {
        self.table.counted() > 0
    }

    pub(crate) fn subscribe(&self, listener: Box<dyn Fn(&D)>) -> Subscription {
        if self.disposed.get() {
            return Subscription::empty();
        }
        let id = self.table.next_id();
        self.table.change.borrow_mut().push((id, Rc::from(listener)));
        self.attached(Kind::Change, id)
    }

    pub(crate) fn subscribe_stale(&self, listener: Box<dyn Fn()>) -> Subscription {
        if self.disposed.get() {
            return Subscription::empty();
        }
        let id = self.table.next_id();
        self.table.stale.borrow_mut().push((id, Rc::from(listener)));
        self.attached(Kind::Stale, id)
    }

    pub(crate) fn subscribe_dispose(&self, listener: Box<dyn Fn()>) -> Subscription {
        if self.disposed.get() {
            return Subscription::empty();
        }
        let id = self.table.next_id();
        self.table.dispose.borrow_mut().push((id, Rc::from(listener)));
        self.attached(Kind::Dispose, id)
    }

    fn attached(&self, kind: Kind, id: u64) -> Subscription {
        if kind != Kind::Dispose
            && self.table.counted() == 1
            && let Some(hooks) = self.table.hooks.upgrade()
        {
            hooks.first_listener_added();
        }
        let table = Rc::downgrade(&self.table);
        Subscription::new(move || {
            if let Some(table) = table.upgrade() {
                table.remove(kind, id);
            }
        })
    }

    pub(crate) fn fire_change(&self, diff: &D) {
        if self.disposed.get() {
            return;
        }
        let listeners: Vec<ChangeFn<D>> = self
            .table
            .change
            .borrow()
            .iter()
            .map(|(_, listener)| Rc::clone(listener))
            .collect();
        for listener in listeners {
            listener(diff);
        }
    }

    pub(crate) fn fire_stale(&self) {
        if self.disposed.get() {
            return;
        }
        let listeners: Vec<SignalFn> = self
            .table
            .stale
            .borrow()
            .iter()
            .map(|(_, listener)| Rc::clone(listener))
            .collect();
        for listener in listeners {
            listener();
        }
    }

    /// Mark disposed, notify dispose listeners, and drop every listener.
    /// Returns `false` when the core was already disposed.
    pub(crate) fn dispose(&self) -> bool {
        if self.disposed.replace(true) {
            return false;
        }
        trace!(message = "observable.dispose", realm_id = self.realm.id());
        let listeners: Vec<SignalFn> = self
            .table
            .dispose
            .borrow()
            .iter()
            .map(|(_, listener)| Rc::clone(listener))
            .collect();
        for listener in listeners {
            listener();
        }
        self.table.clear();
        true
    }
}

// ─── Trait plumbing ──────────────────────────────────────────────────────────

/// Implement [`Observable`](crate::traits::Observable) for a handle type
/// whose `inner` field exposes `core`, `is_stale()`, and `dispose()`.
macro_rules! impl_observable {
    ($ty:ident<$($param:ident),*> where [$($bounds:tt)*]) => {
        impl<$($param),*> $crate::traits::Observable for $ty<$($param),*>
        where
            $($bounds)*
        {
            fn realm(&self) -> &dflow_core::realm::Realm {
                self.inner.core.realm()
            }

            fn is_stale(&self) -> bool {
                self.inner.is_stale()
            }

            fn is_disposed(&self) -> bool {
                self.inner.core.is_disposed()
            }

            fn dispose(&self) {
                self.inner.dispose();
            }

            fn has_listeners(&self) -> bool {
                self.inner.core.has_listeners()
            }

            fn subscribe_stale(&self, listener: Box<dyn Fn()>) -> $crate::listeners::Subscription {
                self.inner.core.subscribe_stale(listener)
            }

            fn subscribe_dispose(
                &self,
                listener: Box<dyn Fn()>,
            ) -> $crate::listeners::Subscription {
                self.inner.core.subscribe_dispose(listener)
            }
        }
    };
}

pub(crate) use impl_observable;

#[cfg(test)]
mod tests {
    use super::*;

    struct Counter {
        first: Cell<u32>,
        last: Cell<u32>,
    }

    impl Lifecycle for Counter {
        fn first_listener_added(&self) {
            self.first.set(self.first.get() + 1);
        }

        fn last_listener_removed(&self) {
            self.last.set(self.last.get() + 1);
        }
    }

    fn hooked() -> (Rc<Counter>, ObservableCore<u32>) {
        let counter = Rc::new(Counter {
            first: Cell::new(0),
            last: Cell::new(0),
        });
        let weak: Weak<dyn Lifecycle> = Rc::downgrade(&counter) as Weak<dyn Lifecycle>;
        (counter, ObservableCore::new(&Realm::new(), weak))
    }

    #[test]
    fn listeners_fire_in_registration_order() {
        let core = ObservableCore::<u32>::passive(&Realm::new());
        let log = Rc::new(RefCell::new(Vec::new()));
        let l1 = Rc::clone(&log);
        let l2 = Rc::clone(&log);
        let _a = core.subscribe(Box::new(move |v| l1.borrow_mut().push(("a", *v))));
        let _b = core.subscribe(Box::new(move |v| l2.borrow_mut().push(("b", *v))));
        core.fire_change(&7);
        assert_eq!(*log.borrow(), vec![("a", 7), ("b", 7)]);
    }

    #[test]
    fn dropping_subscription_unsubscribes() {
        let core = ObservableCore::<u32>::passive(&Realm::new());
        let hits = Rc::new(Cell::new(0));
        let h = Rc::clone(&hits);
        let sub = core.subscribe(Box::new(move |_| h.set(h.get() + 1)));
        core.fire_change(&1);
        drop(sub);
        core.fire_change(&2);
        assert_eq!(hits.get(), 1);
        assert!(!core.has_listeners());
    }

    #[test]
    fn activation_hooks_fire_on_transitions_only() {
        let (counter, core) = hooked();
        let a = core.subscribe(Box::new(|_| {}));
        let b = core.subscribe_stale(Box::new(|| {}));
        let d = core.subscribe_dispose(Box::new(|| {}));
        assert_eq!(counter.first.get(), 1);
        drop(a);
        assert_eq!(counter.last.get(), 0);
        drop(b);
        assert_eq!(counter.last.get(), 1);
        drop(d);
        assert_eq!(counter.last.get(), 1);
        let _again = core.subscribe(Box::new(|_| {}));
        assert_eq!(counter.first.get(), 2);
    }

    #[test]
    fn dispose_only_counts_once_and_blocks_mutation() {
        let core = ObservableCore::<u32>::passive(&Realm::new());
        let disposed = Rc::new(Cell::new(0));
        let d = Rc::clone(&disposed);
        let _sub = core.subscribe_dispose(Box::new(move || d.set(d.get() + 1)));
        assert!(core.dispose());
        assert!(!core.dispose());
        assert_eq!(disposed.get(), 1);
        assert_eq!(core.check_mutation(), Err(ObservableError::Disposed));
        assert!(!core.subscribe(Box::new(|_| {})).is_attached());
    }

    #[test]
    fn unsubscribing_during_notification_is_safe() {
        let core = Rc::new(ObservableCore::<u32>::passive(&Realm::new()));
        let slot: Rc<RefCell<Option<Subscription>>> = Rc::new(RefCell::new(None));
        let inner_slot = Rc::clone(&slot);
        let sub = core.subscribe(Box::new(move |_| {
            inner_slot.borrow_mut().take();
        }));
        *slot.borrow_mut() = Some(sub);
        core.fire_change(&1);
        assert!(slot.borrow().is_none());
        assert!(!core.has_listeners());
    }
}
