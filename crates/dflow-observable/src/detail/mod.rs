#![forbid(unsafe_code)]

//! Master/detail observables.
//!
//! A *master* observable value selects which *detail* observable to follow:
//! a factory turns the master's current value into a detail, and every time
//! the master changes the old detail is disposed, a new one is created and a
//! single diff between the two materialised states is fired.
//!
//! The single-master variants ([`DetailValue`], [`DetailList`],
//! [`DetailSet`], [`DetailMap`]) share one binding engine parameterised by a
//! [`DetailKind`]. The multi-master variants keep one detail per master
//! element: [`ListDetailValues`], [`MapDetailValues`] and
//! [`SetDetailValues`].
//!
//! # Activation
//!
//! A single-master detail always holds a binding (the master value it was
//! built for plus the detail), but subscribes to the master and the detail
//! only while listened to. While inactive, getters compare the master's
//! current value with the bound one and rebind silently when they differ.

mod list;
mod list_values;
mod map;
mod map_values;
mod set;
mod set_values;
mod value;

pub use list::DetailList;
pub use list_values::ListDetailValues;
pub use map::DetailMap;
pub use map_values::MapDetailValues;
pub use set::DetailSet;
pub use set_values::SetDetailValues;
pub use value::DetailValue;

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use dflow_core::error::{ObservableError, Result};
use dflow_core::logging::{debug, warn};
use dflow_core::realm::Realm;
use dflow_core::token::TypeToken;

use crate::listeners::{Lifecycle, ObservableCore, Subscription};
use crate::stale::{StaleTransition, StalenessTracker};
use crate::traits::ValueHandle;

const MASTER: usize = 0;
const DETAIL: usize = 1;

// ─── DetailKind ──────────────────────────────────────────────────────────────

/// What a single-master detail follows: the handle type, how to materialise
/// it, and the diff fired when one detail replaces another.
pub(crate) trait DetailKind: 'static {
    type Handle: Clone + 'static;
    type Snapshot;
    type Diff: 'static;

    fn snapshot(detail: Option<&Self::Handle>) -> Self::Snapshot;

    /// The diff to fire when `old` is replaced by `new`; `None` fires nothing.
    fn replaced(old: Self::Snapshot, new: Self::Snapshot) -> Option<Self::Diff>;

    fn subscribe(detail: &Self::Handle, forward: Box<dyn Fn(&Self::Diff)>) -> Subscription;

    fn type_token(detail: &Self::Handle) -> Option<TypeToken>;

    fn realm(detail: &Self::Handle) -> &Realm;

    fn is_stale(detail: &Self::Handle) -> bool;

    fn subscribe_stale(detail: &Self::Handle, listener: Box<dyn Fn()>) -> Subscription;

    fn dispose(detail: &Self::Handle);
}

/// The `Observable` half of a [`DetailKind`] whose handle is an `Rc<dyn _>`.
macro_rules! delegate_observable {
    () => {
        fn realm(detail: &Self::Handle) -> &dflow_core::realm::Realm {
            $crate::traits::Observable::realm(&**detail)
        }

        fn is_stale(detail: &Self::Handle) -> bool {
            $crate::traits::Observable::is_stale(&**detail)
        }

        fn subscribe_stale(
            detail: &Self::Handle,
            listener: Box<dyn Fn()>,
        ) -> $crate::listeners::Subscription {
            $crate::traits::Observable::subscribe_stale(&**detail, listener)
        }

        fn dispose(detail: &Self::Handle) {
            $crate::traits::Observable::dispose(&**detail);
        }
    };
}

pub(crate) use delegate_observable;

// ─── Binding engine ──────────────────────────────────────────────────────────

pub(crate) type Factory<M, H> = Box<dyn Fn(&M) -> Option<H>>;

struct Binding<M, H> {
    master_value: M,
    detail: Option<H>,
}

struct ActiveDetail {
    staleness: StalenessTracker,
    _master: [Subscription; 2],
    detail: Option<[Subscription; 2]>,
}

pub(crate) struct DetailInner<M: 'static, D: DetailKind> {
    pub(crate) core: ObservableCore<D::Diff>,
    this: Weak<DetailInner<M, D>>,
    master: ValueHandle<M>,
    factory: Factory<M, D::Handle>,
    detail_type: Option<TypeToken>,
    binding: RefCell<Binding<M, D::Handle>>,
    active: RefCell<Option<ActiveDetail>>,
    _master_disposal: Subscription,
}

fn create<M, D: DetailKind>(
    factory: &Factory<M, D::Handle>,
    detail_type: Option<TypeToken>,
    realm: &Realm,
    master_value: M,
) -> Binding<M, D::Handle> {
    let detail = factory(&master_value);
    if let Some(detail) = &detail {
        if let Some(declared) = detail_type
            && let Err(err) = declared.ensure_matches(D::type_token(detail))
        {
            panic!("detail observable: {err}");
        }
        if D::realm(detail) != realm {
            warn!(
                message = "detail.foreign_realm",
                expected = realm.id(),
                found = D::realm(detail).id()
            );
        }
    }
    Binding { master_value, detail }
}

impl<M: Clone + PartialEq + 'static, D: DetailKind> DetailInner<M, D> {
    /// # Panics
    ///
    /// Panics when the master is already disposed or the first detail does
    /// not match `detail_type`.
    pub(crate) fn new(
        master: ValueHandle<M>,
        factory: Factory<M, D::Handle>,
        detail_type: Option<TypeToken>,
    ) -> Rc<Self> {
        assert!(!master.is_disposed(), "detail observable: master is disposed");
        let realm = master.realm().clone();
        let binding = create::<M, D>(&factory, detail_type, &realm, master.value());
        Rc::new_cyclic(|this: &Weak<Self>| {
            let owner = this.clone();
            let disposal = master.subscribe_dispose(Box::new(move || {
                if let Some(detail) = owner.upgrade() {
                    detail.dispose();
                }
            }));
            Self {
                core: ObservableCore::new(&realm, this.clone()),
                this: this.clone(),
                master,
                factory,
                detail_type,
                binding: RefCell::new(binding),
                active: RefCell::new(None),
                _master_disposal: disposal,
            }
        })
    }

    pub(crate) fn is_active(&self) -> bool {
        self.active.borrow().is_some()
    }

    pub(crate) fn detail_type(&self) -> Option<TypeToken> {
        self.detail_type
    }

    /// The detail currently followed, after a getter's realm check.
    pub(crate) fn current(&self) -> Option<D::Handle> {
        self.core.getter_called();
        self.sync_if_inactive();
        self.binding.borrow().detail.clone()
    }

    /// Run a mutation against the current detail.
    pub(crate) fn mutate<R>(
        &self,
        operation: &'static str,
        f: impl FnOnce(&D::Handle) -> Result<R>,
    ) -> Result<R> {
        self.core.check_mutation()?;
        self.sync_if_inactive();
        let detail = self.binding.borrow().detail.clone();
        match detail {
            Some(detail) => f(&detail),
            None => Err(ObservableError::unsupported(operation)),
        }
    }

    fn sync_if_inactive(&self) {
        if self.is_active() || self.core.is_disposed() {
            return;
        }
        let now = self.master.value();
        if now != self.binding.borrow().master_value {
            self.rebind(now);
        }
    }

    /// Replace the detail, returning the old and new materialised states.
    fn rebind(&self, master_value: M) -> (D::Snapshot, D::Snapshot) {
        let old_detail = self.binding.borrow_mut().detail.take();
        let old = D::snapshot(old_detail.as_ref());
        let subscriptions =
            self.active.borrow_mut().as_mut().and_then(|active| active.detail.take());
        drop(subscriptions);
        if let Some(old_detail) = old_detail {
            D::dispose(&old_detail);
        }

        let binding =
            create::<M, D>(&self.factory, self.detail_type, self.core.realm(), master_value);
        let new = D::snapshot(binding.detail.as_ref());
        debug!(message = "detail.rebind", present = binding.detail.is_some());
        *self.binding.borrow_mut() = binding;
        if self.is_active() {
            self.attach_detail();
        }
        (old, new)
    }

    fn attach_detail(&self) {
        let Some(detail) = self.binding.borrow().detail.clone() else {
            return;
        };
        let this = self.this.clone();
        let changes = D::subscribe(
            &detail,
            Box::new(move |diff| {
                if let Some(inner) = this.upgrade() {
                    inner.detail_changed(diff);
                }
            }),
        );
        let this = self.this.clone();
        let stale = D::subscribe_stale(
            &detail,
            Box::new(move || {
                if let Some(inner) = this.upgrade() {
                    inner.record_stale(DETAIL, true);
                }
            }),
        );
        let stale_now = D::is_stale(&detail);
        let transition = match self.active.borrow_mut().as_mut() {
            Some(active) => {
                active.detail = Some([changes, stale]);
                active.staleness.update(DETAIL, stale_now)
            }
            None => StaleTransition::Unchanged,
        };
        if transition == StaleTransition::BecameStale {
            self.core.fire_stale();
        }
    }

    fn record_stale(&self, child: usize, stale: bool) {
        let transition = match self.active.borrow_mut().as_mut() {
            Some(active) => active.staleness.update(child, stale),
            None => return,
        };
        if transition == StaleTransition::BecameStale {
            self.core.fire_stale();
        }
    }

    fn detail_changed(&self, diff: &D::Diff) {
        self.core.fire_change(diff);
        let detail = self.binding.borrow().detail.clone();
        if let Some(detail) = detail {
            self.record_stale(DETAIL, D::is_stale(&detail));
        }
    }

    fn master_changed(&self) {
        if self.core.is_disposed() {
            return;
        }
        let (old, new) = self.rebind(self.master.value());
        if let Some(diff) = D::replaced(old, new) {
            self.core.fire_change(&diff);
        }
        self.record_stale(MASTER, self.master.is_stale());
        if self.binding.borrow().detail.is_none() {
            self.record_stale(DETAIL, false);
        }
    }

    pub(crate) fn is_stale(&self) -> bool {
        self.core.getter_called();
        if let Some(active) = self.active.borrow().as_ref() {
            return active.staleness.is_stale();
        }
        self.sync_if_inactive();
        let detail_stale = self.binding.borrow().detail.as_ref().is_some_and(D::is_stale);
        self.master.is_stale() || detail_stale
    }

    pub(crate) fn dispose(&self) {
        if !self.core.dispose() {
            return;
        }
        let active = self.active.borrow_mut().take();
        drop(active);
        let detail = self.binding.borrow_mut().detail.take();
        if let Some(detail) = detail {
            D::dispose(&detail);
        }
    }
}

impl<M: Clone + PartialEq + 'static, D: DetailKind> Lifecycle for DetailInner<M, D> {
    fn first_listener_added(&self) {
        self.sync_if_inactive();
        let this = self.this.clone();
        let changes = self.master.subscribe_value(Box::new(move |_| {
            if let Some(inner) = this.upgrade() {
                inner.master_changed();
            }
        }));
        let this = self.this.clone();
        let stale = self.master.subscribe_stale(Box::new(move || {
            if let Some(inner) = this.upgrade() {
                inner.record_stale(MASTER, true);
            }
        }));
        let staleness = StalenessTracker::new([self.master.is_stale(), false]);
        *self.active.borrow_mut() = Some(ActiveDetail {
            staleness,
            _master: [changes, stale],
            detail: None,
        });
        self.attach_detail();
    }

    fn last_listener_removed(&self) {
        let active = self.active.borrow_mut().take();
        drop(active);
    }
}
