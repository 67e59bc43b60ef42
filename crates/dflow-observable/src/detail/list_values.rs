#![forbid(unsafe_code)]

//! One detail value per master list element.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use ahash::AHashMap;
use dflow_core::error::{ObservableError, Result};
use dflow_core::identity::{ByIdentity, HasIdentity, IdentityMap};
use dflow_core::logging::debug;
use dflow_core::token::TypeToken;
use dflow_diff::{ListDiff, ListDiffEntry, ValueDiff};

use crate::listeners::{Lifecycle, ObservableCore, Subscription, impl_observable};
use crate::traits::{ListHandle, ObservableList, ValueHandle};

/// A list of detail values, one per element of a master list.
///
/// Masters are matched by identity: positions holding the same master share
/// one detail observable, reference counted and disposed with its last
/// position. The factory must return a fresh observable for every call, as
/// each detail is owned and eventually disposed by this list.
///
/// While nobody listens no detail is kept alive; getters create a detail,
/// read it and dispose it again.
pub struct ListDetailValues<U: 'static, V: 'static> {
    inner: Rc<ListValuesInner<U, V>>,
}

struct ListValuesInner<U: 'static, V: 'static> {
    core: ObservableCore<ListDiff<V>>,
    this: Weak<ListValuesInner<U, V>>,
    master: ListHandle<U>,
    factory: Box<dyn Fn(&U) -> ValueHandle<V>>,
    detail_type: Option<TypeToken>,
    active: RefCell<Option<ActiveDetails<U, V>>>,
    _master_disposal: Subscription,
}

struct SharedDetail<V: 'static> {
    detail: ValueHandle<V>,
    refs: usize,
    stale: bool,
    _subscriptions: [Subscription; 2],
}

struct ActiveDetails<U: 'static, V: 'static> {
    positions: Vec<ByIdentity<U>>,
    details: IdentityMap<U, SharedDetail<V>>,
    master_stale: bool,
    stale_details: usize,
    _master: [Subscription; 2],
}

impl<U, V> ActiveDetails<U, V> {
    fn is_stale(&self) -> bool {
        self.master_stale || self.stale_details > 0
    }
}

impl<U, V> Clone for ListDetailValues<U, V> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<U, V> ListDetailValues<U, V>
where
    U: HasIdentity + Clone + 'static,
    V: Clone + 'static,
{
    pub fn new(master: ListHandle<U>, factory: impl Fn(&U) -> ValueHandle<V> + 'static) -> Self {
        Self::build(master, Box::new(factory), None)
    }

    /// # Panics
    ///
    /// Panics when a created detail does not declare `detail_type`.
    pub fn with_detail_type(
        master: ListHandle<U>,
        factory: impl Fn(&U) -> ValueHandle<V> + 'static,
        detail_type: TypeToken,
    ) -> Self {
        Self::build(master, Box::new(factory), Some(detail_type))
    }

    fn build(
        master: ListHandle<U>,
        factory: Box<dyn Fn(&U) -> ValueHandle<V>>,
        detail_type: Option<TypeToken>,
    ) -> Self {
        let realm = master.realm().clone();
        let inner = Rc::new_cyclic(|this: &Weak<ListValuesInner<U, V>>| {
            let owner = this.clone();
            let disposal = master.subscribe_dispose(Box::new(move || {
                if let Some(list) = owner.upgrade() {
                    list.dispose();
                }
            }));
            ListValuesInner {
                core: ObservableCore::new(&realm, this.clone()),
                this: this.clone(),
                master,
                factory,
                detail_type,
                active: RefCell::new(None),
                _master_disposal: disposal,
            }
        });
        Self { inner }
    }

    pub fn handle(&self) -> ListHandle<V> {
        Rc::new(self.clone())
    }

    pub fn is_active(&self) -> bool {
        self.inner.active.borrow().is_some()
    }

    /// Number of live detail observables.
    pub fn detail_count(&self) -> usize {
        self.inner.active.borrow().as_ref().map_or(0, |active| active.details.len())
    }
}

impl<U, V> ListValuesInner<U, V>
where
    U: HasIdentity + Clone + 'static,
    V: Clone + 'static,
{
    fn create(&self, master: &U) -> ValueHandle<V> {
        let detail = (self.factory)(master);
        if let Some(declared) = self.detail_type
            && let Err(err) = declared.ensure_matches(detail.value_type())
        {
            panic!("list detail values: {err}");
        }
        detail
    }

    /// Read one master's detail value without keeping the detail.
    fn read_detached(&self, master: &U) -> V {
        let detail = self.create(master);
        let value = detail.value();
        detail.dispose();
        value
    }

    fn attach(&self, key: &ByIdentity<U>) -> SharedDetail<V> {
        let detail = self.create(key);
        let this = self.this.clone();
        let owner = key.clone();
        let changes = detail.subscribe_value(Box::new(move |diff| {
            if let Some(list) = this.upgrade() {
                list.detail_changed(&owner, diff);
            }
        }));
        let this = self.this.clone();
        let owner = key.clone();
        let stale = detail.subscribe_stale(Box::new(move || {
            if let Some(list) = this.upgrade() {
                list.detail_stale(&owner, true);
            }
        }));
        SharedDetail {
            stale: detail.is_stale(),
            detail,
            refs: 0,
            _subscriptions: [changes, stale],
        }
    }

    /// Reference the detail for `key`, creating it on first use; returns its
    /// current value.
    fn retain(&self, active: &mut ActiveDetails<U, V>, key: &ByIdentity<U>) -> V {
        if !active.details.contains_key(key) {
            let shared = self.attach(key);
            if shared.stale {
                active.stale_details += 1;
            }
            active.details.insert(key.clone(), shared);
        }
        let shared = active
            .details
            .get_mut(key)
            .unwrap_or_else(|| unreachable!("detail inserted above"));
        shared.refs += 1;
        shared.detail.value()
    }

    /// Drop one reference; returns the detail's value and, when this was the
    /// last reference, the detail itself for disposal.
    fn release(
        &self,
        active: &mut ActiveDetails<U, V>,
        key: &ByIdentity<U>,
    ) -> Option<(V, Option<SharedDetail<V>>)> {
        let shared = active.details.get_mut(key)?;
        let value = shared.detail.value();
        shared.refs -= 1;
        if shared.refs > 0 {
            return Some((value, None));
        }
        let retired = active.details.remove(key)?;
        if retired.stale {
            active.stale_details -= 1;
        }
        Some((value, Some(retired)))
    }

    fn master_changed(&self, diff: &ListDiff<U>) {
        let master_stale = self.master.is_stale();
        let mut retired = Vec::new();
        let (entries, became_stale) = {
            let mut active = self.active.borrow_mut();
            let Some(active) = active.as_mut() else {
                return;
            };
            let was_stale = active.is_stale();
            let mut entries = Vec::with_capacity(diff.len());
            for entry in diff {
                if entry.is_addition {
                    let key = ByIdentity(entry.element.clone());
                    let value = self.retain(active, &key);
                    let position = entry.position.min(active.positions.len());
                    active.positions.insert(position, key);
                    entries.push(ListDiffEntry::addition(entry.position, value));
                } else if entry.position < active.positions.len() {
                    let key = active.positions.remove(entry.position);
                    if let Some((value, gone)) = self.release(active, &key) {
                        retired.extend(gone);
                        entries.push(ListDiffEntry::removal(entry.position, value));
                    }
                }
            }
            active.master_stale = master_stale;
            (entries, !was_stale && active.is_stale())
        };
        for shared in retired {
            shared.detail.dispose();
        }
        if became_stale {
            self.core.fire_stale();
        }
        if !entries.is_empty() {
            self.core.fire_change(&ListDiff::new(entries));
        }
    }

    fn detail_changed(&self, key: &ByIdentity<U>, diff: &ValueDiff<V>) {
        let entries = {
            let active = self.active.borrow();
            let Some(active) = active.as_ref() else {
                return;
            };
            let mut entries = Vec::new();
            for (position, held) in active.positions.iter().enumerate() {
                if held == key {
                    entries.push(ListDiffEntry::removal(position, diff.old.clone()));
                    entries.push(ListDiffEntry::addition(position, diff.new.clone()));
                }
            }
            entries
        };
        if !entries.is_empty() {
            self.core.fire_change(&ListDiff::new(entries));
        }
        let stale = self
            .active
            .borrow()
            .as_ref()
            .and_then(|active| active.details.get(key))
            .map(|shared| Rc::clone(&shared.detail));
        if let Some(detail) = stale {
            self.detail_stale(key, detail.is_stale());
        }
    }

    fn detail_stale(&self, key: &ByIdentity<U>, stale: bool) {
        let became_stale = {
            let mut active = self.active.borrow_mut();
            let Some(active) = active.as_mut() else {
                return;
            };
            let was_stale = active.is_stale();
            let Some(shared) = active.details.get_mut(key) else {
                return;
            };
            if shared.stale != stale {
                shared.stale = stale;
                if stale {
                    active.stale_details += 1;
                } else {
                    active.stale_details -= 1;
                }
            }
            !was_stale && active.is_stale()
        };
        if became_stale {
            self.core.fire_stale();
        }
    }

    fn master_stale(&self) {
        let became_stale = match self.active.borrow_mut().as_mut() {
            Some(active) => {
                let was_stale = active.is_stale();
                active.master_stale = true;
                !was_stale
            }
            None => return,
        };
        if became_stale {
            self.core.fire_stale();
        }
    }

    /// The detail at `index`: the live one while active, otherwise a fresh
    /// one the caller must dispose.
    fn detail_at(&self, index: usize) -> Option<(ValueHandle<V>, bool)> {
        if let Some(active) = self.active.borrow().as_ref() {
            let key = active.positions.get(index)?;
            return active.details.get(key).map(|shared| (Rc::clone(&shared.detail), false));
        }
        let master = self.master.get(index)?;
        Some((self.create(&master), true))
    }

    fn deactivate(&self) {
        let Some(active) = self.active.borrow_mut().take() else {
            return;
        };
        let count = active.details.len();
        for (_, shared) in active.details {
            shared.detail.dispose();
        }
        debug!(message = "list_detail_values.deactivate", details = count);
    }

    fn is_stale(&self) -> bool {
        self.core.getter_called();
        if let Some(active) = self.active.borrow().as_ref() {
            return active.is_stale();
        }
        self.master.is_stale()
    }

    fn dispose(&self) {
        if self.core.dispose() {
            self.deactivate();
        }
    }
}

impl<U, V> Lifecycle for ListValuesInner<U, V>
where
    U: HasIdentity + Clone + 'static,
    V: Clone + 'static,
{
    fn first_listener_added(&self) {
        let this = self.this.clone();
        let changes = self.master.subscribe_list(Box::new(move |diff| {
            if let Some(list) = this.upgrade() {
                list.master_changed(diff);
            }
        }));
        let this = self.this.clone();
        let stale = self.master.subscribe_stale(Box::new(move || {
            if let Some(list) = this.upgrade() {
                list.master_stale();
            }
        }));
        let mut active = ActiveDetails {
            positions: Vec::new(),
            details: AHashMap::new(),
            master_stale: self.master.is_stale(),
            stale_details: 0,
            _master: [changes, stale],
        };
        for master in self.master.to_vec() {
            let key = ByIdentity(master);
            self.retain(&mut active, &key);
            active.positions.push(key);
        }
        debug!(
            message = "list_detail_values.activate",
            positions = active.positions.len(),
            details = active.details.len()
        );
        *self.active.borrow_mut() = Some(active);
    }

    fn last_listener_removed(&self) {
        self.deactivate();
    }
}

impl_observable!(ListDetailValues<U, V> where [
    U: HasIdentity + Clone + 'static,
    V: Clone + 'static
]);

impl<U, V> ObservableList<V> for ListDetailValues<U, V>
where
    U: HasIdentity + Clone + 'static,
    V: Clone + 'static,
{
    fn len(&self) -> usize {
        self.inner.core.getter_called();
        if let Some(active) = self.inner.active.borrow().as_ref() {
            return active.positions.len();
        }
        self.inner.master.len()
    }

    fn get(&self, index: usize) -> Option<V> {
        self.inner.core.getter_called();
        let (detail, detached) = self.inner.detail_at(index)?;
        let value = detail.value();
        if detached {
            detail.dispose();
        }
        Some(value)
    }

    fn to_vec(&self) -> Vec<V> {
        self.inner.core.getter_called();
        if let Some(active) = self.inner.active.borrow().as_ref() {
            return active
                .positions
                .iter()
                .filter_map(|key| active.details.get(key).map(|shared| shared.detail.value()))
                .collect();
        }
        let mut seen: IdentityMap<U, V> = AHashMap::new();
        self.inner
            .master
            .to_vec()
            .into_iter()
            .map(|master| {
                let key = ByIdentity(master);
                if let Some(value) = seen.get(&key) {
                    return value.clone();
                }
                let value = self.inner.read_detached(&key);
                seen.insert(key, value.clone());
                value
            })
            .collect()
    }

    fn element_type(&self) -> Option<TypeToken> {
        self.inner.detail_type
    }

    fn subscribe_list(&self, listener: Box<dyn Fn(&ListDiff<V>)>) -> Subscription {
        self.inner.core.subscribe(listener)
    }

    /// Writes `element` to the detail at `index`, returning its old value.
    fn set(&self, index: usize, element: V) -> Result<V> {
        self.inner.core.check_mutation()?;
        let Some((detail, detached)) = self.inner.detail_at(index) else {
            return Err(ObservableError::out_of_bounds(index, self.len()));
        };
        let old = detail.value();
        let written = detail.set_value(element);
        if detached {
            detail.dispose();
        }
        written.map(|()| old)
    }
}
