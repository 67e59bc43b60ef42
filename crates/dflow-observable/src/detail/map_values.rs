#![forbid(unsafe_code)]

//! One detail value per master map key.

use std::cell::RefCell;
use std::hash::Hash;
use std::rc::{Rc, Weak};

use ahash::{AHashMap, AHashSet};
use dflow_core::error::Result;
use dflow_core::logging::debug;
use dflow_core::token::TypeToken;
use dflow_diff::{MapDiff, ValueDiff};

use crate::listeners::{Lifecycle, ObservableCore, Subscription, impl_observable};
use crate::traits::{MapHandle, ObservableMap, ValueHandle};

/// Maps every key of a master map to the value of a detail observable built
/// from the key's master value.
///
/// Keys and their order of appearance come from the master; each key owns
/// its own detail, disposed when the key leaves or its master value changes.
/// While nobody listens no detail is kept alive.
pub struct MapDetailValues<K: Eq + Hash + 'static, I: 'static, V: 'static> {
    inner: Rc<MapValuesInner<K, I, V>>,
}

struct MapValuesInner<K: Eq + Hash + 'static, I: 'static, V: 'static> {
    core: ObservableCore<MapDiff<K, V>>,
    this: Weak<MapValuesInner<K, I, V>>,
    master: MapHandle<K, I>,
    factory: Box<dyn Fn(&I) -> ValueHandle<V>>,
    detail_type: Option<TypeToken>,
    active: RefCell<Option<ActiveDetails<K, V>>>,
    _master_disposal: Subscription,
}

struct KeyedDetail<V: 'static> {
    detail: ValueHandle<V>,
    stale: bool,
    _subscriptions: [Subscription; 2],
}

struct ActiveDetails<K, V: 'static> {
    details: AHashMap<K, KeyedDetail<V>>,
    master_stale: bool,
    stale_details: usize,
    _master: [Subscription; 2],
}

impl<K, V> ActiveDetails<K, V> {
    fn is_stale(&self) -> bool {
        self.master_stale || self.stale_details > 0
    }
}

impl<K: Eq + Hash + Clone + 'static, V> ActiveDetails<K, V> {
    fn insert(&mut self, key: K, keyed: KeyedDetail<V>) {
        if keyed.stale {
            self.stale_details += 1;
        }
        if let Some(previous) = self.details.insert(key, keyed)
            && previous.stale
        {
            self.stale_details -= 1;
        }
    }

    fn take(&mut self, key: &K) -> Option<KeyedDetail<V>> {
        let keyed = self.details.remove(key)?;
        if keyed.stale {
            self.stale_details -= 1;
        }
        Some(keyed)
    }
}

impl<K: Eq + Hash, I, V> Clone for MapDetailValues<K, I, V> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<K, I, V> MapDetailValues<K, I, V>
where
    K: Eq + Hash + Clone + 'static,
    I: Clone + 'static,
    V: Clone + 'static,
{
    pub fn new(master: MapHandle<K, I>, factory: impl Fn(&I) -> ValueHandle<V> + 'static) -> Self {
        Self::build(master, Box::new(factory), None)
    }

    /// # Panics
    ///
    /// Panics when a created detail does not declare `detail_type`.
    pub fn with_detail_type(
        master: MapHandle<K, I>,
        factory: impl Fn(&I) -> ValueHandle<V> + 'static,
        detail_type: TypeToken,
    ) -> Self {
        Self::build(master, Box::new(factory), Some(detail_type))
    }

    fn build(
        master: MapHandle<K, I>,
        factory: Box<dyn Fn(&I) -> ValueHandle<V>>,
        detail_type: Option<TypeToken>,
    ) -> Self {
        let realm = master.realm().clone();
        let inner = Rc::new_cyclic(|this: &Weak<MapValuesInner<K, I, V>>| {
            let owner = this.clone();
            let disposal = master.subscribe_dispose(Box::new(move || {
                if let Some(map) = owner.upgrade() {
                    map.dispose();
                }
            }));
            MapValuesInner {
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

    pub fn handle(&self) -> MapHandle<K, V> {
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

impl<K, I, V> MapValuesInner<K, I, V>
where
    K: Eq + Hash + Clone + 'static,
    I: Clone + 'static,
    V: Clone + 'static,
{
    fn create(&self, master_value: &I) -> ValueHandle<V> {
        let detail = (self.factory)(master_value);
        if let Some(declared) = self.detail_type
            && let Err(err) = declared.ensure_matches(detail.value_type())
        {
            panic!("map detail values: {err}");
        }
        detail
    }

    fn attach(&self, key: &K, master_value: &I) -> KeyedDetail<V> {
        let detail = self.create(master_value);
        let this = self.this.clone();
        let owner = key.clone();
        let changes = detail.subscribe_value(Box::new(move |diff| {
            if let Some(map) = this.upgrade() {
                map.detail_changed(&owner, diff);
            }
        }));
        let this = self.this.clone();
        let owner = key.clone();
        let stale = detail.subscribe_stale(Box::new(move || {
            if let Some(map) = this.upgrade() {
                map.detail_stale(&owner, true);
            }
        }));
        KeyedDetail {
            stale: detail.is_stale(),
            detail,
            _subscriptions: [changes, stale],
        }
    }

    /// The detail for `key`: the live one while active, otherwise a fresh
    /// one the caller must dispose.
    fn detail_for(&self, key: &K) -> Option<(ValueHandle<V>, bool)> {
        if let Some(active) = self.active.borrow().as_ref() {
            return active.details.get(key).map(|keyed| (Rc::clone(&keyed.detail), false));
        }
        let master_value = self.master.get(key)?;
        Some((self.create(&master_value), true))
    }

    fn read(&self, key: &K) -> Option<V> {
        let (detail, detached) = self.detail_for(key)?;
        let value = detail.value();
        if detached {
            detail.dispose();
        }
        Some(value)
    }

    fn master_changed(&self, diff: &MapDiff<K, I>) {
        let master_stale = self.master.is_stale();
        let mut retired = Vec::new();
        let (out, became_stale) = {
            let mut active = self.active.borrow_mut();
            let Some(active) = active.as_mut() else {
                return;
            };
            let was_stale = active.is_stale();
            let mut out = MapDiff::empty();
            for key in diff.added_keys() {
                if let Some(master_value) = diff.new_value(key) {
                    let keyed = self.attach(key, master_value);
                    out.push_added(key.clone(), keyed.detail.value());
                    active.insert(key.clone(), keyed);
                }
            }
            for key in diff.removed_keys() {
                if let Some(keyed) = active.take(key) {
                    out.push_removed(key.clone(), keyed.detail.value());
                    retired.push(keyed);
                }
            }
            for key in diff.changed_keys() {
                let (Some(old), Some(master_value)) = (active.take(key), diff.new_value(key)) else {
                    continue;
                };
                let keyed = self.attach(key, master_value);
                out.push_changed(key.clone(), old.detail.value(), keyed.detail.value());
                active.insert(key.clone(), keyed);
                retired.push(old);
            }
            active.master_stale = master_stale;
            (out, !was_stale && active.is_stale())
        };
        for keyed in retired {
            keyed.detail.dispose();
        }
        if became_stale {
            self.core.fire_stale();
        }
        if !out.is_empty() {
            self.core.fire_change(&out);
        }
    }

    fn detail_changed(&self, key: &K, diff: &ValueDiff<V>) {
        let detail = {
            let active = self.active.borrow();
            match active.as_ref().and_then(|active| active.details.get(key)) {
                Some(keyed) => Rc::clone(&keyed.detail),
                None => return,
            }
        };
        self.core
            .fire_change(&MapDiff::single_change(key.clone(), diff.old.clone(), diff.new.clone()));
        self.detail_stale(key, detail.is_stale());
    }

    fn detail_stale(&self, key: &K, stale: bool) {
        let became_stale = {
            let mut active = self.active.borrow_mut();
            let Some(active) = active.as_mut() else {
                return;
            };
            let was_stale = active.is_stale();
            let Some(keyed) = active.details.get_mut(key) else {
                return;
            };
            if keyed.stale != stale {
                keyed.stale = stale;
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

    fn deactivate(&self) {
        let Some(active) = self.active.borrow_mut().take() else {
            return;
        };
        let count = active.details.len();
        for (_, keyed) in active.details {
            keyed.detail.dispose();
        }
        debug!(message = "map_detail_values.deactivate", details = count);
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

impl<K, I, V> Lifecycle for MapValuesInner<K, I, V>
where
    K: Eq + Hash + Clone + 'static,
    I: Clone + 'static,
    V: Clone + 'static,
{
    fn first_listener_added(&self) {
        let this = self.this.clone();
        let changes = self.master.subscribe_map(Box::new(move |diff| {
            if let Some(map) = this.upgrade() {
                map.master_changed(diff);
            }
        }));
        let this = self.this.clone();
        let stale = self.master.subscribe_stale(Box::new(move || {
            if let Some(map) = this.upgrade() {
                map.master_stale();
            }
        }));
        let mut active = ActiveDetails {
            details: AHashMap::new(),
            master_stale: self.master.is_stale(),
            stale_details: 0,
            _master: [changes, stale],
        };
        for (key, master_value) in self.master.to_map() {
            let keyed = self.attach(&key, &master_value);
            active.insert(key, keyed);
        }
        debug!(message = "map_detail_values.activate", details = active.details.len());
        *self.active.borrow_mut() = Some(active);
    }

    fn last_listener_removed(&self) {
        self.deactivate();
    }
}

impl_observable!(MapDetailValues<K, I, V> where [
    K: Eq + Hash + Clone + 'static,
    I: Clone + 'static,
    V: Clone + 'static
]);

impl<K, I, V> ObservableMap<K, V> for MapDetailValues<K, I, V>
where
    K: Eq + Hash + Clone + 'static,
    I: Clone + 'static,
    V: Clone + 'static,
{
    fn len(&self) -> usize {
        self.inner.core.getter_called();
        self.inner.master.len()
    }

    fn contains_key(&self, key: &K) -> bool {
        self.inner.core.getter_called();
        self.inner.master.contains_key(key)
    }

    fn get(&self, key: &K) -> Option<V> {
        self.inner.core.getter_called();
        self.inner.read(key)
    }

    fn keys(&self) -> AHashSet<K> {
        self.inner.core.getter_called();
        self.inner.master.keys()
    }

    fn to_map(&self) -> AHashMap<K, V> {
        self.inner.core.getter_called();
        if let Some(active) = self.inner.active.borrow().as_ref() {
            return active
                .details
                .iter()
                .map(|(key, keyed)| (key.clone(), keyed.detail.value()))
                .collect();
        }
        self.inner
            .master
            .to_map()
            .into_iter()
            .map(|(key, master_value)| {
                let detail = self.inner.create(&master_value);
                let value = detail.value();
                detail.dispose();
                (key, value)
            })
            .collect()
    }

    fn key_type(&self) -> Option<TypeToken> {
        self.inner.master.key_type()
    }

    fn value_type(&self) -> Option<TypeToken> {
        self.inner.detail_type
    }

    fn subscribe_map(&self, listener: Box<dyn Fn(&MapDiff<K, V>)>) -> Subscription {
        self.inner.core.subscribe(listener)
    }

    /// Writes through to the key's detail; absent keys are left alone and
    /// yield `Ok(None)`.
    fn put(&self, key: K, value: V) -> Result<Option<V>> {
        self.inner.core.check_mutation()?;
        let Some((detail, detached)) = self.inner.detail_for(&key) else {
            return Ok(None);
        };
        let old = detail.value();
        let written = detail.set_value(value);
        if detached {
            detail.dispose();
        }
        written.map(|()| Some(old))
    }

    /// Removes the key from the master map.
    fn remove(&self, key: &K) -> Result<Option<V>> {
        self.inner.core.check_mutation()?;
        let Some(old) = self.inner.read(key) else {
            return Ok(None);
        };
        self.inner.master.remove(key)?;
        Ok(Some(old))
    }

    fn clear(&self) -> Result<()> {
        self.inner.core.check_mutation()?;
        self.inner.master.clear()
    }
}
