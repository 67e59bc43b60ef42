#![forbid(unsafe_code)]

//! Observable map whose keys are an observable set and whose values are
//! looked up per key.
//!
//! The per-key lookup and change hooking is supplied through
//! [`KeyedValues`]. The map hooks nothing until its first listener arrives;
//! then it hooks every current key and follows the key set, hooking added
//! keys and unhooking removed ones. While inactive every query goes straight
//! to [`KeyedValues::do_get`].

use std::cell::RefCell;
use std::hash::Hash;
use std::rc::{Rc, Weak};

use ahash::{AHashMap, AHashSet};
use dflow_core::error::Result;
use dflow_core::logging::{debug, trace};
use dflow_core::realm::Realm;
use dflow_core::token::TypeToken;
use dflow_diff::{MapDiff, SetDiff};

use crate::listeners::{Lifecycle, ObservableCore, Subscription, impl_observable};
use crate::traits::{MapHandle, ObservableMap, SetHandle};

// ─── KeyedValues ─────────────────────────────────────────────────────────────

/// Per-key value source behind a [`ComputedMap`].
///
/// `hook` is called for every key while the map is active and `unhook` when
/// the key leaves or the map deactivates; implementations report value
/// changes for hooked keys through the [`MapSink`].
pub trait KeyedValues<K: Eq + Hash, V> {
    fn do_get(&self, key: &K) -> V;

    fn hook(&self, key: &K, sink: &MapSink<K, V>) {
        let _ = (key, sink);
    }

    fn unhook(&self, key: &K) {
        let _ = key;
    }

    /// Write `value` for a key the map contains, returning the previous one.
    fn do_put(&self, key: &K, value: V) -> Result<Option<V>> {
        let _ = (key, value);
        Err(dflow_core::ObservableError::unsupported("put"))
    }

    fn is_stale(&self) -> bool {
        false
    }
}

/// Handle through which a [`KeyedValues`] reports changes.
pub struct MapSink<K: Eq + Hash + 'static, V: 'static> {
    map: Weak<ComputedInner<K, V>>,
}

impl<K: Eq + Hash, V> Clone for MapSink<K, V> {
    fn clone(&self) -> Self {
        Self {
            map: Weak::clone(&self.map),
        }
    }
}

impl<K: Eq + Hash + Clone + 'static, V: Clone + 'static> MapSink<K, V> {
    /// Fire a single-key change. Ignored for keys the map is not tracking.
    pub fn fire_single_change(&self, key: K, old: V, new: V) {
        let Some(map) = self.map.upgrade() else {
            return;
        };
        let known = map
            .active
            .borrow()
            .as_ref()
            .is_some_and(|active| active.known.contains(&key));
        if known {
            map.core.fire_change(&MapDiff::single_change(key, old, new));
        }
    }

    pub fn fire_stale(&self) {
        if let Some(map) = self.map.upgrade() {
            map.core.fire_stale();
        }
    }
}

struct FnValues<F>(F);

impl<K: Eq + Hash, V, F: Fn(&K) -> V> KeyedValues<K, V> for FnValues<F> {
    fn do_get(&self, key: &K) -> V {
        (self.0)(key)
    }
}

// ─── ComputedMap ─────────────────────────────────────────────────────────────

pub struct ComputedMap<K: Eq + Hash + 'static, V: 'static> {
    inner: Rc<ComputedInner<K, V>>,
}

struct ComputedInner<K: Eq + Hash + 'static, V: 'static> {
    core: ObservableCore<MapDiff<K, V>>,
    this: Weak<ComputedInner<K, V>>,
    key_set: SetHandle<K>,
    values: Box<dyn KeyedValues<K, V>>,
    value_type: Option<TypeToken>,
    active: RefCell<Option<ActiveKeys<K>>>,
    _key_set_disposal: Subscription,
}

struct ActiveKeys<K> {
    known: AHashSet<K>,
    _subscriptions: [Subscription; 2],
}

impl<K: Eq + Hash, V> Clone for ComputedMap<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<K, V> ComputedMap<K, V>
where
    K: Eq + Hash + Clone + 'static,
    V: Clone + 'static,
{
    /// # Panics
    ///
    /// Panics when `key_set` belongs to a different realm.
    pub fn new(
        realm: &Realm,
        key_set: SetHandle<K>,
        values: impl KeyedValues<K, V> + 'static,
    ) -> Self {
        Self::build(realm, key_set, Box::new(values), None)
    }

    pub fn with_value_type(
        realm: &Realm,
        key_set: SetHandle<K>,
        values: impl KeyedValues<K, V> + 'static,
        value_type: TypeToken,
    ) -> Self {
        Self::build(realm, key_set, Box::new(values), Some(value_type))
    }

    /// A map whose values are a pure function of the key.
    pub fn from_fn(realm: &Realm, key_set: SetHandle<K>, f: impl Fn(&K) -> V + 'static) -> Self {
        Self::new(realm, key_set, FnValues(f))
    }

    fn build(
        realm: &Realm,
        key_set: SetHandle<K>,
        values: Box<dyn KeyedValues<K, V>>,
        value_type: Option<TypeToken>,
    ) -> Self {
        if let Err(err) = realm.ensure_same(key_set.realm()) {
            panic!("computed map key set: {err}");
        }
        let inner = Rc::new_cyclic(|this: &Weak<ComputedInner<K, V>>| {
            let owner = this.clone();
            let disposal = key_set.subscribe_dispose(Box::new(move || {
                if let Some(map) = owner.upgrade() {
                    map.dispose();
                }
            }));
            ComputedInner {
                core: ObservableCore::new(realm, this.clone()),
                this: this.clone(),
                key_set,
                values,
                value_type,
                active: RefCell::new(None),
                _key_set_disposal: disposal,
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
}

impl<K, V> ComputedInner<K, V>
where
    K: Eq + Hash + Clone + 'static,
    V: Clone + 'static,
{
    fn sink(&self) -> MapSink<K, V> {
        MapSink {
            map: self.this.clone(),
        }
    }

    fn keys_changed(&self, diff: &SetDiff<K>) {
        if self.active.borrow().is_none() {
            return;
        }
        let sink = self.sink();
        let mut out = MapDiff::empty();
        for key in diff.removals() {
            let old = self.values.do_get(key);
            self.values.unhook(key);
            if let Some(active) = self.active.borrow_mut().as_mut() {
                active.known.remove(key);
            }
            out.push_removed(key.clone(), old);
        }
        for key in diff.additions() {
            let new = self.values.do_get(key);
            self.values.hook(key, &sink);
            if let Some(active) = self.active.borrow_mut().as_mut() {
                active.known.insert(key.clone());
            }
            out.push_added(key.clone(), new);
        }
        trace!(message = "computed_map.keys_changed", changed = out.len());
        if !out.is_empty() {
            self.core.fire_change(&out);
        }
    }

    fn unhook_all(&self) {
        let Some(active) = self.active.borrow_mut().take() else {
            return;
        };
        let ActiveKeys { known, _subscriptions } = active;
        drop(_subscriptions);
        for key in &known {
            self.values.unhook(key);
        }
        debug!(message = "computed_map.deactivate", unhooked = known.len());
    }

    fn is_stale(&self) -> bool {
        self.core.getter_called();
        self.key_set.is_stale() || self.values.is_stale()
    }

    fn dispose(&self) {
        if self.core.dispose() {
            self.unhook_all();
        }
    }
}

impl<K, V> Lifecycle for ComputedInner<K, V>
where
    K: Eq + Hash + Clone + 'static,
    V: Clone + 'static,
{
    fn first_listener_added(&self) {
        let this = self.this.clone();
        let changes = self.key_set.subscribe_set(Box::new(move |diff| {
            if let Some(map) = this.upgrade() {
                map.keys_changed(diff);
            }
        }));
        let this = self.this.clone();
        let stale = self.key_set.subscribe_stale(Box::new(move || {
            if let Some(map) = this.upgrade() {
                map.core.fire_stale();
            }
        }));
        let known = self.key_set.to_set();
        *self.active.borrow_mut() = Some(ActiveKeys {
            known: known.clone(),
            _subscriptions: [changes, stale],
        });
        let sink = self.sink();
        for key in &known {
            self.values.hook(key, &sink);
        }
        debug!(message = "computed_map.activate", hooked = known.len());
    }

    fn last_listener_removed(&self) {
        self.unhook_all();
    }
}

impl_observable!(ComputedMap<K, V> where [K: Eq + Hash + Clone + 'static, V: Clone + 'static]);

impl<K, V> ObservableMap<K, V> for ComputedMap<K, V>
where
    K: Eq + Hash + Clone + 'static,
    V: Clone + 'static,
{
    fn len(&self) -> usize {
        self.inner.core.getter_called();
        self.inner.key_set.len()
    }

    fn contains_key(&self, key: &K) -> bool {
        self.inner.core.getter_called();
        self.inner.key_set.contains(key)
    }

    fn get(&self, key: &K) -> Option<V> {
        self.inner.core.getter_called();
        if !self.inner.key_set.contains(key) {
            return None;
        }
        Some(self.inner.values.do_get(key))
    }

    fn keys(&self) -> AHashSet<K> {
        self.inner.core.getter_called();
        self.inner.key_set.to_set()
    }

    fn to_map(&self) -> AHashMap<K, V> {
        self.inner.core.getter_called();
        self.inner
            .key_set
            .to_set()
            .into_iter()
            .map(|key| {
                let value = self.inner.values.do_get(&key);
                (key, value)
            })
            .collect()
    }

    fn key_type(&self) -> Option<TypeToken> {
        self.inner.key_set.element_type()
    }

    fn value_type(&self) -> Option<TypeToken> {
        self.inner.value_type
    }

    fn subscribe_map(&self, listener: Box<dyn Fn(&MapDiff<K, V>)>) -> Subscription {
        self.inner.core.subscribe(listener)
    }

    /// Writes through for keys in the key set; other keys are left alone.
    fn put(&self, key: K, value: V) -> Result<Option<V>> {
        self.inner.core.check_mutation()?;
        if !self.inner.key_set.contains(&key) {
            return Ok(None);
        }
        self.inner.values.do_put(&key, value)
    }

    /// Removes the key from the key set.
    fn remove(&self, key: &K) -> Result<Option<V>> {
        self.inner.core.check_mutation()?;
        let old = self.get(key);
        self.inner.key_set.remove(key)?;
        Ok(old)
    }

    fn clear(&self) -> Result<()> {
        self.inner.core.check_mutation()?;
        self.inner.key_set.clear()
    }
}
