#![forbid(unsafe_code)]

//! Observable map with a reverse (value → keys) index.
//!
//! [`BidiMap`] decorates another observable map. While listened to it keeps
//! a value→keys index up to date from the wrapped map's diffs and forwards
//! each diff after the index reflects it, so listeners can query
//! [`BidiMap::keys_for`] from inside their callback. While inactive the index
//! does not exist and reverse lookups scan the wrapped map.

use std::cell::RefCell;
use std::hash::Hash;
use std::rc::{Rc, Weak};

use ahash::{AHashMap, AHashSet};
use dflow_core::error::Result;
use dflow_core::logging::{debug, trace};
use dflow_core::realm::Realm;
use dflow_core::token::TypeToken;
use dflow_diff::MapDiff;

use crate::listeners::{Lifecycle, ObservableCore, Subscription, impl_observable};
use crate::traits::{MapHandle, ObservableMap};

/// Keys sharing one value; most values are held by exactly one key.
#[derive(Debug, Clone)]
enum KeySlot<K> {
    One(K),
    Many(AHashSet<K>),
}

pub struct BidiMap<K: Eq + Hash + 'static, V: 'static> {
    inner: Rc<BidiInner<K, V>>,
}

struct BidiInner<K: Eq + Hash + 'static, V: 'static> {
    core: ObservableCore<MapDiff<K, V>>,
    this: Weak<BidiInner<K, V>>,
    wrapped: MapHandle<K, V>,
    active: RefCell<Option<ActiveIndex<K, V>>>,
}

struct ActiveIndex<K, V> {
    values_to_keys: AHashMap<V, KeySlot<K>>,
    _subscriptions: [Subscription; 2],
}

impl<K: Eq + Hash, V> Clone for BidiMap<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<K, V> BidiMap<K, V>
where
    K: Eq + Hash + Clone + 'static,
    V: Eq + Hash + Clone + 'static,
{
    /// # Panics
    ///
    /// Panics when `wrapped` belongs to a different realm.
    pub fn new(realm: &Realm, wrapped: MapHandle<K, V>) -> Self {
        if let Err(err) = realm.ensure_same(wrapped.realm()) {
            panic!("bidi map: {err}");
        }
        let inner = Rc::new_cyclic(|this: &Weak<BidiInner<K, V>>| BidiInner {
            core: ObservableCore::new(realm, this.clone()),
            this: this.clone(),
            wrapped,
            active: RefCell::new(None),
        });
        Self { inner }
    }

    pub fn handle(&self) -> MapHandle<K, V> {
        Rc::new(self.clone())
    }

    pub fn is_active(&self) -> bool {
        self.inner.active.borrow().is_some()
    }

    /// Every key currently mapped to `value`.
    pub fn keys_for(&self, value: &V) -> AHashSet<K> {
        self.inner.core.getter_called();
        if let Some(active) = self.inner.active.borrow().as_ref() {
            return match active.values_to_keys.get(value) {
                Some(KeySlot::One(key)) => AHashSet::from_iter([key.clone()]),
                Some(KeySlot::Many(keys)) => keys.clone(),
                None => AHashSet::new(),
            };
        }
        self.inner
            .wrapped
            .to_map()
            .into_iter()
            .filter(|(_, v)| v == value)
            .map(|(k, _)| k)
            .collect()
    }

    pub fn contains_value(&self, value: &V) -> bool {
        self.inner.core.getter_called();
        if let Some(active) = self.inner.active.borrow().as_ref() {
            return active.values_to_keys.contains_key(value);
        }
        self.inner.wrapped.to_map().values().any(|v| v == value)
    }
}

fn index_add<K: Eq + Hash, V: Eq + Hash>(index: &mut AHashMap<V, KeySlot<K>>, value: V, key: K) {
    match index.remove(&value) {
        None => {
            index.insert(value, KeySlot::One(key));
        }
        Some(KeySlot::One(existing)) => {
            let keys = if existing == key {
                KeySlot::One(existing)
            } else {
                KeySlot::Many(AHashSet::from_iter([existing, key]))
            };
            index.insert(value, keys);
        }
        Some(KeySlot::Many(mut keys)) => {
            keys.insert(key);
            index.insert(value, KeySlot::Many(keys));
        }
    }
}

fn index_remove<K: Eq + Hash, V: Eq + Hash>(
    index: &mut AHashMap<V, KeySlot<K>>,
    value: &V,
    key: &K,
) {
    let emptied = match index.get_mut(value) {
        None => false,
        Some(KeySlot::One(existing)) => existing == key,
        Some(KeySlot::Many(keys)) => {
            keys.remove(key);
            keys.is_empty()
        }
    };
    if emptied {
        index.remove(value);
    }
}

impl<K, V> BidiInner<K, V>
where
    K: Eq + Hash + Clone + 'static,
    V: Eq + Hash + Clone + 'static,
{
    fn wrapped_changed(&self, diff: &MapDiff<K, V>) {
        {
            let mut active = self.active.borrow_mut();
            let Some(active) = active.as_mut() else {
                return;
            };
            let index = &mut active.values_to_keys;
            for key in diff.added_keys() {
                if let Some(value) = diff.new_value(key) {
                    index_add(index, value.clone(), key.clone());
                }
            }
            for key in diff.changed_keys() {
                if let Some(old) = diff.old_value(key) {
                    index_remove(index, old, key);
                }
                if let Some(new) = diff.new_value(key) {
                    index_add(index, new.clone(), key.clone());
                }
            }
            for key in diff.removed_keys() {
                if let Some(old) = diff.old_value(key) {
                    index_remove(index, old, key);
                }
            }
            trace!(message = "bidi.reindex", touched = diff.len(), values = index.len());
        }
        self.core.fire_change(diff);
    }

    fn is_stale(&self) -> bool {
        self.core.getter_called();
        self.wrapped.is_stale()
    }

    fn dispose(&self) {
        if self.core.dispose() {
            let active = self.active.borrow_mut().take();
            drop(active);
        }
    }
}

impl<K, V> Lifecycle for BidiInner<K, V>
where
    K: Eq + Hash + Clone + 'static,
    V: Eq + Hash + Clone + 'static,
{
    fn first_listener_added(&self) {
        let mut values_to_keys = AHashMap::new();
        for (key, value) in self.wrapped.to_map() {
            index_add(&mut values_to_keys, value, key);
        }
        let this = self.this.clone();
        let changes = self.wrapped.subscribe_map(Box::new(move |diff| {
            if let Some(bidi) = this.upgrade() {
                bidi.wrapped_changed(diff);
            }
        }));
        let this = self.this.clone();
        let stale = self.wrapped.subscribe_stale(Box::new(move || {
            if let Some(bidi) = this.upgrade() {
                bidi.core.fire_stale();
            }
        }));
        debug!(message = "bidi.activate", values = values_to_keys.len());
        *self.active.borrow_mut() = Some(ActiveIndex {
            values_to_keys,
            _subscriptions: [changes, stale],
        });
    }

    fn last_listener_removed(&self) {
        let active = self.active.borrow_mut().take();
        debug!(message = "bidi.deactivate");
        drop(active);
    }
}

impl_observable!(BidiMap<K, V> where [
    K: Eq + Hash + Clone + 'static,
    V: Eq + Hash + Clone + 'static
]);

impl<K, V> ObservableMap<K, V> for BidiMap<K, V>
where
    K: Eq + Hash + Clone + 'static,
    V: Eq + Hash + Clone + 'static,
{
    fn len(&self) -> usize {
        self.inner.core.getter_called();
        self.inner.wrapped.len()
    }

    fn contains_key(&self, key: &K) -> bool {
        self.inner.core.getter_called();
        self.inner.wrapped.contains_key(key)
    }

    fn get(&self, key: &K) -> Option<V> {
        self.inner.core.getter_called();
        self.inner.wrapped.get(key)
    }

    fn keys(&self) -> AHashSet<K> {
        self.inner.core.getter_called();
        self.inner.wrapped.keys()
    }

    fn to_map(&self) -> AHashMap<K, V> {
        self.inner.core.getter_called();
        self.inner.wrapped.to_map()
    }

    fn key_type(&self) -> Option<TypeToken> {
        self.inner.wrapped.key_type()
    }

    fn value_type(&self) -> Option<TypeToken> {
        self.inner.wrapped.value_type()
    }

    fn subscribe_map(&self, listener: Box<dyn Fn(&MapDiff<K, V>)>) -> Subscription {
        self.inner.core.subscribe(listener)
    }

    fn put(&self, key: K, value: V) -> Result<Option<V>> {
        self.inner.core.check_mutation()?;
        self.inner.wrapped.put(key, value)
    }

    fn remove(&self, key: &K) -> Result<Option<V>> {
        self.inner.core.check_mutation()?;
        self.inner.wrapped.remove(key)
    }

    fn clear(&self) -> Result<()> {
        self.inner.core.check_mutation()?;
        self.inner.wrapped.clear()
    }
}
