#![forbid(unsafe_code)]

use std::cell::{Cell, RefCell};
use std::hash::Hash;
use std::rc::Rc;

use ahash::{AHashMap, AHashSet};
use dflow_core::error::Result;
use dflow_core::realm::Realm;
use dflow_core::token::TypeToken;
use dflow_diff::MapDiff;

use crate::listeners::{ObservableCore, Subscription, impl_observable};
use crate::traits::{MapHandle, ObservableMap};

/// A mutable observable map.
pub struct WritableMap<K: Eq + Hash + 'static, V: 'static> {
    inner: Rc<MapInner<K, V>>,
}

struct MapInner<K: Eq + Hash + 'static, V: 'static> {
    core: ObservableCore<MapDiff<K, V>>,
    entries: RefCell<AHashMap<K, V>>,
    stale: Cell<bool>,
    key_type: Option<TypeToken>,
    value_type: Option<TypeToken>,
}

impl<K: Eq + Hash, V> Clone for WritableMap<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<K, V> WritableMap<K, V>
where
    K: Eq + Hash + Clone + 'static,
    V: Clone + PartialEq + 'static,
{
    pub fn new(realm: &Realm) -> Self {
        Self::from_map(realm, AHashMap::new())
    }

    pub fn from_map(realm: &Realm, entries: AHashMap<K, V>) -> Self {
        Self::build(realm, entries, None, None)
    }

    pub fn with_types(realm: &Realm, key_type: TypeToken, value_type: TypeToken) -> Self {
        Self::build(realm, AHashMap::new(), Some(key_type), Some(value_type))
    }

    fn build(
        realm: &Realm,
        entries: AHashMap<K, V>,
        key_type: Option<TypeToken>,
        value_type: Option<TypeToken>,
    ) -> Self {
        Self {
            inner: Rc::new(MapInner {
                core: ObservableCore::passive(realm),
                entries: RefCell::new(entries),
                stale: Cell::new(false),
                key_type,
                value_type,
            }),
        }
    }

    pub fn handle(&self) -> MapHandle<K, V> {
        Rc::new(self.clone())
    }

    fn fire(&self, diff: MapDiff<K, V>) {
        if !diff.is_empty() {
            self.inner.core.fire_change(&diff);
        }
    }

    /// Insert or overwrite; overwriting with an equal value fires nothing.
    pub fn put(&self, key: K, value: V) -> Result<Option<V>> {
        self.inner.core.check_mutation()?;
        let (previous, diff) = {
            let mut entries = self.inner.entries.borrow_mut();
            match entries.insert(key.clone(), value.clone()) {
                None => (None, MapDiff::single_add(key, value)),
                Some(old) if old == value => (Some(old), MapDiff::empty()),
                Some(old) => (Some(old.clone()), MapDiff::single_change(key, old, value)),
            }
        };
        self.fire(diff);
        Ok(previous)
    }

    pub fn remove(&self, key: &K) -> Result<Option<V>> {
        self.inner.core.check_mutation()?;
        let removed = self.inner.entries.borrow_mut().remove(key);
        if let Some(old) = &removed {
            self.fire(MapDiff::single_remove(key.clone(), old.clone()));
        }
        Ok(removed)
    }

    /// Put every entry, firing one diff.
    pub fn extend(&self, entries: impl IntoIterator<Item = (K, V)>) -> Result<()> {
        self.inner.core.check_mutation()?;
        let diff = {
            let mut map = self.inner.entries.borrow_mut();
            let mut before: AHashMap<K, Option<V>> = AHashMap::new();
            for (key, value) in entries {
                let previous = map.insert(key.clone(), value);
                before.entry(key).or_insert(previous);
            }
            let mut diff = MapDiff::empty();
            for (key, previous) in before {
                let Some(now) = map.get(&key).cloned() else {
                    continue;
                };
                match previous {
                    None => diff.push_added(key, now),
                    Some(old) if old != now => diff.push_changed(key, old, now),
                    Some(_) => {}
                }
            }
            diff
        };
        self.fire(diff);
        Ok(())
    }

    pub fn clear(&self) -> Result<()> {
        self.inner.core.check_mutation()?;
        let all = std::mem::take(&mut *self.inner.entries.borrow_mut());
        self.fire(MapDiff::remove_all(all));
        Ok(())
    }

    pub fn set_stale(&self, stale: bool) -> Result<()> {
        self.inner.core.check_mutation()?;
        if !self.inner.stale.replace(stale) && stale {
            self.inner.core.fire_stale();
        }
        Ok(())
    }
}

impl<K: Eq + Hash + 'static, V: 'static> MapInner<K, V> {
    fn is_stale(&self) -> bool {
        self.core.getter_called();
        self.stale.get()
    }

    fn dispose(&self) {
        self.core.dispose();
    }
}

impl_observable!(WritableMap<K, V> where [K: Eq + Hash + 'static, V: 'static]);

impl<K, V> ObservableMap<K, V> for WritableMap<K, V>
where
    K: Eq + Hash + Clone + 'static,
    V: Clone + PartialEq + 'static,
{
    fn len(&self) -> usize {
        self.inner.core.getter_called();
        self.inner.entries.borrow().len()
    }

    fn contains_key(&self, key: &K) -> bool {
        self.inner.core.getter_called();
        self.inner.entries.borrow().contains_key(key)
    }

    fn get(&self, key: &K) -> Option<V> {
        self.inner.core.getter_called();
        self.inner.entries.borrow().get(key).cloned()
    }

    fn keys(&self) -> AHashSet<K> {
        self.inner.core.getter_called();
        self.inner.entries.borrow().keys().cloned().collect()
    }

    fn to_map(&self) -> AHashMap<K, V> {
        self.inner.core.getter_called();
        self.inner.entries.borrow().clone()
    }

    fn key_type(&self) -> Option<TypeToken> {
        self.inner.key_type
    }

    fn value_type(&self) -> Option<TypeToken> {
        self.inner.value_type
    }

    fn subscribe_map(&self, listener: Box<dyn Fn(&MapDiff<K, V>)>) -> Subscription {
        self.inner.core.subscribe(listener)
    }

    fn put(&self, key: K, value: V) -> Result<Option<V>> {
        WritableMap::put(self, key, value)
    }

    fn remove(&self, key: &K) -> Result<Option<V>> {
        WritableMap::remove(self, key)
    }

    fn clear(&self) -> Result<()> {
        WritableMap::clear(self)
    }
}
