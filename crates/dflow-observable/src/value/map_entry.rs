#![forbid(unsafe_code)]

use std::cell::RefCell;
use std::hash::Hash;
use std::rc::{Rc, Weak};

use dflow_core::error::Result;
use dflow_core::token::TypeToken;
use dflow_diff::{MapDiff, ValueDiff};

use crate::listeners::{Lifecycle, ObservableCore, Subscription, impl_observable};
use crate::traits::{MapHandle, ObservableValue, ValueHandle};

/// The value one key maps to in an observable map, `None` while absent.
///
/// Setting `Some(v)` puts the key, setting `None` removes it. Disposing the
/// entry leaves the map alone.
pub struct MapEntryValue<K: Eq + Hash + 'static, V: 'static> {
    inner: Rc<EntryInner<K, V>>,
}

struct EntryInner<K: Eq + Hash + 'static, V: 'static> {
    core: ObservableCore<ValueDiff<Option<V>>>,
    this: Weak<EntryInner<K, V>>,
    map: MapHandle<K, V>,
    key: K,
    value_type: Option<TypeToken>,
    following: RefCell<Option<[Subscription; 2]>>,
}

impl<K: Eq + Hash, V> Clone for MapEntryValue<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<K, V> MapEntryValue<K, V>
where
    K: Eq + Hash + Clone + 'static,
    V: Clone + PartialEq + 'static,
{
    pub fn new(map: MapHandle<K, V>, key: K) -> Self {
        let value_type = map.value_type();
        Self::build(map, key, value_type)
    }

    pub fn with_value_type(map: MapHandle<K, V>, key: K, value_type: TypeToken) -> Self {
        Self::build(map, key, Some(value_type))
    }

    fn build(map: MapHandle<K, V>, key: K, value_type: Option<TypeToken>) -> Self {
        let realm = map.realm().clone();
        let inner = Rc::new_cyclic(|this: &Weak<EntryInner<K, V>>| EntryInner {
            core: ObservableCore::new(&realm, this.clone()),
            this: this.clone(),
            map,
            key,
            value_type,
            following: RefCell::new(None),
        });
        Self { inner }
    }

    pub fn key(&self) -> &K {
        &self.inner.key
    }

    pub fn handle(&self) -> ValueHandle<Option<V>> {
        Rc::new(self.clone())
    }
}

impl<K, V> EntryInner<K, V>
where
    K: Eq + Hash + Clone + 'static,
    V: Clone + PartialEq + 'static,
{
    fn map_changed(&self, diff: &MapDiff<K, V>) {
        let key = &self.key;
        let change = if diff.added_keys().contains(key) {
            ValueDiff::new(None, diff.new_value(key).cloned())
        } else if diff.changed_keys().contains(key) {
            ValueDiff::new(diff.old_value(key).cloned(), diff.new_value(key).cloned())
        } else if diff.removed_keys().contains(key) {
            ValueDiff::new(diff.old_value(key).cloned(), None)
        } else {
            return;
        };
        if change.is_change() {
            self.core.fire_change(&change);
        }
    }

    fn is_stale(&self) -> bool {
        self.core.getter_called();
        self.map.is_stale()
    }

    fn dispose(&self) {
        if self.core.dispose() {
            self.following.borrow_mut().take();
        }
    }
}

impl<K, V> Lifecycle for EntryInner<K, V>
where
    K: Eq + Hash + Clone + 'static,
    V: Clone + PartialEq + 'static,
{
    fn first_listener_added(&self) {
        let this = self.this.clone();
        let changes = self.map.subscribe_map(Box::new(move |diff| {
            if let Some(entry) = this.upgrade() {
                entry.map_changed(diff);
            }
        }));
        let this = self.this.clone();
        let stale = self.map.subscribe_stale(Box::new(move || {
            if let Some(entry) = this.upgrade() {
                entry.core.fire_stale();
            }
        }));
        *self.following.borrow_mut() = Some([changes, stale]);
    }

    fn last_listener_removed(&self) {
        self.following.borrow_mut().take();
    }
}

impl_observable!(MapEntryValue<K, V> where [
    K: Eq + Hash + Clone + 'static,
    V: Clone + PartialEq + 'static
]);

impl<K, V> ObservableValue<Option<V>> for MapEntryValue<K, V>
where
    K: Eq + Hash + Clone + 'static,
    V: Clone + PartialEq + 'static,
{
    fn value(&self) -> Option<V> {
        self.inner.core.getter_called();
        self.inner.map.get(&self.inner.key)
    }

    fn value_type(&self) -> Option<TypeToken> {
        self.inner.value_type
    }

    fn subscribe_value(&self, listener: Box<dyn Fn(&ValueDiff<Option<V>>)>) -> Subscription {
        self.inner.core.subscribe(listener)
    }

    fn set_value(&self, value: Option<V>) -> Result<()> {
        self.inner.core.check_mutation()?;
        let key = &self.inner.key;
        match value {
            Some(value) => self.inner.map.put(key.clone(), value).map(drop),
            None => self.inner.map.remove(key).map(drop),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::{Observable, ObservableMap};
    use crate::writable::WritableMap;
    use dflow_core::realm::Realm;

    fn recorded(
        entry: &MapEntryValue<&'static str, u8>,
    ) -> (Rc<RefCell<Vec<ValueDiff<Option<u8>>>>>, Subscription) {
        let log = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&log);
        let sub = entry.subscribe_value(Box::new(move |d| sink.borrow_mut().push(*d)));
        (log, sub)
    }

    #[test]
    fn follows_one_key_through_add_change_remove() {
        let map = WritableMap::new(&Realm::new());
        let entry = MapEntryValue::new(map.handle(), "k");
        let (log, _sub) = recorded(&entry);
        map.put("other", 9).unwrap();
        map.put("k", 1).unwrap();
        map.put("k", 2).unwrap();
        map.remove(&"k").unwrap();
        assert_eq!(
            *log.borrow(),
            vec![
                ValueDiff::new(None, Some(1)),
                ValueDiff::new(Some(1), Some(2)),
                ValueDiff::new(Some(2), None),
            ]
        );
    }

    #[test]
    fn setting_puts_or_removes() {
        let map = WritableMap::new(&Realm::new());
        let entry = MapEntryValue::new(map.handle(), "k");
        entry.set_value(Some(4)).unwrap();
        assert_eq!(map.get(&"k"), Some(4));
        assert_eq!(entry.value(), Some(4));
        entry.set_value(None).unwrap();
        assert!(map.is_empty());
    }

    #[test]
    fn listens_only_while_listened() {
        let map: WritableMap<&'static str, u8> = WritableMap::new(&Realm::new());
        let entry = MapEntryValue::new(map.handle(), "k");
        let (_log, sub) = recorded(&entry);
        assert!(map.has_listeners());
        drop(sub);
        assert!(!map.has_listeners());
        entry.dispose();
        assert!(!map.is_disposed());
    }
}
