#![forbid(unsafe_code)]

use std::hash::Hash;
use std::marker::PhantomData;
use std::rc::Rc;

use ahash::{AHashMap, AHashSet};
use dflow_core::error::Result;
use dflow_core::token::TypeToken;
use dflow_diff::{MapDiff, compute_map_diff};

use super::{DetailInner, DetailKind, delegate_observable};
use crate::listeners::{Subscription, impl_observable};
use crate::traits::{MapHandle, ObservableMap, ValueHandle};

pub(crate) struct MapKind<K, V>(PhantomData<(K, V)>);

impl<K: Eq + Hash + Clone + 'static, V: Clone + PartialEq + 'static> DetailKind for MapKind<K, V> {
    type Handle = MapHandle<K, V>;
    type Snapshot = AHashMap<K, V>;
    type Diff = MapDiff<K, V>;

    fn snapshot(detail: Option<&Self::Handle>) -> AHashMap<K, V> {
        detail.map(|detail| detail.to_map()).unwrap_or_default()
    }

    fn replaced(old: AHashMap<K, V>, new: AHashMap<K, V>) -> Option<MapDiff<K, V>> {
        let diff = compute_map_diff(&old, &new);
        (!diff.is_empty()).then_some(diff)
    }

    fn subscribe(detail: &Self::Handle, forward: Box<dyn Fn(&MapDiff<K, V>)>) -> Subscription {
        detail.subscribe_map(forward)
    }

    fn type_token(detail: &Self::Handle) -> Option<TypeToken> {
        detail.value_type()
    }

    delegate_observable!();
}

/// The entries of whichever observable map the master currently selects.
pub struct DetailMap<M: 'static, K: Eq + Hash + Clone + 'static, V: Clone + PartialEq + 'static> {
    inner: Rc<DetailInner<M, MapKind<K, V>>>,
}

impl<M, K: Eq + Hash + Clone, V: Clone + PartialEq> Clone for DetailMap<M, K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<M, K, V> DetailMap<M, K, V>
where
    M: Clone + PartialEq + 'static,
    K: Eq + Hash + Clone + 'static,
    V: Clone + PartialEq + 'static,
{
    pub fn new(
        master: ValueHandle<M>,
        factory: impl Fn(&M) -> Option<MapHandle<K, V>> + 'static,
    ) -> Self {
        Self {
            inner: DetailInner::new(master, Box::new(factory), None),
        }
    }

    /// Every detail must declare `value_type`.
    pub fn with_value_type(
        master: ValueHandle<M>,
        factory: impl Fn(&M) -> Option<MapHandle<K, V>> + 'static,
        value_type: TypeToken,
    ) -> Self {
        Self {
            inner: DetailInner::new(master, Box::new(factory), Some(value_type)),
        }
    }

    pub fn handle(&self) -> MapHandle<K, V> {
        Rc::new(self.clone())
    }
}

impl_observable!(DetailMap<M, K, V> where [
    M: Clone + PartialEq + 'static,
    K: Eq + Hash + Clone + 'static,
    V: Clone + PartialEq + 'static
]);

impl<M, K, V> ObservableMap<K, V> for DetailMap<M, K, V>
where
    M: Clone + PartialEq + 'static,
    K: Eq + Hash + Clone + 'static,
    V: Clone + PartialEq + 'static,
{
    fn len(&self) -> usize {
        self.inner.current().map_or(0, |detail| detail.len())
    }

    fn contains_key(&self, key: &K) -> bool {
        self.inner.current().is_some_and(|detail| detail.contains_key(key))
    }

    fn get(&self, key: &K) -> Option<V> {
        self.inner.current().and_then(|detail| detail.get(key))
    }

    fn keys(&self) -> AHashSet<K> {
        self.inner.current().map(|detail| detail.keys()).unwrap_or_default()
    }

    fn to_map(&self) -> AHashMap<K, V> {
        MapKind::<K, V>::snapshot(self.inner.current().as_ref())
    }

    fn key_type(&self) -> Option<TypeToken> {
        self.inner.current().and_then(|detail| detail.key_type())
    }

    fn value_type(&self) -> Option<TypeToken> {
        self.inner.detail_type()
    }

    fn subscribe_map(&self, listener: Box<dyn Fn(&MapDiff<K, V>)>) -> Subscription {
        self.inner.core.subscribe(listener)
    }

    fn put(&self, key: K, value: V) -> Result<Option<V>> {
        self.inner.mutate("put", |detail| detail.put(key, value))
    }

    fn remove(&self, key: &K) -> Result<Option<V>> {
        self.inner.mutate("remove", |detail| detail.remove(key))
    }

    fn clear(&self) -> Result<()> {
        self.inner.mutate("clear", |detail| detail.clear())
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;
    use crate::traits::Observable;
    use crate::writable::{WritableMap, WritableValue};
    use dflow_core::realm::Realm;

    #[test]
    fn switching_maps_fires_a_computed_diff() {
        let realm = Realm::new();
        let en = WritableMap::from_map(&realm, [(1u8, "one"), (2, "two")].into_iter().collect());
        let de = WritableMap::from_map(&realm, [(1u8, "eins"), (3, "drei")].into_iter().collect());
        let master = WritableValue::new(&realm, "en");
        let (en_handle, de_handle) = (en.handle(), de.handle());
        let detail = DetailMap::new(master.handle(), move |lang: &&'static str| {
            Some(if *lang == "de" { Rc::clone(&de_handle) } else { Rc::clone(&en_handle) })
        });
        let log = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&log);
        let _sub = detail.subscribe_map(Box::new(move |d| sink.borrow_mut().push(d.clone())));

        let before = detail.to_map();
        master.set("de").unwrap();
        let log = log.borrow();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].simulate_on(&before), de.to_map());
        assert_eq!(log[0].new_value(&1), Some(&"eins"));
        assert!(en.is_disposed());
    }

    #[test]
    fn puts_reach_the_current_map_and_are_forwarded() {
        let realm = Realm::new();
        let inner = WritableMap::<u8, u8>::new(&realm);
        let master = WritableValue::new(&realm, ());
        let handle = inner.handle();
        let detail = DetailMap::new(master.handle(), move |_: &()| Some(Rc::clone(&handle)));
        let log = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&log);
        let _sub = detail.subscribe_map(Box::new(move |d| sink.borrow_mut().push(d.clone())));
        detail.put(1, 10).unwrap();
        assert_eq!(inner.get(&1), Some(10));
        assert_eq!(log.borrow().as_slice(), &[MapDiff::single_add(1, 10)]);
    }
}
