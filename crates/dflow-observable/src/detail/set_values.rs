#![forbid(unsafe_code)]

//! Detail values keyed by the elements of a master set.

use std::cell::RefCell;
use std::hash::Hash;
use std::rc::{Rc, Weak};

use ahash::AHashMap;
use dflow_core::error::Result;
use dflow_core::logging::trace;
use dflow_core::token::TypeToken;

use crate::computed_map::{ComputedMap, KeyedValues, MapSink};
use crate::listeners::Subscription;
use crate::traits::{SetHandle, ValueHandle};

struct HookedDetail<V: 'static> {
    detail: ValueHandle<V>,
    stale: bool,
    _subscriptions: [Subscription; 2],
}

type Hooked<U, V> = RefCell<AHashMap<U, HookedDetail<V>>>;

/// [`KeyedValues`] that looks every key up through its own detail
/// observable.
///
/// Hooked keys keep their detail alive and report its changes; unhooked keys
/// are read through a detail created and disposed on the spot. The factory
/// must return a fresh observable on every call.
pub struct SetDetailValues<U: 'static, V: 'static> {
    factory: Box<dyn Fn(&U) -> ValueHandle<V>>,
    detail_type: Option<TypeToken>,
    hooked: Rc<Hooked<U, V>>,
}

impl<U, V> SetDetailValues<U, V>
where
    U: Eq + Hash + Clone + 'static,
    V: Clone + 'static,
{
    pub fn new(factory: impl Fn(&U) -> ValueHandle<V> + 'static) -> Self {
        Self {
            factory: Box::new(factory),
            detail_type: None,
            hooked: Rc::new(RefCell::new(AHashMap::new())),
        }
    }

    /// # Panics
    ///
    /// Lookups panic when a created detail does not declare `detail_type`.
    pub fn with_detail_type(
        factory: impl Fn(&U) -> ValueHandle<V> + 'static,
        detail_type: TypeToken,
    ) -> Self {
        Self {
            detail_type: Some(detail_type),
            ..Self::new(factory)
        }
    }

    /// The map `{u: detail(u).value}` over `master`, in `master`'s realm.
    pub fn computed(self, master: SetHandle<U>) -> ComputedMap<U, V> {
        let realm = master.realm().clone();
        match self.detail_type {
            Some(detail_type) => ComputedMap::with_value_type(&realm, master, self, detail_type),
            None => ComputedMap::new(&realm, master, self),
        }
    }

    fn create(&self, key: &U) -> ValueHandle<V> {
        let detail = (self.factory)(key);
        if let Some(declared) = self.detail_type
            && let Err(err) = declared.ensure_matches(detail.value_type())
        {
            panic!("set detail values: {err}");
        }
        detail
    }

    /// The hooked detail for `key`, or a fresh one the caller must dispose.
    fn detail_for(&self, key: &U) -> (ValueHandle<V>, bool) {
        match self.hooked.borrow().get(key) {
            Some(hooked) => (Rc::clone(&hooked.detail), false),
            None => (self.create(key), true),
        }
    }
}

fn record_stale<U: Eq + Hash, V>(hooked: &Hooked<U, V>, key: &U, stale: bool) -> bool {
    let mut hooked = hooked.borrow_mut();
    let was_stale = hooked.values().any(|h| h.stale);
    match hooked.get_mut(key) {
        Some(entry) => entry.stale = stale,
        None => return false,
    }
    !was_stale && stale
}

impl<U, V> KeyedValues<U, V> for SetDetailValues<U, V>
where
    U: Eq + Hash + Clone + 'static,
    V: Clone + 'static,
{
    fn do_get(&self, key: &U) -> V {
        let (detail, detached) = self.detail_for(key);
        let value = detail.value();
        if detached {
            detail.dispose();
        }
        value
    }

    fn hook(&self, key: &U, sink: &MapSink<U, V>) {
        let detail = self.create(key);
        let state: Weak<Hooked<U, V>> = Rc::downgrade(&self.hooked);
        let owner = key.clone();
        let changes_sink = sink.clone();
        let changes = detail.subscribe_value(Box::new(move |diff| {
            changes_sink.fire_single_change(owner.clone(), diff.old.clone(), diff.new.clone());
            let Some(state) = state.upgrade() else {
                return;
            };
            let detail = state.borrow().get(&owner).map(|h| Rc::clone(&h.detail));
            if let Some(detail) = detail {
                record_stale(&state, &owner, detail.is_stale());
            }
        }));
        let state: Weak<Hooked<U, V>> = Rc::downgrade(&self.hooked);
        let owner = key.clone();
        let stale_sink = sink.clone();
        let stale = detail.subscribe_stale(Box::new(move || {
            if let Some(state) = state.upgrade()
                && record_stale(&state, &owner, true)
            {
                stale_sink.fire_stale();
            }
        }));
        let hooked = HookedDetail {
            stale: detail.is_stale(),
            detail,
            _subscriptions: [changes, stale],
        };
        trace!(message = "set_detail_values.hook", stale = hooked.stale);
        self.hooked.borrow_mut().insert(key.clone(), hooked);
    }

    fn unhook(&self, key: &U) {
        let removed = self.hooked.borrow_mut().remove(key);
        if let Some(hooked) = removed {
            hooked.detail.dispose();
        }
    }

    fn do_put(&self, key: &U, value: V) -> Result<Option<V>> {
        let (detail, detached) = self.detail_for(key);
        let old = detail.value();
        let written = detail.set_value(value);
        if detached {
            detail.dispose();
        }
        written.map(|()| Some(old))
    }

    fn is_stale(&self) -> bool {
        self.hooked.borrow().values().any(|h| h.stale)
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;
    use crate::traits::{Observable, ObservableMap};
    use crate::value::MapEntryValue;
    use crate::writable::{WritableMap, WritableSet};
    use dflow_core::realm::Realm;
    use dflow_diff::MapDiff;

    struct Fixture {
        ids: WritableSet<u32>,
        directory: WritableMap<u32, String>,
        names: ComputedMap<u32, Option<String>>,
        created: Rc<Cell<usize>>,
    }

    fn fixture() -> Fixture {
        let realm = Realm::new();
        let directory = WritableMap::from_map(
            &realm,
            [(1, "ann".to_owned()), (2, "bob".to_owned())].into_iter().collect(),
        );
        let ids = WritableSet::from_set(&realm, [1, 2].into_iter().collect());
        let created = Rc::new(Cell::new(0));
        let counter = Rc::clone(&created);
        let entries = directory.handle();
        let names = SetDetailValues::new(move |id: &u32| {
            counter.set(counter.get() + 1);
            MapEntryValue::new(Rc::clone(&entries), *id).handle()
        })
        .computed(ids.handle());
        Fixture {
            ids,
            directory,
            names,
            created,
        }
    }

    #[test]
    fn values_come_from_details() {
        let fx = fixture();
        assert_eq!(fx.names.get(&2), Some(Some("bob".to_owned())));
        assert!(!fx.directory.has_listeners(), "temporary detail was disposed");
    }

    #[test]
    fn hooked_detail_changes_become_single_changes() {
        let fx = fixture();
        let log = Rc::new(RefCell::new(Vec::<MapDiff<u32, Option<String>>>::new()));
        let sink = Rc::clone(&log);
        let _sub = fx.names.subscribe_map(Box::new(move |d| sink.borrow_mut().push(d.clone())));
        assert_eq!(fx.created.get(), 2, "one detail hooked per key");

        fx.directory.put(1, "anna".to_owned()).unwrap();
        fx.ids.insert(3).unwrap();
        fx.ids.remove(&2).unwrap();

        let log = log.borrow();
        assert_eq!(log.len(), 3);
        assert_eq!(log[0].new_value(&1), Some(&Some("anna".to_owned())));
        assert_eq!(log[1].new_value(&3), Some(&None));
        assert_eq!(log[2].old_value(&2), Some(&Some("bob".to_owned())));
    }

    #[test]
    fn put_writes_through_the_detail() {
        let fx = fixture();
        let _sub = fx.names.subscribe_map(Box::new(|_| {}));
        assert_eq!(fx.names.put(2, Some("rob".to_owned())).unwrap(), Some(Some("bob".to_owned())));
        assert_eq!(fx.directory.get(&2), Some("rob".to_owned()));
    }

    #[test]
    fn stale_detail_marks_the_map_stale_once() {
        let fx = fixture();
        let fired = Rc::new(Cell::new(0));
        let sink = Rc::clone(&fired);
        let sub = fx.names.subscribe_stale(Box::new(move || sink.set(sink.get() + 1)));
        fx.directory.set_stale(true).unwrap();
        assert!(fx.names.is_stale());
        assert_eq!(fired.get(), 1);
        drop(sub);
        assert!(!fx.directory.has_listeners());
    }
}
