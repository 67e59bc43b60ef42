//! Activation symmetry: a composite subscribes to its upstreams when its
//! first listener arrives and releases every subscription when the last one
//! leaves. Values read while inactive agree with values read while active.

use std::rc::Rc;

use ahash::AHashSet;
use dflow_core::Realm;
use dflow_observable::{
    BidiMap, ComputedMap, DetailList, ListToSetAdapter, Observable, ObservableList, ObservableMap,
    ObservableSet, ObservableValue, SelectValue, Subscription, UnionSet, WritableList, WritableMap,
    WritableSet, WritableValue,
};

fn listen_stale(observable: &dyn Observable) -> Subscription {
    observable.subscribe_stale(Box::new(|| {}))
}

#[test]
fn union_attaches_and_detaches() {
    let realm = Realm::new();
    let a = WritableSet::from_set(&realm, [1, 2].into_iter().collect());
    let b = WritableSet::from_set(&realm, [2, 3].into_iter().collect());
    let union = UnionSet::new(&realm, vec![a.handle(), b.handle()]);
    let inactive = union.to_set();

    let first = union.subscribe_set(Box::new(|_| {}));
    let second = listen_stale(&union);
    assert!(a.has_listeners() && b.has_listeners());
    assert_eq!(union.to_set(), inactive);

    drop(first);
    assert!(a.has_listeners(), "one listener remains");
    drop(second);
    assert!(!a.has_listeners() && !b.has_listeners());
    assert!(!union.is_active());
}

#[test]
fn union_reference_counts_shared_elements() {
    let realm = Realm::new();
    let a = WritableSet::from_set(&realm, [1, 2].into_iter().collect());
    let b = WritableSet::from_set(&realm, [2, 3].into_iter().collect());
    let union = UnionSet::new(&realm, vec![a.handle(), b.handle()]);
    let removals = Rc::new(std::cell::RefCell::new(Vec::new()));
    let sink = Rc::clone(&removals);
    let _sub = union.subscribe_set(Box::new(move |d| sink.borrow_mut().push(d.removals().clone())));

    a.remove(&2).unwrap();
    assert!(removals.borrow().is_empty(), "2 is still in b");
    b.remove(&2).unwrap();
    assert_eq!(*removals.borrow(), vec![AHashSet::from_iter([2])]);
}

#[test]
fn bidi_and_computed_map_chain_detaches() {
    let realm = Realm::new();
    let keys = WritableSet::from_set(&realm, ["x", "yy"].into_iter().collect());
    let lengths = ComputedMap::from_fn(&realm, keys.handle(), |k: &&str| k.len());
    let bidi = BidiMap::new(&realm, lengths.handle());
    let inactive = bidi.to_map();

    let sub = bidi.subscribe_map(Box::new(|_| {}));
    assert!(lengths.is_active());
    assert!(keys.has_listeners());
    assert_eq!(bidi.to_map(), inactive);

    drop(sub);
    assert!(!bidi.is_active());
    assert!(!lengths.is_active());
    assert!(!keys.has_listeners());
}

#[test]
fn list_to_set_and_detail_list_detach() {
    let realm = Realm::new();
    let list = WritableList::from_vec(&realm, vec![1, 1, 2]);
    let adapter = ListToSetAdapter::new(list.handle());
    let master = WritableValue::new(&realm, true);
    let source = list.handle();
    let detail = DetailList::new(master.handle(), move |on: &bool| on.then(|| Rc::clone(&source)));

    let subs = [listen_stale(&adapter), listen_stale(&detail)];
    assert!(list.has_listeners());
    assert!(master.has_listeners());
    assert_eq!(detail.to_vec(), vec![1, 1, 2]);
    drop(subs);
    assert!(!list.has_listeners());
    assert!(!master.has_listeners());
}

#[test]
fn select_value_detaches_from_every_flag() {
    let realm = Realm::new();
    let flags: Vec<WritableValue<bool>> =
        (0..3).map(|_| WritableValue::new(&realm, false)).collect();
    let select = SelectValue::new(&realm);
    for (n, flag) in flags.iter().enumerate() {
        select.add_option(n, flag.handle()).unwrap();
    }
    let sub = select.subscribe_value(Box::new(|_| {}));
    assert!(flags.iter().all(|f| f.has_listeners()));
    drop(sub);
    assert!(flags.iter().all(|f| !f.has_listeners()));
    flags[2].set(true).unwrap();
    assert_eq!(select.value(), Some(2));
}

#[test]
fn dispose_is_idempotent_and_releases_upstreams() {
    let realm = Realm::new();
    let a = WritableSet::from_set(&realm, [1].into_iter().collect());
    let union = UnionSet::new(&realm, vec![a.handle()]);
    let disposals = Rc::new(std::cell::Cell::new(0));
    let sink = Rc::clone(&disposals);
    let _dispose_sub = union.subscribe_dispose(Box::new(move || sink.set(sink.get() + 1)));
    let _sub = union.subscribe_set(Box::new(|_| {}));

    union.dispose();
    union.dispose();
    assert_eq!(disposals.get(), 1);
    assert!(union.is_disposed());
    assert!(!a.has_listeners());
}
