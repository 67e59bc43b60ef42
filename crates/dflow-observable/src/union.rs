#![forbid(unsafe_code)]

//! Reference-counted union of observable sets.
//!
//! While listened to, the union keeps a multiplicity table (how many children
//! contain each element) and subscriptions to every child. An element is
//! added when its count goes 0→1 and removed when it goes 1→0; elements that
//! merely change hands between children produce no event.
//!
//! While nobody listens, the union holds no table and no subscriptions and
//! answers queries by recomputing from the children.
//!
//! # Invariants
//!
//! 1. Active: `counts[e]` equals the number of children containing `e`, and
//!    no entry has count zero.
//! 2. One child diff produces at most one union diff, fired after the table
//!    is updated.
//! 3. Activation resynchronises from the children exactly once.

use std::cell::RefCell;
use std::hash::Hash;
use std::rc::{Rc, Weak};

use ahash::{AHashMap, AHashSet};
use dflow_core::logging::debug;
use dflow_core::realm::Realm;
use dflow_core::token::TypeToken;
use dflow_diff::SetDiff;

use crate::listeners::{Lifecycle, ObservableCore, Subscription, impl_observable};
use crate::stale::{StaleTransition, StalenessTracker};
use crate::traits::{ObservableSet, SetHandle};

pub struct UnionSet<E: Eq + Hash + 'static> {
    inner: Rc<UnionInner<E>>,
}

struct UnionInner<E: Eq + Hash + 'static> {
    core: ObservableCore<SetDiff<E>>,
    this: Weak<UnionInner<E>>,
    children: Vec<SetHandle<E>>,
    element_type: Option<TypeToken>,
    active: RefCell<Option<ActiveUnion<E>>>,
}

struct ActiveUnion<E> {
    counts: AHashMap<E, usize>,
    staleness: StalenessTracker,
    _subscriptions: Vec<Subscription>,
}

impl<E: Eq + Hash> Clone for UnionSet<E> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<E: Eq + Hash + Clone + 'static> UnionSet<E> {
    /// # Panics
    ///
    /// Panics when a child belongs to a different realm.
    pub fn new(realm: &Realm, children: Vec<SetHandle<E>>) -> Self {
        Self::build(realm, children, None)
    }

    pub fn with_element_type(
        realm: &Realm,
        children: Vec<SetHandle<E>>,
        element_type: TypeToken,
    ) -> Self {
        Self::build(realm, children, Some(element_type))
    }

    fn build(realm: &Realm, children: Vec<SetHandle<E>>, element_type: Option<TypeToken>) -> Self {
        for child in &children {
            if let Err(err) = realm.ensure_same(child.realm()) {
                panic!("union child: {err}");
            }
        }
        let inner = Rc::new_cyclic(|this: &Weak<UnionInner<E>>| UnionInner {
            core: ObservableCore::new(realm, this.clone()),
            this: this.clone(),
            children,
            element_type,
            active: RefCell::new(None),
        });
        Self { inner }
    }

    pub fn handle(&self) -> SetHandle<E> {
        Rc::new(self.clone())
    }

    /// Whether the union currently holds upstream subscriptions.
    pub fn is_active(&self) -> bool {
        self.inner.active.borrow().is_some()
    }
}

impl<E: Eq + Hash + Clone + 'static> UnionInner<E> {
    fn child_changed(&self, child: usize, diff: &SetDiff<E>) {
        let child_stale = self.children[child].is_stale();
        let (out, transition) = {
            let mut active = self.active.borrow_mut();
            let Some(active) = active.as_mut() else {
                return;
            };
            let mut added = AHashSet::new();
            for element in diff.additions() {
                let count = active.counts.entry(element.clone()).or_insert(0);
                *count += 1;
                if *count == 1 {
                    added.insert(element.clone());
                }
            }
            let mut removed = AHashSet::new();
            for element in diff.removals() {
                let Some(count) = active.counts.get_mut(element) else {
                    continue;
                };
                *count -= 1;
                if *count == 0 {
                    active.counts.remove(element);
                    if !added.remove(element) {
                        removed.insert(element.clone());
                    }
                }
            }
            let transition = active.staleness.update(child, child_stale);
            (SetDiff::new(added, removed), transition)
        };
        if !out.is_empty() {
            self.core.fire_change(&out);
        }
        if transition == StaleTransition::BecameStale {
            self.core.fire_stale();
        }
    }

    fn child_stale(&self, child: usize) {
        let transition = match self.active.borrow_mut().as_mut() {
            Some(active) => active.staleness.update(child, true),
            None => return,
        };
        if transition == StaleTransition::BecameStale {
            self.core.fire_stale();
        }
    }

    fn recompute(&self) -> AHashSet<E> {
        let mut all = AHashSet::new();
        for child in &self.children {
            all.extend(child.to_set());
        }
        all
    }

    fn is_stale(&self) -> bool {
        self.core.getter_called();
        match self.active.borrow().as_ref() {
            Some(active) => active.staleness.is_stale(),
            None => self.children.iter().any(|child| child.is_stale()),
        }
    }

    fn dispose(&self) {
        if self.core.dispose() {
            let active = self.active.borrow_mut().take();
            drop(active);
        }
    }
}

impl<E: Eq + Hash + Clone + 'static> Lifecycle for UnionInner<E> {
    fn first_listener_added(&self) {
        let mut counts: AHashMap<E, usize> = AHashMap::new();
        for child in &self.children {
            for element in child.to_set() {
                *counts.entry(element).or_insert(0) += 1;
            }
        }
        let staleness = StalenessTracker::new(self.children.iter().map(|child| child.is_stale()));
        let mut subscriptions = Vec::with_capacity(self.children.len() * 2);
        for (index, child) in self.children.iter().enumerate() {
            let this = self.this.clone();
            subscriptions.push(child.subscribe_set(Box::new(move |diff| {
                if let Some(union) = this.upgrade() {
                    union.child_changed(index, diff);
                }
            })));
            let this = self.this.clone();
            subscriptions.push(child.subscribe_stale(Box::new(move || {
                if let Some(union) = this.upgrade() {
                    union.child_stale(index);
                }
            })));
        }
        debug!(
            message = "union.activate",
            children = self.children.len(),
            elements = counts.len()
        );
        *self.active.borrow_mut() = Some(ActiveUnion {
            counts,
            staleness,
            _subscriptions: subscriptions,
        });
    }

    fn last_listener_removed(&self) {
        let active = self.active.borrow_mut().take();
        debug!(message = "union.deactivate", children = self.children.len());
        drop(active);
    }
}

impl_observable!(UnionSet<E> where [E: Eq + Hash + Clone + 'static]);

impl<E: Eq + Hash + Clone + 'static> ObservableSet<E> for UnionSet<E> {
    fn len(&self) -> usize {
        self.inner.core.getter_called();
        if let Some(active) = self.inner.active.borrow().as_ref() {
            return active.counts.len();
        }
        self.inner.recompute().len()
    }

    fn contains(&self, element: &E) -> bool {
        self.inner.core.getter_called();
        if let Some(active) = self.inner.active.borrow().as_ref() {
            return active.counts.contains_key(element);
        }
        self.inner.children.iter().any(|child| child.contains(element))
    }

    fn to_set(&self) -> AHashSet<E> {
        self.inner.core.getter_called();
        if let Some(active) = self.inner.active.borrow().as_ref() {
            return active.counts.keys().cloned().collect();
        }
        self.inner.recompute()
    }

    fn element_type(&self) -> Option<TypeToken> {
        self.inner.element_type
    }

    fn subscribe_set(&self, listener: Box<dyn Fn(&SetDiff<E>)>) -> Subscription {
        self.inner.core.subscribe(listener)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::Observable;
    use crate::writable::WritableSet;

    fn set(items: &[u8]) -> AHashSet<u8> {
        items.iter().copied().collect()
    }

    fn fixture() -> (Realm, WritableSet<u8>, WritableSet<u8>, UnionSet<u8>) {
        let realm = Realm::new();
        let a = WritableSet::from_set(&realm, set(&[1, 2]));
        let b = WritableSet::from_set(&realm, set(&[2, 3]));
        let union = UnionSet::new(&realm, vec![a.handle(), b.handle()]);
        (realm, a, b, union)
    }

    fn record(union: &UnionSet<u8>) -> (Rc<RefCell<Vec<SetDiff<u8>>>>, Subscription) {
        let log = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&log);
        let sub = union.subscribe_set(Box::new(move |d| sink.borrow_mut().push(d.clone())));
        (log, sub)
    }

    #[test]
    fn shared_element_survives_until_last_holder_drops_it() {
        let (_realm, a, b, union) = fixture();
        let (log, _sub) = record(&union);
        assert_eq!(union.to_set(), set(&[1, 2, 3]));

        a.remove(&2).unwrap();
        assert!(log.borrow().is_empty(), "2 is still held by b");
        assert!(union.contains(&2));

        b.remove(&2).unwrap();
        assert_eq!(log.borrow().as_slice(), &[SetDiff::removals_only(set(&[2]))]);
        assert_eq!(union.to_set(), set(&[1, 3]));
    }

    #[test]
    fn duplicate_addition_fires_nothing() {
        let (_realm, a, _b, union) = fixture();
        let (log, _sub) = record(&union);
        a.insert(3).unwrap();
        assert!(log.borrow().is_empty());
        a.insert(4).unwrap();
        assert_eq!(log.borrow().as_slice(), &[SetDiff::additions_only(set(&[4]))]);
    }

    #[test]
    fn activation_follows_listener_count() {
        let (_realm, a, _b, union) = fixture();
        assert!(!union.is_active());
        assert_eq!(union.len(), 3);
        let sub = union.subscribe_stale(Box::new(|| {}));
        assert!(union.is_active());
        drop(sub);
        assert!(!union.is_active());
        a.insert(9).unwrap();
        assert_eq!(union.to_set(), set(&[1, 2, 3, 9]));
    }

    #[test]
    fn staleness_tracks_children() {
        let (_realm, a, b, union) = fixture();
        assert!(!union.is_stale());
        a.set_stale(true).unwrap();
        assert!(union.is_stale(), "inactive union consults children");
        a.set_stale(false).unwrap();

        let fired = Rc::new(std::cell::Cell::new(0));
        let f = Rc::clone(&fired);
        let _sub = union.subscribe_stale(Box::new(move || f.set(f.get() + 1)));
        a.set_stale(true).unwrap();
        b.set_stale(true).unwrap();
        assert_eq!(fired.get(), 1);
        assert!(union.is_stale());
    }

    #[test]
    fn dispose_releases_children() {
        let (_realm, a, _b, union) = fixture();
        let _sub = union.subscribe_set(Box::new(|_| {}));
        assert!(a.has_listeners());
        union.dispose();
        assert!(!a.has_listeners());
        assert!(union.is_disposed());
    }

    #[test]
    #[should_panic(expected = "realm mismatch")]
    fn children_must_share_the_realm() {
        let realm = Realm::new();
        let foreign = WritableSet::<u8>::new(&Realm::new());
        let _ = UnionSet::new(&realm, vec![foreign.handle()]);
    }
}
