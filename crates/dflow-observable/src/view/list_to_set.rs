#![forbid(unsafe_code)]

use std::cell::RefCell;
use std::hash::Hash;
use std::rc::{Rc, Weak};

use ahash::{AHashMap, AHashSet};
use dflow_core::logging::debug;
use dflow_core::token::TypeToken;
use dflow_diff::{ListDiff, SetDiff};

use crate::listeners::{Lifecycle, ObservableCore, Subscription, impl_observable};
use crate::traits::{ListHandle, ObservableSet, SetHandle};

/// The set of distinct elements of an observable list.
///
/// While listened to the adapter counts how many times each element occurs
/// in the list; an element enters the set when its count leaves zero and
/// leaves when it returns to zero. Duplicates coming and going, and moves,
/// fire nothing. While inactive it keeps no counts and recomputes from the
/// list.
pub struct ListToSetAdapter<E: Eq + Hash + 'static> {
    inner: Rc<AdapterInner<E>>,
}

struct AdapterInner<E: Eq + Hash + 'static> {
    core: ObservableCore<SetDiff<E>>,
    this: Weak<AdapterInner<E>>,
    list: ListHandle<E>,
    active: RefCell<Option<ActiveCounts<E>>>,
    _list_disposal: Subscription,
}

struct ActiveCounts<E> {
    counts: AHashMap<E, usize>,
    _subscriptions: [Subscription; 2],
}

impl<E: Eq + Hash> Clone for ListToSetAdapter<E> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<E: Eq + Hash + Clone + 'static> ListToSetAdapter<E> {
    pub fn new(list: ListHandle<E>) -> Self {
        let realm = list.realm().clone();
        let inner = Rc::new_cyclic(|this: &Weak<AdapterInner<E>>| {
            let owner = this.clone();
            let disposal = list.subscribe_dispose(Box::new(move || {
                if let Some(adapter) = owner.upgrade() {
                    adapter.dispose();
                }
            }));
            AdapterInner {
                core: ObservableCore::new(&realm, this.clone()),
                this: this.clone(),
                list,
                active: RefCell::new(None),
                _list_disposal: disposal,
            }
        });
        Self { inner }
    }

    pub fn handle(&self) -> SetHandle<E> {
        Rc::new(self.clone())
    }

    pub fn is_active(&self) -> bool {
        self.inner.active.borrow().is_some()
    }

    /// How many times `element` occurs in the list.
    pub fn multiplicity(&self, element: &E) -> usize {
        self.inner.core.getter_called();
        if let Some(active) = self.inner.active.borrow().as_ref() {
            return active.counts.get(element).copied().unwrap_or(0);
        }
        self.inner.list.to_vec().iter().filter(|e| *e == element).count()
    }
}

impl<E: Eq + Hash + Clone + 'static> AdapterInner<E> {
    fn list_changed(&self, diff: &ListDiff<E>) {
        let out = {
            let mut active = self.active.borrow_mut();
            let Some(active) = active.as_mut() else {
                return;
            };
            let mut added = AHashSet::new();
            let mut removed = AHashSet::new();
            for entry in diff {
                if entry.is_addition {
                    let count = active.counts.entry(entry.element.clone()).or_insert(0);
                    *count += 1;
                    if *count == 1 && !removed.remove(&entry.element) {
                        added.insert(entry.element.clone());
                    }
                } else if let Some(count) = active.counts.get_mut(&entry.element) {
                    *count -= 1;
                    if *count == 0 {
                        active.counts.remove(&entry.element);
                        if !added.remove(&entry.element) {
                            removed.insert(entry.element.clone());
                        }
                    }
                }
            }
            SetDiff::new(added, removed)
        };
        if !out.is_empty() {
            self.core.fire_change(&out);
        }
    }

    fn distinct(&self) -> AHashSet<E> {
        self.list.to_vec().into_iter().collect()
    }

    fn is_stale(&self) -> bool {
        self.core.getter_called();
        self.list.is_stale()
    }

    fn dispose(&self) {
        if self.core.dispose() {
            self.active.borrow_mut().take();
        }
    }
}

impl<E: Eq + Hash + Clone + 'static> Lifecycle for AdapterInner<E> {
    fn first_listener_added(&self) {
        let mut counts: AHashMap<E, usize> = AHashMap::new();
        for element in self.list.to_vec() {
            *counts.entry(element).or_insert(0) += 1;
        }
        let this = self.this.clone();
        let changes = self.list.subscribe_list(Box::new(move |diff| {
            if let Some(adapter) = this.upgrade() {
                adapter.list_changed(diff);
            }
        }));
        let this = self.this.clone();
        let stale = self.list.subscribe_stale(Box::new(move || {
            if let Some(adapter) = this.upgrade() {
                adapter.core.fire_stale();
            }
        }));
        debug!(message = "list_to_set.activate", distinct = counts.len());
        *self.active.borrow_mut() = Some(ActiveCounts {
            counts,
            _subscriptions: [changes, stale],
        });
    }

    fn last_listener_removed(&self) {
        self.active.borrow_mut().take();
        debug!(message = "list_to_set.deactivate");
    }
}

impl_observable!(ListToSetAdapter<E> where [E: Eq + Hash + Clone + 'static]);

impl<E: Eq + Hash + Clone + 'static> ObservableSet<E> for ListToSetAdapter<E> {
    fn len(&self) -> usize {
        self.inner.core.getter_called();
        if let Some(active) = self.inner.active.borrow().as_ref() {
            return active.counts.len();
        }
        self.inner.distinct().len()
    }

    fn contains(&self, element: &E) -> bool {
        self.inner.core.getter_called();
        if let Some(active) = self.inner.active.borrow().as_ref() {
            return active.counts.contains_key(element);
        }
        self.inner.list.to_vec().contains(element)
    }

    fn to_set(&self) -> AHashSet<E> {
        self.inner.core.getter_called();
        if let Some(active) = self.inner.active.borrow().as_ref() {
            return active.counts.keys().cloned().collect();
        }
        self.inner.distinct()
    }

    fn element_type(&self) -> Option<TypeToken> {
        self.inner.list.element_type()
    }

    fn subscribe_set(&self, listener: Box<dyn Fn(&SetDiff<E>)>) -> Subscription {
        self.inner.core.subscribe(listener)
    }
}
