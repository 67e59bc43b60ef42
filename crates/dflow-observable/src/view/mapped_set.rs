#![forbid(unsafe_code)]

use std::cell::RefCell;
use std::hash::Hash;
use std::rc::{Rc, Weak};

use ahash::{AHashMap, AHashSet};
use dflow_core::logging::debug;
use dflow_core::realm::Realm;
use dflow_core::token::TypeToken;
use dflow_diff::{MapDiff, SetDiff};

use crate::listeners::{Lifecycle, ObservableCore, Subscription, impl_observable};
use crate::traits::{MapHandle, ObservableMap, ObservableSet, SetHandle};

/// The set of values a map holds for the elements of an input set.
///
/// Several input elements may map to the same value, so while listened the
/// set counts how many elements contribute each value. A value enters the
/// set when its count leaves zero and leaves when it returns to zero.
/// Elements the map has no entry for contribute nothing, and map entries for
/// keys outside the input set are ignored.
pub struct MappedSet<I: Eq + Hash + 'static, E: Eq + Hash + 'static> {
    inner: Rc<MappedInner<I, E>>,
}

struct MappedInner<I: Eq + Hash + 'static, E: Eq + Hash + 'static> {
    core: ObservableCore<SetDiff<E>>,
    this: Weak<MappedInner<I, E>>,
    input: SetHandle<I>,
    map: MapHandle<I, E>,
    active: RefCell<Option<ActiveValues<I, E>>>,
    _input_disposal: Subscription,
}

struct ActiveValues<I, E> {
    /// Value each input element currently adds to `counts`.
    contributed: AHashMap<I, E>,
    counts: AHashMap<E, usize>,
    _subscriptions: [Subscription; 4],
}

impl<I: Eq + Hash, E: Eq + Hash> Clone for MappedSet<I, E> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<I, E> MappedSet<I, E>
where
    I: Eq + Hash + Clone + 'static,
    E: Eq + Hash + Clone + 'static,
{
    /// # Panics
    ///
    /// Panics when `input` and `map` belong to different realms.
    pub fn new(input: SetHandle<I>, map: MapHandle<I, E>) -> Self {
        let realm: Realm = input.realm().clone();
        if let Err(err) = realm.ensure_same(map.realm()) {
            panic!("mapped set: {err}");
        }
        let inner = Rc::new_cyclic(|this: &Weak<MappedInner<I, E>>| {
            let owner = this.clone();
            let disposal = input.subscribe_dispose(Box::new(move || {
                if let Some(set) = owner.upgrade() {
                    set.dispose();
                }
            }));
            MappedInner {
                core: ObservableCore::new(&realm, this.clone()),
                this: this.clone(),
                input,
                map,
                active: RefCell::new(None),
                _input_disposal: disposal,
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

    /// How many input elements map to `value`.
    pub fn multiplicity(&self, value: &E) -> usize {
        self.inner.core.getter_called();
        if let Some(active) = self.inner.active.borrow().as_ref() {
            return active.counts.get(value).copied().unwrap_or(0);
        }
        self.inner.contributions().values().filter(|v| *v == value).count()
    }
}

/// Count `value` in; it joins the batch's additions on its first occurrence.
fn count_in<E: Eq + Hash + Clone>(
    counts: &mut AHashMap<E, usize>,
    value: E,
    added: &mut AHashSet<E>,
    removed: &mut AHashSet<E>,
) {
    let count = counts.entry(value.clone()).or_insert(0);
    *count += 1;
    if *count == 1 && !removed.remove(&value) {
        added.insert(value);
    }
}

fn count_out<E: Eq + Hash + Clone>(
    counts: &mut AHashMap<E, usize>,
    value: E,
    added: &mut AHashSet<E>,
    removed: &mut AHashSet<E>,
) {
    let Some(count) = counts.get_mut(&value) else {
        return;
    };
    *count -= 1;
    if *count == 0 {
        counts.remove(&value);
        if !added.remove(&value) {
            removed.insert(value);
        }
    }
}

impl<I, E> MappedInner<I, E>
where
    I: Eq + Hash + Clone + 'static,
    E: Eq + Hash + Clone + 'static,
{
    fn contributions(&self) -> AHashMap<I, E> {
        self.input
            .to_set()
            .into_iter()
            .filter_map(|element| self.map.get(&element).map(|value| (element, value)))
            .collect()
    }

    fn input_changed(&self, diff: &SetDiff<I>) {
        let out = {
            let mut active = self.active.borrow_mut();
            let Some(active) = active.as_mut() else {
                return;
            };
            let mut added = AHashSet::new();
            let mut removed = AHashSet::new();
            for element in diff.removals() {
                if let Some(value) = active.contributed.remove(element) {
                    count_out(&mut active.counts, value, &mut added, &mut removed);
                }
            }
            for element in diff.additions() {
                if let Some(value) = self.map.get(element) {
                    active.contributed.insert(element.clone(), value.clone());
                    count_in(&mut active.counts, value, &mut added, &mut removed);
                }
            }
            SetDiff::new(added, removed)
        };
        if !out.is_empty() {
            self.core.fire_change(&out);
        }
    }

    fn map_changed(&self, diff: &MapDiff<I, E>) {
        let out = {
            let mut active = self.active.borrow_mut();
            let Some(active) = active.as_mut() else {
                return;
            };
            let mut added = AHashSet::new();
            let mut removed = AHashSet::new();
            let touched = diff
                .removed_keys()
                .iter()
                .chain(diff.changed_keys())
                .chain(diff.added_keys());
            for element in touched {
                if !self.input.contains(element) {
                    continue;
                }
                if let Some(old) = active.contributed.remove(element) {
                    count_out(&mut active.counts, old, &mut added, &mut removed);
                }
                if let Some(new) = diff.new_value(element) {
                    active.contributed.insert(element.clone(), new.clone());
                    count_in(&mut active.counts, new.clone(), &mut added, &mut removed);
                }
            }
            SetDiff::new(added, removed)
        };
        if !out.is_empty() {
            self.core.fire_change(&out);
        }
    }

    fn is_stale(&self) -> bool {
        self.core.getter_called();
        self.input.is_stale() || self.map.is_stale()
    }

    fn dispose(&self) {
        if self.core.dispose() {
            self.active.borrow_mut().take();
        }
    }
}

impl<I, E> Lifecycle for MappedInner<I, E>
where
    I: Eq + Hash + Clone + 'static,
    E: Eq + Hash + Clone + 'static,
{
    fn first_listener_added(&self) {
        let contributed = self.contributions();
        let mut counts: AHashMap<E, usize> = AHashMap::new();
        for value in contributed.values() {
            *counts.entry(value.clone()).or_insert(0) += 1;
        }
        let this = self.this.clone();
        let input_changes = self.input.subscribe_set(Box::new(move |diff| {
            if let Some(set) = this.upgrade() {
                set.input_changed(diff);
            }
        }));
        let this = self.this.clone();
        let map_changes = self.map.subscribe_map(Box::new(move |diff| {
            if let Some(set) = this.upgrade() {
                set.map_changed(diff);
            }
        }));
        let this = self.this.clone();
        let input_stale = self.input.subscribe_stale(Box::new(move || {
            if let Some(set) = this.upgrade() {
                set.core.fire_stale();
            }
        }));
        let this = self.this.clone();
        let map_stale = self.map.subscribe_stale(Box::new(move || {
            if let Some(set) = this.upgrade() {
                set.core.fire_stale();
            }
        }));
        debug!(
            message = "mapped_set.activate",
            elements = contributed.len(),
            distinct = counts.len()
        );
        *self.active.borrow_mut() = Some(ActiveValues {
            contributed,
            counts,
            _subscriptions: [input_changes, map_changes, input_stale, map_stale],
        });
    }

    fn last_listener_removed(&self) {
        self.active.borrow_mut().take();
        debug!(message = "mapped_set.deactivate");
    }
}

impl_observable!(MappedSet<I, E> where [
    I: Eq + Hash + Clone + 'static,
    E: Eq + Hash + Clone + 'static
]);

impl<I, E> ObservableSet<E> for MappedSet<I, E>
where
    I: Eq + Hash + Clone + 'static,
    E: Eq + Hash + Clone + 'static,
{
    fn len(&self) -> usize {
        self.inner.core.getter_called();
        if let Some(active) = self.inner.active.borrow().as_ref() {
            return active.counts.len();
        }
        self.to_set().len()
    }

    fn contains(&self, value: &E) -> bool {
        self.inner.core.getter_called();
        if let Some(active) = self.inner.active.borrow().as_ref() {
            return active.counts.contains_key(value);
        }
        self.inner.contributions().values().any(|v| v == value)
    }

    fn to_set(&self) -> AHashSet<E> {
        self.inner.core.getter_called();
        if let Some(active) = self.inner.active.borrow().as_ref() {
            return active.counts.keys().cloned().collect();
        }
        self.inner.contributions().into_values().collect()
    }

    fn element_type(&self) -> Option<TypeToken> {
        self.inner.map.value_type()
    }

    fn subscribe_set(&self, listener: Box<dyn Fn(&SetDiff<E>)>) -> Subscription {
        self.inner.core.subscribe(listener)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::Observable;
    use crate::writable::{WritableMap, WritableSet};

    type Fixture = (WritableSet<u8>, WritableMap<u8, char>, MappedSet<u8, char>);

    fn fixture(elements: &[u8], entries: &[(u8, char)]) -> Fixture {
        let realm = Realm::new();
        let input = WritableSet::from_set(&realm, elements.iter().copied().collect());
        let map = WritableMap::from_map(&realm, entries.iter().copied().collect());
        let mapped = MappedSet::new(input.handle(), map.handle());
        (input, map, mapped)
    }

    fn set(items: &[char]) -> AHashSet<char> {
        items.iter().copied().collect()
    }

    fn recorded(mapped: &MappedSet<u8, char>) -> (Rc<RefCell<Vec<SetDiff<char>>>>, Subscription) {
        let log = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&log);
        let sub = mapped.subscribe_set(Box::new(move |d| sink.borrow_mut().push(d.clone())));
        (log, sub)
    }

    #[test]
    fn shared_values_are_counted() {
        let (input, _map, mapped) = fixture(&[1, 2, 3], &[(1, 'a'), (2, 'a'), (3, 'b')]);
        let (log, _sub) = recorded(&mapped);
        assert_eq!(mapped.to_set(), set(&['a', 'b']));
        assert_eq!(mapped.multiplicity(&'a'), 2);

        input.remove(&1).unwrap();
        assert!(log.borrow().is_empty(), "2 still maps to 'a'");
        input.remove(&2).unwrap();
        assert_eq!(log.borrow()[0].removals(), &set(&['a']));
        assert_eq!(mapped.to_set(), set(&['b']));
    }

    #[test]
    fn map_changes_swap_values() {
        let (_input, map, mapped) = fixture(&[1, 2], &[(1, 'a'), (2, 'b')]);
        let (log, _sub) = recorded(&mapped);
        map.put(2, 'a').unwrap();
        assert_eq!(log.borrow()[0].removals(), &set(&['b']));
        assert!(log.borrow()[0].additions().is_empty());
        map.put(1, 'c').unwrap();
        assert_eq!(log.borrow()[1].additions(), &set(&['c']));
        assert!(log.borrow()[1].removals().is_empty(), "2 still maps to 'a'");
        assert_eq!(mapped.to_set(), set(&['a', 'c']));
    }

    #[test]
    fn entries_outside_the_input_are_ignored() {
        let (input, map, mapped) = fixture(&[1], &[(1, 'a')]);
        let (log, _sub) = recorded(&mapped);
        map.put(9, 'z').unwrap();
        assert!(log.borrow().is_empty());
        input.insert(9).unwrap();
        assert_eq!(log.borrow()[0].additions(), &set(&['z']));
        input.insert(7).unwrap();
        assert_eq!(log.borrow().len(), 1, "7 has no entry");
        map.put(7, 'y').unwrap();
        assert_eq!(mapped.to_set(), set(&['a', 'y', 'z']));
    }

    #[test]
    fn inactive_set_recomputes() {
        let (input, map, mapped) = fixture(&[1, 2], &[(1, 'a'), (2, 'a')]);
        assert!(!mapped.is_active());
        assert_eq!(mapped.to_set(), set(&['a']));
        assert_eq!(mapped.multiplicity(&'a'), 2);
        map.put(2, 'b').unwrap();
        assert!(mapped.contains(&'b'));
        let sub = mapped.subscribe_stale(Box::new(|| {}));
        assert!(input.has_listeners());
        assert!(map.has_listeners());
        drop(sub);
        assert!(!input.has_listeners());
        assert!(!map.has_listeners());
    }

    #[test]
    fn disposing_the_input_disposes_the_set() {
        let (input, _map, mapped) = fixture(&[1], &[(1, 'a')]);
        input.dispose();
        assert!(mapped.is_disposed());
    }
}
