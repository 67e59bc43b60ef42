#![forbid(unsafe_code)]

//! Two-hop composite map: `K → I` followed by `I → V`.
//!
//! The first map is wrapped in a [`BidiMap`] so the composite can ask which
//! keys still reference an intermediate value. The intermediate values are
//! published as the *range set*, and the second map is built from it by a
//! factory. The second map is free to follow the range set late, in
//! coalesced batches, or out of order.
//!
//! Every event is handled by reconciling the keys it touches: each key is
//! recomputed from the first map's current value and the second map's
//! current contents, never from what the second map was expected to report.
//!
//! # Ledgers
//!
//! All three ledgers are keyed by intermediate value and hold key sets, so
//! any number of keys may share, join or leave an intermediate in one diff.
//!
//! - `pending_adds[i]`: keys mapped to `i` that wait for the second map to
//!   hold `i`.
//! - `pending_changes[i]`: keys that moved away from `i` to an intermediate
//!   that is not resolved yet; they keep showing the value of `i`.
//! - `pending_removes[i]`: keys removed from the first map while `i` left the
//!   range set; they stay shown until the second map drops `i` or another
//!   key references `i` again.
//!
//! # Invariants
//!
//! 1. Once the second map holds exactly the range set, the composite shows
//!    `{k: second[first[k]]}` and every ledger is empty.
//! 2. The range set equals the set of values of the first map after each
//!    first-map diff has been processed.
//! 3. A shown key is either bound to its current intermediate or listed in
//!    exactly one of `pending_changes` and `pending_removes`.

use std::cell::RefCell;
use std::hash::Hash;
use std::rc::Rc;

use ahash::{AHashMap, AHashSet};
use dflow_core::logging::{debug, trace, warn};
use dflow_core::realm::Realm;
use dflow_core::token::TypeToken;
use dflow_diff::MapDiff;

use crate::bidi::BidiMap;
use crate::listeners::{ObservableCore, Subscription, impl_observable};
use crate::traits::{MapHandle, Observable, ObservableMap, ObservableSet, SetHandle};
use crate::writable::WritableSet;

pub struct CompositeMap<K: Eq + Hash + 'static, I: Eq + Hash + 'static, V: 'static> {
    inner: Rc<CompositeInner<K, I, V>>,
}

struct CompositeInner<K: Eq + Hash + 'static, I: Eq + Hash + 'static, V: 'static> {
    core: ObservableCore<MapDiff<K, V>>,
    first: BidiMap<K, I>,
    range_set: WritableSet<I>,
    second: MapHandle<I, V>,
    ledger: RefCell<Ledger<K, I, V>>,
    subscriptions: RefCell<Vec<Subscription>>,
}

struct Ledger<K, I, V> {
    shown: AHashMap<K, V>,
    /// Intermediate each shown key takes its value from.
    source: AHashMap<K, I>,
    /// Intermediate each unresolved key waits for.
    waiting: AHashMap<K, I>,
    pending_adds: AHashMap<I, AHashSet<K>>,
    pending_changes: AHashMap<I, AHashSet<K>>,
    pending_removes: AHashMap<I, AHashSet<K>>,
}

/// Why a shown key keeps the value of an intermediate it no longer maps to.
#[derive(Clone, Copy)]
enum Hold {
    Moving,
    Leaving,
}

impl<K: Eq + Hash, I: Eq + Hash, V> Clone for CompositeMap<K, I, V> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<K, I, V> CompositeMap<K, I, V>
where
    K: Eq + Hash + Clone + 'static,
    I: Eq + Hash + Clone + 'static,
    V: Clone + PartialEq + 'static,
{
    /// Compose `first` with the map `factory` builds over the range set.
    ///
    /// # Panics
    ///
    /// Panics when `first` or the factory's map belongs to a different realm.
    pub fn new(
        realm: &Realm,
        first: MapHandle<K, I>,
        factory: impl FnOnce(SetHandle<I>) -> MapHandle<I, V>,
    ) -> Self {
        let first = BidiMap::new(realm, first);
        let entries = first.to_map();
        let range_set = WritableSet::from_set(realm, entries.values().cloned().collect());
        let second = factory(range_set.handle());
        if let Err(err) = realm.ensure_same(second.realm()) {
            panic!("composite map second map: {err}");
        }

        let inner = Rc::new(CompositeInner {
            core: ObservableCore::passive(realm),
            first,
            range_set,
            second,
            ledger: RefCell::new(Ledger::new()),
            subscriptions: RefCell::new(Vec::new()),
        });
        {
            let mut ledger = inner.ledger.borrow_mut();
            let mut initial = MapDiff::empty();
            for key in entries.keys() {
                inner.reconcile(&mut ledger, &mut initial, key);
            }
        }
        CompositeInner::attach(&inner);
        Self { inner }
    }

    pub fn handle(&self) -> MapHandle<K, V> {
        Rc::new(self.clone())
    }

    /// Intermediate values the first map currently references.
    pub fn range_set(&self) -> SetHandle<I> {
        self.inner.range_set.handle()
    }

    /// Number of intermediates with unresolved ledger entries.
    pub fn pending(&self) -> usize {
        let ledger = self.inner.ledger.borrow();
        ledger.pending_adds.len() + ledger.pending_changes.len() + ledger.pending_removes.len()
    }
}

impl<K, I, V> CompositeInner<K, I, V>
where
    K: Eq + Hash + Clone + 'static,
    I: Eq + Hash + Clone + 'static,
    V: Clone + PartialEq + 'static,
{
    fn attach(this: &Rc<Self>) {
        let weak = Rc::downgrade(this);
        let first_changes = this.first.subscribe_map(Box::new(move |diff| {
            if let Some(composite) = weak.upgrade() {
                composite.first_changed(diff);
            }
        }));
        let weak = Rc::downgrade(this);
        let second_changes = this.second.subscribe_map(Box::new(move |diff| {
            if let Some(composite) = weak.upgrade() {
                composite.second_changed(diff);
            }
        }));
        let weak = Rc::downgrade(this);
        let first_stale = this.first.subscribe_stale(Box::new(move || {
            if let Some(composite) = weak.upgrade() {
                composite.core.fire_stale();
            }
        }));
        let weak = Rc::downgrade(this);
        let second_stale = this.second.subscribe_stale(Box::new(move || {
            if let Some(composite) = weak.upgrade() {
                composite.core.fire_stale();
            }
        }));
        let subscriptions = vec![first_changes, second_changes, first_stale, second_stale];
        *this.subscriptions.borrow_mut() = subscriptions;
    }

    /// Bring what `key` shows in line with both maps.
    fn reconcile(&self, ledger: &mut Ledger<K, I, V>, out: &mut MapDiff<K, V>, key: &K) {
        ledger.detach(key);
        let held = ledger.source.get(key).cloned();
        match self.first.get(key) {
            Some(intermediate) => {
                if let Some(value) = self.second.get(&intermediate) {
                    ledger.show(out, key, intermediate, value);
                    return;
                }
                trace!(message = "composite.pending_add", shown = held.is_some());
                ledger.waiting.insert(key.clone(), intermediate.clone());
                link(&mut ledger.pending_adds, intermediate, key.clone());
                self.hold(ledger, out, key, held, Hold::Moving);
            }
            None => {
                // Only an intermediate nothing references any more lingers.
                let retired = held
                    .as_ref()
                    .is_some_and(|source| self.first.keys_for(source).is_empty());
                if retired {
                    self.hold(ledger, out, key, held, Hold::Leaving);
                } else {
                    ledger.hide(out, key);
                }
            }
        }
    }

    /// Keep `key` on the value of `held` while the second map still has it.
    fn hold(
        &self,
        ledger: &mut Ledger<K, I, V>,
        out: &mut MapDiff<K, V>,
        key: &K,
        held: Option<I>,
        hold: Hold,
    ) {
        let Some(source) = held else {
            return;
        };
        let Some(value) = self.second.get(&source) else {
            ledger.hide(out, key);
            return;
        };
        let pending = match hold {
            Hold::Moving => &mut ledger.pending_changes,
            Hold::Leaving => &mut ledger.pending_removes,
        };
        link(pending, source.clone(), key.clone());
        ledger.show(out, key, source, value);
    }

    fn first_changed(&self, diff: &MapDiff<K, I>) {
        let mut out = MapDiff::empty();
        let mut additions = AHashSet::new();
        let mut removals = AHashSet::new();
        {
            let mut ledger = self.ledger.borrow_mut();
            let ledger = &mut *ledger;

            let mut affected: AHashSet<K> = diff
                .added_keys()
                .iter()
                .chain(diff.changed_keys())
                .chain(diff.removed_keys())
                .cloned()
                .collect();
            for key in diff.added_keys().iter().chain(diff.changed_keys()) {
                let Some(intermediate) = diff.new_value(key) else {
                    continue;
                };
                // Keys lingering on a referenced intermediate are released.
                if let Some(leaving) = ledger.pending_removes.get(intermediate) {
                    affected.extend(leaving.iter().cloned());
                }
                if !self.range_set.contains(intermediate) {
                    additions.insert(intermediate.clone());
                }
            }
            for key in diff.changed_keys().iter().chain(diff.removed_keys()) {
                let Some(intermediate) = diff.old_value(key) else {
                    continue;
                };
                if self.range_set.contains(intermediate)
                    && self.first.keys_for(intermediate).is_empty()
                {
                    removals.insert(intermediate.clone());
                }
            }
            for key in &affected {
                self.reconcile(ledger, &mut out, key);
            }
        }

        if !out.is_empty() {
            self.core.fire_change(&out);
        }
        if additions.is_empty() && removals.is_empty() {
            return;
        }
        debug!(
            message = "composite.range_update",
            added = additions.len(),
            removed = removals.len()
        );
        if let Err(err) = self.range_set.add_and_remove(additions, removals) {
            warn!(message = "composite.range_update_failed", error = %err);
        }
    }

    fn second_changed(&self, diff: &MapDiff<I, V>) {
        let mut out = MapDiff::empty();
        {
            let mut ledger = self.ledger.borrow_mut();
            let ledger = &mut *ledger;

            let mut affected: AHashSet<K> = AHashSet::new();
            let touched = diff
                .added_keys()
                .iter()
                .chain(diff.changed_keys())
                .chain(diff.removed_keys());
            for intermediate in touched {
                if diff.added_keys().contains(intermediate)
                    && !self.range_set.contains(intermediate)
                {
                    debug!(message = "composite.unrequested_intermediate");
                }
                affected.extend(self.first.keys_for(intermediate));
                affected.extend(ledger.held_by(intermediate));
            }
            if !diff.added_keys().is_empty() {
                trace!(
                    message = "composite.resolve_add",
                    intermediates = diff.added_keys().len(),
                    keys = affected.len()
                );
            }
            for key in &affected {
                self.reconcile(ledger, &mut out, key);
            }
        }

        if !out.is_empty() {
            self.core.fire_change(&out);
        }
    }

    fn is_stale(&self) -> bool {
        self.core.getter_called();
        self.first.is_stale() || self.second.is_stale()
    }

    fn dispose(&self) {
        if !self.core.dispose() {
            return;
        }
        let subscriptions = std::mem::take(&mut *self.subscriptions.borrow_mut());
        drop(subscriptions);
        self.second.dispose();
        self.range_set.dispose();
        self.first.dispose();
    }
}

fn link<K: Eq + Hash, I: Eq + Hash>(
    ledger: &mut AHashMap<I, AHashSet<K>>,
    intermediate: I,
    key: K,
) {
    ledger.entry(intermediate).or_default().insert(key);
}

fn unlink<K: Eq + Hash, I: Eq + Hash>(
    ledger: &mut AHashMap<I, AHashSet<K>>,
    intermediate: &I,
    key: &K,
) {
    if let Some(keys) = ledger.get_mut(intermediate) {
        keys.remove(key);
        if keys.is_empty() {
            ledger.remove(intermediate);
        }
    }
}

impl<K: Eq + Hash + Clone, I: Eq + Hash + Clone, V: Clone + PartialEq> Ledger<K, I, V> {
    fn new() -> Self {
        Self {
            shown: AHashMap::new(),
            source: AHashMap::new(),
            waiting: AHashMap::new(),
            pending_adds: AHashMap::new(),
            pending_changes: AHashMap::new(),
            pending_removes: AHashMap::new(),
        }
    }

    /// Take `key` out of every ledger.
    fn detach(&mut self, key: &K) {
        if let Some(intermediate) = self.waiting.remove(key) {
            unlink(&mut self.pending_adds, &intermediate, key);
        }
        if let Some(source) = self.source.get(key) {
            unlink(&mut self.pending_changes, source, key);
            unlink(&mut self.pending_removes, source, key);
        }
    }

    fn show(&mut self, out: &mut MapDiff<K, V>, key: &K, source: I, value: V) {
        self.source.insert(key.clone(), source);
        match self.shown.insert(key.clone(), value.clone()) {
            None => out.push_added(key.clone(), value),
            Some(old) if old != value => out.push_changed(key.clone(), old, value),
            Some(_) => {}
        }
    }

    fn hide(&mut self, out: &mut MapDiff<K, V>, key: &K) {
        self.source.remove(key);
        if let Some(old) = self.shown.remove(key) {
            out.push_removed(key.clone(), old);
        }
    }

    /// Shown keys that hold on to `intermediate` without mapping to it.
    fn held_by(&self, intermediate: &I) -> Vec<K> {
        let moving = self.pending_changes.get(intermediate).into_iter().flatten();
        let leaving = self.pending_removes.get(intermediate).into_iter().flatten();
        moving.chain(leaving).cloned().collect()
    }
}

impl_observable!(CompositeMap<K, I, V> where [
    K: Eq + Hash + Clone + 'static,
    I: Eq + Hash + Clone + 'static,
    V: Clone + PartialEq + 'static
]);

impl<K, I, V> ObservableMap<K, V> for CompositeMap<K, I, V>
where
    K: Eq + Hash + Clone + 'static,
    I: Eq + Hash + Clone + 'static,
    V: Clone + PartialEq + 'static,
{
    fn len(&self) -> usize {
        self.inner.core.getter_called();
        self.inner.ledger.borrow().shown.len()
    }

    fn contains_key(&self, key: &K) -> bool {
        self.inner.core.getter_called();
        self.inner.ledger.borrow().shown.contains_key(key)
    }

    fn get(&self, key: &K) -> Option<V> {
        self.inner.core.getter_called();
        self.inner.ledger.borrow().shown.get(key).cloned()
    }

    fn keys(&self) -> AHashSet<K> {
        self.inner.core.getter_called();
        self.inner.ledger.borrow().shown.keys().cloned().collect()
    }

    fn to_map(&self) -> AHashMap<K, V> {
        self.inner.core.getter_called();
        self.inner.ledger.borrow().shown.clone()
    }

    fn key_type(&self) -> Option<TypeToken> {
        self.inner.first.key_type()
    }

    fn value_type(&self) -> Option<TypeToken> {
        self.inner.second.value_type()
    }

    fn subscribe_map(&self, listener: Box<dyn Fn(&MapDiff<K, V>)>) -> Subscription {
        self.inner.core.subscribe(listener)
    }
}
