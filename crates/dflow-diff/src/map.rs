#![forbid(unsafe_code)]

//! Map diffs.
//!
//! A [`MapDiff`] partitions the touched keys into added, removed, and changed
//! sets, which are pairwise disjoint. Old values are recorded for removed and
//! changed keys, new values for added and changed keys.

use std::hash::Hash;

use ahash::{AHashMap, AHashSet};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapDiff<K: Eq + Hash, V> {
    added: AHashSet<K>,
    removed: AHashSet<K>,
    changed: AHashSet<K>,
    old_values: AHashMap<K, V>,
    new_values: AHashMap<K, V>,
}

impl<K: Eq + Hash, V> Default for MapDiff<K, V> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<K: Eq + Hash, V> MapDiff<K, V> {
    pub fn empty() -> Self {
        Self {
            added: AHashSet::new(),
            removed: AHashSet::new(),
            changed: AHashSet::new(),
            old_values: AHashMap::new(),
            new_values: AHashMap::new(),
        }
    }

    #[inline]
    pub fn added_keys(&self) -> &AHashSet<K> {
        &self.added
    }

    #[inline]
    pub fn removed_keys(&self) -> &AHashSet<K> {
        &self.removed
    }

    #[inline]
    pub fn changed_keys(&self) -> &AHashSet<K> {
        &self.changed
    }

    /// Value before the change, for removed and changed keys.
    pub fn old_value(&self, key: &K) -> Option<&V> {
        self.old_values.get(key)
    }

    /// Value after the change, for added and changed keys.
    pub fn new_value(&self, key: &K) -> Option<&V> {
        self.new_values.get(key)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty()
    }

    /// Number of touched keys.
    pub fn len(&self) -> usize {
        self.added.len() + self.removed.len() + self.changed.len()
    }
}

impl<K: Eq + Hash + Clone, V> MapDiff<K, V> {
    pub fn single_add(key: K, value: V) -> Self {
        let mut diff = Self::empty();
        diff.push_added(key, value);
        diff
    }

    pub fn single_change(key: K, old: V, new: V) -> Self {
        let mut diff = Self::empty();
        diff.push_changed(key, old, new);
        diff
    }

    pub fn single_remove(key: K, old: V) -> Self {
        let mut diff = Self::empty();
        diff.push_removed(key, old);
        diff
    }

    /// Every entry of `map` removed.
    pub fn remove_all(map: AHashMap<K, V>) -> Self {
        let mut diff = Self::empty();
        for (key, value) in map {
            diff.push_removed(key, value);
        }
        diff
    }

    pub fn push_added(&mut self, key: K, value: V) {
        debug_assert!(!self.removed.contains(&key) && !self.changed.contains(&key));
        self.added.insert(key.clone());
        self.new_values.insert(key, value);
    }

    pub fn push_removed(&mut self, key: K, old: V) {
        debug_assert!(!self.added.contains(&key) && !self.changed.contains(&key));
        self.removed.insert(key.clone());
        self.old_values.insert(key, old);
    }

    /// Record a change; a key already recorded as changed keeps its first
    /// old value.
    pub fn push_changed(&mut self, key: K, old: V, new: V) {
        debug_assert!(!self.added.contains(&key) && !self.removed.contains(&key));
        if self.changed.insert(key.clone()) {
            self.old_values.insert(key.clone(), old);
        }
        self.new_values.insert(key, new);
    }

    pub fn apply_to(&self, map: &mut AHashMap<K, V>)
    where
        V: Clone,
    {
        for key in &self.removed {
            map.remove(key);
        }
        for key in self.added.iter().chain(&self.changed) {
            if let Some(value) = self.new_values.get(key) {
                map.insert(key.clone(), value.clone());
            }
        }
    }

    /// The state `base` would be in after [`MapDiff::apply_to`].
    pub fn simulate_on(&self, base: &AHashMap<K, V>) -> AHashMap<K, V>
    where
        V: Clone,
    {
        let mut next = base.clone();
        self.apply_to(&mut next);
        next
    }
}

pub fn compute_map_diff<K, V>(old: &AHashMap<K, V>, new: &AHashMap<K, V>) -> MapDiff<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone + PartialEq,
{
    compute_map_diff_by(old, new, V::eq)
}

/// Old keys present in `new` with an unequal value are changed, old keys
/// missing from `new` are removed, and the remaining new keys are added.
pub fn compute_map_diff_by<K, V>(
    old: &AHashMap<K, V>,
    new: &AHashMap<K, V>,
    eq: impl Fn(&V, &V) -> bool,
) -> MapDiff<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    let mut diff = MapDiff::empty();
    for (key, old_value) in old {
        match new.get(key) {
            Some(new_value) => {
                if !eq(old_value, new_value) {
                    diff.push_changed(key.clone(), old_value.clone(), new_value.clone());
                }
            }
            None => diff.push_removed(key.clone(), old_value.clone()),
        }
    }
    for (key, new_value) in new {
        if !old.contains_key(key) {
            diff.push_added(key.clone(), new_value.clone());
        }
    }
    diff
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(entries: &[(&'static str, i32)]) -> AHashMap<&'static str, i32> {
        entries.iter().copied().collect()
    }

    fn keys(items: &[&'static str]) -> AHashSet<&'static str> {
        items.iter().copied().collect()
    }

    #[test]
    fn diff_partitions_keys() {
        let old = map(&[("a", 1), ("b", 2), ("c", 3)]);
        let new = map(&[("b", 2), ("c", 30), ("d", 4)]);
        let diff = compute_map_diff(&old, &new);
        assert_eq!(diff.added_keys(), &keys(&["d"]));
        assert_eq!(diff.removed_keys(), &keys(&["a"]));
        assert_eq!(diff.changed_keys(), &keys(&["c"]));
        assert_eq!(diff.old_value(&"a"), Some(&1));
        assert_eq!(diff.old_value(&"c"), Some(&3));
        assert_eq!(diff.new_value(&"c"), Some(&30));
        assert_eq!(diff.new_value(&"d"), Some(&4));
        assert_eq!(diff.new_value(&"b"), None);
        assert_eq!(diff.simulate_on(&old), new);
    }

    #[test]
    fn single_constructors() {
        let diff = MapDiff::single_change("k", 1, 2);
        assert_eq!(diff.len(), 1);
        assert_eq!(diff.old_value(&"k"), Some(&1));
        assert_eq!(diff.new_value(&"k"), Some(&2));

        let diff = MapDiff::remove_all(map(&[("x", 1), ("y", 2)]));
        assert_eq!(diff.removed_keys().len(), 2);
        let mut target = map(&[("x", 1), ("y", 2)]);
        diff.apply_to(&mut target);
        assert!(target.is_empty());
    }

    #[test]
    fn repeated_change_keeps_first_old_value() {
        let mut diff = MapDiff::empty();
        diff.push_changed("k", 1, 2);
        diff.push_changed("k", 2, 3);
        assert_eq!(diff.old_value(&"k"), Some(&1));
        assert_eq!(diff.new_value(&"k"), Some(&3));
    }
}
