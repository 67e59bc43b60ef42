#![forbid(unsafe_code)]

//! Lazily computed diffs.
//!
//! A lazy diff keeps both states and defers the comparison until somebody
//! reads the diff; the result is memoised.
//!
//! These are for consumers only. Change listeners always receive a computed
//! diff, so no observable fires a lazy one. They suit code that holds two
//! snapshots of its own, such as the state before and after a batch it
//! drove, and may never need the difference between them.

use std::cell::OnceCell;
use std::hash::Hash;

use ahash::{AHashMap, AHashSet};

use crate::list::{ListDiff, compute_list_diff};
use crate::map::{MapDiff, compute_map_diff};
use crate::set::{SetDiff, compute_set_diff};

pub struct LazyListDiff<T> {
    old: Vec<T>,
    new: Vec<T>,
    diff: OnceCell<ListDiff<T>>,
}

impl<T: Clone + PartialEq> LazyListDiff<T> {
    pub fn new(old: Vec<T>, new: Vec<T>) -> Self {
        Self {
            old,
            new,
            diff: OnceCell::new(),
        }
    }

    pub fn get(&self) -> &ListDiff<T> {
        self.diff.get_or_init(|| compute_list_diff(&self.old, &self.new))
    }

    pub fn is_computed(&self) -> bool {
        self.diff.get().is_some()
    }

    pub fn old_state(&self) -> &[T] {
        &self.old
    }

    pub fn new_state(&self) -> &[T] {
        &self.new
    }

    pub fn into_diff(self) -> ListDiff<T> {
        match self.diff.into_inner() {
            Some(diff) => diff,
            None => compute_list_diff(&self.old, &self.new),
        }
    }
}

pub struct LazySetDiff<T: Eq + Hash> {
    old: AHashSet<T>,
    new: AHashSet<T>,
    diff: OnceCell<SetDiff<T>>,
}

impl<T: Eq + Hash + Clone> LazySetDiff<T> {
    pub fn new(old: AHashSet<T>, new: AHashSet<T>) -> Self {
        Self {
            old,
            new,
            diff: OnceCell::new(),
        }
    }

    pub fn get(&self) -> &SetDiff<T> {
        self.diff.get_or_init(|| compute_set_diff(&self.old, &self.new))
    }

    pub fn is_computed(&self) -> bool {
        self.diff.get().is_some()
    }
}

pub struct LazyMapDiff<K: Eq + Hash, V> {
    old: AHashMap<K, V>,
    new: AHashMap<K, V>,
    diff: OnceCell<MapDiff<K, V>>,
}

impl<K: Eq + Hash + Clone, V: Clone + PartialEq> LazyMapDiff<K, V> {
    pub fn new(old: AHashMap<K, V>, new: AHashMap<K, V>) -> Self {
        Self {
            old,
            new,
            diff: OnceCell::new(),
        }
    }

    pub fn get(&self) -> &MapDiff<K, V> {
        self.diff.get_or_init(|| compute_map_diff(&self.old, &self.new))
    }

    pub fn is_computed(&self) -> bool {
        self.diff.get().is_some()
    }
}
