#![forbid(unsafe_code)]

//! Set diffs.

use std::hash::Hash;

use ahash::AHashSet;

/// Additions and removals turning one set state into the next.
///
/// The two sides are disjoint; applying a diff to its base set yields
/// `(base ∪ additions) \ removals`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetDiff<T: Eq + Hash> {
    additions: AHashSet<T>,
    removals: AHashSet<T>,
}

impl<T: Eq + Hash> Default for SetDiff<T> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<T: Eq + Hash> SetDiff<T> {
    pub fn new(additions: AHashSet<T>, removals: AHashSet<T>) -> Self {
        debug_assert!(
            additions.is_disjoint(&removals),
            "set diff additions and removals overlap"
        );
        Self {
            additions,
            removals,
        }
    }

    pub fn empty() -> Self {
        Self {
            additions: AHashSet::new(),
            removals: AHashSet::new(),
        }
    }

    pub fn additions_only(additions: AHashSet<T>) -> Self {
        Self::new(additions, AHashSet::new())
    }

    pub fn removals_only(removals: AHashSet<T>) -> Self {
        Self::new(AHashSet::new(), removals)
    }

    #[inline]
    pub fn additions(&self) -> &AHashSet<T> {
        &self.additions
    }

    #[inline]
    pub fn removals(&self) -> &AHashSet<T> {
        &self.removals
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.additions.is_empty() && self.removals.is_empty()
    }

    pub fn into_parts(self) -> (AHashSet<T>, AHashSet<T>) {
        (self.additions, self.removals)
    }

    pub fn apply_to(&self, set: &mut AHashSet<T>)
    where
        T: Clone,
    {
        set.extend(self.additions.iter().cloned());
        for removed in &self.removals {
            set.remove(removed);
        }
    }

    /// The state `base` would be in after [`SetDiff::apply_to`].
    pub fn simulate_on(&self, base: &AHashSet<T>) -> AHashSet<T>
    where
        T: Clone,
    {
        let mut next = base.clone();
        self.apply_to(&mut next);
        next
    }
}

pub fn compute_set_diff<T: Eq + Hash + Clone>(old: &AHashSet<T>, new: &AHashSet<T>) -> SetDiff<T> {
    SetDiff {
        additions: new.difference(old).cloned().collect(),
        removals: old.difference(new).cloned().collect(),
    }
}
