#![forbid(unsafe_code)]

//! List diffs.
//!
//! A [`ListDiff`] is an ordered sequence of single-element insertions and
//! removals. Entries are positional *at the moment they are applied*: each one
//! addresses the list as left behind by the entries before it, so replaying
//! them in order onto the pre-change list yields the post-change list.
//!
//! Consumers that care about moves and replacements call [`ListDiff::accept`]
//! which classifies adjacent opposite-polarity entries into [`ListDiffOp`]s
//! without changing what the diff means.
//!
//! # Invariants
//!
//! 1. `compute_list_diff(old, new).apply_to(&mut old)` leaves `old == new`.
//! 2. `compute_list_diff(l, l)` is empty.
//! 3. Classification is a pure view: `accept` never mutates the entries and
//!    replaying its operations is equivalent to replaying the raw entries.

use std::fmt;

use dflow_core::error::{ObservableError, Result};

use crate::simulate::Simulated;

// ─── Entries ─────────────────────────────────────────────────────────────────

/// One insertion or removal at `position`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListDiffEntry<T> {
    pub position: usize,
    pub is_addition: bool,
    pub element: T,
}

impl<T> ListDiffEntry<T> {
    pub fn addition(position: usize, element: T) -> Self {
        Self {
            position,
            is_addition: true,
            element,
        }
    }

    pub fn removal(position: usize, element: T) -> Self {
        Self {
            position,
            is_addition: false,
            element,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> ListDiffEntry<U> {
        ListDiffEntry {
            position: self.position,
            is_addition: self.is_addition,
            element: f(self.element),
        }
    }
}

impl<T: fmt::Debug> fmt::Display for ListDiffEntry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.is_addition { '+' } else { '-' };
        write!(f, "{sign}{}:{:?}", self.position, self.element)
    }
}

// ─── Classified operations ───────────────────────────────────────────────────

/// A classified list operation, as reported by [`ListDiff::accept`].
///
/// `Move` means "remove at `from`, then insert at `to`" with `to` addressing
/// the list after the removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListDiffOp<'a, T> {
    Add { index: usize, element: &'a T },
    Remove { index: usize, element: &'a T },
    Replace { index: usize, old: &'a T, new: &'a T },
    Move { from: usize, to: usize, element: &'a T },
}

// ─── ListDiff ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListDiff<T> {
    entries: Vec<ListDiffEntry<T>>,
}

impl<T> Default for ListDiff<T> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<T> ListDiff<T> {
    #[must_use]
    pub fn new(entries: Vec<ListDiffEntry<T>>) -> Self {
        Self { entries }
    }

    #[must_use]
    pub fn empty() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    #[must_use]
    pub fn single(entry: ListDiffEntry<T>) -> Self {
        Self {
            entries: vec![entry],
        }
    }

    #[must_use]
    pub fn pair(first: ListDiffEntry<T>, second: ListDiffEntry<T>) -> Self {
        Self {
            entries: vec![first, second],
        }
    }

    #[inline]
    pub fn entries(&self) -> &[ListDiffEntry<T>] {
        &self.entries
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ListDiffEntry<T>> {
        self.entries.iter()
    }

    pub fn into_entries(self) -> Vec<ListDiffEntry<T>> {
        self.entries
    }

    /// Translate every element, keeping positions and polarity.
    pub fn map<U>(self, mut f: impl FnMut(T) -> U) -> ListDiff<U> {
        ListDiff {
            entries: self.entries.into_iter().map(|e| e.map(&mut f)).collect(),
        }
    }

    /// Classify the entries with a caller-supplied element equality.
    ///
    /// Adjacent entries of opposite polarity are folded into a single
    /// `Replace` (same position) or `Move` (equal elements). An addition
    /// followed by a removal is first normalised to remove-then-add order by
    /// shifting whichever position the other entry displaced; when the two
    /// cancel out at the same index the addition is reported alone and the
    /// scan resumes at the removal.
    pub fn accept_by<'a>(
        &'a self,
        eq: impl Fn(&T, &T) -> bool,
        mut visit: impl FnMut(ListDiffOp<'a, T>),
    ) {
        let entries = &self.entries;
        let mut i = 0;
        while i < entries.len() {
            let entry = &entries[i];
            if let Some(next) = entries.get(i + 1)
                && entry.is_addition != next.is_addition
            {
                let (mut add_pos, add_elem, mut remove_pos, remove_elem) = if entry.is_addition {
                    (entry.position, &entry.element, next.position, &next.element)
                } else {
                    (next.position, &next.element, entry.position, &entry.element)
                };
                if entry.is_addition {
                    if add_pos > remove_pos {
                        add_pos -= 1;
                    } else if remove_pos > add_pos {
                        remove_pos -= 1;
                    } else {
                        visit(ListDiffOp::Add {
                            index: entry.position,
                            element: &entry.element,
                        });
                        i += 1;
                        continue;
                    }
                }
                if remove_pos == add_pos {
                    visit(ListDiffOp::Replace {
                        index: remove_pos,
                        old: remove_elem,
                        new: add_elem,
                    });
                    i += 2;
                    continue;
                }
                if eq(remove_elem, add_elem) {
                    visit(ListDiffOp::Move {
                        from: remove_pos,
                        to: add_pos,
                        element: &entry.element,
                    });
                    i += 2;
                    continue;
                }
            }
            if entry.is_addition {
                visit(ListDiffOp::Add {
                    index: entry.position,
                    element: &entry.element,
                });
            } else {
                visit(ListDiffOp::Remove {
                    index: entry.position,
                    element: &entry.element,
                });
            }
            i += 1;
        }
    }
}

impl<T: PartialEq> ListDiff<T> {
    /// Classify the entries using `PartialEq`; see [`ListDiff::accept_by`].
    pub fn accept<'a>(&'a self, visit: impl FnMut(ListDiffOp<'a, T>)) {
        self.accept_by(T::eq, visit);
    }

    /// Collected classification.
    pub fn ops(&self) -> Vec<ListDiffOp<'_, T>> {
        let mut ops = Vec::with_capacity(self.entries.len());
        self.accept(|op| ops.push(op));
        ops
    }
}

impl<T: Clone + PartialEq> ListDiff<T> {
    /// Replay the diff onto `list`.
    ///
    /// Fails with [`ObservableError::IndexOutOfBounds`] when an operation
    /// addresses a position `list` does not have; operations before the
    /// failing one have already been applied.
    pub fn apply_to(&self, list: &mut Vec<T>) -> Result<()> {
        for op in self.ops() {
            match op {
                ListDiffOp::Add { index, element } => {
                    check_insert(index, list.len())?;
                    list.insert(index, element.clone());
                }
                ListDiffOp::Remove { index, .. } => {
                    check_access(index, list.len())?;
                    list.remove(index);
                }
                ListDiffOp::Replace { index, new, .. } => {
                    check_access(index, list.len())?;
                    list[index] = new.clone();
                }
                ListDiffOp::Move { from, to, .. } => {
                    check_access(from, list.len())?;
                    check_access(to, list.len())?;
                    let moved = list.remove(from);
                    list.insert(to, moved);
                }
            }
        }
        Ok(())
    }

    /// A read-only view of `list` as it would look after [`apply_to`].
    ///
    /// [`apply_to`]: ListDiff::apply_to
    pub fn simulate_on<'a>(&'a self, list: &'a [T]) -> Result<Simulated<'a, T>> {
        let mut view = Simulated::new(list);
        for op in self.ops() {
            match op {
                ListDiffOp::Add { index, element } => view.insert(index, element)?,
                ListDiffOp::Remove { index, .. } => view.remove(index)?,
                ListDiffOp::Replace { index, new, .. } => {
                    view.remove(index)?;
                    view.insert(index, new)?;
                }
                ListDiffOp::Move { from, to, element } => {
                    view.remove(from)?;
                    view.insert(to, element)?;
                }
            }
        }
        Ok(view)
    }
}

impl<T: fmt::Debug> fmt::Display for ListDiff<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ListDiff[")?;
        for (i, entry) in self.entries.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{entry}")?;
        }
        f.write_str("]")
    }
}

impl<'a, T> IntoIterator for &'a ListDiff<T> {
    type Item = &'a ListDiffEntry<T>;
    type IntoIter = std::slice::Iter<'a, ListDiffEntry<T>>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

fn check_access(index: usize, len: usize) -> Result<()> {
    if index < len {
        Ok(())
    } else {
        Err(ObservableError::out_of_bounds(index, len))
    }
}

fn check_insert(index: usize, len: usize) -> Result<()> {
    if index <= len {
        Ok(())
    } else {
        Err(ObservableError::out_of_bounds(index, len))
    }
}

// ─── Diff computation ────────────────────────────────────────────────────────

/// Compute a diff turning `old` into `new`, comparing with `PartialEq`.
pub fn compute_list_diff<T: Clone + PartialEq>(old: &[T], new: &[T]) -> ListDiff<T> {
    compute_list_diff_by(old, new, T::eq)
}

/// Compute a diff turning `old` into `new` with a caller-supplied equality.
///
/// Walks `new` by index over a working copy of `old`, preferring removals and
/// moves of out-of-place elements over re-inserting them, then drops whatever
/// is left past the end back to front.
pub fn compute_list_diff_by<T: Clone>(
    old: &[T],
    new: &[T],
    eq: impl Fn(&T, &T) -> bool,
) -> ListDiff<T> {
    let mut work: Vec<T> = old.to_vec();
    let mut entries = Vec::new();

    for (index, new_value) in new.iter().enumerate() {
        if work.len() <= index {
            entries.push(ListDiffEntry::addition(index, new_value.clone()));
            continue;
        }
        loop {
            let old_value = &work[index];
            if eq(old_value, new_value) {
                break;
            }
            let Some(old_index_of_new) = index_of(&work, new_value, index, &eq) else {
                work.insert(index, new_value.clone());
                entries.push(ListDiffEntry::addition(index, new_value.clone()));
                break;
            };
            match index_of(new, old_value, index, &eq) {
                None => {
                    let removed = work.remove(index);
                    entries.push(ListDiffEntry::removal(index, removed));
                }
                Some(new_index_of_old) if new_index_of_old > old_index_of_new => {
                    // The target may lie past the current end; later
                    // insertions in front of it carry it into place.
                    let target = new_index_of_old.min(work.len() - 1);
                    let moved = work.remove(index);
                    entries.push(ListDiffEntry::removal(index, moved.clone()));
                    entries.push(ListDiffEntry::addition(target, moved.clone()));
                    work.insert(target, moved);
                }
                Some(_) => {
                    let moved = work.remove(old_index_of_new);
                    entries.push(ListDiffEntry::removal(old_index_of_new, moved.clone()));
                    entries.push(ListDiffEntry::addition(index, moved.clone()));
                    work.insert(index, moved);
                    break;
                }
            }
        }
    }

    for position in (new.len()..work.len()).rev() {
        entries.push(ListDiffEntry::removal(position, work[position].clone()));
    }

    ListDiff::new(entries)
}

fn index_of<T>(list: &[T], item: &T, from: usize, eq: &impl Fn(&T, &T) -> bool) -> Option<usize> {
    list.get(from..)?
        .iter()
        .position(|candidate| eq(candidate, item))
        .map(|offset| offset + from)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chars(s: &str) -> Vec<char> {
        s.chars().collect()
    }

    fn replay(old: &str, new: &str) -> ListDiff<char> {
        let (old, new) = (chars(old), chars(new));
        let diff = compute_list_diff(&old, &new);
        let mut applied = old.clone();
        diff.apply_to(&mut applied).expect("diff applies");
        assert_eq!(applied, new, "diff {diff} does not replay");
        diff
    }

    #[test]
    fn identical_lists_produce_no_entries() {
        assert!(replay("abc", "abc").is_empty());
        assert!(replay("", "").is_empty());
    }

    #[test]
    fn append_and_truncate() {
        let diff = replay("ab", "abcd");
        assert_eq!(
            diff.entries(),
            &[
                ListDiffEntry::addition(2, 'c'),
                ListDiffEntry::addition(3, 'd')
            ]
        );
        let diff = replay("abcd", "ab");
        assert_eq!(
            diff.entries(),
            &[
                ListDiffEntry::removal(3, 'd'),
                ListDiffEntry::removal(2, 'c')
            ]
        );
    }

    #[test]
    fn swap_of_first_two_is_a_single_move() {
        let diff = replay("abc", "bac");
        assert_eq!(
            diff.ops(),
            vec![ListDiffOp::Move {
                from: 1,
                to: 0,
                element: &'b'
            }]
        );
    }

    #[test]
    fn single_substitution_is_a_replace() {
        let diff = replay("abc", "axc");
        assert_eq!(
            diff.ops(),
            vec![ListDiffOp::Replace {
                index: 1,
                old: &'b',
                new: &'x'
            }]
        );
    }

    #[test]
    fn add_then_remove_at_same_index_is_reported_as_add_then_remove() {
        let diff = ListDiff::pair(ListDiffEntry::addition(1, 'x'), ListDiffEntry::removal(1, 'x'));
        assert_eq!(
            diff.ops(),
            vec![
                ListDiffOp::Add {
                    index: 1,
                    element: &'x'
                },
                ListDiffOp::Remove {
                    index: 1,
                    element: &'x'
                }
            ]
        );
        let mut list = chars("ab");
        diff.apply_to(&mut list).expect("applies");
        assert_eq!(list, chars("ab"));
    }

    #[test]
    fn add_before_remove_is_normalised_into_a_replace() {
        // +3 then -2 on "abcd": "abcXd" -> "abXd", i.e. c replaced by X at 2.
        let diff = ListDiff::pair(ListDiffEntry::addition(3, 'X'), ListDiffEntry::removal(2, 'c'));
        assert_eq!(
            diff.ops(),
            vec![ListDiffOp::Replace {
                index: 2,
                old: &'c',
                new: &'X'
            }]
        );
        let mut list = chars("abcd");
        diff.apply_to(&mut list).expect("applies");
        assert_eq!(list, chars("abXd"));
    }

    #[test]
    fn add_before_later_remove_of_same_element_is_a_move() {
        // "abcdef" + d@1 -> "adbcdef", then -4 (the old d) -> "adbcef".
        let diff = ListDiff::pair(ListDiffEntry::addition(1, 'd'), ListDiffEntry::removal(4, 'd'));
        assert_eq!(
            diff.ops(),
            vec![ListDiffOp::Move {
                from: 3,
                to: 1,
                element: &'d'
            }]
        );
        let mut list = chars("abcdef");
        diff.apply_to(&mut list).expect("applies");
        assert_eq!(list, chars("adbcef"));
    }

    #[test]
    fn replay_handles_reorderings_and_churn() {
        replay("abcdef", "fedcba");
        replay("abcdef", "bdfxyz");
        replay("aaabbb", "bababa");
        replay("abc", "");
        replay("", "xyz");
        replay("abcde", "eabcd");
        replay("abcde", "bcdea");
    }

    #[test]
    fn apply_to_rejects_mismatched_target() {
        let diff = ListDiff::single(ListDiffEntry::removal(5, 'z'));
        let mut list = chars("ab");
        assert_eq!(
            diff.apply_to(&mut list),
            Err(ObservableError::out_of_bounds(5, 2))
        );
    }

    #[test]
    fn custom_equality_drives_matching() {
        let old = vec!["A", "b"];
        let new = vec!["a", "B"];
        let diff = compute_list_diff_by(&old, &new, |a: &&str, b: &&str| a.eq_ignore_ascii_case(b));
        assert!(diff.is_empty());
    }

    #[test]
    fn map_keeps_positions() {
        let diff = replay("ab", "ba").map(|c| c.to_ascii_uppercase());
        assert!(diff.iter().all(|e| e.element.is_ascii_uppercase()));
    }

    #[test]
    fn display_lists_signed_entries() {
        let diff = ListDiff::pair(ListDiffEntry::removal(0, 'a'), ListDiffEntry::addition(1, 'b'));
        assert_eq!(diff.to_string(), "ListDiff[-0:'a', +1:'b']");
    }
}
