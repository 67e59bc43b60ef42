//! Property-based invariant tests for the dflow diff algorithms.
//!
//! These tests verify structural invariants that must hold for **any** pair
//! of states:
//!
//! 1. Replaying `compute_list_diff(old, new)` onto `old` yields `new`.
//! 2. Identical lists produce an empty diff.
//! 3. `simulate_on` agrees with `apply_to` and never copies the source.
//! 4. Replaying the classified operations is equivalent to replaying the raw
//!    entries.
//! 5. Set diff additions are exactly `new \ old`, removals exactly `old \ new`.
//! 6. Map diff key sets are pairwise disjoint and cover every key whose
//!    presence or value differs.
//! 7. The list diff is deterministic.

use ahash::{AHashMap, AHashSet};
use dflow_diff::{
    ListDiff, ListDiffEntry, compute_list_diff, compute_map_diff, compute_set_diff,
};
use proptest::prelude::*;

// ── Helpers ─────────────────────────────────────────────────────────────

/// Short lists over a tiny alphabet, so duplicates and reorders are common.
fn small_list() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(0u8..6, 0..12)
}

fn small_set() -> impl Strategy<Value = AHashSet<u8>> {
    prop::collection::vec(0u8..16, 0..12).prop_map(|v| v.into_iter().collect())
}

fn small_map() -> impl Strategy<Value = AHashMap<u8, u8>> {
    prop::collection::vec((0u8..10, 0u8..4), 0..10).prop_map(|v| v.into_iter().collect())
}

/// Replay entries one by one, without classification.
fn replay_raw(diff: &ListDiff<u8>, list: &mut Vec<u8>) {
    for ListDiffEntry {
        position,
        is_addition,
        element,
    } in diff.iter()
    {
        if *is_addition {
            list.insert(*position, *element);
        } else {
            assert_eq!(list.remove(*position), *element, "removed wrong element");
        }
    }
}

proptest! {
    // ═════════════════════════════════════════════════════════════════════
    // 1. Round trip
    // ═════════════════════════════════════════════════════════════════════

    #[test]
    fn list_diff_round_trips(old in small_list(), new in small_list()) {
        let diff = compute_list_diff(&old, &new);
        let mut replica = old.clone();
        diff.apply_to(&mut replica).expect("computed diff applies");
        prop_assert_eq!(replica, new);
    }

    // ═════════════════════════════════════════════════════════════════════
    // 2. Identity
    // ═════════════════════════════════════════════════════════════════════

    #[test]
    fn identical_lists_give_empty_diff(list in small_list()) {
        prop_assert!(compute_list_diff(&list, &list).is_empty());
    }

    // ═════════════════════════════════════════════════════════════════════
    // 3. Simulation equals replay
    // ═════════════════════════════════════════════════════════════════════

    #[test]
    fn simulation_matches_replay(old in small_list(), new in small_list()) {
        let diff = compute_list_diff(&old, &new);
        let view = diff.simulate_on(&old).expect("computed diff simulates");
        prop_assert_eq!(view.len(), new.len());
        prop_assert_eq!(view.to_vec(), new.clone());
        for (i, expected) in new.iter().enumerate() {
            prop_assert_eq!(view.get(i), Some(expected));
        }
        prop_assert!(view.segment_count() <= 2 * diff.len() + 1);
    }

    // ═════════════════════════════════════════════════════════════════════
    // 4. Classification is a pure view
    // ═════════════════════════════════════════════════════════════════════

    #[test]
    fn classified_replay_matches_raw_replay(old in small_list(), new in small_list()) {
        let diff = compute_list_diff(&old, &new);
        let mut raw = old.clone();
        replay_raw(&diff, &mut raw);
        let mut classified = old.clone();
        diff.apply_to(&mut classified).expect("applies");
        prop_assert_eq!(raw, classified);
    }

    // ═════════════════════════════════════════════════════════════════════
    // 5. Set partition
    // ═════════════════════════════════════════════════════════════════════

    #[test]
    fn set_diff_partitions(old in small_set(), new in small_set()) {
        let diff = compute_set_diff(&old, &new);
        let expected_adds: AHashSet<u8> = new.difference(&old).copied().collect();
        let expected_removes: AHashSet<u8> = old.difference(&new).copied().collect();
        prop_assert_eq!(diff.additions(), &expected_adds);
        prop_assert_eq!(diff.removals(), &expected_removes);
        prop_assert_eq!(diff.simulate_on(&old), new);
    }

    // ═════════════════════════════════════════════════════════════════════
    // 6. Map partition
    // ═════════════════════════════════════════════════════════════════════

    #[test]
    fn map_diff_keys_are_disjoint_and_cover_changes(old in small_map(), new in small_map()) {
        let diff = compute_map_diff(&old, &new);
        prop_assert!(diff.added_keys().is_disjoint(diff.removed_keys()));
        prop_assert!(diff.added_keys().is_disjoint(diff.changed_keys()));
        prop_assert!(diff.removed_keys().is_disjoint(diff.changed_keys()));

        let keys: AHashSet<u8> = old.keys().chain(new.keys()).copied().collect();
        for key in keys {
            let touched = diff.added_keys().contains(&key)
                || diff.removed_keys().contains(&key)
                || diff.changed_keys().contains(&key);
            prop_assert_eq!(touched, old.get(&key) != new.get(&key), "key {}", key);
        }
        prop_assert_eq!(diff.simulate_on(&old), new);
    }

    // ═════════════════════════════════════════════════════════════════════
    // 7. Determinism
    // ═════════════════════════════════════════════════════════════════════

    #[test]
    fn list_diff_is_deterministic(old in small_list(), new in small_list()) {
        prop_assert_eq!(compute_list_diff(&old, &new), compute_list_diff(&old, &new));
    }
}
