//! Property tests for the reference-counted union against a model.
//!
//! 1. While listened to, the union equals the set union of its children
//!    after every edit.
//! 2. Replaying the union's diffs onto its initial snapshot reproduces it.
//! 3. Every fired diff is non-empty, and its additions and removals are
//!    disjoint.
//! 4. Deactivated and reactivated unions agree with the model.

use std::cell::RefCell;
use std::rc::Rc;

use ahash::AHashSet;
use dflow_core::Realm;
use dflow_diff::SetDiff;
use dflow_observable::{ObservableSet, UnionSet, WritableSet};
use proptest::prelude::*;

// ── Helpers ─────────────────────────────────────────────────────────────

const CHILDREN: usize = 3;

#[derive(Debug, Clone)]
enum Edit {
    Insert(usize, u8),
    Remove(usize, u8),
    Swap(usize, Vec<u8>, Vec<u8>),
    Clear(usize),
}

fn edit() -> impl Strategy<Value = Edit> {
    let child = 0..CHILDREN;
    prop_oneof![
        3 => (child.clone(), 0u8..8).prop_map(|(c, e)| Edit::Insert(c, e)),
        2 => (child.clone(), 0u8..8).prop_map(|(c, e)| Edit::Remove(c, e)),
        2 => (
            child.clone(),
            prop::collection::vec(0u8..8, 0..4),
            prop::collection::vec(0u8..8, 0..4)
        )
            .prop_map(|(c, add, remove)| Edit::Swap(c, add, remove)),
        1 => child.prop_map(Edit::Clear),
    ]
}

fn model(children: &[WritableSet<u8>]) -> AHashSet<u8> {
    children.iter().flat_map(|child| child.to_set()).collect()
}

fn perform(children: &[WritableSet<u8>], edit: &Edit) {
    match edit {
        Edit::Insert(c, e) => {
            children[*c].insert(*e).expect("insert");
        }
        Edit::Remove(c, e) => {
            children[*c].remove(e).expect("remove");
        }
        Edit::Swap(c, add, remove) => {
            let add: AHashSet<u8> = add.iter().copied().collect();
            let remove: AHashSet<u8> =
                remove.iter().copied().filter(|e| !add.contains(e)).collect();
            children[*c].add_and_remove(add, remove).expect("add_and_remove");
        }
        Edit::Clear(c) => children[*c].clear().expect("clear"),
    }
}

proptest! {
    // ═════════════════════════════════════════════════════════════════════
    // 1–3. Active union follows the model
    // ═════════════════════════════════════════════════════════════════════

    #[test]
    fn union_matches_model(edits in prop::collection::vec(edit(), 1..32)) {
        let realm = Realm::new();
        let children: Vec<WritableSet<u8>> =
            (0..CHILDREN).map(|_| WritableSet::new(&realm)).collect();
        let union = UnionSet::new(&realm, children.iter().map(WritableSet::handle).collect());

        let fired: Rc<RefCell<Vec<SetDiff<u8>>>> = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&fired);
        let _sub = union.subscribe_set(Box::new(move |d| sink.borrow_mut().push(d.clone())));
        let mut replica = union.to_set();

        for edit in &edits {
            perform(&children, edit);
            prop_assert_eq!(union.to_set(), model(&children));
        }

        for diff in fired.borrow().iter() {
            prop_assert!(!diff.is_empty());
            prop_assert!(diff.additions().is_disjoint(diff.removals()));
            diff.apply_to(&mut replica);
        }
        prop_assert_eq!(replica, union.to_set());
    }

    // ═════════════════════════════════════════════════════════════════════
    // 4. Activation toggling
    // ═════════════════════════════════════════════════════════════════════

    #[test]
    fn toggled_union_matches_model(edits in prop::collection::vec(edit(), 1..24)) {
        let realm = Realm::new();
        let children: Vec<WritableSet<u8>> =
            (0..CHILDREN).map(|_| WritableSet::new(&realm)).collect();
        let union = UnionSet::new(&realm, children.iter().map(WritableSet::handle).collect());

        let mut sub = None;
        for (n, edit) in edits.iter().enumerate() {
            if n % 3 == 0 {
                sub = match sub {
                    Some(_) => None,
                    None => Some(union.subscribe_set(Box::new(|_| {}))),
                };
            }
            perform(&children, edit);
            prop_assert_eq!(union.is_active(), sub.is_some());
            prop_assert_eq!(union.to_set(), model(&children));
            prop_assert_eq!(union.len(), model(&children).len());
        }
    }
}
