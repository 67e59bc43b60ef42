#![no_main]

use arbitrary::Arbitrary;
use dflow_diff::{ListDiff, ListDiffEntry};
use libfuzzer_sys::fuzz_target;

#[derive(Arbitrary, Debug)]
struct FuzzEntry {
    position: u8,
    is_addition: bool,
    element: u8,
}

// Arbitrary diffs may address positions that do not exist; applying must
// fail cleanly and agree with simulation.
fuzz_target!(|input: (Vec<u8>, Vec<FuzzEntry>)| {
    let (list, entries) = input;
    if entries.len() > 128 {
        return;
    }
    let diff = ListDiff::new(
        entries
            .into_iter()
            .map(|e| {
                let position = usize::from(e.position);
                if e.is_addition {
                    ListDiffEntry::addition(position, e.element)
                } else {
                    ListDiffEntry::removal(position, e.element)
                }
            })
            .collect(),
    );

    let mut applied = list.clone();
    let applied_ok = diff.apply_to(&mut applied).is_ok();
    match diff.simulate_on(&list) {
        Ok(view) => {
            assert!(applied_ok, "simulation accepted a diff apply rejected");
            assert_eq!(view.to_vec(), applied);
            assert_eq!(view.len(), applied.len());
        }
        Err(_) => assert!(!applied_ok, "apply accepted a diff simulation rejected"),
    }
});
