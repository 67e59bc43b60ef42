#![no_main]

use dflow_diff::compute_list_diff;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|input: (Vec<u8>, Vec<u8>)| {
    let (old, new) = input;
    if old.len() > 256 || new.len() > 256 {
        return;
    }
    // Small alphabet so duplicates and moves are common.
    let old: Vec<u8> = old.into_iter().map(|b| b % 8).collect();
    let new: Vec<u8> = new.into_iter().map(|b| b % 8).collect();

    let diff = compute_list_diff(&old, &new);
    let mut replayed = old.clone();
    diff.apply_to(&mut replayed).expect("computed diff applies");
    assert_eq!(replayed, new);

    let simulated = diff.simulate_on(&old).expect("computed diff simulates");
    assert_eq!(simulated.to_vec(), new);
});
