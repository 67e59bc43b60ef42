#![forbid(unsafe_code)]

//! Diff engine: list, set, map, and value diffs.
//!
//! Diffs are plain immutable values. They can be computed from two states
//! ([`compute_list_diff`], [`compute_set_diff`], [`compute_map_diff`]),
//! replayed onto a copy of the old state (`apply_to`), or viewed as the new
//! state without copying (`simulate_on`). None of this needs an observable.
//!
//! ```
//! use dflow_diff::{ListDiffOp, compute_list_diff};
//!
//! let old = vec!['a', 'b', 'c'];
//! let new = vec!['b', 'a', 'c'];
//! let diff = compute_list_diff(&old, &new);
//! assert!(matches!(diff.ops()[..], [ListDiffOp::Move { .. }]));
//!
//! let mut replica = old.clone();
//! diff.apply_to(&mut replica).unwrap();
//! assert_eq!(replica, new);
//! ```

pub mod lazy;
pub mod list;
pub mod map;
pub mod set;
pub mod simulate;
pub mod value;

pub use lazy::{LazyListDiff, LazyMapDiff, LazySetDiff};
pub use list::{ListDiff, ListDiffEntry, ListDiffOp, compute_list_diff, compute_list_diff_by};
pub use map::{MapDiff, compute_map_diff, compute_map_diff_by};
pub use set::{SetDiff, compute_set_diff};
pub use simulate::Simulated;
pub use value::ValueDiff;
