#![forbid(unsafe_code)]

//! dflow public facade crate.
//!
//! Re-exports the diff engine and the observables; most users only need the
//! [`prelude`].
//!
//! ```
//! use dflow::prelude::*;
//!
//! let realm = Realm::new();
//! let a = WritableSet::from_set(&realm, [1, 2].into_iter().collect());
//! let b = WritableSet::from_set(&realm, [2, 3].into_iter().collect());
//! let union = UnionSet::new(&realm, vec![a.handle(), b.handle()]);
//! let _sub = union.subscribe_set(Box::new(|_| {}));
//! b.remove(&2).unwrap();
//! assert!(union.contains(&2));
//! ```

pub use dflow_core as core;
pub use dflow_diff as diff;
pub use dflow_observable as observable;

pub mod prelude {
    pub use dflow_core::{ObservableError, Realm, Result, TypeToken};
    pub use dflow_diff::{
        ListDiff, ListDiffEntry, ListDiffOp, MapDiff, SetDiff, ValueDiff, compute_list_diff,
        compute_map_diff, compute_set_diff,
    };
    pub use dflow_observable::{
        BidiMap, CompositeMap, ComputedMap, DetailList, DetailMap, DetailSet, DetailValue,
        DuplexingValue, EmptyList, KeyedValues, ListDetailValues, ListHandle, ListToSetAdapter,
        MapDetailValues, MapEntryValue, MapHandle, MapSink, MappedSet, Observable, ObservableList,
        ObservableMap, ObservableSet, ObservableValue, SelectValue, SetDetailValues, SetHandle,
        Subscription, UnionSet, UnmodifiableList, UnmodifiableMap, ValueHandle, WritableList,
        WritableMap, WritableSet, WritableValue,
    };
}
