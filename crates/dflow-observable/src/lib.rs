#![forbid(unsafe_code)]

//! Observable values and collections that report every change as a
//! replayable diff.
//!
//! - [`writable`]: mutable sources ([`WritableValue`], [`WritableList`],
//!   [`WritableSet`], [`WritableMap`]).
//! - Composites deriving their state from upstreams: [`UnionSet`],
//!   [`BidiMap`], [`CompositeMap`], [`ComputedMap`], and the
//!   master/detail family in [`detail`].
//! - Read-only [`view`]s and derived [`value`]s.
//!
//! # Architecture
//!
//! Observables are `Rc` handles over an inner state with interior
//! mutability, confined to one [`Realm`](dflow_core::Realm). Upstream
//! subscriptions hold `Weak` references to the composite, so ownership only
//! ever points downstream. Composites subscribe to their upstreams while
//! someone listens to them and answer queries by recomputation otherwise.
//!
//! # Invariants
//!
//! 1. One upstream change produces at most one diff per composite, fired
//!    after the composite's own state reflects the change.
//! 2. Replaying every fired diff onto a snapshot taken at subscription time
//!    reproduces the observable's current state.
//! 3. Dropping the last listener releases every upstream subscription.
//! 4. Dispose is idempotent and permanent.

pub mod bidi;
pub mod composite;
pub mod computed_map;
pub mod detail;
pub mod listeners;
pub mod stale;
pub mod traits;
pub mod union;
pub mod value;
pub mod view;
pub mod writable;

pub use bidi::BidiMap;
pub use composite::CompositeMap;
pub use computed_map::{ComputedMap, KeyedValues, MapSink};
pub use detail::{
    DetailList, DetailMap, DetailSet, DetailValue, ListDetailValues, MapDetailValues,
    SetDetailValues,
};
pub use listeners::Subscription;
pub use stale::{StaleTransition, StalenessTracker};
pub use traits::{
    ListHandle, MapHandle, Observable, ObservableList, ObservableMap, ObservableSet,
    ObservableValue, SetHandle, ValueHandle,
};
pub use union::UnionSet;
pub use value::{DuplexingValue, MapEntryValue, SelectValue};
pub use view::{EmptyList, ListToSetAdapter, MappedSet, UnmodifiableList, UnmodifiableMap};
pub use writable::{WritableList, WritableMap, WritableSet, WritableValue};
