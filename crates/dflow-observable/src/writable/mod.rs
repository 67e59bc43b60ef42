#![forbid(unsafe_code)]

//! Mutable observable sources.
//!
//! These are the upstreams every composite ultimately derives from. They
//! have no activation hooks: their state is the source of truth whether or
//! not anyone listens.

pub mod list;
pub mod map;
pub mod set;
pub mod value;

pub use list::WritableList;
pub use map::WritableMap;
pub use set::WritableSet;
pub use value::WritableValue;
