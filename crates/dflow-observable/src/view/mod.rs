#![forbid(unsafe_code)]

//! Read-only and derived views over observable collections.

mod empty;
mod list_to_set;
mod mapped_set;
mod unmodifiable;
mod unmodifiable_map;

pub use empty::EmptyList;
pub use list_to_set::ListToSetAdapter;
pub use mapped_set::MappedSet;
pub use unmodifiable::UnmodifiableList;
pub use unmodifiable_map::UnmodifiableMap;
