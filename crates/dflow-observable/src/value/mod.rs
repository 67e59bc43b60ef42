#![forbid(unsafe_code)]

//! Observable values derived from other observables.

mod duplexing;
mod map_entry;
mod select;

pub use duplexing::DuplexingValue;
pub use map_entry::MapEntryValue;
pub use select::SelectValue;
