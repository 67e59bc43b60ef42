#![forbid(unsafe_code)]

//! Logging facade.
//!
//! With the `tracing` feature the macros below are the `tracing` crate's own.
//! Without it they expand to nothing, so call sites never need their own
//! `cfg` attributes:
//!
//! ```
//! use dflow_core::logging::debug;
//!
//! debug!(message = "union.activate", children = 2usize);
//! ```

#[cfg(feature = "tracing")]
pub use tracing::{debug, trace, warn};

#[cfg(not(feature = "tracing"))]
pub use crate::{__dflow_debug as debug, __dflow_trace as trace, __dflow_warn as warn};

#[cfg(not(feature = "tracing"))]
#[doc(hidden)]
#[macro_export]
macro_rules! __dflow_debug {
    ($($arg:tt)*) => {{}};
}

#[cfg(not(feature = "tracing"))]
#[doc(hidden)]
#[macro_export]
macro_rules! __dflow_trace {
    ($($arg:tt)*) => {{}};
}

#[cfg(not(feature = "tracing"))]
#[doc(hidden)]
#[macro_export]
macro_rules! __dflow_warn {
    ($($arg:tt)*) => {{}};
}
