#![forbid(unsafe_code)]

//! Runtime type tokens.
//!
//! Rust generics already fix element types statically; a `TypeToken` is the
//! *declared* type an observable advertises, used for runtime contract checks
//! such as "a detail observable must keep the same value type across master
//! changes".

use std::any::type_name;
use std::fmt;

use crate::error::{ObservableError, Result};

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeToken(&'static str);

impl TypeToken {
    #[must_use]
    pub fn of<T: ?Sized>() -> Self {
        Self(type_name::<T>())
    }

    /// A token for a caller-chosen logical type name.
    #[must_use]
    pub const fn named(name: &'static str) -> Self {
        Self(name)
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        self.0
    }

    /// `Ok` when `actual` matches `self`; a missing token never matches.
    pub fn ensure_matches(self, actual: Option<TypeToken>) -> Result<()> {
        match actual {
            Some(actual) if actual == self => Ok(()),
            other => Err(ObservableError::TypeMismatch {
                expected: self.0,
                found: other.map_or("<undeclared>", TypeToken::name),
            }),
        }
    }
}

impl fmt::Debug for TypeToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypeToken({})", self.0)
    }
}

impl fmt::Display for TypeToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}
