#![forbid(unsafe_code)]

//! Error taxonomy shared by every dflow crate.
//!
//! Mutators report precondition violations (wrong realm, disposed target,
//! bad index, unsupported operation) as [`ObservableError`] values. Getters
//! cannot return errors and panic with the same message instead; internal
//! invariant violations are plain panics.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ObservableError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ObservableError {
    #[error("observable accessed outside its realm (realm #{realm})")]
    WrongRealm { realm: u64 },

    #[error("observable has been disposed")]
    Disposed,

    #[error("index {index} out of bounds (length {len})")]
    IndexOutOfBounds { index: usize, len: usize },

    #[error("operation not supported: {operation}")]
    Unsupported { operation: &'static str },

    #[error("realm mismatch: expected realm #{expected}, found realm #{found}")]
    RealmMismatch { expected: u64, found: u64 },

    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },
}

impl ObservableError {
    pub fn unsupported(operation: &'static str) -> Self {
        Self::Unsupported { operation }
    }

    pub fn out_of_bounds(index: usize, len: usize) -> Self {
        Self::IndexOutOfBounds { index, len }
    }

    /// Whether the error reports a caller mistake (as opposed to a capability
    /// the target simply lacks).
    pub fn is_precondition(&self) -> bool {
        !matches!(self, Self::Unsupported { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_offending_values() {
        assert_eq!(
            ObservableError::out_of_bounds(4, 2).to_string(),
            "index 4 out of bounds (length 2)"
        );
        assert_eq!(
            ObservableError::unsupported("push").to_string(),
            "operation not supported: push"
        );
        assert_eq!(
            ObservableError::WrongRealm { realm: 7 }.to_string(),
            "observable accessed outside its realm (realm #7)"
        );
    }

    #[test]
    fn unsupported_is_not_a_precondition() {
        assert!(!ObservableError::unsupported("set").is_precondition());
        assert!(ObservableError::Disposed.is_precondition());
        assert!(ObservableError::out_of_bounds(0, 0).is_precondition());
    }
}
