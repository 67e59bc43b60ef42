#![forbid(unsafe_code)]

/// Old and new state of a single value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ValueDiff<T> {
    pub old: T,
    pub new: T,
}

impl<T> ValueDiff<T> {
    pub fn new(old: T, new: T) -> Self {
        Self { old, new }
    }

    pub fn map<U>(self, mut f: impl FnMut(T) -> U) -> ValueDiff<U> {
        ValueDiff {
            old: f(self.old),
            new: f(self.new),
        }
    }

    pub fn as_ref(&self) -> ValueDiff<&T> {
        ValueDiff {
            old: &self.old,
            new: &self.new,
        }
    }
}

impl<T: PartialEq> ValueDiff<T> {
    /// Whether old and new differ.
    pub fn is_change(&self) -> bool {
        self.old != self.new
    }
}
