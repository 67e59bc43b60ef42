#![forbid(unsafe_code)]

//! Identity keys.
//!
//! Master/detail observables share one detail per *distinct master object*,
//! which is object identity rather than value equality. [`HasIdentity`] gives
//! shared pointers a stable identity (their allocation address) and
//! [`ByIdentity`] lets them key ordinary hash containers.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::Deref;
use std::rc::Rc;
use std::sync::Arc;

use ahash::{AHashMap, AHashSet};

/// Opaque identity token. Two live values share an identity iff they are the
/// same object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Identity(usize);

pub trait HasIdentity {
    fn identity(&self) -> Identity;
}

impl<T: ?Sized> HasIdentity for Rc<T> {
    fn identity(&self) -> Identity {
        Identity(Rc::as_ptr(self).cast::<()>() as usize)
    }
}

impl<T: ?Sized> HasIdentity for Arc<T> {
    fn identity(&self) -> Identity {
        Identity(Arc::as_ptr(self).cast::<()>() as usize)
    }
}

/// Wrapper comparing and hashing by [`Identity`].
#[derive(Clone)]
pub struct ByIdentity<T>(pub T);

impl<T> ByIdentity<T> {
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T: HasIdentity> PartialEq for ByIdentity<T> {
    fn eq(&self, other: &Self) -> bool {
        self.0.identity() == other.0.identity()
    }
}

impl<T: HasIdentity> Eq for ByIdentity<T> {}

impl<T: HasIdentity> Hash for ByIdentity<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.identity().hash(state);
    }
}

impl<T> Deref for ByIdentity<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.0
    }
}

impl<T: HasIdentity> fmt::Debug for ByIdentity<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ByIdentity({:#x})", self.0.identity().0)
    }
}

pub type IdentityMap<K, V> = AHashMap<ByIdentity<K>, V>;
pub type IdentitySet<T> = AHashSet<ByIdentity<T>>;
