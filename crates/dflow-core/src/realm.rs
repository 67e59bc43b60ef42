#![forbid(unsafe_code)]

//! Owning execution context (`Realm`) for observables.
//!
//! Every observable is created against a `Realm` and may only be read or
//! mutated while that realm is *current*. A realm is owned by the thread that
//! created it; on that thread it is current unless a different realm has been
//! entered with [`Realm::enter`]. Entering nests: only the innermost entered
//! realm is current until its guard drops.
//!
//! # Design
//!
//! `Realm` is cheaply cloneable (`Arc` inside), comparable by id, and
//! `Send + Sync` so that it can be inspected from anywhere. Observables
//! themselves are `!Send`; the realm enforces confinement *within* a thread
//! when several logical contexts share it.
//!
//! # Invariants
//!
//! 1. Realm ids are unique for the lifetime of the process.
//! 2. A realm is never current on a thread other than its owner.
//! 3. `RealmGuard`s release in LIFO order; dropping one out of order is a
//!    logic error and panics.
//!
//! # Example
//!
//! ```
//! use dflow_core::realm::Realm;
//!
//! let ui = Realm::named("ui");
//! let worker = Realm::named("worker");
//! assert!(ui.is_current());
//!
//! worker.exec(|| {
//!     assert!(worker.is_current());
//!     assert!(!ui.is_current());
//! });
//! assert!(ui.is_current());
//! ```

use std::cell::RefCell;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, ThreadId};

use crate::error::{ObservableError, Result};
use crate::logging::trace;

// ─── Realm ID generation ─────────────────────────────────────────────────────

static NEXT_REALM_ID: AtomicU64 = AtomicU64::new(1);

fn next_realm_id() -> u64 {
    NEXT_REALM_ID.fetch_add(1, Ordering::Relaxed)
}

thread_local! {
    static ENTERED: RefCell<Vec<u64>> = const { RefCell::new(Vec::new()) };
}

// ─── Realm ───────────────────────────────────────────────────────────────────

struct RealmInner {
    id: u64,
    name: Option<String>,
    owner: ThreadId,
}

/// Owning execution context for a group of observables.
#[derive(Clone)]
pub struct Realm {
    inner: Arc<RealmInner>,
}

impl Realm {
    /// Create a realm owned by the calling thread.
    #[must_use]
    pub fn new() -> Self {
        Self::build(None)
    }

    /// Create a named realm owned by the calling thread.
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self::build(Some(name.into()))
    }

    fn build(name: Option<String>) -> Self {
        let inner = RealmInner {
            id: next_realm_id(),
            name,
            owner: thread::current().id(),
        };
        trace!(message = "realm.create", realm_id = inner.id);
        Self {
            inner: Arc::new(inner),
        }
    }

    #[inline]
    #[must_use]
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.inner.name.as_deref()
    }

    /// Whether code running right now may touch observables of this realm.
    #[must_use]
    pub fn is_current(&self) -> bool {
        if thread::current().id() != self.inner.owner {
            return false;
        }
        ENTERED.with(|stack| {
            stack
                .borrow()
                .last()
                .is_none_or(|&top| top == self.inner.id)
        })
    }

    /// `Ok(())` when the realm is current, `Err(WrongRealm)` otherwise.
    pub fn check(&self) -> Result<()> {
        if self.is_current() {
            Ok(())
        } else {
            Err(ObservableError::WrongRealm {
                realm: self.inner.id,
            })
        }
    }

    /// Panic unless the realm is current.
    ///
    /// # Panics
    ///
    /// Panics with the [`ObservableError::WrongRealm`] message when called
    /// from outside the realm.
    #[track_caller]
    pub fn assert_current(&self) {
        if let Err(err) = self.check() {
            panic!("{err}");
        }
    }

    /// Make this realm the current one on this thread until the guard drops.
    ///
    /// # Panics
    ///
    /// Panics when called from a thread that does not own the realm.
    #[track_caller]
    pub fn enter(&self) -> RealmGuard {
        assert!(
            thread::current().id() == self.inner.owner,
            "realm #{} entered from a foreign thread",
            self.inner.id
        );
        ENTERED.with(|stack| stack.borrow_mut().push(self.inner.id));
        RealmGuard {
            id: self.inner.id,
            _not_send: PhantomData,
        }
    }

    /// Run `f` with this realm entered.
    pub fn exec<R>(&self, f: impl FnOnce() -> R) -> R {
        let _guard = self.enter();
        f()
    }

    /// `Ok(())` when `other` is the same realm, `Err(RealmMismatch)` otherwise.
    pub fn ensure_same(&self, other: &Realm) -> Result<()> {
        if self == other {
            Ok(())
        } else {
            Err(ObservableError::RealmMismatch {
                expected: self.id(),
                found: other.id(),
            })
        }
    }
}

impl Default for Realm {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for Realm {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for Realm {}

impl fmt::Debug for Realm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Realm")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .finish()
    }
}

// ─── RealmGuard ──────────────────────────────────────────────────────────────

/// Keeps a realm entered; see [`Realm::enter`].
#[must_use = "the realm is left again as soon as the guard drops"]
pub struct RealmGuard {
    id: u64,
    _not_send: PhantomData<*const ()>,
}

impl Drop for RealmGuard {
    fn drop(&mut self) {
        let popped = ENTERED.with(|stack| stack.borrow_mut().pop());
        if !thread::panicking() {
            assert_eq!(popped, Some(self.id), "realm guards dropped out of order");
        }
    }
}

impl fmt::Debug for RealmGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RealmGuard").field("id", &self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique() {
        let a = Realm::new();
        let b = Realm::new();
        assert_ne!(a.id(), b.id());
        assert_ne!(a, b);
        assert_eq!(a, a.clone());
    }

    #[test]
    fn owner_thread_is_current_without_entering() {
        let realm = Realm::named("main");
        assert!(realm.is_current());
        assert!(realm.check().is_ok());
        assert_eq!(realm.name(), Some("main"));
    }

    #[test]
    fn entering_shadows_other_realms() {
        let outer = Realm::new();
        let inner = Realm::new();
        let guard = inner.enter();
        assert!(inner.is_current());
        assert!(!outer.is_current());
        assert_eq!(
            outer.check(),
            Err(ObservableError::WrongRealm { realm: outer.id() })
        );
        drop(guard);
        assert!(outer.is_current());
    }

    #[test]
    fn nested_enter_restores_previous() {
        let a = Realm::new();
        let b = Realm::new();
        a.exec(|| {
            assert!(a.is_current());
            b.exec(|| {
                assert!(b.is_current());
                assert!(!a.is_current());
            });
            assert!(a.is_current());
            assert!(!b.is_current());
        });
    }

    #[test]
    fn foreign_thread_is_never_current() {
        let realm = Realm::new();
        let moved = realm.clone();
        let current = thread::spawn(move || moved.is_current())
            .join()
            .expect("thread panicked");
        assert!(!current);
    }

    #[test]
    fn ensure_same_reports_both_ids() {
        let a = Realm::new();
        let b = Realm::new();
        assert!(a.ensure_same(&a.clone()).is_ok());
        assert_eq!(
            a.ensure_same(&b),
            Err(ObservableError::RealmMismatch {
                expected: a.id(),
                found: b.id()
            })
        );
    }

    #[test]
    #[should_panic(expected = "outside its realm")]
    fn assert_current_panics_when_shadowed() {
        let a = Realm::new();
        let b = Realm::new();
        let _guard = b.enter();
        a.assert_current();
    }
}
