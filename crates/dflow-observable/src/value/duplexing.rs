#![forbid(unsafe_code)]

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use dflow_core::error::Result;
use dflow_core::token::TypeToken;
use dflow_diff::ValueDiff;

use crate::listeners::{Lifecycle, ObservableCore, Subscription, impl_observable};
use crate::traits::{ListHandle, ObservableValue, ValueHandle};

type Coalesce<T> = Box<dyn Fn(&[T]) -> T>;

/// One value standing for every element of a list.
///
/// Reading coalesces the list's elements into a single value; writing sets
/// every element to the written value. While listened to the coalesced value
/// is cached, marked dirty by list changes, and recomputed on the next read;
/// a list change fires a diff only when the coalesced value moves.
pub struct DuplexingValue<T: 'static> {
    inner: Rc<DuplexingInner<T>>,
}

struct DuplexingInner<T: 'static> {
    core: ObservableCore<ValueDiff<T>>,
    this: Weak<DuplexingInner<T>>,
    target: ListHandle<T>,
    coalesce: Coalesce<T>,
    value_type: Option<TypeToken>,
    /// `None` while dirty.
    cached: RefCell<Option<T>>,
    updating: Cell<bool>,
    following: RefCell<Option<[Subscription; 2]>>,
}

impl<T> Clone for DuplexingValue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: Clone + PartialEq + 'static> DuplexingValue<T> {
    pub fn new(target: ListHandle<T>, coalesce: impl Fn(&[T]) -> T + 'static) -> Self {
        let value_type = target.element_type();
        let realm = target.realm().clone();
        let inner = Rc::new_cyclic(|this: &Weak<DuplexingInner<T>>| DuplexingInner {
            core: ObservableCore::new(&realm, this.clone()),
            this: this.clone(),
            target,
            coalesce: Box::new(coalesce),
            value_type,
            cached: RefCell::new(None),
            updating: Cell::new(false),
            following: RefCell::new(None),
        });
        Self { inner }
    }

    /// `empty` for an empty list, the shared element when all elements are
    /// equal, `multi` otherwise.
    pub fn with_defaults(target: ListHandle<T>, empty: T, multi: T) -> Self {
        Self::new(target, move |elements: &[T]| match elements.split_first() {
            None => empty.clone(),
            Some((first, rest)) if rest.iter().all(|e| e == first) => first.clone(),
            Some(_) => multi.clone(),
        })
    }

    pub fn handle(&self) -> ValueHandle<T> {
        Rc::new(self.clone())
    }
}

impl<T: Clone + PartialEq + 'static> DuplexingInner<T> {
    fn compute(&self) -> T {
        (self.coalesce)(&self.target.to_vec())
    }

    fn current(&self) -> T {
        if self.following.borrow().is_none() {
            return self.compute();
        }
        if let Some(cached) = self.cached.borrow().as_ref() {
            return cached.clone();
        }
        let value = self.compute();
        *self.cached.borrow_mut() = Some(value.clone());
        value
    }

    /// Mark the cache dirty; a clean cache reports the move to listeners.
    fn make_dirty(&self) {
        let Some(old) = self.cached.borrow_mut().take() else {
            return;
        };
        let new = self.current();
        if old != new {
            self.core.fire_change(&ValueDiff::new(old, new));
        }
    }

    fn target_changed(&self) {
        if !self.updating.get() {
            self.make_dirty();
        }
    }

    fn write(&self, value: &T) -> Result<()> {
        let was_updating = self.updating.replace(true);
        let written = (0..self.target.len())
            .try_for_each(|i| self.target.set(i, value.clone()).map(drop));
        self.updating.set(was_updating);
        written
    }

    fn is_stale(&self) -> bool {
        self.core.getter_called();
        self.target.is_stale()
    }

    fn dispose(&self) {
        if self.core.dispose() {
            self.following.borrow_mut().take();
            self.cached.borrow_mut().take();
        }
    }
}

impl<T: Clone + PartialEq + 'static> Lifecycle for DuplexingInner<T> {
    fn first_listener_added(&self) {
        let this = self.this.clone();
        let changes = self.target.subscribe_list(Box::new(move |_| {
            if let Some(value) = this.upgrade() {
                value.target_changed();
            }
        }));
        let this = self.this.clone();
        let stale = self.target.subscribe_stale(Box::new(move || {
            if let Some(value) = this.upgrade() {
                value.core.fire_stale();
            }
        }));
        *self.following.borrow_mut() = Some([changes, stale]);
        let value = self.compute();
        *self.cached.borrow_mut() = Some(value);
    }

    fn last_listener_removed(&self) {
        self.following.borrow_mut().take();
        self.cached.borrow_mut().take();
    }
}

impl_observable!(DuplexingValue<T> where [T: Clone + PartialEq + 'static]);

impl<T: Clone + PartialEq + 'static> ObservableValue<T> for DuplexingValue<T> {
    fn value(&self) -> T {
        self.inner.core.getter_called();
        self.inner.current()
    }

    fn value_type(&self) -> Option<TypeToken> {
        self.inner.value_type
    }

    fn subscribe_value(&self, listener: Box<dyn Fn(&ValueDiff<T>)>) -> Subscription {
        self.inner.core.subscribe(listener)
    }

    /// Sets every element of the list to `value`.
    fn set_value(&self, value: T) -> Result<()> {
        self.inner.core.check_mutation()?;
        let old = self.inner.current();
        self.inner.write(&value)?;
        if self.inner.following.borrow().is_none() {
            return Ok(());
        }
        self.inner.cached.borrow_mut().take();
        let new = self.inner.current();
        if old != new {
            self.inner.core.fire_change(&ValueDiff::new(old, new));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::{Observable, ObservableList};
    use crate::writable::WritableList;
    use dflow_core::realm::Realm;

    fn sizes(
        items: Vec<&'static str>,
    ) -> (WritableList<&'static str>, DuplexingValue<&'static str>) {
        let list = WritableList::from_vec(&Realm::new(), items);
        let value = DuplexingValue::with_defaults(list.handle(), "-", "*");
        (list, value)
    }

    #[test]
    fn coalesces_empty_uniform_and_mixed() {
        let (list, value) = sizes(vec![]);
        assert_eq!(value.value(), "-");
        list.extend(["m", "m"]).unwrap();
        assert_eq!(value.value(), "m");
        list.push("l").unwrap();
        assert_eq!(value.value(), "*");
    }

    #[test]
    fn writing_sets_every_element() {
        let (list, value) = sizes(vec!["s", "m", "l"]);
        let log = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&log);
        let _sub = value.subscribe_value(Box::new(move |d| sink.borrow_mut().push(*d)));
        value.set_value("xl").unwrap();
        assert_eq!(list.to_vec(), vec!["xl", "xl", "xl"]);
        assert_eq!(*log.borrow(), vec![ValueDiff::new("*", "xl")], "one diff for three writes");
    }

    #[test]
    fn list_changes_fire_only_when_the_coalesced_value_moves() {
        let (list, value) = sizes(vec!["a", "b"]);
        let log = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&log);
        let sub = value.subscribe_value(Box::new(move |d| sink.borrow_mut().push(*d)));
        list.push("c").unwrap();
        list.set(0, "b").unwrap();
        list.remove_at(2).unwrap();
        assert_eq!(*log.borrow(), vec![ValueDiff::new("*", "b")]);
        drop(sub);
        assert!(!list.has_listeners());
    }
}
