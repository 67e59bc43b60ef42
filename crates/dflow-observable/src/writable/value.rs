#![forbid(unsafe_code)]

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use dflow_core::error::Result;
use dflow_core::realm::Realm;
use dflow_core::token::TypeToken;
use dflow_diff::ValueDiff;

use crate::listeners::{ObservableCore, Subscription, impl_observable};
use crate::traits::{ObservableValue, ValueHandle};

/// A settable observable value.
///
/// Setting a value equal to the current one is a no-op and fires nothing.
pub struct WritableValue<T: 'static> {
    inner: Rc<ValueInner<T>>,
}

struct ValueInner<T: 'static> {
    core: ObservableCore<ValueDiff<T>>,
    value: RefCell<T>,
    stale: Cell<bool>,
    value_type: Option<TypeToken>,
}

impl<T> Clone for WritableValue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: Clone + PartialEq + 'static> WritableValue<T> {
    pub fn new(realm: &Realm, value: T) -> Self {
        Self::build(realm, value, None)
    }

    pub fn with_value_type(realm: &Realm, value: T, value_type: TypeToken) -> Self {
        Self::build(realm, value, Some(value_type))
    }

    fn build(realm: &Realm, value: T, value_type: Option<TypeToken>) -> Self {
        Self {
            inner: Rc::new(ValueInner {
                core: ObservableCore::passive(realm),
                value: RefCell::new(value),
                stale: Cell::new(false),
                value_type,
            }),
        }
    }

    /// # Panics
    ///
    /// Panics when called outside the owning realm.
    pub fn get(&self) -> T {
        self.inner.core.getter_called();
        self.inner.value.borrow().clone()
    }

    pub fn set(&self, value: T) -> Result<()> {
        self.inner.core.check_mutation()?;
        let old = {
            let mut current = self.inner.value.borrow_mut();
            if *current == value {
                return Ok(());
            }
            std::mem::replace(&mut *current, value.clone())
        };
        self.inner.core.fire_change(&ValueDiff::new(old, value));
        Ok(())
    }

    /// Update the advisory stale flag; becoming stale fires a stale event.
    pub fn set_stale(&self, stale: bool) -> Result<()> {
        self.inner.core.check_mutation()?;
        if !self.inner.stale.replace(stale) && stale {
            self.inner.core.fire_stale();
        }
        Ok(())
    }

    pub fn handle(&self) -> ValueHandle<T> {
        Rc::new(self.clone())
    }
}

impl<T: 'static> ValueInner<T> {
    fn is_stale(&self) -> bool {
        self.core.getter_called();
        self.stale.get()
    }

    fn dispose(&self) {
        self.core.dispose();
    }
}

impl_observable!(WritableValue<T> where [T: 'static]);

impl<T: Clone + PartialEq + 'static> ObservableValue<T> for WritableValue<T> {
    fn value(&self) -> T {
        self.get()
    }

    fn value_type(&self) -> Option<TypeToken> {
        self.inner.value_type
    }

    fn subscribe_value(&self, listener: Box<dyn Fn(&ValueDiff<T>)>) -> Subscription {
        self.inner.core.subscribe(listener)
    }

    fn set_value(&self, value: T) -> Result<()> {
        self.set(value)
    }
}
