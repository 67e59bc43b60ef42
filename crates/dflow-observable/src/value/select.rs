#![forbid(unsafe_code)]

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use dflow_core::error::Result;
use dflow_core::logging::trace;
use dflow_core::realm::Realm;
use dflow_core::token::TypeToken;
use dflow_diff::ValueDiff;

use crate::listeners::{Lifecycle, ObservableCore, Subscription, impl_observable};
use crate::traits::{ObservableValue, ValueHandle};

struct SelectOption<T> {
    value: T,
    selected: ValueHandle<bool>,
}

/// A value chosen among options, each guarded by a boolean observable.
///
/// The value is the option whose flag is `true` (the first one when several
/// are), or `None`. Setting a value raises that option's flag and lowers all
/// the others. While listened to, the selected index is cached and follows
/// flags that turn `true`.
pub struct SelectValue<T: 'static> {
    inner: Rc<SelectInner<T>>,
}

struct SelectInner<T: 'static> {
    core: ObservableCore<ValueDiff<Option<T>>>,
    this: Weak<SelectInner<T>>,
    value_type: Option<TypeToken>,
    options: RefCell<Vec<SelectOption<T>>>,
    updating: Cell<bool>,
    active: RefCell<Option<ActiveSelection>>,
}

struct ActiveSelection {
    selection: Option<usize>,
    subscriptions: Vec<Subscription>,
}

impl<T> Clone for SelectValue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: Clone + PartialEq + 'static> SelectValue<T> {
    pub fn new(realm: &Realm) -> Self {
        Self::build(realm, None)
    }

    pub fn with_value_type(realm: &Realm, value_type: TypeToken) -> Self {
        Self::build(realm, Some(value_type))
    }

    fn build(realm: &Realm, value_type: Option<TypeToken>) -> Self {
        let inner = Rc::new_cyclic(|this: &Weak<SelectInner<T>>| SelectInner {
            core: ObservableCore::new(realm, this.clone()),
            this: this.clone(),
            value_type,
            options: RefCell::new(Vec::new()),
            updating: Cell::new(false),
            active: RefCell::new(None),
        });
        Self { inner }
    }

    /// Register `value`, selected whenever `selected` is `true`.
    pub fn add_option(&self, value: T, selected: ValueHandle<bool>) -> Result<()> {
        self.inner.core.check_mutation()?;
        let index = {
            let mut options = self.inner.options.borrow_mut();
            options.push(SelectOption {
                value,
                selected: Rc::clone(&selected),
            });
            options.len() - 1
        };
        if self.inner.active.borrow().is_some() {
            let subscription = self.inner.follow(index, &selected);
            if let Some(active) = self.inner.active.borrow_mut().as_mut() {
                active.subscriptions.push(subscription);
            }
            if selected.value() {
                self.inner.notify_if_changed(Some(index));
            }
        }
        Ok(())
    }

    pub fn handle(&self) -> ValueHandle<Option<T>> {
        Rc::new(self.clone())
    }

    pub fn is_active(&self) -> bool {
        self.inner.active.borrow().is_some()
    }
}

impl<T: Clone + PartialEq + 'static> SelectInner<T> {
    fn follow(&self, index: usize, selected: &ValueHandle<bool>) -> Subscription {
        let this = self.this.clone();
        selected.subscribe_value(Box::new(move |diff| {
            if let Some(select) = this.upgrade()
                && !select.updating.get()
                && diff.new
            {
                select.notify_if_changed(Some(index));
            }
        }))
    }

    fn live_selection(&self) -> Option<usize> {
        self.options.borrow().iter().position(|option| option.selected.value())
    }

    fn value_at(&self, index: Option<usize>) -> Option<T> {
        let options = self.options.borrow();
        index.and_then(|i| options.get(i)).map(|option| option.value.clone())
    }

    fn notify_if_changed(&self, index: Option<usize>) {
        let previous = match self.active.borrow_mut().as_mut() {
            Some(active) if active.selection != index => {
                std::mem::replace(&mut active.selection, index)
            }
            _ => return,
        };
        trace!(message = "select.changed", from = ?previous, to = ?index);
        let diff = ValueDiff::new(self.value_at(previous), self.value_at(index));
        self.core.fire_change(&diff);
    }

    fn select(&self, value: Option<T>) -> Result<()> {
        let index = value.and_then(|value| {
            self.options.borrow().iter().position(|option| option.value == value)
        });
        let flags: Vec<ValueHandle<bool>> = self
            .options
            .borrow()
            .iter()
            .map(|option| Rc::clone(&option.selected))
            .collect();
        self.updating.set(true);
        let written = flags
            .iter()
            .enumerate()
            .try_for_each(|(i, flag)| flag.set_value(Some(i) == index));
        self.updating.set(false);
        written?;
        self.notify_if_changed(index);
        Ok(())
    }

    fn is_stale(&self) -> bool {
        self.core.getter_called();
        self.options.borrow().iter().any(|option| option.selected.is_stale())
    }

    fn dispose(&self) {
        if self.core.dispose() {
            self.active.borrow_mut().take();
        }
    }
}

impl<T: Clone + PartialEq + 'static> Lifecycle for SelectInner<T> {
    fn first_listener_added(&self) {
        let flags: Vec<ValueHandle<bool>> = self
            .options
            .borrow()
            .iter()
            .map(|option| Rc::clone(&option.selected))
            .collect();
        let subscriptions = flags
            .iter()
            .enumerate()
            .map(|(index, flag)| self.follow(index, flag))
            .collect();
        *self.active.borrow_mut() = Some(ActiveSelection {
            selection: self.live_selection(),
            subscriptions,
        });
    }

    fn last_listener_removed(&self) {
        self.active.borrow_mut().take();
    }
}

impl_observable!(SelectValue<T> where [T: Clone + PartialEq + 'static]);

impl<T: Clone + PartialEq + 'static> ObservableValue<Option<T>> for SelectValue<T> {
    fn value(&self) -> Option<T> {
        self.inner.core.getter_called();
        let cached = self.inner.active.borrow().as_ref().map(|active| active.selection);
        let index = cached.unwrap_or_else(|| self.inner.live_selection());
        self.inner.value_at(index)
    }

    fn value_type(&self) -> Option<TypeToken> {
        self.inner.value_type
    }

    fn subscribe_value(&self, listener: Box<dyn Fn(&ValueDiff<Option<T>>)>) -> Subscription {
        self.inner.core.subscribe(listener)
    }

    fn set_value(&self, value: Option<T>) -> Result<()> {
        self.inner.core.check_mutation()?;
        self.inner.select(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::Observable;
    use crate::writable::WritableValue;

    struct Radio {
        select: SelectValue<&'static str>,
        small: WritableValue<bool>,
        large: WritableValue<bool>,
    }

    fn radio() -> Radio {
        let realm = Realm::new();
        let select = SelectValue::new(&realm);
        let small = WritableValue::new(&realm, false);
        let large = WritableValue::new(&realm, false);
        select.add_option("small", small.handle()).unwrap();
        select.add_option("large", large.handle()).unwrap();
        Radio { select, small, large }
    }

    #[test]
    fn setting_raises_one_flag() {
        let r = radio();
        r.select.set_value(Some("large")).unwrap();
        assert!(r.large.get());
        assert!(!r.small.get());
        assert_eq!(r.select.value(), Some("large"));
        r.select.set_value(None).unwrap();
        assert!(!r.large.get());
        assert_eq!(r.select.value(), None);
    }

    #[test]
    fn flags_drive_the_selection_while_listened() {
        let r = radio();
        let log = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&log);
        let _sub = r.select.subscribe_value(Box::new(move |d| sink.borrow_mut().push(*d)));
        r.small.set(true).unwrap();
        r.select.set_value(Some("large")).unwrap();
        assert_eq!(
            *log.borrow(),
            vec![ValueDiff::new(None, Some("small")), ValueDiff::new(Some("small"), Some("large"))]
        );
    }

    #[test]
    fn options_added_while_active_are_followed() {
        let r = radio();
        let sub = r.select.subscribe_value(Box::new(|_| {}));
        let medium = WritableValue::new(r.select.realm(), true);
        r.select.add_option("medium", medium.handle()).unwrap();
        assert_eq!(r.select.value(), Some("medium"));
        drop(sub);
        assert!(!medium.has_listeners());
        assert!(!r.select.is_active());
    }
}
