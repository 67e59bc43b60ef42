#![forbid(unsafe_code)]

use std::marker::PhantomData;
use std::rc::Rc;

use dflow_core::error::{ObservableError, Result};
use dflow_core::token::TypeToken;
use dflow_diff::ValueDiff;

use super::{DetailInner, DetailKind, delegate_observable};
use crate::listeners::{Subscription, impl_observable};
use crate::traits::{ObservableValue, ValueHandle};

pub(crate) struct ValueKind<T>(PhantomData<T>);

impl<T: Clone + 'static> DetailKind for ValueKind<T> {
    type Handle = ValueHandle<T>;
    type Snapshot = Option<T>;
    type Diff = ValueDiff<Option<T>>;

    fn snapshot(detail: Option<&Self::Handle>) -> Option<T> {
        detail.map(|detail| detail.value())
    }

    /// Replacing the detail always notifies, even when both values are equal.
    fn replaced(old: Option<T>, new: Option<T>) -> Option<Self::Diff> {
        Some(ValueDiff::new(old, new))
    }

    fn subscribe(detail: &Self::Handle, forward: Box<dyn Fn(&Self::Diff)>) -> Subscription {
        detail.subscribe_value(Box::new(move |diff| {
            forward(&ValueDiff::new(Some(diff.old.clone()), Some(diff.new.clone())));
        }))
    }

    fn type_token(detail: &Self::Handle) -> Option<TypeToken> {
        detail.value_type()
    }

    delegate_observable!();
}

/// The value of whichever observable value the master currently selects.
///
/// `None` while the factory produced no detail for the master value.
pub struct DetailValue<M: 'static, T: Clone + 'static> {
    inner: Rc<DetailInner<M, ValueKind<T>>>,
}

impl<M, T: Clone> Clone for DetailValue<M, T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<M: Clone + PartialEq + 'static, T: Clone + 'static> DetailValue<M, T> {
    pub fn new(
        master: ValueHandle<M>,
        factory: impl Fn(&M) -> Option<ValueHandle<T>> + 'static,
    ) -> Self {
        Self {
            inner: DetailInner::new(master, Box::new(factory), None),
        }
    }

    /// # Panics
    ///
    /// Panics whenever the factory produces a detail whose value type is not
    /// `detail_type`.
    pub fn with_detail_type(
        master: ValueHandle<M>,
        factory: impl Fn(&M) -> Option<ValueHandle<T>> + 'static,
        detail_type: TypeToken,
    ) -> Self {
        Self {
            inner: DetailInner::new(master, Box::new(factory), Some(detail_type)),
        }
    }

    pub fn handle(&self) -> ValueHandle<Option<T>> {
        Rc::new(self.clone())
    }

    pub fn is_active(&self) -> bool {
        self.inner.is_active()
    }
}

impl_observable!(DetailValue<M, T> where [M: Clone + PartialEq + 'static, T: Clone + 'static]);

impl<M, T> ObservableValue<Option<T>> for DetailValue<M, T>
where
    M: Clone + PartialEq + 'static,
    T: Clone + 'static,
{
    fn value(&self) -> Option<T> {
        self.inner.current().map(|detail| detail.value())
    }

    fn value_type(&self) -> Option<TypeToken> {
        self.inner.detail_type()
    }

    fn subscribe_value(&self, listener: Box<dyn Fn(&ValueDiff<Option<T>>)>) -> Subscription {
        self.inner.core.subscribe(listener)
    }

    /// Writes to the current detail; `None` cannot be written.
    fn set_value(&self, value: Option<T>) -> Result<()> {
        let Some(value) = value else {
            return Err(ObservableError::unsupported("set_value(None)"));
        };
        self.inner.mutate("set_value", |detail| detail.set_value(value))
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;
    use crate::traits::Observable;
    use crate::writable::WritableValue;
    use dflow_core::realm::Realm;

    type Log = Rc<RefCell<Vec<String>>>;

    /// Details are `name.len()` values; creation and disposal are logged.
    fn factory(
        realm: &Realm,
        log: &Log,
        keep: &Rc<RefCell<Vec<Subscription>>>,
    ) -> impl Fn(&&'static str) -> Option<ValueHandle<usize>> + 'static {
        let realm = realm.clone();
        let log = Rc::clone(log);
        let keep = Rc::clone(keep);
        move |name: &&'static str| {
            if name.is_empty() {
                return None;
            }
            log.borrow_mut().push(format!("create {name}"));
            let detail = WritableValue::new(&realm, name.len());
            let sink = Rc::clone(&log);
            let name = *name;
            let disposal = detail.subscribe_dispose(Box::new(move || {
                sink.borrow_mut().push(format!("dispose {name}"));
            }));
            keep.borrow_mut().push(disposal);
            Some(detail.handle())
        }
    }

    #[test]
    fn master_sequence_rebinds_and_disposes_in_order() {
        let realm = Realm::new();
        let log: Log = Rc::default();
        let keep = Rc::default();
        let master = WritableValue::new(&realm, "a");
        let detail = DetailValue::new(master.handle(), factory(&realm, &log, &keep));
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        let _sub = detail.subscribe_value(Box::new(move |d| sink.borrow_mut().push(*d)));

        master.set("bb").unwrap();
        master.set("ccc").unwrap();

        assert_eq!(
            *seen.borrow(),
            vec![ValueDiff::new(Some(1), Some(2)), ValueDiff::new(Some(2), Some(3))]
        );
        assert_eq!(
            *log.borrow(),
            vec!["create a", "dispose a", "create bb", "dispose bb", "create ccc"]
        );
    }

    #[test]
    fn inner_changes_are_forwarded_and_writes_delegate() {
        let realm = Realm::new();
        let inner = WritableValue::new(&realm, 10);
        let master = WritableValue::new(&realm, true);
        let handle = inner.handle();
        let detail =
            DetailValue::new(master.handle(), move |on: &bool| on.then(|| Rc::clone(&handle)));
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        let _sub = detail.subscribe_value(Box::new(move |d| sink.borrow_mut().push(*d)));

        inner.set(11).unwrap();
        detail.set_value(Some(12)).unwrap();
        assert_eq!(inner.get(), 12);
        assert_eq!(
            *seen.borrow(),
            vec![ValueDiff::new(Some(10), Some(11)), ValueDiff::new(Some(11), Some(12))]
        );
    }

    #[test]
    fn absent_detail_reads_none_and_rejects_writes() {
        let realm = Realm::new();
        let log: Log = Rc::default();
        let keep = Rc::default();
        let master = WritableValue::new(&realm, "");
        let detail = DetailValue::new(master.handle(), factory(&realm, &log, &keep));
        assert_eq!(detail.value(), None);
        assert!(matches!(detail.set_value(Some(1)), Err(ObservableError::Unsupported { .. })));
    }

    #[test]
    fn inactive_getters_follow_the_master() {
        let realm = Realm::new();
        let log: Log = Rc::default();
        let keep = Rc::default();
        let master = WritableValue::new(&realm, "a");
        let detail = DetailValue::new(master.handle(), factory(&realm, &log, &keep));
        assert!(!detail.is_active());
        assert!(!master.has_listeners());
        master.set("dddd").unwrap();
        assert_eq!(detail.value(), Some(4));
        assert_eq!(*log.borrow(), vec!["create a", "dispose a", "create dddd"]);
    }

    #[test]
    #[should_panic(expected = "type mismatch")]
    fn detail_type_is_enforced() {
        let realm = Realm::new();
        let master = WritableValue::new(&realm, 0u8);
        let detail_realm = realm.clone();
        let _ = DetailValue::with_detail_type(
            master.handle(),
            move |_: &u8| Some(WritableValue::new(&detail_realm, 0u32).handle()),
            TypeToken::of::<u32>(),
        );
    }

    #[test]
    fn master_disposal_disposes_detail() {
        let realm = Realm::new();
        let log: Log = Rc::default();
        let keep = Rc::default();
        let master = WritableValue::new(&realm, "a");
        let detail = DetailValue::new(master.handle(), factory(&realm, &log, &keep));
        master.dispose();
        assert!(detail.is_disposed());
        assert_eq!(log.borrow().last().map(String::as_str), Some("dispose a"));
    }
}
