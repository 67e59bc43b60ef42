#![forbid(unsafe_code)]

use std::marker::PhantomData;
use std::rc::Rc;

use dflow_core::error::Result;
use dflow_core::token::TypeToken;
use dflow_diff::{ListDiff, compute_list_diff};

use super::{DetailInner, DetailKind, delegate_observable};
use crate::listeners::{Subscription, impl_observable};
use crate::traits::{ListHandle, ObservableList, ValueHandle};

pub(crate) struct ListKind<E>(PhantomData<E>);

impl<E: Clone + PartialEq + 'static> DetailKind for ListKind<E> {
    type Handle = ListHandle<E>;
    type Snapshot = Vec<E>;
    type Diff = ListDiff<E>;

    fn snapshot(detail: Option<&Self::Handle>) -> Vec<E> {
        detail.map(|detail| detail.to_vec()).unwrap_or_default()
    }

    fn replaced(old: Vec<E>, new: Vec<E>) -> Option<ListDiff<E>> {
        let diff = compute_list_diff(&old, &new);
        (!diff.is_empty()).then_some(diff)
    }

    fn subscribe(detail: &Self::Handle, forward: Box<dyn Fn(&ListDiff<E>)>) -> Subscription {
        detail.subscribe_list(forward)
    }

    fn type_token(detail: &Self::Handle) -> Option<TypeToken> {
        detail.element_type()
    }

    delegate_observable!();
}

/// The elements of whichever observable list the master currently selects.
pub struct DetailList<M: 'static, E: Clone + PartialEq + 'static> {
    inner: Rc<DetailInner<M, ListKind<E>>>,
}

impl<M, E: Clone + PartialEq> Clone for DetailList<M, E> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<M: Clone + PartialEq + 'static, E: Clone + PartialEq + 'static> DetailList<M, E> {
    pub fn new(
        master: ValueHandle<M>,
        factory: impl Fn(&M) -> Option<ListHandle<E>> + 'static,
    ) -> Self {
        Self {
            inner: DetailInner::new(master, Box::new(factory), None),
        }
    }

    pub fn with_element_type(
        master: ValueHandle<M>,
        factory: impl Fn(&M) -> Option<ListHandle<E>> + 'static,
        element_type: TypeToken,
    ) -> Self {
        Self {
            inner: DetailInner::new(master, Box::new(factory), Some(element_type)),
        }
    }

    pub fn handle(&self) -> ListHandle<E> {
        Rc::new(self.clone())
    }
}

impl_observable!(DetailList<M, E> where [
    M: Clone + PartialEq + 'static,
    E: Clone + PartialEq + 'static
]);

impl<M, E> ObservableList<E> for DetailList<M, E>
where
    M: Clone + PartialEq + 'static,
    E: Clone + PartialEq + 'static,
{
    fn len(&self) -> usize {
        self.inner.current().map_or(0, |detail| detail.len())
    }

    fn get(&self, index: usize) -> Option<E> {
        self.inner.current().and_then(|detail| detail.get(index))
    }

    fn to_vec(&self) -> Vec<E> {
        ListKind::<E>::snapshot(self.inner.current().as_ref())
    }

    fn element_type(&self) -> Option<TypeToken> {
        self.inner.detail_type()
    }

    fn subscribe_list(&self, listener: Box<dyn Fn(&ListDiff<E>)>) -> Subscription {
        self.inner.core.subscribe(listener)
    }

    fn push(&self, element: E) -> Result<()> {
        self.inner.mutate("push", |detail| detail.push(element))
    }

    fn insert(&self, index: usize, element: E) -> Result<()> {
        self.inner.mutate("insert", |detail| detail.insert(index, element))
    }

    fn set(&self, index: usize, element: E) -> Result<E> {
        self.inner.mutate("set", |detail| detail.set(index, element))
    }

    fn remove_at(&self, index: usize) -> Result<E> {
        self.inner.mutate("remove_at", |detail| detail.remove_at(index))
    }

    fn move_element(&self, from: usize, to: usize) -> Result<E> {
        self.inner.mutate("move_element", |detail| detail.move_element(from, to))
    }

    fn clear(&self) -> Result<()> {
        self.inner.mutate("clear", |detail| detail.clear())
    }
}
