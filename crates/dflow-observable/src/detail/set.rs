#![forbid(unsafe_code)]

use std::hash::Hash;
use std::marker::PhantomData;
use std::rc::Rc;

use ahash::AHashSet;
use dflow_core::error::Result;
use dflow_core::token::TypeToken;
use dflow_diff::{SetDiff, compute_set_diff};

use super::{DetailInner, DetailKind, delegate_observable};
use crate::listeners::{Subscription, impl_observable};
use crate::traits::{ObservableSet, SetHandle, ValueHandle};

pub(crate) struct SetKind<E>(PhantomData<E>);

impl<E: Eq + Hash + Clone + 'static> DetailKind for SetKind<E> {
    type Handle = SetHandle<E>;
    type Snapshot = AHashSet<E>;
    type Diff = SetDiff<E>;

    fn snapshot(detail: Option<&Self::Handle>) -> AHashSet<E> {
        detail.map(|detail| detail.to_set()).unwrap_or_default()
    }

    fn replaced(old: AHashSet<E>, new: AHashSet<E>) -> Option<SetDiff<E>> {
        let diff = compute_set_diff(&old, &new);
        (!diff.is_empty()).then_some(diff)
    }

    fn subscribe(detail: &Self::Handle, forward: Box<dyn Fn(&SetDiff<E>)>) -> Subscription {
        detail.subscribe_set(forward)
    }

    fn type_token(detail: &Self::Handle) -> Option<TypeToken> {
        detail.element_type()
    }

    delegate_observable!();
}

/// The elements of whichever observable set the master currently selects.
pub struct DetailSet<M: 'static, E: Eq + Hash + Clone + 'static> {
    inner: Rc<DetailInner<M, SetKind<E>>>,
}

impl<M, E: Eq + Hash + Clone> Clone for DetailSet<M, E> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<M: Clone + PartialEq + 'static, E: Eq + Hash + Clone + 'static> DetailSet<M, E> {
    pub fn new(
        master: ValueHandle<M>,
        factory: impl Fn(&M) -> Option<SetHandle<E>> + 'static,
    ) -> Self {
        Self {
            inner: DetailInner::new(master, Box::new(factory), None),
        }
    }

    pub fn with_element_type(
        master: ValueHandle<M>,
        factory: impl Fn(&M) -> Option<SetHandle<E>> + 'static,
        element_type: TypeToken,
    ) -> Self {
        Self {
            inner: DetailInner::new(master, Box::new(factory), Some(element_type)),
        }
    }

    pub fn handle(&self) -> SetHandle<E> {
        Rc::new(self.clone())
    }
}

impl_observable!(DetailSet<M, E> where [
    M: Clone + PartialEq + 'static,
    E: Eq + Hash + Clone + 'static
]);

impl<M, E> ObservableSet<E> for DetailSet<M, E>
where
    M: Clone + PartialEq + 'static,
    E: Eq + Hash + Clone + 'static,
{
    fn len(&self) -> usize {
        self.inner.current().map_or(0, |detail| detail.len())
    }

    fn contains(&self, element: &E) -> bool {
        self.inner.current().is_some_and(|detail| detail.contains(element))
    }

    fn to_set(&self) -> AHashSet<E> {
        SetKind::<E>::snapshot(self.inner.current().as_ref())
    }

    fn element_type(&self) -> Option<TypeToken> {
        self.inner.detail_type()
    }

    fn subscribe_set(&self, listener: Box<dyn Fn(&SetDiff<E>)>) -> Subscription {
        self.inner.core.subscribe(listener)
    }

    fn insert(&self, element: E) -> Result<bool> {
        self.inner.mutate("insert", |detail| detail.insert(element))
    }

    fn remove(&self, element: &E) -> Result<bool> {
        self.inner.mutate("remove", |detail| detail.remove(element))
    }

    fn clear(&self) -> Result<()> {
        self.inner.mutate("clear", |detail| detail.clear())
    }
}
