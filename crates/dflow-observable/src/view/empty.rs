#![forbid(unsafe_code)]

use std::rc::Rc;

use dflow_core::realm::Realm;
use dflow_core::token::TypeToken;
use dflow_diff::ListDiff;

use crate::listeners::{ObservableCore, Subscription, impl_observable};
use crate::traits::{ListHandle, ObservableList};

/// A list that is always empty and never stale.
pub struct EmptyList<E: 'static> {
    inner: Rc<EmptyInner<E>>,
}

struct EmptyInner<E: 'static> {
    core: ObservableCore<ListDiff<E>>,
    element_type: Option<TypeToken>,
}

impl<E> Clone for EmptyList<E> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<E: 'static> EmptyList<E> {
    pub fn new(realm: &Realm) -> Self {
        Self::build(realm, None)
    }

    pub fn with_element_type(realm: &Realm, element_type: TypeToken) -> Self {
        Self::build(realm, Some(element_type))
    }

    fn build(realm: &Realm, element_type: Option<TypeToken>) -> Self {
        Self {
            inner: Rc::new(EmptyInner {
                core: ObservableCore::passive(realm),
                element_type,
            }),
        }
    }

    pub fn handle(&self) -> ListHandle<E> {
        Rc::new(self.clone())
    }
}

impl<E: 'static> EmptyInner<E> {
    fn is_stale(&self) -> bool {
        self.core.getter_called();
        false
    }

    fn dispose(&self) {
        self.core.dispose();
    }
}

impl_observable!(EmptyList<E> where [E: 'static]);

impl<E: 'static> ObservableList<E> for EmptyList<E> {
    fn len(&self) -> usize {
        self.inner.core.getter_called();
        0
    }

    fn get(&self, _index: usize) -> Option<E> {
        self.inner.core.getter_called();
        None
    }

    fn to_vec(&self) -> Vec<E> {
        self.inner.core.getter_called();
        Vec::new()
    }

    fn element_type(&self) -> Option<TypeToken> {
        self.inner.element_type
    }

    fn subscribe_list(&self, listener: Box<dyn Fn(&ListDiff<E>)>) -> Subscription {
        self.inner.core.subscribe(listener)
    }
}
