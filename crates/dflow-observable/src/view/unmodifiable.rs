#![forbid(unsafe_code)]

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use dflow_core::token::TypeToken;
use dflow_diff::ListDiff;

use crate::listeners::{Lifecycle, ObservableCore, Subscription, impl_observable};
use crate::traits::{ListHandle, ObservableList};

/// Read-only decorator over an observable list.
///
/// Getters and events pass through; every mutator keeps the trait's
/// `Unsupported` default. Disposing the decorated list disposes the view,
/// but disposing the view leaves the decorated list alone.
pub struct UnmodifiableList<E: 'static> {
    inner: Rc<UnmodifiableInner<E>>,
}

struct UnmodifiableInner<E: 'static> {
    core: ObservableCore<ListDiff<E>>,
    this: Weak<UnmodifiableInner<E>>,
    decorated: ListHandle<E>,
    forwarding: RefCell<Option<[Subscription; 2]>>,
    _decorated_disposal: Subscription,
}

impl<E> Clone for UnmodifiableList<E> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<E: Clone + 'static> UnmodifiableList<E> {
    pub fn new(decorated: ListHandle<E>) -> Self {
        let realm = decorated.realm().clone();
        let inner = Rc::new_cyclic(|this: &Weak<UnmodifiableInner<E>>| {
            let owner = this.clone();
            let disposal = decorated.subscribe_dispose(Box::new(move || {
                if let Some(view) = owner.upgrade() {
                    view.dispose();
                }
            }));
            UnmodifiableInner {
                core: ObservableCore::new(&realm, this.clone()),
                this: this.clone(),
                decorated,
                forwarding: RefCell::new(None),
                _decorated_disposal: disposal,
            }
        });
        Self { inner }
    }

    pub fn handle(&self) -> ListHandle<E> {
        Rc::new(self.clone())
    }
}

impl<E: Clone + 'static> UnmodifiableInner<E> {
    fn is_stale(&self) -> bool {
        self.core.getter_called();
        self.decorated.is_stale()
    }

    fn dispose(&self) {
        if self.core.dispose() {
            self.forwarding.borrow_mut().take();
        }
    }
}

impl<E: Clone + 'static> Lifecycle for UnmodifiableInner<E> {
    fn first_listener_added(&self) {
        let this = self.this.clone();
        let changes = self.decorated.subscribe_list(Box::new(move |diff| {
            if let Some(view) = this.upgrade() {
                view.core.fire_change(diff);
            }
        }));
        let this = self.this.clone();
        let stale = self.decorated.subscribe_stale(Box::new(move || {
            if let Some(view) = this.upgrade() {
                view.core.fire_stale();
            }
        }));
        *self.forwarding.borrow_mut() = Some([changes, stale]);
    }

    fn last_listener_removed(&self) {
        self.forwarding.borrow_mut().take();
    }
}

impl_observable!(UnmodifiableList<E> where [E: Clone + 'static]);

impl<E: Clone + 'static> ObservableList<E> for UnmodifiableList<E> {
    fn len(&self) -> usize {
        self.inner.core.getter_called();
        self.inner.decorated.len()
    }

    fn get(&self, index: usize) -> Option<E> {
        self.inner.core.getter_called();
        self.inner.decorated.get(index)
    }

    fn to_vec(&self) -> Vec<E> {
        self.inner.core.getter_called();
        self.inner.decorated.to_vec()
    }

    fn element_type(&self) -> Option<TypeToken> {
        self.inner.decorated.element_type()
    }

    fn subscribe_list(&self, listener: Box<dyn Fn(&ListDiff<E>)>) -> Subscription {
        self.inner.core.subscribe(listener)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::Observable;
    use crate::writable::WritableList;
    use dflow_core::error::ObservableError;
    use dflow_core::realm::Realm;

    #[test]
    fn reads_and_events_pass_through() {
        let list = WritableList::from_vec(&Realm::new(), vec![1, 2]);
        let view = UnmodifiableList::new(list.handle());
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        let sub =
            view.subscribe_list(Box::new(move |d: &ListDiff<i32>| sink.borrow_mut().push(d.len())));
        list.push(3).unwrap();
        assert_eq!(view.to_vec(), vec![1, 2, 3]);
        assert_eq!(*seen.borrow(), vec![1]);
        drop(sub);
        assert!(!list.has_listeners());
    }

    #[test]
    fn mutators_are_unsupported() {
        let list = WritableList::from_vec(&Realm::new(), vec![1]);
        let view = UnmodifiableList::new(list.handle());
        assert!(matches!(view.push(2), Err(ObservableError::Unsupported { operation: "push" })));
        assert!(matches!(view.set(0, 2), Err(ObservableError::Unsupported { .. })));
        assert!(matches!(view.clear(), Err(ObservableError::Unsupported { .. })));
        assert_eq!(list.to_vec(), vec![1]);
    }

    #[test]
    fn disposal_runs_one_way() {
        let list = WritableList::from_vec(&Realm::new(), vec![1]);
        let view = UnmodifiableList::new(list.handle());
        view.dispose();
        assert!(!list.is_disposed());
        let second = UnmodifiableList::new(list.handle());
        list.dispose();
        assert!(second.is_disposed());
    }
}
