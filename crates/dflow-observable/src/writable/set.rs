#![forbid(unsafe_code)]

use std::cell::{Cell, RefCell};
use std::hash::Hash;
use std::rc::Rc;

use ahash::AHashSet;
use dflow_core::error::Result;
use dflow_core::realm::Realm;
use dflow_core::token::TypeToken;
use dflow_diff::SetDiff;

use crate::listeners::{ObservableCore, Subscription, impl_observable};
use crate::traits::{ObservableSet, SetHandle};

/// A mutable observable set.
pub struct WritableSet<E: Eq + Hash + 'static> {
    inner: Rc<SetInner<E>>,
}

struct SetInner<E: Eq + Hash + 'static> {
    core: ObservableCore<SetDiff<E>>,
    elements: RefCell<AHashSet<E>>,
    stale: Cell<bool>,
    element_type: Option<TypeToken>,
}

impl<E: Eq + Hash> Clone for WritableSet<E> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<E: Eq + Hash + Clone + 'static> WritableSet<E> {
    pub fn new(realm: &Realm) -> Self {
        Self::from_set(realm, AHashSet::new())
    }

    pub fn from_set(realm: &Realm, elements: AHashSet<E>) -> Self {
        Self::build(realm, elements, None)
    }

    pub fn with_element_type(
        realm: &Realm,
        elements: AHashSet<E>,
        element_type: TypeToken,
    ) -> Self {
        Self::build(realm, elements, Some(element_type))
    }

    fn build(realm: &Realm, elements: AHashSet<E>, element_type: Option<TypeToken>) -> Self {
        Self {
            inner: Rc::new(SetInner {
                core: ObservableCore::passive(realm),
                elements: RefCell::new(elements),
                stale: Cell::new(false),
                element_type,
            }),
        }
    }

    pub fn handle(&self) -> SetHandle<E> {
        Rc::new(self.clone())
    }

    /// Apply `additions` and `removals` together and fire one diff holding
    /// the elements that actually changed membership.
    pub fn add_and_remove(&self, additions: AHashSet<E>, removals: AHashSet<E>) -> Result<bool> {
        self.inner.core.check_mutation()?;
        let diff = {
            let mut elements = self.inner.elements.borrow_mut();
            let mut added = AHashSet::new();
            let mut removed = AHashSet::new();
            for element in removals {
                if !additions.contains(&element) && elements.remove(&element) {
                    removed.insert(element);
                }
            }
            for element in additions {
                if elements.insert(element.clone()) {
                    added.insert(element);
                }
            }
            SetDiff::new(added, removed)
        };
        if diff.is_empty() {
            return Ok(false);
        }
        self.inner.core.fire_change(&diff);
        Ok(true)
    }

    pub fn insert(&self, element: E) -> Result<bool> {
        self.add_and_remove(AHashSet::from_iter([element]), AHashSet::new())
    }

    pub fn remove(&self, element: &E) -> Result<bool> {
        self.add_and_remove(AHashSet::new(), AHashSet::from_iter([element.clone()]))
    }

    pub fn extend(&self, elements: impl IntoIterator<Item = E>) -> Result<bool> {
        self.add_and_remove(elements.into_iter().collect(), AHashSet::new())
    }

    pub fn remove_all(&self, elements: impl IntoIterator<Item = E>) -> Result<bool> {
        self.add_and_remove(AHashSet::new(), elements.into_iter().collect())
    }

    pub fn retain(&self, mut keep: impl FnMut(&E) -> bool) -> Result<bool> {
        self.inner.core.check_mutation()?;
        let dropped: AHashSet<E> = self
            .inner
            .elements
            .borrow()
            .iter()
            .filter(|element| !keep(element))
            .cloned()
            .collect();
        self.add_and_remove(AHashSet::new(), dropped)
    }

    pub fn clear(&self) -> Result<()> {
        self.inner.core.check_mutation()?;
        let all = std::mem::take(&mut *self.inner.elements.borrow_mut());
        if !all.is_empty() {
            self.inner.core.fire_change(&SetDiff::removals_only(all));
        }
        Ok(())
    }

    pub fn set_stale(&self, stale: bool) -> Result<()> {
        self.inner.core.check_mutation()?;
        if !self.inner.stale.replace(stale) && stale {
            self.inner.core.fire_stale();
        }
        Ok(())
    }
}

impl<E: Eq + Hash + 'static> SetInner<E> {
    fn is_stale(&self) -> bool {
        self.core.getter_called();
        self.stale.get()
    }

    fn dispose(&self) {
        self.core.dispose();
    }
}

impl_observable!(WritableSet<E> where [E: Eq + Hash + 'static]);

impl<E: Eq + Hash + Clone + 'static> ObservableSet<E> for WritableSet<E> {
    fn len(&self) -> usize {
        self.inner.core.getter_called();
        self.inner.elements.borrow().len()
    }

    fn contains(&self, element: &E) -> bool {
        self.inner.core.getter_called();
        self.inner.elements.borrow().contains(element)
    }

    fn to_set(&self) -> AHashSet<E> {
        self.inner.core.getter_called();
        self.inner.elements.borrow().clone()
    }

    fn element_type(&self) -> Option<TypeToken> {
        self.inner.element_type
    }

    fn subscribe_set(&self, listener: Box<dyn Fn(&SetDiff<E>)>) -> Subscription {
        self.inner.core.subscribe(listener)
    }

    fn insert(&self, element: E) -> Result<bool> {
        WritableSet::insert(self, element)
    }

    fn remove(&self, element: &E) -> Result<bool> {
        WritableSet::remove(self, element)
    }

    fn clear(&self) -> Result<()> {
        WritableSet::clear(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(items: &[u8]) -> AHashSet<u8> {
        items.iter().copied().collect()
    }

    #[test]
    fn add_and_remove_fires_net_membership_changes() {
        let realm = Realm::new();
        let target = WritableSet::from_set(&realm, set(&[1, 2]));
        let log = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&log);
        let _sub = target.subscribe_set(Box::new(move |d| sink.borrow_mut().push(d.clone())));

        assert!(target.add_and_remove(set(&[2, 3]), set(&[1, 4])).unwrap());
        assert_eq!(log.borrow()[0], SetDiff::new(set(&[3]), set(&[1])));
        assert!(!target.insert(3).unwrap());
        assert_eq!(log.borrow().len(), 1);
        assert_eq!(target.to_set(), set(&[2, 3]));
    }

    #[test]
    fn retain_and_clear() {
        let realm = Realm::new();
        let target = WritableSet::from_set(&realm, set(&[1, 2, 3, 4]));
        assert!(target.retain(|v| v % 2 == 0).unwrap());
        assert_eq!(target.to_set(), set(&[2, 4]));
        target.clear().unwrap();
        assert!(target.is_empty());
    }

    #[test]
    fn identity_elements_keep_equal_values_apart() {
        use dflow_core::identity::ByIdentity;

        let realm = Realm::new();
        let first = Rc::new(String::from("row"));
        let twin = Rc::new(String::from("row"));
        let target: WritableSet<ByIdentity<Rc<String>>> = WritableSet::new(&realm);
        assert!(target.insert(ByIdentity(Rc::clone(&first))).unwrap());
        assert!(target.insert(ByIdentity(Rc::clone(&twin))).unwrap());
        assert!(!target.insert(ByIdentity(Rc::clone(&first))).unwrap());
        assert_eq!(target.len(), 2);

        assert!(target.remove(&ByIdentity(Rc::clone(&twin))).unwrap());
        assert!(target.contains(&ByIdentity(first)));
        assert!(!target.contains(&ByIdentity(twin)));
    }
}
