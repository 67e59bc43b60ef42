#![forbid(unsafe_code)]

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use dflow_core::error::{ObservableError, Result};
use dflow_core::realm::Realm;
use dflow_core::token::TypeToken;
use dflow_diff::{ListDiff, ListDiffEntry};

use crate::listeners::{ObservableCore, Subscription, impl_observable};
use crate::traits::{ListHandle, ObservableList};

/// A mutable observable list.
///
/// Every mutator fires exactly the entries it performed, addressed the way
/// they were applied.
pub struct WritableList<E: 'static> {
    inner: Rc<ListInner<E>>,
}

struct ListInner<E: 'static> {
    core: ObservableCore<ListDiff<E>>,
    elements: RefCell<Vec<E>>,
    stale: Cell<bool>,
    element_type: Option<TypeToken>,
}

impl<E> Clone for WritableList<E> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<E: Clone + PartialEq + 'static> WritableList<E> {
    pub fn new(realm: &Realm) -> Self {
        Self::from_vec(realm, Vec::new())
    }

    pub fn from_vec(realm: &Realm, elements: Vec<E>) -> Self {
        Self::build(realm, elements, None)
    }

    pub fn with_element_type(realm: &Realm, elements: Vec<E>, element_type: TypeToken) -> Self {
        Self::build(realm, elements, Some(element_type))
    }

    fn build(realm: &Realm, elements: Vec<E>, element_type: Option<TypeToken>) -> Self {
        Self {
            inner: Rc::new(ListInner {
                core: ObservableCore::passive(realm),
                elements: RefCell::new(elements),
                stale: Cell::new(false),
                element_type,
            }),
        }
    }

    pub fn handle(&self) -> ListHandle<E> {
        Rc::new(self.clone())
    }

    /// Run `edit` on the elements and fire the entries it returns.
    fn mutate<R>(
        &self,
        edit: impl FnOnce(&mut Vec<E>) -> Result<(R, Vec<ListDiffEntry<E>>)>,
    ) -> Result<R> {
        self.inner.core.check_mutation()?;
        let (result, entries) = edit(&mut self.inner.elements.borrow_mut())?;
        if !entries.is_empty() {
            self.inner.core.fire_change(&ListDiff::new(entries));
        }
        Ok(result)
    }

    pub fn push(&self, element: E) -> Result<()> {
        self.mutate(|list| {
            list.push(element.clone());
            Ok(((), vec![ListDiffEntry::addition(list.len() - 1, element)]))
        })
    }

    pub fn insert(&self, index: usize, element: E) -> Result<()> {
        self.mutate(|list| {
            if index > list.len() {
                return Err(ObservableError::out_of_bounds(index, list.len()));
            }
            list.insert(index, element.clone());
            Ok(((), vec![ListDiffEntry::addition(index, element)]))
        })
    }

    pub fn set(&self, index: usize, element: E) -> Result<E> {
        self.mutate(|list| {
            let Some(slot) = list.get_mut(index) else {
                return Err(ObservableError::out_of_bounds(index, list.len()));
            };
            let old = std::mem::replace(slot, element.clone());
            let entries = vec![
                ListDiffEntry::removal(index, old.clone()),
                ListDiffEntry::addition(index, element),
            ];
            Ok((old, entries))
        })
    }

    pub fn remove_at(&self, index: usize) -> Result<E> {
        self.mutate(|list| {
            if index >= list.len() {
                return Err(ObservableError::out_of_bounds(index, list.len()));
            }
            let old = list.remove(index);
            Ok((old.clone(), vec![ListDiffEntry::removal(index, old)]))
        })
    }

    /// Both indices must address existing elements; moving an element onto
    /// itself changes nothing and fires nothing.
    pub fn move_element(&self, from: usize, to: usize) -> Result<E> {
        self.mutate(|list| {
            let len = list.len();
            if from >= len {
                return Err(ObservableError::out_of_bounds(from, len));
            }
            if to >= len {
                return Err(ObservableError::out_of_bounds(to, len));
            }
            if from == to {
                return Ok((list[from].clone(), Vec::new()));
            }
            let moved = list.remove(from);
            list.insert(to, moved.clone());
            let entries = vec![
                ListDiffEntry::removal(from, moved.clone()),
                ListDiffEntry::addition(to, moved.clone()),
            ];
            Ok((moved, entries))
        })
    }

    /// Append every element, firing one diff.
    pub fn extend(&self, elements: impl IntoIterator<Item = E>) -> Result<()> {
        self.mutate(|list| {
            let start = list.len();
            let entries = elements
                .into_iter()
                .enumerate()
                .map(|(offset, element)| {
                    list.push(element.clone());
                    ListDiffEntry::addition(start + offset, element)
                })
                .collect();
            Ok(((), entries))
        })
    }

    /// Insert every element starting at `index`, firing one diff.
    pub fn insert_all(&self, index: usize, elements: impl IntoIterator<Item = E>) -> Result<()> {
        self.mutate(|list| {
            if index > list.len() {
                return Err(ObservableError::out_of_bounds(index, list.len()));
            }
            let incoming: Vec<E> = elements.into_iter().collect();
            let entries = incoming
                .iter()
                .enumerate()
                .map(|(offset, element)| ListDiffEntry::addition(index + offset, element.clone()))
                .collect();
            list.splice(index..index, incoming);
            Ok(((), entries))
        })
    }

    /// Remove the first occurrence of `element`.
    pub fn remove_item(&self, element: &E) -> Result<bool> {
        self.mutate(|list| match list.iter().position(|e| e == element) {
            Some(index) => {
                let old = list.remove(index);
                Ok((true, vec![ListDiffEntry::removal(index, old)]))
            }
            None => Ok((false, Vec::new())),
        })
    }

    /// Remove the first occurrence of each given element.
    pub fn remove_all(&self, elements: &[E]) -> Result<bool> {
        self.mutate(|list| {
            let mut entries = Vec::new();
            for element in elements {
                if let Some(index) = list.iter().position(|e| e == element) {
                    entries.push(ListDiffEntry::removal(index, list.remove(index)));
                }
            }
            Ok((!entries.is_empty(), entries))
        })
    }

    /// Keep only elements matching `keep`.
    pub fn retain(&self, mut keep: impl FnMut(&E) -> bool) -> Result<bool> {
        self.mutate(|list| {
            let mut entries = Vec::new();
            let mut index = 0;
            while index < list.len() {
                if keep(&list[index]) {
                    index += 1;
                } else {
                    entries.push(ListDiffEntry::removal(index, list.remove(index)));
                }
            }
            Ok((!entries.is_empty(), entries))
        })
    }

    /// Remove everything, back to front.
    pub fn clear(&self) -> Result<()> {
        self.mutate(|list| {
            let entries = list
                .drain(..)
                .enumerate()
                .collect::<Vec<_>>()
                .into_iter()
                .rev()
                .map(|(index, element)| ListDiffEntry::removal(index, element))
                .collect();
            Ok(((), entries))
        })
    }

    pub fn set_stale(&self, stale: bool) -> Result<()> {
        self.inner.core.check_mutation()?;
        if !self.inner.stale.replace(stale) && stale {
            self.inner.core.fire_stale();
        }
        Ok(())
    }
}

impl<E: 'static> ListInner<E> {
    fn is_stale(&self) -> bool {
        self.core.getter_called();
        self.stale.get()
    }

    fn dispose(&self) {
        self.core.dispose();
    }
}

impl_observable!(WritableList<E> where [E: 'static]);

impl<E: Clone + PartialEq + 'static> ObservableList<E> for WritableList<E> {
    fn len(&self) -> usize {
        self.inner.core.getter_called();
        self.inner.elements.borrow().len()
    }

    fn get(&self, index: usize) -> Option<E> {
        self.inner.core.getter_called();
        self.inner.elements.borrow().get(index).cloned()
    }

    fn to_vec(&self) -> Vec<E> {
        self.inner.core.getter_called();
        self.inner.elements.borrow().clone()
    }

    fn element_type(&self) -> Option<TypeToken> {
        self.inner.element_type
    }

    fn subscribe_list(&self, listener: Box<dyn Fn(&ListDiff<E>)>) -> Subscription {
        self.inner.core.subscribe(listener)
    }

    fn push(&self, element: E) -> Result<()> {
        WritableList::push(self, element)
    }

    fn insert(&self, index: usize, element: E) -> Result<()> {
        WritableList::insert(self, index, element)
    }

    fn set(&self, index: usize, element: E) -> Result<E> {
        WritableList::set(self, index, element)
    }

    fn remove_at(&self, index: usize) -> Result<E> {
        WritableList::remove_at(self, index)
    }

    fn move_element(&self, from: usize, to: usize) -> Result<E> {
        WritableList::move_element(self, from, to)
    }

    fn clear(&self) -> Result<()> {
        WritableList::clear(self)
    }
}
