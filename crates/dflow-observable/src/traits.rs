#![forbid(unsafe_code)]

//! Observable traits.
//!
//! All methods take `&self`: observables are shared handles with interior
//! mutability, like the rest of the reactive layer. Getters check the realm
//! and panic outside it; mutators return [`Result`] and default to
//! [`ObservableError::Unsupported`] so read-only implementations only
//! provide the getters.

use std::hash::Hash;
use std::rc::Rc;

use ahash::{AHashMap, AHashSet};
use dflow_core::error::{ObservableError, Result};
use dflow_core::realm::Realm;
use dflow_core::token::TypeToken;
use dflow_diff::{ListDiff, MapDiff, SetDiff, ValueDiff};

use crate::listeners::Subscription;

pub type ValueHandle<T> = Rc<dyn ObservableValue<T>>;
pub type ListHandle<E> = Rc<dyn ObservableList<E>>;
pub type SetHandle<E> = Rc<dyn ObservableSet<E>>;
pub type MapHandle<K, V> = Rc<dyn ObservableMap<K, V>>;

/// Behaviour shared by every observable.
pub trait Observable {
    fn realm(&self) -> &Realm;

    /// Advisory: the current state is known to be out of date and a change
    /// event is expected.
    fn is_stale(&self) -> bool;

    fn is_disposed(&self) -> bool;

    /// Release upstream subscriptions and drop every listener. Idempotent.
    fn dispose(&self);

    /// Whether any change or stale listener is attached.
    fn has_listeners(&self) -> bool;

    fn subscribe_stale(&self, listener: Box<dyn Fn()>) -> Subscription;

    fn subscribe_dispose(&self, listener: Box<dyn Fn()>) -> Subscription;
}

pub trait ObservableValue<T>: Observable {
    /// # Panics
    ///
    /// Panics when called outside the owning realm.
    fn value(&self) -> T;

    fn value_type(&self) -> Option<TypeToken> {
        None
    }

    fn subscribe_value(&self, listener: Box<dyn Fn(&ValueDiff<T>)>) -> Subscription;

    fn set_value(&self, value: T) -> Result<()> {
        let _ = value;
        Err(ObservableError::unsupported("set_value"))
    }
}

pub trait ObservableList<E>: Observable {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn get(&self, index: usize) -> Option<E>;

    fn to_vec(&self) -> Vec<E>;

    fn element_type(&self) -> Option<TypeToken> {
        None
    }

    fn subscribe_list(&self, listener: Box<dyn Fn(&ListDiff<E>)>) -> Subscription;

    fn push(&self, element: E) -> Result<()> {
        let _ = element;
        Err(ObservableError::unsupported("push"))
    }

    fn insert(&self, index: usize, element: E) -> Result<()> {
        let _ = (index, element);
        Err(ObservableError::unsupported("insert"))
    }

    /// Replace the element at `index`, returning the previous one.
    fn set(&self, index: usize, element: E) -> Result<E> {
        let _ = (index, element);
        Err(ObservableError::unsupported("set"))
    }

    fn remove_at(&self, index: usize) -> Result<E> {
        let _ = index;
        Err(ObservableError::unsupported("remove_at"))
    }

    /// Move the element at `from` so that it ends up at `to`.
    fn move_element(&self, from: usize, to: usize) -> Result<E> {
        let _ = (from, to);
        Err(ObservableError::unsupported("move_element"))
    }

    fn clear(&self) -> Result<()> {
        Err(ObservableError::unsupported("clear"))
    }
}

pub trait ObservableSet<E: Eq + Hash>: Observable {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn contains(&self, element: &E) -> bool;

    fn to_set(&self) -> AHashSet<E>;

    fn element_type(&self) -> Option<TypeToken> {
        None
    }

    fn subscribe_set(&self, listener: Box<dyn Fn(&SetDiff<E>)>) -> Subscription;

    /// Returns whether the set changed.
    fn insert(&self, element: E) -> Result<bool> {
        let _ = element;
        Err(ObservableError::unsupported("insert"))
    }

    /// Returns whether the set changed.
    fn remove(&self, element: &E) -> Result<bool> {
        let _ = element;
        Err(ObservableError::unsupported("remove"))
    }

    fn clear(&self) -> Result<()> {
        Err(ObservableError::unsupported("clear"))
    }
}

pub trait ObservableMap<K: Eq + Hash, V>: Observable {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn contains_key(&self, key: &K) -> bool;

    fn get(&self, key: &K) -> Option<V>;

    fn keys(&self) -> AHashSet<K>;

    fn to_map(&self) -> AHashMap<K, V>;

    fn key_type(&self) -> Option<TypeToken> {
        None
    }

    fn value_type(&self) -> Option<TypeToken> {
        None
    }

    fn subscribe_map(&self, listener: Box<dyn Fn(&MapDiff<K, V>)>) -> Subscription;

    /// Insert or overwrite, returning the previous value.
    fn put(&self, key: K, value: V) -> Result<Option<V>> {
        let _ = (key, value);
        Err(ObservableError::unsupported("put"))
    }

    fn remove(&self, key: &K) -> Result<Option<V>> {
        let _ = key;
        Err(ObservableError::unsupported("remove"))
    }

    fn clear(&self) -> Result<()> {
        Err(ObservableError::unsupported("clear"))
    }
}
