#![forbid(unsafe_code)]

use std::cell::RefCell;
use std::hash::Hash;
use std::rc::{Rc, Weak};

use ahash::{AHashMap, AHashSet};
use dflow_core::token::TypeToken;
use dflow_diff::MapDiff;

use crate::listeners::{Lifecycle, ObservableCore, Subscription, impl_observable};
use crate::traits::{MapHandle, ObservableMap};

/// Read-only decorator over an observable map; `put`, `remove` and `clear`
/// stay `Unsupported`.
pub struct UnmodifiableMap<K: Eq + Hash + 'static, V: 'static> {
    inner: Rc<UnmodifiableMapInner<K, V>>,
}

struct UnmodifiableMapInner<K: Eq + Hash + 'static, V: 'static> {
    core: ObservableCore<MapDiff<K, V>>,
    this: Weak<UnmodifiableMapInner<K, V>>,
    decorated: MapHandle<K, V>,
    forwarding: RefCell<Option<[Subscription; 2]>>,
    _decorated_disposal: Subscription,
}

impl<K: Eq + Hash, V> Clone for UnmodifiableMap<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<K: Eq + Hash + Clone + 'static, V: Clone + 'static> UnmodifiableMap<K, V> {
    pub fn new(decorated: MapHandle<K, V>) -> Self {
        let realm = decorated.realm().clone();
        let inner = Rc::new_cyclic(|this: &Weak<UnmodifiableMapInner<K, V>>| {
            let owner = this.clone();
            let disposal = decorated.subscribe_dispose(Box::new(move || {
                if let Some(view) = owner.upgrade() {
                    view.dispose();
                }
            }));
            UnmodifiableMapInner {
                core: ObservableCore::new(&realm, this.clone()),
                this: this.clone(),
                decorated,
                forwarding: RefCell::new(None),
                _decorated_disposal: disposal,
            }
        });
        Self { inner }
    }

    pub fn handle(&self) -> MapHandle<K, V> {
        Rc::new(self.clone())
    }
}

impl<K: Eq + Hash + Clone + 'static, V: Clone + 'static> UnmodifiableMapInner<K, V> {
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

impl<K: Eq + Hash + Clone + 'static, V: Clone + 'static> Lifecycle for UnmodifiableMapInner<K, V> {
    fn first_listener_added(&self) {
        let this = self.this.clone();
        let changes = self.decorated.subscribe_map(Box::new(move |diff| {
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

impl_observable!(UnmodifiableMap<K, V> where [K: Eq + Hash + Clone + 'static, V: Clone + 'static]);

impl<K, V> ObservableMap<K, V> for UnmodifiableMap<K, V>
where
    K: Eq + Hash + Clone + 'static,
    V: Clone + 'static,
{
    fn len(&self) -> usize {
        self.inner.core.getter_called();
        self.inner.decorated.len()
    }

    fn contains_key(&self, key: &K) -> bool {
        self.inner.core.getter_called();
        self.inner.decorated.contains_key(key)
    }

    fn get(&self, key: &K) -> Option<V> {
        self.inner.core.getter_called();
        self.inner.decorated.get(key)
    }

    fn keys(&self) -> AHashSet<K> {
        self.inner.core.getter_called();
        self.inner.decorated.keys()
    }

    fn to_map(&self) -> AHashMap<K, V> {
        self.inner.core.getter_called();
        self.inner.decorated.to_map()
    }

    fn key_type(&self) -> Option<TypeToken> {
        self.inner.decorated.key_type()
    }

    fn value_type(&self) -> Option<TypeToken> {
        self.inner.decorated.value_type()
    }

    fn subscribe_map(&self, listener: Box<dyn Fn(&MapDiff<K, V>)>) -> Subscription {
        self.inner.core.subscribe(listener)
    }
}
