//! Listener registry with disposer-style subscriptions.
//!
//! `subscribe` hands back a [`Subscription`]; dropping it unregisters the
//! callback, so a listener lives exactly as long as the value that owns it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use crate::lock;

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Registry<T> {
    next_id: u64,
    callbacks: HashMap<u64, Callback<T>>,
}

pub struct Listeners<T> {
    registry: Arc<Mutex<Registry<T>>>,
}

impl<T: 'static> Listeners<T> {
    pub fn new() -> Self {
        Self {
            registry: Arc::new(Mutex::new(Registry {
                next_id: 0,
                callbacks: HashMap::new(),
            })),
        }
    }

    pub fn subscribe(&self, f: impl Fn(&T) + Send + Sync + 'static) -> Subscription {
        let id = {
            let mut registry = lock(&self.registry);
            let id = registry.next_id;
            registry.next_id += 1;
            registry.callbacks.insert(id, Arc::new(f));
            id
        };

        let weak: Weak<Mutex<Registry<T>>> = Arc::downgrade(&self.registry);
        Subscription {
            dispose: Some(Box::new(move || {
                if let Some(registry) = weak.upgrade() {
                    lock(&registry).callbacks.remove(&id);
                }
            })),
        }
    }

    /// Invoke every listener in registration order.
    ///
    /// Callbacks run without the registry lock held, so they may subscribe or
    /// dispose other listeners.
    pub fn emit(&self, value: &T) {
        let callbacks: Vec<Callback<T>> = {
            let registry = lock(&self.registry);
            let mut entries: Vec<_> = registry.callbacks.iter().collect();
            entries.sort_by_key(|(id, _)| **id);
            entries.into_iter().map(|(_, cb)| cb.clone()).collect()
        };
        for cb in callbacks {
            cb(value);
        }
    }

    pub fn len(&self) -> usize {
        lock(&self.registry).callbacks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: 'static> Default for Listeners<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Disposer for a registered listener. Unsubscribes on drop.
#[must_use = "dropping a Subscription unregisters the listener immediately"]
pub struct Subscription {
    dispose: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    /// Unregister now instead of at drop.
    pub fn dispose(mut self) {
        if let Some(dispose) = self.dispose.take() {
            dispose();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(dispose) = self.dispose.take() {
            dispose();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.dispose.is_some())
            .finish()
    }
}
