//! Subscription registry: type routes and per-consumer registration sets.

use crate::consumer::MethodDescriptor;
use crate::priority::insertion_index;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

/// Identity of a registered consumer object: the address of its allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct ConsumerKey(usize);

impl ConsumerKey {
    pub(crate) fn of<C>(consumer: &Arc<C>) -> Self {
        Self(Arc::as_ptr(consumer) as usize)
    }
}

/// One consumer method bound to one consumer object.
///
/// The consumer is held weakly; the bus never keeps a consumer alive.
pub(crate) struct Subscription {
    pub(crate) key: ConsumerKey,
    pub(crate) consumer: Weak<dyn Any + Send + Sync>,
    pub(crate) consumer_type: &'static str,
    pub(crate) method: MethodDescriptor,
    active: AtomicBool,
}

impl Subscription {
    pub(crate) fn new(
        key: ConsumerKey,
        consumer: Weak<dyn Any + Send + Sync>,
        consumer_type: &'static str,
        method: MethodDescriptor,
    ) -> Self {
        Self {
            key,
            consumer,
            consumer_type,
            method,
            active: AtomicBool::new(true),
        }
    }

    /// Returns false once the consumer has been unregistered.
    pub(crate) fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    fn deactivate(&self) {
        self.active.store(false, Ordering::Release);
    }
}

struct Registration {
    consumer: Weak<dyn Any + Send + Sync>,
    message_types: Vec<TypeId>,
}

/// Type routes plus the registration set of every consumer.
///
/// Not synchronized; the owning channel guards it with its lock.
#[derive(Default)]
pub(crate) struct Registry {
    routes: HashMap<TypeId, Vec<Arc<Subscription>>>,
    consumers: HashMap<ConsumerKey, Registration>,
    /// Consumer count at which entries of dropped consumers are swept.
    sweep_at: usize,
}

const MIN_SWEEP_AT: usize = 64;

impl Registry {
    /// Inserts the subscriptions of one consumer object.
    ///
    /// Returns false if the consumer is already registered. A stale entry
    /// left by a dropped consumer at the same address is purged first.
    pub(crate) fn insert(
        &mut self,
        key: ConsumerKey,
        consumer: Weak<dyn Any + Send + Sync>,
        subscriptions: Vec<Arc<Subscription>>,
    ) -> bool {
        if let Some(existing) = self.consumers.get(&key) {
            if existing.consumer.strong_count() > 0 {
                return false;
            }
            self.remove(key);
        }
        if self.consumers.len() >= self.sweep_at {
            self.sweep();
            self.sweep_at = (self.consumers.len() * 2).max(MIN_SWEEP_AT);
        }

        let mut message_types = Vec::with_capacity(subscriptions.len());
        for subscription in subscriptions {
            let ty = subscription.method.message_type().id();
            if !message_types.contains(&ty) {
                message_types.push(ty);
            }

            let route = self.routes.entry(ty).or_default();
            let index = insertion_index(route, subscription.method.priority(), |existing| {
                existing.method.priority()
            });
            route.insert(index, subscription);
        }

        self.consumers.insert(
            key,
            Registration {
                consumer,
                message_types,
            },
        );
        true
    }

    /// Removes every subscription of a consumer. Returns false if it was not
    /// registered.
    pub(crate) fn remove(&mut self, key: ConsumerKey) -> bool {
        let Some(registration) = self.consumers.remove(&key) else {
            return false;
        };

        for ty in registration.message_types {
            if let Some(route) = self.routes.get_mut(&ty) {
                route.retain(|subscription| {
                    if subscription.key == key {
                        subscription.deactivate();
                        false
                    } else {
                        true
                    }
                });
                if route.is_empty() {
                    self.routes.remove(&ty);
                }
            }
        }
        true
    }

    /// Removes the entries of consumers dropped without unregistering.
    pub(crate) fn sweep(&mut self) -> usize {
        let dead: Vec<ConsumerKey> = self
            .consumers
            .iter()
            .filter(|(_, registration)| registration.consumer.strong_count() == 0)
            .map(|(key, _)| *key)
            .collect();
        for key in &dead {
            self.remove(*key);
        }
        dead.len()
    }

    /// Returns whether a live consumer is registered under `key`.
    pub(crate) fn contains(&self, key: ConsumerKey) -> bool {
        self.consumers
            .get(&key)
            .map_or(false, |registration| registration.consumer.strong_count() > 0)
    }

    /// Returns the route registered for exactly `ty`, in priority order.
    pub(crate) fn route(&self, ty: TypeId) -> Option<&[Arc<Subscription>]> {
        self.routes.get(&ty).map(Vec::as_slice)
    }

    /// Returns whether a live consumer is subscribed to exactly `ty`.
    pub(crate) fn has_route(&self, ty: TypeId) -> bool {
        self.routes.get(&ty).map_or(false, |route| {
            route
                .iter()
                .any(|subscription| subscription.consumer.strong_count() > 0)
        })
    }

    pub(crate) fn route_count(&self) -> usize {
        self.routes.len()
    }

    pub(crate) fn consumer_count(&self) -> usize {
        self.consumers.len()
    }
}
