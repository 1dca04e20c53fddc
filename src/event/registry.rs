use std::any::{type_name, Any, TypeId};
use std::sync::Arc;

use dashmap::DashMap;
use once_cell::sync::Lazy;

use crate::error::RegistrationError;
use crate::event::listener::{Listener, MethodSpec, Subscriptions};
use crate::event::subscriber::Subscriber;
use crate::event::{Event, EventBus};

/// Process-wide cache of declared subscriber methods, keyed by listener type.
///
/// The DashMap entry API holds the shard lock while the declaration closure
/// runs, giving at-most-one concurrent load per key. Rust never unloads
/// types, so a permanent type-identity map stands in for the original's
/// weak-keyed cache.
static SUBSCRIBER_METHODS: Lazy<DashMap<TypeId, Arc<[MethodSpec]>>> = Lazy::new(DashMap::new);

/// Process-wide cache of flattened event hierarchies, keyed by event type.
static FLAT_HIERARCHY: Lazy<DashMap<TypeId, Arc<[TypeId]>>> = Lazy::new(DashMap::new);

/// The declared subscriber methods of `L`, deduplicated by method identity
/// with the first declaration winning.
pub(crate) fn subscriber_methods<L: Listener>() -> Arc<[MethodSpec]> {
    SUBSCRIBER_METHODS
        .entry(TypeId::of::<L>())
        .or_insert_with(|| {
            let mut reg = Subscriptions::<L>::new();
            L::subscriptions(&mut reg);
            let mut specs: Vec<MethodSpec> = Vec::new();
            for spec in reg.into_specs() {
                let seen = specs
                    .iter()
                    .any(|s| s.key == spec.key && s.event_type == spec.event_type);
                if !seen {
                    specs.push(spec);
                }
            }
            specs.into()
        })
        .clone()
}

/// The flattened hierarchy of the event's concrete type: itself plus all its
/// supertypes, in parent-chain order.
pub(crate) fn flatten_hierarchy(event: &dyn Event) -> Arc<[TypeId]> {
    FLAT_HIERARCHY
        .entry(event.concrete_type_id())
        .or_insert_with(|| event.lineage().into())
        .clone()
}

/// Type-indexed subscriber store of one event bus.
///
/// Values are insertion-ordered sets: a subscriber equal to one already
/// present is not added again. Reads during `post` take a snapshot, so
/// iteration is weakly consistent under concurrent registration.
pub(crate) struct SubscriberRegistry {
    subscribers: DashMap<TypeId, Vec<Arc<Subscriber>>>,
}

impl SubscriberRegistry {
    pub(crate) fn new() -> Self {
        Self {
            subscribers: DashMap::new(),
        }
    }

    /// Creates a subscriber per declared method of `listener` and adds each
    /// to the set indexed by its event type.
    pub(crate) fn register<L: Listener>(&self, bus: &EventBus, listener: &Arc<L>) {
        let cloned: Arc<L> = Arc::clone(listener);
        let erased: Arc<dyn Any + Send + Sync> = cloned;
        for spec in subscriber_methods::<L>().iter() {
            let subscriber = Arc::new(Subscriber::new(
                bus,
                Arc::clone(&erased),
                type_name::<L>(),
                spec.clone(),
            ));
            let mut set = self.subscribers.entry(spec.event_type).or_default();
            if !set.iter().any(|existing| **existing == *subscriber) {
                set.push(subscriber);
            }
        }
    }

    /// Removes every subscriber of `listener`. Fails when an expected
    /// subscriber is absent; subscribers removed up to that point stay
    /// removed.
    pub(crate) fn unregister<L: Listener>(
        &self,
        listener: &Arc<L>,
    ) -> Result<(), RegistrationError> {
        let listener_ptr = Arc::as_ptr(listener) as *const ();
        for spec in subscriber_methods::<L>().iter() {
            let removed = match self.subscribers.get_mut(&spec.event_type) {
                Some(mut set) => {
                    match set.iter().position(|s| s.matches(listener_ptr, spec)) {
                        Some(index) => {
                            set.remove(index);
                            true
                        }
                        None => false,
                    }
                }
                None => false,
            };
            if !removed {
                return Err(RegistrationError::NotRegistered {
                    listener_type: type_name::<L>(),
                });
            }
        }
        Ok(())
    }

    /// Snapshot of every subscriber interested in `event`, concatenated
    /// across the flattened hierarchy of its concrete type. Ordering within
    /// one type is insertion order.
    pub(crate) fn subscribers_for(&self, event: &dyn Event) -> Vec<Arc<Subscriber>> {
        let hierarchy = flatten_hierarchy(event);
        let mut snapshot = Vec::new();
        for event_type in hierarchy.iter() {
            if let Some(set) = self.subscribers.get(event_type) {
                snapshot.extend(set.iter().cloned());
            }
        }
        snapshot
    }

    #[cfg(test)]
    pub(crate) fn subscriber_count(&self, event_type: TypeId) -> usize {
        self.subscribers
            .get(&event_type)
            .map_or(0, |set| set.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Ping;
    impl Event for Ping {}

    #[derive(Debug)]
    struct Pong;
    impl Event for Pong {}

    struct Repeated;
    impl Repeated {
        fn on_ping(&self, _event: &Ping) {}
        fn on_ping_again(&self, _event: &Ping) {}
        fn on_pong(&self, _event: &Pong) {}
    }
    impl Listener for Repeated {
        fn subscriptions(reg: &mut Subscriptions<Self>) {
            reg.on(Self::on_ping);
            // same method twice: collapses to the first declaration
            reg.on(Self::on_ping);
            reg.on(Self::on_ping_again);
            reg.on(Self::on_pong);
        }
    }

    #[test]
    fn methods_are_deduplicated_and_cached() {
        let first = subscriber_methods::<Repeated>();
        assert_eq!(3, first.len());
        let second = subscriber_methods::<Repeated>();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn register_is_idempotent_per_listener() {
        let bus = EventBus::new("registry-test");
        let registry = SubscriberRegistry::new();
        let listener = Arc::new(Repeated);
        registry.register(&bus, &listener);
        registry.register(&bus, &listener);
        assert_eq!(2, registry.subscriber_count(TypeId::of::<Ping>()));
        assert_eq!(1, registry.subscriber_count(TypeId::of::<Pong>()));
        // a second allocation of the same type is a distinct listener
        let other = Arc::new(Repeated);
        registry.register(&bus, &other);
        assert_eq!(4, registry.subscriber_count(TypeId::of::<Ping>()));
    }

    #[test]
    fn unregister_requires_registration() {
        let bus = EventBus::new("registry-test");
        let registry = SubscriberRegistry::new();
        let listener = Arc::new(Repeated);
        registry.register(&bus, &listener);
        registry.unregister(&listener).unwrap();
        assert_eq!(0, registry.subscriber_count(TypeId::of::<Ping>()));
        assert!(registry.unregister(&listener).is_err());
    }

    #[test]
    fn snapshot_spans_type_hierarchy() {
        #[derive(Debug)]
        struct Parent;
        impl Event for Parent {}

        #[derive(Debug)]
        struct Child {
            parent: Parent,
        }
        impl Event for Child {
            fn parent(&self) -> Option<&dyn Event> {
                Some(&self.parent)
            }
        }

        struct Watcher;
        impl Watcher {
            fn on_parent(&self, _event: &Parent) {}
        }
        impl Listener for Watcher {
            fn subscriptions(reg: &mut Subscriptions<Self>) {
                reg.on(Self::on_parent);
            }
        }

        let bus = EventBus::new("registry-test");
        let registry = SubscriberRegistry::new();
        let watcher = Arc::new(Watcher);
        registry.register(&bus, &watcher);
        let child = Child { parent: Parent };
        assert_eq!(1, registry.subscribers_for(&child).len());
        assert_eq!(1, registry.subscribers_for(&Parent).len());
        assert_eq!(0, registry.subscribers_for(&Ping).len());
    }
}
