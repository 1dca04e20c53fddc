//! A publish/subscribe event bus with pluggable dispatch and
//! type-hierarchy-aware delivery.
//!
//! Components register [`Listener`]s, which declare handler methods for the
//! event types they care about, and anyone may [`post`](EventBus::post) an
//! event. The bus fans a posted event out to every subscriber whose declared
//! event type appears in the event's flattened hierarchy: the event's own
//! type plus the chain of supertype views it exposes through
//! [`Event::parent`].
//!
//! ```rust
//! use std::sync::{Arc, Mutex};
//! use sluice::event::{EventBus, Listener, Subscriptions};
//!
//! #[derive(Debug)]
//! struct OrderPlaced {
//!     id: u64,
//! }
//! impl sluice::event::Event for OrderPlaced {}
//!
//! struct Auditor {
//!     seen: Mutex<Vec<u64>>,
//! }
//!
//! impl Listener for Auditor {
//!     fn subscriptions(reg: &mut Subscriptions<Self>) {
//!         reg.on(Self::on_order);
//!     }
//! }
//!
//! impl Auditor {
//!     fn on_order(&self, event: &OrderPlaced) {
//!         self.seen.lock().unwrap().push(event.id);
//!     }
//! }
//!
//! let bus = EventBus::new("orders");
//! let auditor = Arc::new(Auditor { seen: Mutex::new(Vec::new()) });
//! bus.register(&auditor);
//! bus.post(OrderPlaced { id: 7 });
//! assert_eq!(vec![7], *auditor.seen.lock().unwrap());
//! ```

mod bus;
mod dispatch;
mod listener;
mod registry;
mod subscriber;

pub use bus::{EventBus, EventBusBuilder, LoggingExceptionHandler};
pub use listener::{Listener, MethodOptions, Subscriptions};

use std::any::{Any, TypeId};
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

/// A value that can be posted on an [`EventBus`].
///
/// Event types are plain structs. A type that conceptually extends another
/// event embeds the supertype by value and exposes it through
/// [`parent`](Self::parent); subscribers of the supertype then receive the
/// embedded view whenever the subtype is posted.
pub trait Event: Any + Send + Sync + fmt::Debug {
    /// View of this event as its direct supertype, if it has one.
    fn parent(&self) -> Option<&dyn Event> {
        None
    }
}

impl dyn Event {
    fn as_any(&self) -> &dyn Any {
        self
    }

    /// Whether the concrete type of this event is `E`.
    pub fn is<E: Event>(&self) -> bool {
        self.as_any().is::<E>()
    }

    /// Downcasts to the concrete event type.
    pub fn downcast_ref<E: Event>(&self) -> Option<&E> {
        self.as_any().downcast_ref::<E>()
    }

    /// `TypeId` of the concrete event type.
    pub(crate) fn concrete_type_id(&self) -> TypeId {
        self.as_any().type_id()
    }

    /// Finds the view of this event matching type `E`: the event itself, or
    /// the nearest ancestor along the parent chain.
    pub(crate) fn view_as<E: Event>(&self) -> Option<&E> {
        let mut current: &dyn Event = self;
        loop {
            if let Some(view) = current.downcast_ref::<E>() {
                return Some(view);
            }
            current = current.parent()?;
        }
    }

    /// The flattened hierarchy of this event: its own type followed by every
    /// transitive parent type.
    pub(crate) fn lineage(&self) -> Vec<TypeId> {
        let mut ids = vec![self.concrete_type_id()];
        let mut current = self.parent();
        while let Some(ancestor) = current {
            ids.push(ancestor.concrete_type_id());
            current = ancestor.parent();
        }
        ids
    }
}

/// Wraps an event that was posted but had no subscribers.
///
/// Registering a subscriber for `DeadEvent` is how otherwise-silent misses
/// are observed. A dead event that itself finds no subscribers is dropped
/// rather than re-wrapped.
pub struct DeadEvent {
    source: EventBus,
    event: Arc<dyn Event>,
}

impl DeadEvent {
    pub(crate) fn new(source: EventBus, event: Arc<dyn Event>) -> Self {
        Self { source, event }
    }

    /// The bus the original event was posted on.
    pub fn source(&self) -> &EventBus {
        &self.source
    }

    /// The event that could not be delivered.
    pub fn event(&self) -> &Arc<dyn Event> {
        &self.event
    }
}

impl Event for DeadEvent {}

impl fmt::Debug for DeadEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeadEvent")
            .field("source", &self.source)
            .field("event", &self.event)
            .finish()
    }
}

/// Failure raised by a subscriber method while handling an event.
#[derive(Debug, Error)]
pub enum SubscriberError {
    /// The method returned an error.
    #[error("subscriber failed: {0}")]
    Failed(crate::error::BoxError),
    /// The method panicked; the payload message is preserved.
    #[error("subscriber panicked: {0}")]
    Panicked(String),
}

/// Context for an exception thrown by a subscriber method.
pub struct SubscriberExceptionContext {
    bus: EventBus,
    event: Arc<dyn Event>,
    listener_type: &'static str,
    method_name: &'static str,
}

impl SubscriberExceptionContext {
    pub(crate) fn new(
        bus: EventBus,
        event: Arc<dyn Event>,
        listener_type: &'static str,
        method_name: &'static str,
    ) -> Self {
        Self {
            bus,
            event,
            listener_type,
            method_name,
        }
    }

    /// The bus the event was posted on.
    pub fn event_bus(&self) -> &EventBus {
        &self.bus
    }

    /// The event that was being delivered.
    pub fn event(&self) -> &Arc<dyn Event> {
        &self.event
    }

    /// Type name of the listener whose method failed.
    pub fn listener_type(&self) -> &'static str {
        self.listener_type
    }

    /// Name of the failing subscriber method.
    pub fn method_name(&self) -> &'static str {
        self.method_name
    }
}

impl fmt::Debug for SubscriberExceptionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriberExceptionContext")
            .field("bus", &self.bus)
            .field("event", &self.event)
            .field("listener_type", &self.listener_type)
            .field("method_name", &self.method_name)
            .finish()
    }
}

/// Handles exceptions raised by subscriber methods.
///
/// The post that triggered the failure does not itself fail: the remaining
/// subscribers of the event still run. A handler that fails in turn is logged
/// and ignored, since propagating out of the exception path would take the
/// event loop down with it.
pub trait SubscriberExceptionHandler: Send + Sync {
    fn handle_exception(&self, error: &SubscriberError, context: &SubscriberExceptionContext);
}

impl<F> SubscriberExceptionHandler for F
where
    F: Fn(&SubscriberError, &SubscriberExceptionContext) + Send + Sync,
{
    fn handle_exception(&self, error: &SubscriberError, context: &SubscriberExceptionContext) {
        self(error, context);
    }
}

/// Renders a panic payload as text.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "opaque panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Base {
        id: u32,
    }
    impl Event for Base {}

    #[derive(Debug)]
    struct Derived {
        base: Base,
    }
    impl Event for Derived {
        fn parent(&self) -> Option<&dyn Event> {
            Some(&self.base)
        }
    }

    #[test]
    fn lineage_walks_parent_chain() {
        let event = Derived {
            base: Base { id: 1 },
        };
        let lineage = (&event as &dyn Event).lineage();
        assert_eq!(
            vec![TypeId::of::<Derived>(), TypeId::of::<Base>()],
            lineage
        );
    }

    #[test]
    fn view_as_finds_ancestor_view() {
        let event = Derived {
            base: Base { id: 42 },
        };
        let dyn_event: &dyn Event = &event;
        assert_eq!(42, dyn_event.view_as::<Base>().unwrap().id);
        assert!(dyn_event.view_as::<Derived>().is_some());
        assert!((&event.base as &dyn Event).view_as::<Derived>().is_none());
    }

    #[test]
    fn panic_messages_are_extracted() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!("boom", panic_message(payload.as_ref()));
        let payload: Box<dyn Any + Send> = Box::new("formatted boom".to_string());
        assert_eq!("formatted boom", panic_message(payload.as_ref()));
        let payload: Box<dyn Any + Send> = Box::new(17u32);
        assert_eq!("opaque panic payload", panic_message(payload.as_ref()));
    }
}
