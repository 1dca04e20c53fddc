use std::any::Any;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Weak};

use parking_lot::ReentrantMutex;

use crate::event::bus::BusInner;
use crate::event::listener::MethodSpec;
use crate::event::{Event, EventBus, SubscriberExceptionContext};
use crate::executor::Executor;

/// A subscriber method bound to one listener instance.
///
/// Immutable after creation. Two subscribers are equal iff they share the
/// same listener allocation and the same method identity.
pub(crate) struct Subscriber {
    bus: Weak<BusInner>,
    listener: Arc<dyn Any + Send + Sync>,
    listener_type: &'static str,
    spec: MethodSpec,
    executor: Arc<dyn Executor>,
    /// Present unless the method allows concurrent events. Reentrant so a
    /// subscriber delivering inline may post back to itself.
    serializer: Option<ReentrantMutex<()>>,
}

impl Subscriber {
    pub(crate) fn new(
        bus: &EventBus,
        listener: Arc<dyn Any + Send + Sync>,
        listener_type: &'static str,
        spec: MethodSpec,
    ) -> Self {
        let serializer = (!spec.allow_concurrent).then(|| ReentrantMutex::new(()));
        Self {
            bus: bus.downgrade(),
            executor: bus.executor(),
            listener,
            listener_type,
            spec,
            serializer,
        }
    }

    /// Submits the invocation of this subscriber to its executor.
    pub(crate) fn dispatch_event(this: &Arc<Self>, event: &Arc<dyn Event>) {
        let subscriber = Arc::clone(this);
        let event = Arc::clone(event);
        this.executor
            .execute(Box::new(move || subscriber.invoke(&event)));
    }

    fn invoke(&self, event: &Arc<dyn Event>) {
        let result = match &self.serializer {
            Some(lock) => {
                let _guard = lock.lock();
                (self.spec.invoke)(self.listener.as_ref(), event.as_ref())
            }
            None => (self.spec.invoke)(self.listener.as_ref(), event.as_ref()),
        };
        if let Err(error) = result {
            // bus already gone: nowhere to report to
            if let Some(inner) = self.bus.upgrade() {
                let bus = EventBus::from_inner(inner);
                let context = SubscriberExceptionContext::new(
                    bus.clone(),
                    Arc::clone(event),
                    self.listener_type,
                    self.spec.name,
                );
                bus.handle_subscriber_exception(&error, &context);
            }
        }
    }

    fn listener_ptr(&self) -> *const () {
        Arc::as_ptr(&self.listener) as *const ()
    }

    /// Whether this subscriber binds the given listener allocation to the
    /// given method.
    pub(crate) fn matches(&self, listener_ptr: *const (), spec: &MethodSpec) -> bool {
        self.listener_ptr() == listener_ptr
            && self.spec.key == spec.key
            && self.spec.event_type == spec.event_type
    }
}

impl PartialEq for Subscriber {
    fn eq(&self, other: &Self) -> bool {
        other.matches(self.listener_ptr(), &self.spec)
    }
}

impl Eq for Subscriber {}

impl Hash for Subscriber {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (self.listener_ptr() as usize).hash(state);
        self.spec.key.hash(state);
        self.spec.event_type.hash(state);
    }
}

impl fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscriber")
            .field("listener_type", &self.listener_type)
            .field("method", &self.spec.name)
            .finish()
    }
}
