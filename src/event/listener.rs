use std::any::{type_name, Any, TypeId};
use std::marker::PhantomData;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use crate::error::BoxError;
use crate::event::{panic_message, Event, SubscriberError};

/// A type whose instances subscribe to events.
///
/// The trait plays the role reflection plays in runtimes that have it:
/// instead of discovering annotated methods, a listener type declares its
/// subscriber methods once in [`subscriptions`](Self::subscriptions). The
/// declaration runs at most once per listener type; its result is cached
/// process-wide.
pub trait Listener: Send + Sync + 'static {
    /// Declares the subscriber methods of this listener type.
    fn subscriptions(reg: &mut Subscriptions<Self>)
    where
        Self: Sized;
}

/// Type-erased invoker bound to one subscriber method.
pub(crate) type ErasedInvoke =
    Arc<dyn Fn(&(dyn Any + Send + Sync), &dyn Event) -> Result<(), SubscriberError> + Send + Sync>;

/// One declared subscriber method of a listener type.
///
/// `key` is the method's fn-pointer identity; together with `event_type` it
/// identifies a method the way (name, parameter types) identifies one under
/// reflection. Duplicate declarations collapse to the first.
#[derive(Clone)]
pub(crate) struct MethodSpec {
    pub(crate) event_type: TypeId,
    pub(crate) name: &'static str,
    pub(crate) key: usize,
    pub(crate) allow_concurrent: bool,
    pub(crate) invoke: ErasedInvoke,
}

/// Registrar passed to [`Listener::subscriptions`].
///
/// Each `on` call declares one subscriber method. The signature enforces the
/// single-event-parameter rule at compile time.
pub struct Subscriptions<L: ?Sized> {
    specs: Vec<MethodSpec>,
    _listener: PhantomData<fn(&L)>,
}

impl<L: Listener> Subscriptions<L> {
    pub(crate) fn new() -> Self {
        Self {
            specs: Vec::new(),
            _listener: PhantomData,
        }
    }

    pub(crate) fn into_specs(self) -> Vec<MethodSpec> {
        self.specs
    }

    /// Declares an infallible subscriber method for events of type `E`.
    ///
    /// A panic inside the method is caught and routed to the bus's exception
    /// handler; it does not unwind into the dispatch loop.
    pub fn on<E: Event>(&mut self, method: fn(&L, &E)) -> MethodOptions<'_> {
        let invoke: ErasedInvoke = Arc::new(move |listener, event| {
            let listener = expect_listener::<L>(listener);
            let event = expect_view::<E>(event);
            match catch_unwind(AssertUnwindSafe(|| method(listener, event))) {
                Ok(()) => Ok(()),
                Err(payload) => Err(SubscriberError::Panicked(panic_message(payload.as_ref()))),
            }
        });
        self.push::<E>(method as usize, invoke)
    }

    /// Declares a fallible subscriber method for events of type `E`.
    ///
    /// A returned error is routed to the bus's exception handler; the
    /// remaining subscribers of the event still run.
    pub fn try_on<E: Event>(
        &mut self,
        method: fn(&L, &E) -> Result<(), BoxError>,
    ) -> MethodOptions<'_> {
        let invoke: ErasedInvoke = Arc::new(move |listener, event| {
            let listener = expect_listener::<L>(listener);
            let event = expect_view::<E>(event);
            match catch_unwind(AssertUnwindSafe(|| method(listener, event))) {
                Ok(Ok(())) => Ok(()),
                Ok(Err(error)) => Err(SubscriberError::Failed(error)),
                Err(payload) => Err(SubscriberError::Panicked(panic_message(payload.as_ref()))),
            }
        });
        self.push::<E>(method as usize, invoke)
    }

    fn push<E: Event>(&mut self, key: usize, invoke: ErasedInvoke) -> MethodOptions<'_> {
        self.specs.push(MethodSpec {
            event_type: TypeId::of::<E>(),
            name: type_name::<E>(),
            key,
            allow_concurrent: false,
            invoke,
        });
        MethodOptions {
            spec: self.specs.last_mut().expect("just pushed"),
        }
    }
}

fn expect_listener<L: Listener>(listener: &(dyn Any + Send + Sync)) -> &L {
    listener
        .downcast_ref::<L>()
        .expect("subscriber invoked with a foreign listener")
}

fn expect_view<E: Event>(event: &dyn Event) -> &E {
    event
        .view_as::<E>()
        .expect("subscriber invoked with an event outside its hierarchy")
}

/// Per-method switches, chained off [`Subscriptions::on`].
pub struct MethodOptions<'a> {
    spec: &'a mut MethodSpec,
}

impl MethodOptions<'_> {
    /// Marks the method safe for concurrent invocation. Unmarked methods are
    /// serialized: concurrent dispatches of the same subscriber never
    /// overlap.
    pub fn allow_concurrent(self) -> Self {
        self.spec.allow_concurrent = true;
        self
    }

    /// Names the method for exception-context reporting. Defaults to the
    /// event type name.
    pub fn named(self, name: &'static str) -> Self {
        self.spec.name = name;
        self
    }
}
