use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Weak};

use tracing::{debug, error};

use crate::error::RegistrationError;
use crate::event::dispatch::{
    Dispatcher, ImmediateDispatcher, LegacyAsyncDispatcher, PerThreadQueuedDispatcher,
};
use crate::event::registry::SubscriberRegistry;
use crate::event::{
    DeadEvent, Event, Listener, SubscriberError, SubscriberExceptionContext,
    SubscriberExceptionHandler,
};
use crate::executor::{DirectExecutor, Executor};

pub(crate) struct BusInner {
    identifier: String,
    executor: Arc<dyn Executor>,
    exception_handler: Arc<dyn SubscriberExceptionHandler>,
    registry: SubscriberRegistry,
    dispatcher: Box<dyn Dispatcher>,
}

/// Dispatches events to listeners and provides ways for listeners to
/// register themselves.
///
/// A bus is cheap to clone; clones share the same subscriber index, executor
/// and dispatcher. The bus itself takes no lock around
/// [`post`](Self::post): concurrency is delegated to the registry's
/// weakly-consistent snapshots and the dispatcher's ordering discipline.
///
/// The default configuration delivers synchronously on the posting thread
/// with per-thread queueing; see [`EventBus::builder`] for the alternatives
/// and [`EventBus::new_async`] for the legacy asynchronous shape.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    /// Creates a synchronous bus: per-thread queued dispatch, inline
    /// executor, and an exception handler that logs.
    pub fn new(identifier: impl Into<String>) -> Self {
        Self::builder(identifier).build()
    }

    /// Creates an asynchronous bus delivering through the given executor,
    /// using the legacy global dispatch queue.
    pub fn new_async(identifier: impl Into<String>, executor: impl Executor + 'static) -> Self {
        Self::builder(identifier)
            .executor(executor)
            .legacy_async_dispatch()
            .build()
    }

    /// Starts configuring a bus.
    pub fn builder(identifier: impl Into<String>) -> EventBusBuilder {
        EventBusBuilder::new(identifier.into())
    }

    /// The identifier given at construction, for logging and diagnostics.
    pub fn identifier(&self) -> &str {
        &self.inner.identifier
    }

    /// Registers all subscriber methods of `listener` to receive events.
    ///
    /// Registering the same listener (the same `Arc` allocation) twice is a
    /// no-op; a separate allocation of the same type is a distinct listener.
    pub fn register<L: Listener>(&self, listener: &Arc<L>) {
        self.inner.registry.register(self, listener);
    }

    /// Unregisters all subscriber methods of `listener`.
    ///
    /// Fails if the listener was not registered, in which case any
    /// subscribers already removed stay removed.
    pub fn unregister<L: Listener>(&self, listener: &Arc<L>) -> Result<(), RegistrationError> {
        self.inner.registry.unregister(listener)
    }

    /// Posts an event to all registered subscribers whose declared event
    /// type appears in the event's flattened hierarchy.
    ///
    /// If no subscriber matches and `event` is not itself a [`DeadEvent`],
    /// a dead event wrapping it is posted instead.
    pub fn post<E: Event>(&self, event: E) {
        self.post_erased(Arc::new(event));
    }

    fn post_erased(&self, event: Arc<dyn Event>) {
        let subscribers = self.inner.registry.subscribers_for(event.as_ref());
        if !subscribers.is_empty() {
            self.inner.dispatcher.dispatch(event, subscribers);
        } else if !event.as_ref().is::<DeadEvent>() {
            debug!(bus = %self.inner.identifier, event = ?event, "no subscribers; posting dead event");
            self.post_erased(Arc::new(DeadEvent::new(self.clone(), event)));
        }
    }

    /// Routes a subscriber failure to the configured exception handler. A
    /// handler that panics in turn is logged and swallowed: propagating from
    /// here would deadlock the event path.
    pub(crate) fn handle_subscriber_exception(
        &self,
        error: &SubscriberError,
        context: &SubscriberExceptionContext,
    ) {
        let handler = &self.inner.exception_handler;
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            handler.handle_exception(error, context);
        }));
        if outcome.is_err() {
            error!(
                bus = %self.inner.identifier,
                subscriber_error = %error,
                "exception handler failed while handling a subscriber exception"
            );
        }
    }

    pub(crate) fn executor(&self) -> Arc<dyn Executor> {
        Arc::clone(&self.inner.executor)
    }

    pub(crate) fn downgrade(&self) -> Weak<BusInner> {
        Arc::downgrade(&self.inner)
    }

    pub(crate) fn from_inner(inner: Arc<BusInner>) -> Self {
        Self { inner }
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("EventBus")
            .field(&self.inner.identifier)
            .finish()
    }
}

/// Configures and builds an [`EventBus`].
pub struct EventBusBuilder {
    identifier: String,
    executor: Arc<dyn Executor>,
    exception_handler: Arc<dyn SubscriberExceptionHandler>,
    dispatcher: Box<dyn Dispatcher>,
}

impl EventBusBuilder {
    fn new(identifier: String) -> Self {
        Self {
            identifier,
            executor: Arc::new(DirectExecutor),
            exception_handler: Arc::new(LoggingExceptionHandler),
            dispatcher: Box::new(PerThreadQueuedDispatcher),
        }
    }

    /// The executor subscriber invocations are submitted to. Defaults to
    /// inline execution on the dispatching thread.
    pub fn executor(mut self, executor: impl Executor + 'static) -> Self {
        self.executor = Arc::new(executor);
        self
    }

    /// The handler invoked when a subscriber method fails. Defaults to
    /// [`LoggingExceptionHandler`].
    pub fn exception_handler(mut self, handler: impl SubscriberExceptionHandler + 'static) -> Self {
        self.exception_handler = Arc::new(handler);
        self
    }

    /// Per-thread queued dispatch (the default): re-entrant posts are
    /// delivered after the current event reaches all its subscribers.
    pub fn per_thread_dispatch(mut self) -> Self {
        self.dispatcher = Box::new(PerThreadQueuedDispatcher);
        self
    }

    /// Legacy global-queue dispatch, as used by the asynchronous bus.
    pub fn legacy_async_dispatch(mut self) -> Self {
        self.dispatcher = Box::new(LegacyAsyncDispatcher::new());
        self
    }

    /// Immediate dispatch: subscribers run inline and re-entrant posts nest.
    pub fn immediate_dispatch(mut self) -> Self {
        self.dispatcher = Box::new(ImmediateDispatcher);
        self
    }

    pub fn build(self) -> EventBus {
        EventBus {
            inner: Arc::new(BusInner {
                identifier: self.identifier,
                executor: self.executor,
                exception_handler: self.exception_handler,
                registry: SubscriberRegistry::new(),
                dispatcher: self.dispatcher,
            }),
        }
    }
}

/// Default exception handler: logs the failure and moves on.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingExceptionHandler;

impl SubscriberExceptionHandler for LoggingExceptionHandler {
    fn handle_exception(&self, error: &SubscriberError, context: &SubscriberExceptionContext) {
        error!(
            bus = %context.event_bus().identifier(),
            listener = context.listener_type(),
            method = context.method_name(),
            event = ?context.event(),
            "subscriber failed: {error}"
        );
    }
}
