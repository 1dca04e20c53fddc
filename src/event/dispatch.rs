use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::sync::Arc;

use crossbeam_queue::SegQueue;

use crate::event::subscriber::Subscriber;
use crate::event::Event;

/// Hands a posted event to its subscribers.
///
/// The variant chosen at bus construction decides the ordering discipline;
/// see the constructors for the guarantees each one makes.
pub(crate) trait Dispatcher: Send + Sync {
    fn dispatch(&self, event: Arc<dyn Event>, subscribers: Vec<Arc<Subscriber>>);
}

/// An event paired with the subscriber snapshot it was posted against.
struct PendingEvent {
    event: Arc<dyn Event>,
    subscribers: Vec<Arc<Subscriber>>,
}

thread_local! {
    static QUEUE: RefCell<VecDeque<PendingEvent>> = RefCell::new(VecDeque::new());
    static DISPATCHING: Cell<bool> = const { Cell::new(false) };
}

/// Queues events per posting thread and delivers them breadth-first.
///
/// A post made from inside a subscriber (a re-entrant post) is appended to
/// the current thread's queue and delivered only after the outer event has
/// reached every one of its subscribers. Deep subscriber chains therefore
/// iterate instead of recursing, and delivery order per thread is the order
/// of posting.
pub(crate) struct PerThreadQueuedDispatcher;

impl Dispatcher for PerThreadQueuedDispatcher {
    fn dispatch(&self, event: Arc<dyn Event>, subscribers: Vec<Arc<Subscriber>>) {
        QUEUE.with(|queue| {
            queue.borrow_mut().push_back(PendingEvent { event, subscribers });
        });
        if DISPATCHING.with(Cell::get) {
            // re-entrant post: the outer dispatch loop picks it up
            return;
        }
        DISPATCHING.with(|flag| flag.set(true));
        // clears the flag and discards the queue even if an executor unwinds
        struct Reset;
        impl Drop for Reset {
            fn drop(&mut self) {
                DISPATCHING.with(|flag| flag.set(false));
                QUEUE.with(|queue| *queue.borrow_mut() = VecDeque::new());
            }
        }
        let _reset = Reset;
        loop {
            let next = QUEUE.with(|queue| queue.borrow_mut().pop_front());
            let Some(pending) = next else { break };
            for subscriber in &pending.subscribers {
                Subscriber::dispatch_event(subscriber, &pending.event);
            }
        }
    }
}

/// Single global queue shared by all posting threads.
///
/// Kept for the asynchronous bus: each post enqueues an (event, subscriber)
/// pair per subscriber and then drains whatever is in the queue, possibly
/// including pairs enqueued by other threads. Ordering across threads is
/// best-effort only, which is acceptable because the executors run the
/// handlers asynchronously anyway. The drain runs on the posting thread, so
/// a slow executor submit can momentarily hold up other posters.
pub(crate) struct LegacyAsyncDispatcher {
    queue: SegQueue<(Arc<dyn Event>, Arc<Subscriber>)>,
}

impl LegacyAsyncDispatcher {
    pub(crate) fn new() -> Self {
        Self {
            queue: SegQueue::new(),
        }
    }
}

impl Dispatcher for LegacyAsyncDispatcher {
    fn dispatch(&self, event: Arc<dyn Event>, subscribers: Vec<Arc<Subscriber>>) {
        for subscriber in subscribers {
            self.queue.push((Arc::clone(&event), subscriber));
        }
        while let Some((event, subscriber)) = self.queue.pop() {
            Subscriber::dispatch_event(&subscriber, &event);
        }
    }
}

/// Invokes subscribers inline in iteration order, with no queue.
///
/// Re-entrant posts nest their delivery inside the current one, depth-first.
pub(crate) struct ImmediateDispatcher;

impl Dispatcher for ImmediateDispatcher {
    fn dispatch(&self, event: Arc<dyn Event>, subscribers: Vec<Arc<Subscriber>>) {
        for subscriber in &subscribers {
            Subscriber::dispatch_event(subscriber, &event);
        }
    }
}
