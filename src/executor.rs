/// A unit of work handed to an [`Executor`].
pub type Task = Box<dyn FnOnce() + Send>;

/// Arranges for tasks to run.
///
/// Executors decouple subscriber invocation from the posting thread. An
/// executor may run the task synchronously inline, on a worker thread, or on
/// any other schedule, but it must not silently drop it.
pub trait Executor: Send + Sync {
    fn execute(&self, task: Task);
}

/// Runs every task inline on the calling thread.
///
/// This is the default executor of the synchronous event bus: delivery
/// completes before `post` returns.
#[derive(Debug, Default, Clone, Copy)]
pub struct DirectExecutor;

impl Executor for DirectExecutor {
    fn execute(&self, task: Task) {
        task();
    }
}

/// Spawns a dedicated thread per task.
///
/// The minimal truly-asynchronous executor. Callers with sustained load
/// should bring a pooled executor instead; anything implementing
/// [`Executor`] plugs into the bus builder.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadPerTaskExecutor;

impl Executor for ThreadPerTaskExecutor {
    fn execute(&self, task: Task) {
        std::thread::spawn(task);
    }
}

impl<F> Executor for F
where
    F: Fn(Task) + Send + Sync,
{
    fn execute(&self, task: Task) {
        self(task);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use super::*;

    #[test]
    fn direct_executor_runs_inline() {
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = Arc::clone(&counter);
        DirectExecutor.execute(Box::new(move || {
            counter_clone.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(1, counter.load(Ordering::SeqCst));
    }

    #[test]
    fn closures_are_executors() {
        let captured: Arc<Mutex<Vec<Task>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&captured);
        let executor = move |task: Task| sink.lock().unwrap().push(task);
        executor.execute(Box::new(|| ()));
        executor.execute(Box::new(|| ()));
        assert_eq!(2, captured.lock().unwrap().len());
    }

    #[test]
    fn thread_per_task_runs_detached() {
        let counter = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&counter);
        ThreadPerTaskExecutor.execute(Box::new(move || {
            seen.fetch_add(1, Ordering::SeqCst);
        }));
        // the task runs on its own thread; wait for it briefly
        for _ in 0..100 {
            if counter.load(Ordering::SeqCst) == 1 {
                return;
            }
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        panic!("spawned task never ran");
    }
}
