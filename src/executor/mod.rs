//! Executors: the scheduling abstraction every task, result and timer callback runs through.
//!
//! Grounded on the teacher's `Executor`/`Worker`/`Scheduler` trio (`executor.rs`,
//! `scheduler.rs`), generalized from k23's single work-stealing scheduler into the five distinct
//! executor flavours the design calls for (inline, manual, thread-per-task, single worker
//! thread, thread pool).

pub mod inline;
pub mod manual;
pub mod thread;
pub mod thread_pool;
pub mod worker_thread;

pub use inline::InlineExecutor;
pub use manual::ManualExecutor;
pub use thread::ThreadExecutor;
pub use thread_pool::ThreadPoolExecutor;
pub use worker_thread::WorkerThreadExecutor;

use crate::error::{CoroError, CoroResult};
use crate::result::{self, CoroResultFuture};
use crate::task::Task;

/// The contract every executor flavour implements. Kept object-safe (no generics) so executors
/// can be held as `Arc<dyn Executor>` by the timer queue, the async lock/condition, and the
/// engine's executor collection.
pub trait Executor: Send + Sync {
    /// Schedule a single task. Fails with [`CoroError::ExecutorShutdown`] once `shutdown` has
    /// been called.
    fn enqueue(&self, task: Task) -> CoroResult<()>;

    /// Schedule a batch of tasks as one unit. The default just enqueues them one at a time;
    /// executors that can do better (the thread pool) override this.
    fn enqueue_batch(&self, tasks: Vec<Task>) -> CoroResult<()> {
        for task in tasks {
            self.enqueue(task)?;
        }
        Ok(())
    }

    /// Upper bound on tasks this executor can run concurrently.
    fn max_concurrency_level(&self) -> usize;

    /// Request shutdown. Idempotent; subsequent `enqueue` calls fail.
    fn shutdown(&self);

    /// `true` once `shutdown` has been called.
    fn shutdown_requested(&self) -> bool;
}

/// Convenience scheduling methods layered over the object-safe [`Executor`] trait. Blanket-
/// implemented for every executor, including through a `&dyn Executor`.
pub trait ExecutorExt: Executor {
    /// Enqueue a plain callable; its return value (if any) is discarded.
    fn post<F>(&self, f: F) -> CoroResult<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.enqueue(Task::new(f))
    }

    /// Enqueue a callable and return a [`CoroResultFuture`] completed with its outcome.
    fn submit<F, T>(&self, f: F) -> CoroResult<CoroResultFuture<T>>
    where
        F: FnOnce() -> CoroResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let (promise, future) = result::channel();
        self.post(move || complete_with_panic_guard(promise, f))?;
        Ok(future)
    }

    /// Enqueue many plain callables as a single batch.
    fn bulk_post<F>(&self, fs: Vec<F>) -> CoroResult<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let tasks = fs.into_iter().map(Task::new).collect();
        self.enqueue_batch(tasks)
    }

    /// Enqueue many callables as a single batch, returning one future per callable.
    fn bulk_submit<F, T>(&self, fs: Vec<F>) -> CoroResult<Vec<CoroResultFuture<T>>>
    where
        F: FnOnce() -> CoroResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let mut tasks = Vec::with_capacity(fs.len());
        let mut futures = Vec::with_capacity(fs.len());
        for f in fs {
            let (promise, future) = result::channel();
            tasks.push(Task::new(move || complete_with_panic_guard(promise, f)));
            futures.push(future);
        }
        self.enqueue_batch(tasks)?;
        Ok(futures)
    }
}

impl<E: Executor + ?Sized> ExecutorExt for E {}

/// Run `f`, completing `promise` with its result — or, if `f` panics, with
/// [`CoroError::Panicked`] after logging the payload. Shared by [`ExecutorExt::submit`] and
/// [`ExecutorExt::bulk_submit`] so a panicking task resolves its future instead of merely
/// tearing down the closure (which would otherwise surface as an unexplained `Interrupted`).
fn complete_with_panic_guard<F, T>(promise: result::Promise<T>, f: F)
where
    F: FnOnce() -> CoroResult<T>,
{
    match std::panic::catch_unwind(std::panic::AssertUnwindSafe(f)) {
        Ok(result) => promise.complete(result),
        Err(payload) => {
            let message = crate::error::panic_message(&*payload);
            tracing::warn!(message = %message, "submitted task panicked");
            promise.set_error(CoroError::Panicked(message));
        }
    }
}

/// Shared "has shutdown been requested" flag + guard, used by every executor flavour.
#[derive(Default)]
pub(crate) struct ShutdownFlag(std::sync::atomic::AtomicBool);

impl ShutdownFlag {
    pub(crate) fn new() -> Self {
        Self(std::sync::atomic::AtomicBool::new(false))
    }

    pub(crate) fn set(&self) -> bool {
        !self.0.swap(true, std::sync::atomic::Ordering::AcqRel)
    }

    pub(crate) fn get(&self) -> bool {
        self.0.load(std::sync::atomic::Ordering::Acquire)
    }

    pub(crate) fn check(&self) -> CoroResult<()> {
        if self.get() {
            Err(CoroError::ExecutorShutdown)
        } else {
            Ok(())
        }
    }
}
