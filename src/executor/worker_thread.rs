//! The worker-thread executor: a single dedicated thread draining a private LIFO deque fed by a
//! lock-guarded public FIFO queue.
//!
//! Grounded on the teacher's park/unpark `Parker` (`park/parker.rs`) for the wake discipline —
//! here realized as a small binary-ish semaphore rather than the teacher's raw futex-on-atomic,
//! since this executor runs on stable std rather than the teacher's `no_std` target.

use super::{Executor, ShutdownFlag};
use crate::error::CoroResult;
use crate::task::Task;
use std::cell::UnsafeCell;
use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, OnceLock};
use std::thread::{JoinHandle, ThreadId};

struct Semaphore {
    count: Mutex<usize>,
    cv: Condvar,
}

impl Semaphore {
    fn new() -> Self {
        Self { count: Mutex::new(0), cv: Condvar::new() }
    }

    fn release(&self) {
        let mut count = self.count.lock().unwrap();
        *count += 1;
        self.cv.notify_one();
    }

    fn acquire(&self) {
        let mut count = self.count.lock().unwrap();
        while *count == 0 {
            count = self.cv.wait(count).unwrap();
        }
        *count -= 1;
    }
}

struct Shared {
    shutdown: ShutdownFlag,
    public: Mutex<VecDeque<Task>>,
    private: UnsafeCell<VecDeque<Task>>,
    sem: Semaphore,
    worker_id: OnceLock<ThreadId>,
}

// Safety: `private` is only ever touched by the worker thread itself, either from inside the
// drain loop or from an `enqueue` call made *on* that same thread (never concurrently, since a
// thread can only be doing one of those at a time).
unsafe impl Sync for Shared {}

/// One dedicated worker thread with a private (LIFO) and public (FIFO, lock-guarded) queue.
/// Max concurrency is always 1.
pub struct WorkerThreadExecutor {
    shared: std::sync::Arc<Shared>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Default for WorkerThreadExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkerThreadExecutor {
    #[must_use]
    pub fn new() -> Self {
        let shared = std::sync::Arc::new(Shared {
            shutdown: ShutdownFlag::new(),
            public: Mutex::new(VecDeque::new()),
            private: UnsafeCell::new(VecDeque::new()),
            sem: Semaphore::new(),
            worker_id: OnceLock::new(),
        });
        let worker_shared = shared.clone();
        let handle = std::thread::spawn(move || {
            worker_shared
                .worker_id
                .set(std::thread::current().id())
                .expect("worker thread starts exactly once");
            worker_loop(&worker_shared);
        });
        Self { shared, handle: Mutex::new(Some(handle)) }
    }

    fn is_worker_thread(&self) -> bool {
        self.shared.worker_id.get() == Some(&std::thread::current().id())
    }
}

fn worker_loop(shared: &Shared) {
    loop {
        // Safety: see the `unsafe impl Sync for Shared` justification above.
        while let Some(task) = unsafe { (*shared.private.get()).pop_back() } {
            task.run();
        }
        let drained: Vec<_> = {
            let mut public = shared.public.lock().unwrap();
            public.drain(..).collect()
        };
        if !drained.is_empty() {
            unsafe {
                (*shared.private.get()).extend(drained);
            }
            continue;
        }
        // Both queues were empty at the same instant: only now is it safe to treat a shutdown
        // request as "nothing left to do" rather than possibly abandoning queued work.
        if shared.shutdown.get() {
            tracing::debug!("worker thread exiting, both queues drained");
            return;
        }
        tracing::trace!("worker thread parking, no work queued");
        shared.sem.acquire();
    }
}

impl Executor for WorkerThreadExecutor {
    fn enqueue(&self, task: Task) -> CoroResult<()> {
        self.shared.shutdown.check()?;
        if self.is_worker_thread() {
            // Safety: called from the worker's own thread, never concurrent with the drain loop.
            unsafe {
                (*self.shared.private.get()).push_back(task);
            }
        } else {
            let was_empty = {
                let mut public = self.shared.public.lock().unwrap();
                let was_empty = public.is_empty();
                public.push_back(task);
                was_empty
            };
            if was_empty {
                self.shared.sem.release();
            }
        }
        Ok(())
    }

    fn max_concurrency_level(&self) -> usize {
        1
    }

    fn shutdown(&self) {
        if self.shared.shutdown.set() {
            tracing::info!("stop signal received, shutting down worker thread");
            self.shared.sem.release();
            if let Some(handle) = self.handle.lock().unwrap().take() {
                let _ = handle.join();
            }
        }
    }

    fn shutdown_requested(&self) -> bool {
        self.shared.shutdown.get()
    }
}
