//! The thread-pool executor: N workers, each with a private LIFO deque and a public FIFO
//! queue, donating work to idle siblings instead of letting one worker starve.
//!
//! Grounded on the teacher's work-stealing `Executor`/`Worker`/`Scheduler` (`executor.rs`,
//! `scheduler.rs`): same idle-worker-set-driven donation idea, same cache-line padding
//! discipline (here via `crossbeam_utils::CachePadded`, directly lifted from the teacher).
//! `crossbeam-deque`'s chase-lev deque doesn't fit the "any thread can push to a worker's public
//! queue" requirement (only the owning thread may push to a `crossbeam_deque::Worker`), so the
//! private/public pair here is built from a `Mutex`-guarded `VecDeque` (public, cross-thread) and
//! an owner-only `UnsafeCell<VecDeque>` (private) instead — see `DESIGN.md`.

use super::{Executor, ShutdownFlag};
use crate::error::CoroResult;
use crate::task::Task;
use crossbeam_utils::CachePadded;
use std::cell::{Cell, UnsafeCell};
use std::collections::VecDeque;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

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

    /// Wait up to `timeout` for a permit. Returns `true` if one was acquired.
    fn acquire_timeout(&self, timeout: Duration) -> bool {
        let mut count = self.count.lock().unwrap();
        let deadline = Instant::now() + timeout;
        while *count == 0 {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, result) = self.cv.wait_timeout(count, deadline - now).unwrap();
            count = guard;
            if result.timed_out() && *count == 0 {
                return false;
            }
        }
        *count -= 1;
        true
    }
}

struct WorkerState {
    private: UnsafeCell<VecDeque<Task>>,
    public: Mutex<VecDeque<Task>>,
    sem: Semaphore,
    idle: CachePadded<AtomicBool>,
}

// Safety: `private` is only ever touched by the worker thread that owns it, or (for donation)
// by another worker that has first claimed this worker via a successful CAS on `idle` — which
// only happens while that worker is parked and not itself touching `private`.
unsafe impl Sync for WorkerState {}

thread_local! {
    static MEMBERSHIP: Cell<Option<(u64, usize)>> = const { Cell::new(None) };
}

static NEXT_POOL_ID: AtomicU64 = AtomicU64::new(0);

/// A fixed-size pool of worker threads that donate work to idle siblings.
pub struct ThreadPoolExecutor {
    id: u64,
    shutdown: Arc<ShutdownFlag>,
    workers: Vec<Arc<WorkerState>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    cursor: CachePadded<AtomicUsize>,
    max_idle: Duration,
}

impl ThreadPoolExecutor {
    /// Build a pool with `size` workers, each parking for up to `max_idle` before idling.
    #[must_use]
    pub fn new(size: usize, max_idle: Duration) -> Self {
        assert!(size > 0, "thread pool must have at least one worker");
        let id = NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed);
        let workers: Vec<_> = (0..size)
            .map(|_| {
                Arc::new(WorkerState {
                    private: UnsafeCell::new(VecDeque::new()),
                    public: Mutex::new(VecDeque::new()),
                    sem: Semaphore::new(),
                    idle: CachePadded::new(AtomicBool::new(false)),
                })
            })
            .collect();

        let shutdown = Arc::new(ShutdownFlag::new());
        let mut handles = Vec::with_capacity(size);
        for (index, worker) in workers.iter().cloned().enumerate() {
            let all = workers.clone();
            let shutdown = shutdown.clone();
            let handle = std::thread::Builder::new()
                .name(format!("coro-pool-{id}-{index}"))
                .spawn(move || {
                    MEMBERSHIP.with(|m| m.set(Some((id, index))));
                    worker_loop(index, &worker, &all, max_idle, &shutdown);
                })
                .expect("failed to spawn thread-pool worker");
            handles.push(handle);
        }

        Self {
            id,
            shutdown,
            workers,
            handles: Mutex::new(handles),
            cursor: CachePadded::new(AtomicUsize::new(0)),
            max_idle,
        }
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// The idle timeout each worker parks for between checks of its queues.
    #[must_use]
    pub fn max_idle_time(&self) -> Duration {
        self.max_idle
    }

    fn own_index(&self) -> Option<usize> {
        MEMBERSHIP.with(|m| m.get()).and_then(|(id, idx)| (id == self.id).then_some(idx))
    }

    fn thread_hash_start(&self) -> usize {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        std::thread::current().id().hash(&mut hasher);
        (hasher.finish() as usize) % self.workers.len()
    }

    fn acquire_idle_worker(&self, start: usize) -> Option<usize> {
        let n = self.workers.len();
        for offset in 0..n {
            let idx = (start + offset) % n;
            if self.workers[idx]
                .idle
                .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return Some(idx);
            }
        }
        None
    }

    fn push_public(&self, idx: usize, task: Task) {
        let was_empty = {
            let mut q = self.workers[idx].public.lock().unwrap();
            let was_empty = q.is_empty();
            q.push_back(task);
            was_empty
        };
        if was_empty {
            self.workers[idx].sem.release();
        }
    }

    fn push_public_many(&self, idx: usize, tasks: impl IntoIterator<Item = Task>) {
        let was_empty = {
            let mut q = self.workers[idx].public.lock().unwrap();
            let was_empty = q.is_empty();
            q.extend(tasks);
            was_empty
        };
        if was_empty {
            self.workers[idx].sem.release();
        }
    }

    fn push_private_self(&self, idx: usize, task: Task) {
        // Safety: called only when `self.own_index() == Some(idx)`, i.e. on the owning thread.
        unsafe {
            (*self.workers[idx].private.get()).push_back(task);
        }
    }
}

fn worker_loop(
    index: usize,
    worker: &WorkerState,
    all: &[Arc<WorkerState>],
    max_idle: Duration,
    shutdown: &ShutdownFlag,
) {
    loop {
        while let Some(task) = unsafe { (*worker.private.get()).pop_back() } {
            task.run();
            balance(index, worker, all);
        }

        let drained: Vec<_> = {
            let mut public = worker.public.lock().unwrap();
            public.drain(..).collect()
        };
        if !drained.is_empty() {
            unsafe {
                (*worker.private.get()).extend(drained);
            }
            continue;
        }

        if shutdown.get() {
            return;
        }

        worker.idle.store(true, Ordering::Release);
        tracing::debug!(worker = index, "going to sleep");
        let woken = worker.sem.acquire_timeout(max_idle);
        worker.idle.store(false, Ordering::Release);
        tracing::debug!(worker = index, "woke up");
        if !woken {
            // Idle timeout: re-check once more before parking again; a shutdown or a race with a
            // donor that just missed the CAS window is the only reason to be here with no work.
            if shutdown.get() {
                return;
            }
            let still_nothing = unsafe { (*worker.private.get()).is_empty() }
                && worker.public.lock().unwrap().is_empty();
            if still_nothing {
                continue;
            }
        } else if shutdown.get()
            && unsafe { (*worker.private.get()).is_empty() }
            && worker.public.lock().unwrap().is_empty()
        {
            return;
        }
    }
}

fn balance(index: usize, worker: &WorkerState, all: &[Arc<WorkerState>]) {
    // Safety: called from the owning worker thread, between draining its own private deque.
    let private_len = unsafe { (*worker.private.get()).len() };
    if private_len < 2 {
        return;
    }

    let want = private_len - 1;
    let mut idle_targets = Vec::with_capacity(want.min(all.len()));
    for offset in 1..all.len() {
        if idle_targets.len() >= want {
            break;
        }
        let idx = (index + offset) % all.len();
        if all[idx]
            .idle
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            idle_targets.push(idx);
        }
    }
    if idle_targets.is_empty() {
        return;
    }

    let share = private_len / (idle_targets.len() + 1);
    if share == 0 {
        // Not enough work to give everyone at least one task; release the unused idle claims.
        for idx in idle_targets {
            all[idx].idle.store(true, Ordering::Release);
        }
        return;
    }
    let remainder = private_len % (idle_targets.len() + 1);
    tracing::trace!(worker = index, donees = idle_targets.len(), share, "donating work to idle siblings");

    for (i, idx) in idle_targets.iter().enumerate() {
        let take = share + usize::from(i < remainder);
        let mut chunk = Vec::with_capacity(take);
        for _ in 0..take {
            // Safety: same owning-thread access as above.
            match unsafe { (*worker.private.get()).pop_front() } {
                Some(task) => chunk.push(task),
                None => break,
            }
        }
        let was_empty = {
            let mut q = all[*idx].public.lock().unwrap();
            let was_empty = q.is_empty();
            q.extend(chunk);
            was_empty
        };
        if was_empty {
            all[*idx].sem.release();
        }
    }
}

impl Executor for ThreadPoolExecutor {
    fn enqueue(&self, task: Task) -> CoroResult<()> {
        self.shutdown.check()?;

        if let Some(idx) = self.own_index() {
            let appears_empty = unsafe { (*self.workers[idx].private.get()).is_empty() };
            if appears_empty {
                self.push_private_self(idx, task);
                return Ok(());
            }
        }

        let start = self.own_index().unwrap_or_else(|| self.thread_hash_start());
        if let Some(idx) = self.acquire_idle_worker(start) {
            self.push_public(idx, task);
            return Ok(());
        }

        if let Some(idx) = self.own_index() {
            self.push_private_self(idx, task);
            return Ok(());
        }

        let idx = self.cursor.fetch_add(1, Ordering::Relaxed) % self.workers.len();
        self.push_public(idx, task);
        Ok(())
    }

    fn enqueue_batch(&self, tasks: Vec<Task>) -> CoroResult<()> {
        self.shutdown.check()?;
        if tasks.is_empty() {
            return Ok(());
        }

        if let Some(idx) = self.own_index() {
            unsafe {
                (*self.workers[idx].private.get()).extend(tasks);
            }
            return Ok(());
        }

        let n = self.workers.len();
        if tasks.len() < n {
            for task in tasks {
                self.enqueue(task)?;
            }
            return Ok(());
        }

        let chunk_size = tasks.len() / n;
        let remainder = tasks.len() % n;
        let mut iter = tasks.into_iter();
        for idx in 0..n {
            let take = chunk_size + usize::from(idx < remainder);
            let chunk: Vec<_> = (&mut iter).take(take).collect();
            if !chunk.is_empty() {
                self.push_public_many(idx, chunk);
            }
        }
        Ok(())
    }

    fn max_concurrency_level(&self) -> usize {
        self.workers.len()
    }

    fn shutdown(&self) {
        if self.shutdown.set() {
            tracing::info!(pool = self.id, "stop signal received, shutting down");
            for worker in &self.workers {
                worker.sem.release();
            }
            let handles = std::mem::take(&mut *self.handles.lock().unwrap());
            for handle in handles {
                let _ = handle.join();
            }
            for worker in &self.workers {
                unsafe {
                    (*worker.private.get()).clear();
                }
                worker.public.lock().unwrap().clear();
            }
        }
    }

    fn shutdown_requested(&self) -> bool {
        self.shutdown.get()
    }
}

impl Drop for ThreadPoolExecutor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::ExecutorExt;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn all_tasks_run_exactly_once() {
        let exec = ThreadPoolExecutor::new(4, Duration::from_millis(50));
        let calls = Arc::new(AtomicUsize::new(0));
        for _ in 0..200 {
            let c = calls.clone();
            exec.post(move || {
                c.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        }
        exec.shutdown();
        assert_eq!(calls.load(Ordering::SeqCst), 200);
    }

    #[test]
    fn bulk_enqueue_distributes_across_workers() {
        let exec = ThreadPoolExecutor::new(4, Duration::from_millis(50));
        let calls = Arc::new(AtomicUsize::new(0));
        let fns: Vec<_> = (0..40)
            .map(|_| {
                let c = calls.clone();
                move || {
                    c.fetch_add(1, Ordering::SeqCst);
                }
            })
            .collect();
        exec.bulk_post(fns).unwrap();
        exec.shutdown();
        assert_eq!(calls.load(Ordering::SeqCst), 40);
    }

    #[test]
    fn shutdown_is_idempotent_and_rejects_new_work() {
        let exec = ThreadPoolExecutor::new(2, Duration::from_millis(20));
        exec.shutdown();
        exec.shutdown();
        assert!(exec.post(|| {}).is_err());
    }
}
