//! The manual executor: an ordered task queue with no driver thread of its own. The caller pulls
//! tasks out and runs them explicitly — handy for deterministic tests and embedding this runtime
//! inside someone else's event loop.

use super::{Executor, ShutdownFlag};
use crate::error::CoroResult;
use crate::task::Task;
use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// FIFO queue of tasks, drained by whoever calls `loop_once`/`run`/etc. Timed waits re-check
/// their predicate with a 1ms slack past the deadline, same discipline as the thread pool's idle
/// wait.
pub struct ManualExecutor {
    shutdown: ShutdownFlag,
    queue: Mutex<VecDeque<Task>>,
    cv: Condvar,
}

impl Default for ManualExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualExecutor {
    #[must_use]
    pub fn new() -> Self {
        Self {
            shutdown: ShutdownFlag::new(),
            queue: Mutex::new(VecDeque::new()),
            cv: Condvar::new(),
        }
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.queue.lock().unwrap().len()
    }

    #[must_use]
    pub fn empty(&self) -> bool {
        self.size() == 0
    }

    /// Drop every queued task without running it.
    pub fn clear(&self) {
        self.queue.lock().unwrap().clear();
    }

    /// Run at most one queued task. Returns `true` if a task ran.
    pub fn loop_once(&self) -> bool {
        let task = self.queue.lock().unwrap().pop_front();
        match task {
            Some(t) => {
                t.run();
                true
            }
            None => false,
        }
    }

    /// Like [`Self::loop_once`], but waits up to `timeout` for a task to appear.
    pub fn loop_once_for(&self, timeout: Duration) -> bool {
        self.loop_once_until(Instant::now() + timeout)
    }

    /// Like [`Self::loop_once`], but waits until `deadline` for a task to appear.
    pub fn loop_once_until(&self, deadline: Instant) -> bool {
        let mut guard = self.queue.lock().unwrap();
        loop {
            if let Some(t) = guard.pop_front() {
                drop(guard);
                t.run();
                return true;
            }
            if self.shutdown.get() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (g, _timeout) = self
                .cv
                .wait_timeout(guard, (deadline - now) + Duration::from_millis(1))
                .unwrap();
            guard = g;
        }
    }

    /// Run up to `n` queued tasks without waiting for more to arrive. Corresponds to the base
    /// design's `loop(n)` (renamed: `loop` is a Rust keyword).
    pub fn run(&self, n: usize) -> usize {
        (0..n).take_while(|_| self.loop_once()).count()
    }

    /// Run up to `n` tasks, waiting up to `timeout` total.
    pub fn run_for(&self, n: usize, timeout: Duration) -> usize {
        self.run_until(n, Instant::now() + timeout)
    }

    /// Run up to `n` tasks, waiting until `deadline` for each.
    pub fn run_until(&self, n: usize, deadline: Instant) -> usize {
        (0..n)
            .take_while(|_| self.loop_once_until(deadline))
            .count()
    }

    /// Block until at least one task is queued (or shutdown).
    pub fn wait_for_task(&self) {
        self.wait_for_tasks(1);
    }

    pub fn wait_for_task_for(&self, timeout: Duration) -> bool {
        self.wait_for_tasks_until(1, Instant::now() + timeout)
    }

    pub fn wait_for_task_until(&self, deadline: Instant) -> bool {
        self.wait_for_tasks_until(1, deadline)
    }

    /// Block until at least `n` tasks are queued (or shutdown).
    pub fn wait_for_tasks(&self, n: usize) {
        let mut guard = self.queue.lock().unwrap();
        while guard.len() < n && !self.shutdown.get() {
            guard = self.cv.wait(guard).unwrap();
        }
    }

    pub fn wait_for_tasks_for(&self, n: usize, timeout: Duration) -> bool {
        self.wait_for_tasks_until(n, Instant::now() + timeout)
    }

    pub fn wait_for_tasks_until(&self, n: usize, deadline: Instant) -> bool {
        let mut guard = self.queue.lock().unwrap();
        loop {
            if guard.len() >= n || self.shutdown.get() {
                return guard.len() >= n;
            }
            let now = Instant::now();
            if now >= deadline {
                return guard.len() >= n;
            }
            let (g, _timeout) = self
                .cv
                .wait_timeout(guard, (deadline - now) + Duration::from_millis(1))
                .unwrap();
            guard = g;
        }
    }
}

impl Executor for ManualExecutor {
    fn enqueue(&self, task: Task) -> CoroResult<()> {
        self.shutdown.check()?;
        self.queue.lock().unwrap().push_back(task);
        self.cv.notify_all();
        Ok(())
    }

    fn enqueue_batch(&self, tasks: Vec<Task>) -> CoroResult<()> {
        self.shutdown.check()?;
        self.queue.lock().unwrap().extend(tasks);
        self.cv.notify_all();
        Ok(())
    }

    fn max_concurrency_level(&self) -> usize {
        1
    }

    fn shutdown(&self) {
        if self.shutdown.set() {
            tracing::debug!("shutting down manual executor, dropping queued tasks");
            self.queue.lock().unwrap().clear();
            self.cv.notify_all();
        }
    }

    fn shutdown_requested(&self) -> bool {
        self.shutdown.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::ExecutorExt;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn tasks_run_fifo_only_when_driven() {
        let exec = ManualExecutor::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..3 {
            let order = order.clone();
            exec.post(move || order.lock().unwrap().push(i)).unwrap();
        }
        assert_eq!(exec.size(), 3);
        assert_eq!(exec.run(3), 3);
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn wait_for_task_blocks_until_enqueued() {
        let exec = Arc::new(ManualExecutor::new());
        let e = exec.clone();
        let handle = std::thread::spawn(move || {
            e.wait_for_task();
            e.loop_once()
        });
        std::thread::sleep(Duration::from_millis(10));
        exec.post(|| {}).unwrap();
        assert!(handle.join().unwrap());
    }

    #[test]
    fn shutdown_drains_queue_and_rejects_new_work() {
        let exec = ManualExecutor::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        exec.post(move || {
            c.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
        exec.shutdown();
        assert_eq!(exec.size(), 0);
        assert!(exec.post(|| {}).is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
