//! The thread executor: spawns one OS thread per enqueued task.
//!
//! Grounded on the teacher's park/unpark bookkeeping (`park/parker.rs`) applied to whole threads
//! instead of a single parked worker: a *single-element retirement slot* bounds the number of
//! un-joined `JoinHandle`s to roughly one, rather than letting them pile up for the lifetime of
//! the executor.

use super::{Executor, ShutdownFlag};
use crate::error::CoroResult;
use crate::task::Task;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

/// Spawns a fresh OS thread for every task. A finished worker moves its `JoinHandle` into a
/// single retirement slot; the next enqueue (or `shutdown`) joins whatever was sitting there
/// before replacing it, so at most one finished-but-unjoined thread accumulates at a time.
pub struct ThreadExecutor {
    shutdown: ShutdownFlag,
    live: Arc<AtomicUsize>,
    retired: Mutex<Option<JoinHandle<()>>>,
}

impl Default for ThreadExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl ThreadExecutor {
    #[must_use]
    pub fn new() -> Self {
        Self {
            shutdown: ShutdownFlag::new(),
            live: Arc::new(AtomicUsize::new(0)),
            retired: Mutex::new(None),
        }
    }

    fn retire(&self, handle: JoinHandle<()>) {
        let previous = self.retired.lock().unwrap().replace(handle);
        if let Some(previous) = previous {
            let _ = previous.join();
        }
    }
}

impl Executor for ThreadExecutor {
    fn enqueue(&self, task: Task) -> CoroResult<()> {
        self.shutdown.check()?;
        let live = self.live.fetch_add(1, Ordering::AcqRel) + 1;
        tracing::trace!(live, "spawning task thread");
        let live_counter = self.live.clone();
        let handle = std::thread::spawn(move || {
            task.run();
            live_counter.fetch_sub(1, Ordering::AcqRel);
        });
        self.retire(handle);
        Ok(())
    }

    fn max_concurrency_level(&self) -> usize {
        usize::MAX
    }

    fn shutdown(&self) {
        if self.shutdown.set() {
            tracing::info!("stop signal received, waiting for live task threads to finish");
            while self.live.load(Ordering::Acquire) > 0 {
                std::thread::yield_now();
            }
            if let Some(handle) = self.retired.lock().unwrap().take() {
                let _ = handle.join();
            }
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
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn each_task_runs_on_its_own_thread() {
        let exec = ThreadExecutor::new();
        let calls = Arc::new(AtomicUsize::new(0));
        for _ in 0..8 {
            let c = calls.clone();
            exec.post(move || {
                c.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        }
        exec.shutdown();
        assert_eq!(calls.load(Ordering::SeqCst), 8);
    }

    #[test]
    fn shutdown_is_idempotent_and_rejects_new_work() {
        let exec = ThreadExecutor::new();
        exec.shutdown();
        exec.shutdown();
        assert!(exec.post(|| {}).is_err());
    }
}
