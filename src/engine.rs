//! The process-wide runtime singleton: lazily-built default executors plus the timer queue,
//! fetched on demand and released explicitly.
//!
//! Grounded on §4.8: an options struct configures pool sizes and idle times; the engine tracks
//! every executor it ever hands out so `shutdown_all` can join every worker thread in one pass.

use crate::executor::{
    Executor, InlineExecutor, ManualExecutor, ThreadExecutor, ThreadPoolExecutor,
    WorkerThreadExecutor,
};
use crate::timer::TimerQueue;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

/// Configuration consulted the first time each lazily-built executor is requested.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub cpu_pool_factor: usize,
    pub background_pool_factor: usize,
    pub max_worker_idle_time: Duration,
    pub timer_max_wait_time: Duration,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            cpu_pool_factor: 1,
            background_pool_factor: 4,
            max_worker_idle_time: Duration::from_secs(1),
            timer_max_wait_time: Duration::from_secs(60),
        }
    }
}

struct Lazy<T> {
    cell: OnceLock<T>,
}

impl<T> Lazy<T> {
    const fn new() -> Self {
        Self { cell: OnceLock::new() }
    }

    fn get_or_init(&self, f: impl FnOnce() -> T) -> &T {
        self.cell.get_or_init(f)
    }
}

/// The runtime singleton. Obtain it with [`Engine::get`]; drop the returned `Arc` (or call
/// [`Engine::shutdown_all`]) to tear every executor the process has created down.
pub struct Engine {
    options: EngineOptions,
    inline: Lazy<Arc<InlineExecutor>>,
    cpu_pool: Lazy<Arc<ThreadPoolExecutor>>,
    background_pool: Lazy<Arc<ThreadPoolExecutor>>,
    thread_per_task: Lazy<Arc<ThreadExecutor>>,
    timers: Lazy<Arc<TimerQueue>>,
    tracked: Mutex<Vec<Arc<dyn Executor>>>,
}

static SINGLETON: OnceLock<Arc<Engine>> = OnceLock::new();

impl Engine {
    /// Fetch the process-wide engine, constructing it with default options on first access.
    #[must_use]
    pub fn get() -> Arc<Engine> {
        SINGLETON.get_or_init(|| Arc::new(Engine::with_options(EngineOptions::default()))).clone()
    }

    /// Construct a fresh, independent engine (mainly for tests that want isolation from the
    /// process-wide singleton).
    #[must_use]
    pub fn with_options(options: EngineOptions) -> Self {
        Self {
            options,
            inline: Lazy::new(),
            cpu_pool: Lazy::new(),
            background_pool: Lazy::new(),
            thread_per_task: Lazy::new(),
            timers: Lazy::new(),
            tracked: Mutex::new(Vec::new()),
        }
    }

    fn track(&self, executor: Arc<dyn Executor>) {
        self.tracked.lock().unwrap().push(executor);
    }

    #[must_use]
    pub fn inline_executor(&self) -> Arc<InlineExecutor> {
        self.inline
            .get_or_init(|| {
                let exec = Arc::new(InlineExecutor::new());
                self.track(exec.clone());
                exec
            })
            .clone()
    }

    #[must_use]
    pub fn cpu_pool(&self) -> Arc<ThreadPoolExecutor> {
        self.cpu_pool
            .get_or_init(|| {
                let size = std::thread::available_parallelism().map_or(1, |n| n.get())
                    * self.options.cpu_pool_factor;
                let exec = Arc::new(ThreadPoolExecutor::new(size.max(1), self.options.max_worker_idle_time));
                self.track(exec.clone());
                exec
            })
            .clone()
    }

    #[must_use]
    pub fn background_pool(&self) -> Arc<ThreadPoolExecutor> {
        self.background_pool
            .get_or_init(|| {
                let size = std::thread::available_parallelism().map_or(1, |n| n.get())
                    * self.options.background_pool_factor;
                let exec = Arc::new(ThreadPoolExecutor::new(size.max(1), self.options.max_worker_idle_time));
                self.track(exec.clone());
                exec
            })
            .clone()
    }

    #[must_use]
    pub fn thread_per_task_executor(&self) -> Arc<ThreadExecutor> {
        self.thread_per_task
            .get_or_init(|| {
                let exec = Arc::new(ThreadExecutor::new());
                self.track(exec.clone());
                exec
            })
            .clone()
    }

    #[must_use]
    pub fn timers(&self) -> Arc<TimerQueue> {
        self.timers
            .get_or_init(|| Arc::new(TimerQueue::with_max_wait_time(self.options.timer_max_wait_time)))
            .clone()
    }

    /// Build a new manual executor, tracked by this engine for `shutdown_all`.
    #[must_use]
    pub fn make_manual_executor(&self) -> Arc<ManualExecutor> {
        let exec = Arc::new(ManualExecutor::new());
        self.track(exec.clone());
        exec
    }

    /// Build a new single worker-thread executor, tracked by this engine for `shutdown_all`.
    #[must_use]
    pub fn make_worker_thread_executor(&self) -> Arc<WorkerThreadExecutor> {
        let exec = Arc::new(WorkerThreadExecutor::new());
        self.track(exec.clone());
        exec
    }

    /// Shut every executor this engine has ever handed out down, in one pass.
    pub fn shutdown_all(&self) {
        if let Some(timers) = self.timers.cell.get() {
            timers.shutdown();
        }
        for executor in self.tracked.lock().unwrap().drain(..) {
            executor.shutdown();
        }
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.shutdown_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::ExecutorExt;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn lazily_built_executors_are_shared_across_calls() {
        let engine = Engine::with_options(EngineOptions::default());
        let a = engine.inline_executor();
        let b = engine.inline_executor();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn cpu_pool_runs_tasks() {
        let engine = Engine::with_options(EngineOptions::default());
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        engine.cpu_pool().post(move || {
            c.fetch_add(1, Ordering::SeqCst);
        }).unwrap();
        engine.shutdown_all();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn shutdown_all_tears_down_every_tracked_executor() {
        let engine = Engine::with_options(EngineOptions::default());
        let inline = engine.inline_executor();
        let manual = engine.make_manual_executor();
        engine.shutdown_all();
        assert!(inline.shutdown_requested());
        assert!(manual.shutdown_requested());
    }
}
