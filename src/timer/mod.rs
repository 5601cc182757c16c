//! The timer queue: a single coordinator thread maintaining a deadline-ordered set of timers,
//! firing each by posting a task onto the timer's own executor.
//!
//! Grounded on the teacher's `time::sleep`/`time::instant` (a `Sleep` future driven by a single
//! reactor thread) generalized from one-shot delays into the full one-shot/periodic timer set
//! the design calls for, plus `make_delay_object` built directly on [`crate::result`] the same
//! way the teacher's `Sleep` is an ordinary `Future`.

use crate::error::{CoroError, CoroResult};
use crate::executor::Executor;
use crate::result::{self, CoroResultFuture};
use crate::task::Task;
use std::collections::BinaryHeap;
use std::cmp::Reverse;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Opaque handle identifying a scheduled timer, for cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(u64);

struct TimerEntry {
    id: TimerId,
    deadline: Instant,
    period: Option<Duration>,
    executor: Arc<dyn Executor>,
    callback: Mutex<Option<Box<dyn FnMut() + Send>>>,
    cancelled: AtomicBool,
}

impl TimerEntry {
    fn fire(self: &Arc<Self>) {
        if self.cancelled.load(Ordering::Acquire) {
            return;
        }
        tracing::trace!(timer = self.id.0, "firing timer");
        let this = self.clone();
        let executor = this.executor.clone();
        // The timer holds a strong reference across the post so a racing `cancel()` only flips
        // the flag instead of destroying state the executor is about to touch.
        let _ = executor.enqueue(Task::new(move || {
            if this.cancelled.load(Ordering::Acquire) {
                return;
            }
            if let Some(cb) = this.callback.lock().unwrap().as_mut() {
                cb();
            }
        }));
    }
}

struct Scheduled {
    deadline: Instant,
    id: TimerId,
}

impl PartialEq for Scheduled {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.id == other.id
    }
}
impl Eq for Scheduled {}
impl PartialOrd for Scheduled {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for Scheduled {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.deadline.cmp(&other.deadline)
    }
}

enum Request {
    Add(Arc<TimerEntry>),
    Remove(TimerId),
}

struct Inner {
    requests: Mutex<Vec<Request>>,
    cv: Condvar,
    shutdown: AtomicBool,
    next_id: AtomicU64,
    max_wait_time: Duration,
}

/// The timer queue. Construct one per [`crate::engine::Engine`]; the coordinator thread runs
/// for the lifetime of this handle (or until idle-shutdown after `max_wait_time` with nothing
/// ever scheduled).
pub struct TimerQueue {
    inner: Arc<Inner>,
    coordinator: Mutex<Option<JoinHandle<()>>>,
}

impl TimerQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_wait_time(Duration::from_secs(60))
    }

    #[must_use]
    pub fn with_max_wait_time(max_wait_time: Duration) -> Self {
        let inner = Arc::new(Inner {
            requests: Mutex::new(Vec::new()),
            cv: Condvar::new(),
            shutdown: AtomicBool::new(false),
            next_id: AtomicU64::new(0),
            max_wait_time,
        });
        let coordinator_inner = inner.clone();
        let coordinator = std::thread::Builder::new()
            .name("coro-timer".into())
            .spawn(move || coordinator_loop(&coordinator_inner))
            .expect("failed to spawn timer coordinator thread");
        Self { inner, coordinator: Mutex::new(Some(coordinator)) }
    }

    fn push(&self, req: Request) {
        self.inner.requests.lock().unwrap().push(req);
        self.inner.cv.notify_all();
    }

    /// Schedule a periodic timer that invokes `callback` on `executor` every `period`, starting
    /// after the first `period` elapses.
    pub fn make_timer<F>(
        &self,
        executor: Arc<dyn Executor>,
        period: Duration,
        callback: F,
    ) -> CoroResult<TimerId>
    where
        F: FnMut() + Send + 'static,
    {
        self.schedule(executor, Instant::now() + period, Some(period), callback)
    }

    /// Schedule a one-shot timer that invokes `callback` on `executor` after `delay`.
    pub fn make_oneshot_timer<F>(
        &self,
        executor: Arc<dyn Executor>,
        delay: Duration,
        callback: F,
    ) -> CoroResult<TimerId>
    where
        F: FnMut() + Send + 'static,
    {
        self.schedule(executor, Instant::now() + delay, None, callback)
    }

    fn schedule<F>(
        &self,
        executor: Arc<dyn Executor>,
        deadline: Instant,
        period: Option<Duration>,
        callback: F,
    ) -> CoroResult<TimerId>
    where
        F: FnMut() + Send + 'static,
    {
        if self.inner.shutdown.load(Ordering::Acquire) {
            tracing::debug!("rejecting timer scheduled after shutdown");
            return Err(CoroError::ExecutorShutdown);
        }
        let id = TimerId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let entry = Arc::new(TimerEntry {
            id,
            deadline,
            period,
            executor,
            callback: Mutex::new(Some(Box::new(callback))),
            cancelled: AtomicBool::new(false),
        });
        tracing::trace!(timer = id.0, periodic = period.is_some(), "scheduling timer");
        self.push(Request::Add(entry));
        Ok(id)
    }

    /// Cancel a previously scheduled timer. A no-op if it already fired (one-shot) or was
    /// already cancelled.
    pub fn cancel(&self, id: TimerId) {
        tracing::trace!(timer = id.0, "cancelling timer");
        self.push(Request::Remove(id));
    }

    /// A lazy result that resolves, on `executor`, after `delay` — or with
    /// [`CoroError::Interrupted`] if the queue shuts down first.
    pub fn make_delay_object(&self, executor: Arc<dyn Executor>, delay: Duration) -> CoroResultFuture<()> {
        let (promise, future) = result::channel();
        let promise = Mutex::new(Some(promise));
        let scheduled = self.schedule(executor, Instant::now() + delay, None, move || {
            if let Some(p) = promise.lock().unwrap().take() {
                p.set_value(());
            }
        });
        if scheduled.is_err() {
            return CoroResultFuture::ready(Err(CoroError::ExecutorShutdown));
        }
        future
    }

    pub fn shutdown(&self) {
        if !self.inner.shutdown.swap(true, Ordering::AcqRel) {
            tracing::info!("stop signal received, shutting down timer coordinator");
            self.inner.cv.notify_all();
            if let Some(handle) = self.coordinator.lock().unwrap().take() {
                let _ = handle.join();
            }
        }
    }
}

impl Default for TimerQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TimerQueue {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn coordinator_loop(inner: &Inner) {
    let mut set: BinaryHeap<Reverse<Scheduled>> = BinaryHeap::new();
    let mut map: std::collections::HashMap<TimerId, Arc<TimerEntry>> = std::collections::HashMap::new();

    loop {
        if inner.shutdown.load(Ordering::Acquire) {
            break;
        }

        if set.is_empty() {
            let mut guard = inner.requests.lock().unwrap();
            while guard.is_empty() && !inner.shutdown.load(Ordering::Acquire) {
                let (g, timeout) = inner.cv.wait_timeout(guard, inner.max_wait_time).unwrap();
                guard = g;
                if timeout.timed_out() && guard.is_empty() {
                    tracing::debug!("timer coordinator idle past max wait time, shutting down");
                    return; // idle shutdown
                }
            }
        } else {
            let deadline = set.peek().map(|Reverse(s)| s.deadline).unwrap();
            let now = Instant::now();
            if deadline > now {
                let mut guard = inner.requests.lock().unwrap();
                if guard.is_empty() {
                    let (g, _timeout) = inner.cv.wait_timeout(guard, deadline - now).unwrap();
                    guard = g;
                }
                drop(guard);
            }
        }

        if inner.shutdown.load(Ordering::Acquire) {
            break;
        }

        let requests: Vec<_> = std::mem::take(&mut *inner.requests.lock().unwrap());
        for req in requests {
            match req {
                Request::Add(entry) => {
                    set.push(Reverse(Scheduled { deadline: entry.deadline, id: entry.id }));
                    map.insert(entry.id, entry);
                }
                Request::Remove(id) => {
                    if let Some(entry) = map.remove(&id) {
                        entry.cancelled.store(true, Ordering::Release);
                    }
                }
            }
        }

        let now = Instant::now();
        while let Some(Reverse(top)) = set.peek() {
            if top.deadline > now {
                break;
            }
            let Reverse(top) = set.pop().unwrap();
            let Some(entry) = map.remove(&top.id) else { continue };
            if entry.cancelled.load(Ordering::Acquire) {
                continue;
            }
            entry.fire();
            if let Some(period) = entry.period {
                // Re-insert the same entry (its `executor`/`callback`/`cancelled` are shared
                // state `fire()`'s posted task still holds a reference to) under a fresh
                // deadline, rather than rebuilding it — `fire()` may not have run the callback
                // yet if its executor is asynchronous, so nothing here may touch `callback`.
                let next_deadline = now + period;
                set.push(Reverse(Scheduled { deadline: next_deadline, id: entry.id }));
                map.insert(entry.id, entry);
            }
        }
    }

    // Wake any pending `make_delay_object` awaiters with an interruption rather than leaking them.
    for (_, entry) in map {
        entry.cancelled.store(true, Ordering::Release);
    }
}
