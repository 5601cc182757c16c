//! An async condition variable: waiters release their [`ScopedLock`], suspend, and re-acquire
//! the lock (re-checking an optional predicate) once notified and resumed on their executor.

use super::lock::ScopedLock;
use super::wait_queue::WaitQueue;
use super::wait_via::ResumeOn;
use crate::error::CoroResult;
use crate::executor::Executor;
use std::sync::Arc;

/// A condition variable whose waiters are suspended coroutines, not parked OS threads.
pub struct AsyncCondition {
    waiters: WaitQueue,
}

impl Default for AsyncCondition {
    fn default() -> Self {
        Self::new()
    }
}

impl AsyncCondition {
    #[must_use]
    pub fn new() -> Self {
        Self { waiters: WaitQueue::new() }
    }

    /// Suspend until notified, unconditionally (a single release/suspend/re-acquire cycle, same
    /// spurious-wake contract as a plain OS condition variable).
    pub async fn wait(
        &self,
        resume_executor: Arc<dyn Executor>,
        guard: ScopedLock,
    ) -> CoroResult<ScopedLock> {
        self.wait_while(resume_executor, guard, |_| false).await
    }

    /// Suspend until `predicate` holds, re-checking it under the lock after every wake.
    pub async fn wait_while<P>(
        &self,
        resume_executor: Arc<dyn Executor>,
        mut guard: ScopedLock,
        mut predicate: P,
    ) -> CoroResult<ScopedLock>
    where
        P: FnMut(&ScopedLock) -> bool,
    {
        while !predicate(&guard) {
            tracing::trace!("condition predicate not yet satisfied, suspending");
            // Register in the wait queue *before* releasing the lock: a `poll_fn` future that
            // resolves immediately does not yield back to the executor, so the registration and
            // the release below happen within the same `poll`, with no gap in which a concurrent
            // `notify_one`/`notify_all` could run unobserved.
            let id =
                std::future::poll_fn(|cx| std::task::Poll::Ready(self.waiters.register(cx))).await;
            let lock = guard.release_for_wait();
            self.waiters.wait_registered(id).await;
            ResumeOn::new(resume_executor.clone()).await?;
            guard = lock.lock(resume_executor.clone()).await?;
        }
        Ok(guard)
    }

    pub fn notify_one(&self) {
        tracing::trace!("notifying a single waiter");
        self.waiters.wake_one();
    }

    pub fn notify_all(&self) {
        tracing::trace!(waiters = self.waiters.len(), "notifying all waiters");
        self.waiters.wake_all();
    }

    #[must_use]
    pub fn waiters_len(&self) -> usize {
        self.waiters.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::super::lock::AsyncLock;
    use crate::executor::ThreadPoolExecutor;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn notify_one_wakes_a_single_waiter_which_observes_the_predicate() {
        let exec: Arc<dyn Executor> = Arc::new(ThreadPoolExecutor::new(4, Duration::from_millis(20)));
        let lock = AsyncLock::new();
        let condition = Arc::new(AsyncCondition::new());
        let ready = Arc::new(AtomicUsize::new(0));

        let waiter_exec = exec.clone();
        let waiter_lock = lock.clone();
        let waiter_condition = condition.clone();
        let waiter_ready = ready.clone();
        let handle = std::thread::spawn(move || {
            let guard = waiter_lock.lock(waiter_exec.clone()).wait().unwrap();
            let guard = block_on_condition(
                waiter_condition.wait_while(waiter_exec, guard, |_| waiter_ready.load(Ordering::Acquire) == 1),
            )
            .unwrap();
            drop(guard);
        });

        std::thread::sleep(Duration::from_millis(20));
        {
            let guard = lock.lock(exec.clone()).wait().unwrap();
            ready.store(1, Ordering::Release);
            drop(guard);
        }
        condition.notify_one();
        handle.join().unwrap();
    }

    fn block_on_condition<F: std::future::Future>(fut: F) -> F::Output {
        let mut fut = std::pin::pin!(fut);
        let waker = std::task::Waker::noop();
        let mut cx = std::task::Context::from_waker(waker);
        loop {
            if let std::task::Poll::Ready(v) = fut.as_mut().poll(&mut cx) {
                return v;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
    }
}
