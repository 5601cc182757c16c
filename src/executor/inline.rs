//! The inline executor: runs every task synchronously on the caller's thread.

use super::{Executor, ShutdownFlag};
use crate::error::CoroResult;
use crate::task::Task;

/// Runs tasks synchronously, on whichever thread calls `enqueue`. Useful as a default resume
/// target and in tests.
#[derive(Default)]
pub struct InlineExecutor {
    shutdown: ShutdownFlag,
}

impl InlineExecutor {
    #[must_use]
    pub fn new() -> Self {
        Self { shutdown: ShutdownFlag::new() }
    }
}

impl Executor for InlineExecutor {
    fn enqueue(&self, task: Task) -> CoroResult<()> {
        self.shutdown.check()?;
        task.run();
        Ok(())
    }

    fn max_concurrency_level(&self) -> usize {
        usize::MAX
    }

    fn shutdown(&self) {
        self.shutdown.set();
    }

    fn shutdown_requested(&self) -> bool {
        self.shutdown.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CoroError;
    use crate::executor::ExecutorExt;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn runs_on_caller_thread_immediately() {
        let exec = InlineExecutor::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        exec.post(move || {
            c.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn rejects_after_shutdown() {
        let exec = InlineExecutor::new();
        exec.shutdown();
        assert!(exec.shutdown_requested());
        assert_eq!(exec.post(|| {}), Err(CoroError::ExecutorShutdown));
    }

    #[test]
    fn submit_reports_panic_instead_of_hanging() {
        let exec = InlineExecutor::new();
        let future = exec
            .submit(|| -> crate::error::CoroResult<i32> { panic!("submitted task exploded") })
            .unwrap();
        match future.wait() {
            Err(CoroError::Panicked(message)) => assert!(message.contains("exploded")),
            other => panic!("expected Panicked, got {other:?}"),
        }
    }

    #[test]
    fn post_survives_a_panicking_closure() {
        let exec = InlineExecutor::new();
        exec.post(|| panic!("posted closure exploded")).unwrap();
        // The executor itself is unaffected; subsequent posts still run.
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        exec.post(move || {
            c.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
