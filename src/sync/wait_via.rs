//! A future that posts itself onto an executor and completes once that task runs — the "hop
//! over to `resume_executor`" step [`super::AsyncCondition::wait`] needs after being woken.
//!
//! Built directly on [`crate::task::Task::from_await_via`], the same await-via functor the base
//! design uses to resume a suspended coroutine from an arbitrary thread.

use crate::error::{CoroError, CoroResult};
use crate::executor::Executor;
use crate::task::Task;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

enum State {
    Start(Arc<dyn Executor>),
    Posted(Arc<AtomicBool>),
    Done,
}

pub(crate) struct ResumeOn {
    state: State,
}

impl ResumeOn {
    pub(crate) fn new(executor: Arc<dyn Executor>) -> Self {
        Self { state: State::Start(executor) }
    }
}

impl Future for ResumeOn {
    type Output = CoroResult<()>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match std::mem::replace(&mut this.state, State::Done) {
            State::Start(executor) => {
                let interrupted = Arc::new(AtomicBool::new(false));
                let task = Task::from_await_via(cx.waker().clone(), interrupted.clone());
                match executor.enqueue(task) {
                    Ok(()) => {
                        this.state = State::Posted(interrupted);
                        Poll::Pending
                    }
                    Err(e) => Poll::Ready(Err(e)),
                }
            }
            State::Posted(interrupted) => {
                if interrupted.load(Ordering::Acquire) {
                    Poll::Ready(Err(CoroError::Interrupted))
                } else {
                    Poll::Ready(Ok(()))
                }
            }
            State::Done => Poll::Ready(Err(CoroError::EmptyResult)),
        }
    }
}
