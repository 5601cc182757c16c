//! The result state machine: a single-producer, single-consumer rendezvous for a value or error,
//! expressed as a Rust [`Future`].
//!
//! Grounded directly on the teacher's `sync::oneshot` channel (`Sender`/`Receiver`/`Inner`),
//! with the waker bookkeeping delegated to [`crate::sync::WaitCell`] exactly as `oneshot::Inner`
//! delegates to its own `rx_waker`. The five-state diagram in the distilled design collapses two
//! of its states: `CONSUMER_SET` (an awaiting coroutine) and `CONSUMER_WAIT` (a blocking OS
//! thread) differ, in the original, only in *how* the consumer is resumed. Since Rust expresses
//! both as "wake a [`std::task::Waker`]" — [`wait`](CoroResultFuture::wait) below installs a
//! thread-parking waker and polls in a loop — the two collapse into one `WaitCell` registration.
//! See `DESIGN.md` for the full writeup of this decision.
//!
//! Lazy-result semantics (§4.2) fall out for free: a [`CoroResultFuture`] is inert until polled,
//! same as any other Rust future, so there is no separate "always-suspend initial" to model.

pub mod shared;
pub mod when_any;

use crate::error::{CoroError, CoroResult};
use crate::sync::wait_cell::WaitCell;
use std::cell::UnsafeCell;
use std::future::Future;
use std::mem::ManuallyDrop;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Wake, Waker};
use std::thread::{self, Thread};
use std::time::{Duration, Instant};

pub use shared::SharedResult;
pub use when_any::{when_all, when_any, WhenAnyOutcome};

struct State<T> {
    cell: WaitCell,
    value: UnsafeCell<Option<CoroResult<T>>>,
}

// Safety: `value` is written at most once before the `WaitCell` transition that makes it visible
// to the consumer, and read at most once after that transition is observed — single writer,
// single reader, handed off through the cell's acquire/release pair.
unsafe impl<T: Send> Sync for State<T> {}

/// The producer half of a result. Completing it resumes the consumer; dropping it without
/// completing resumes the consumer with [`CoroError::Interrupted`].
pub struct Promise<T> {
    state: Arc<State<T>>,
}

/// The consumer half of a result: a [`Future`] yielding [`CoroResult<T>`].
pub struct CoroResultFuture<T> {
    state: Option<Arc<State<T>>>,
}

/// Construct a fresh producer/consumer pair.
#[must_use]
pub fn channel<T>() -> (Promise<T>, CoroResultFuture<T>) {
    let state = Arc::new(State {
        cell: WaitCell::new(),
        value: UnsafeCell::new(None),
    });
    (
        Promise { state: state.clone() },
        CoroResultFuture { state: Some(state) },
    )
}

impl<T> Promise<T> {
    /// Complete the result with a value or error, consuming the promise and resuming the
    /// consumer if one is registered.
    pub fn complete(self, value: CoroResult<T>) {
        let this = ManuallyDrop::new(self);
        // Safety: single producer, and this is the only write to `value` before the cell wakes
        // the consumer (the `Drop` impl, which would be the only other writer, never runs here).
        unsafe {
            *this.state.value.get() = Some(value);
        }
        this.state.cell.wake();
    }

    /// Convenience for `complete(Ok(value))`.
    pub fn set_value(self, value: T) {
        self.complete(Ok(value));
    }

    /// Convenience for `complete(Err(error))`.
    pub fn set_error(self, error: CoroError) {
        self.complete(Err(error));
    }
}

impl<T> Drop for Promise<T> {
    fn drop(&mut self) {
        // Safety: if this runs, `complete` (which would have skipped `Drop` via `ManuallyDrop`)
        // never did, so no one else has written `value` yet.
        unsafe {
            *self.state.value.get() = Some(Err(CoroError::Interrupted));
        }
        self.state.cell.wake();
    }
}

impl<T> CoroResultFuture<T> {
    /// An already-empty result: observing it always yields [`CoroError::EmptyResult`]. Models a
    /// moved-from or default-constructed handle.
    #[must_use]
    pub fn empty() -> Self {
        Self { state: None }
    }

    /// A result that is already complete, per "make-ready / make-exceptional" in §4.2.
    #[must_use]
    pub fn ready(value: CoroResult<T>) -> Self {
        let (promise, future) = channel();
        promise.complete(value);
        future
    }

    /// `true` if this handle carries no state (moved-from, or constructed via [`Self::empty`]).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.is_none()
    }

    /// Block the current OS thread until the result is ready.
    pub fn wait(self) -> CoroResult<T> {
        match self.wait_until(None) {
            WaitOutcome::Ready(v) => v,
            WaitOutcome::Timeout => unreachable!("unbounded wait cannot time out"),
        }
    }

    /// Block the current OS thread until the result is ready or `timeout` elapses.
    pub fn wait_for(self, timeout: Duration) -> WaitOutcome<T> {
        self.wait_until(Some(Instant::now() + timeout))
    }

    /// Block the current OS thread until the result is ready or the deadline elapses.
    pub fn wait_until(mut self, deadline: Option<Instant>) -> WaitOutcome<T> {
        let park_waker: Waker = Arc::new(ThreadPark(thread::current())).into();
        let mut cx = Context::from_waker(&park_waker);
        loop {
            match Pin::new(&mut self).poll(&mut cx) {
                Poll::Ready(v) => return WaitOutcome::Ready(v),
                Poll::Pending => match deadline {
                    None => thread::park(),
                    Some(deadline) => {
                        let now = Instant::now();
                        if now >= deadline {
                            return WaitOutcome::Timeout;
                        }
                        // A 1ms slack mirrors the base design's timed-wait re-check discipline.
                        thread::park_timeout((deadline - now) + Duration::from_millis(1));
                    }
                },
            }
        }
    }
}

/// The outcome of a timed blocking wait on a [`CoroResultFuture`].
pub enum WaitOutcome<T> {
    Ready(CoroResult<T>),
    Timeout,
}

struct ThreadPark(Thread);

impl Wake for ThreadPark {
    fn wake(self: Arc<Self>) {
        self.0.unpark();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        self.0.unpark();
    }
}

impl<T> Future for CoroResultFuture<T> {
    type Output = CoroResult<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let Some(state) = self.state.take() else {
            return Poll::Ready(Err(CoroError::EmptyResult));
        };
        match state.cell.poll_wait(cx) {
            Poll::Pending => {
                self.state = Some(state);
                Poll::Pending
            }
            Poll::Ready(_closed_or_woken) => {
                // Safety: the cell's transition out of "registered" happens-after the producer's
                // write to `value`, so this read is synchronized with it.
                let value = unsafe { (*state.value.get()).take() };
                Poll::Ready(value.unwrap_or(Err(CoroError::EmptyResult)))
            }
        }
    }
}
