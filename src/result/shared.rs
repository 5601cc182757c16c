//! A shared, clonable result: many handles may await the same underlying completion, each
//! getting their own clone of the final value.
//!
//! Grounded on §4.6: registration pushes an awaiter onto an atomically-registered collection;
//! completion swaps that collection for a "ready" sentinel and resumes everyone in insertion
//! order. Here the "collection" is [`crate::sync::WaitQueue`] and the "sentinel swap" is a
//! `Mutex`-guarded [`Slot`] transitioning from `Polling` to `Ready` exactly once — only the
//! first awaiter to observe `Polling` actually drives the underlying future; everyone else
//! parks in the wait queue and is woken once it resolves.

use super::CoroResultFuture;
use crate::error::CoroResult;
use crate::sync::wait_queue::WaitQueue;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

enum Slot<T> {
    Polling(CoroResultFuture<T>),
    Driving,
    Ready(CoroResult<T>),
}

struct Inner<T> {
    slot: Mutex<Slot<T>>,
    waiters: WaitQueue,
}

/// A fan-out handle over a single underlying [`CoroResultFuture`]. Cheap to clone; every clone
/// observes the same final value.
pub struct SharedResult<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for SharedResult<T> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

impl<T: Clone + Send + 'static> SharedResult<T> {
    #[must_use]
    pub fn new(future: CoroResultFuture<T>) -> Self {
        Self {
            inner: Arc::new(Inner {
                slot: Mutex::new(Slot::Polling(future)),
                waiters: WaitQueue::new(),
            }),
        }
    }

    /// `true` once the underlying result has completed and subsequent awaits will not suspend.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        matches!(&*self.inner.slot.lock().unwrap(), Slot::Ready(_))
    }

    /// Await this handle's copy of the final value.
    pub fn wait(self) -> SharedWait<T> {
        SharedWait { inner: self.inner, ticket: None }
    }
}

/// The future returned by [`SharedResult::wait`].
pub struct SharedWait<T> {
    inner: Arc<Inner<T>>,
    ticket: Option<u64>,
}

impl<T> Drop for SharedWait<T> {
    fn drop(&mut self) {
        if let Some(id) = self.ticket.take() {
            self.inner.waiters.cancel(id);
        }
    }
}

impl<T: Clone> Future for SharedWait<T> {
    type Output = CoroResult<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        loop {
            if let Some(id) = this.ticket {
                // We already lost the race to drive the underlying future and are parked;
                // `wake_all` on completion removes our ticket and re-polls us, at which point
                // `slot` is `Ready`.
                if this.inner.waiters.poll_registered(id, cx).is_pending() {
                    return Poll::Pending;
                }
                this.ticket = None;
                let guard = this.inner.slot.lock().unwrap();
                if let Slot::Ready(value) = &*guard {
                    return Poll::Ready(value.clone());
                }
                drop(guard);
                continue;
            }

            let mut guard = this.inner.slot.lock().unwrap();
            match &*guard {
                Slot::Ready(value) => return Poll::Ready(value.clone()),
                Slot::Driving => {
                    // Register while still holding the slot lock: if we dropped it first, the
                    // driver could finish, set `Ready` and call `wake_all` in the gap before we
                    // made it into the queue, silently losing our wakeup.
                    this.ticket = Some(this.inner.waiters.register(cx));
                    drop(guard);
                    return Poll::Pending;
                }
                Slot::Polling(_) => {
                    let Slot::Polling(mut fut) = std::mem::replace(&mut *guard, Slot::Driving) else {
                        unreachable!()
                    };
                    drop(guard);
                    match Pin::new(&mut fut).poll(cx) {
                        Poll::Ready(value) => {
                            *this.inner.slot.lock().unwrap() = Slot::Ready(value.clone());
                            this.inner.waiters.wake_all();
                            return Poll::Ready(value);
                        }
                        Poll::Pending => {
                            *this.inner.slot.lock().unwrap() = Slot::Polling(fut);
                            return Poll::Pending;
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result;
    use std::thread;
    use std::time::Duration;

    fn block_on<F: Future>(fut: F) -> F::Output {
        let mut fut = std::pin::pin!(fut);
        let waker = std::task::Waker::noop();
        let mut cx = Context::from_waker(waker);
        loop {
            if let Poll::Ready(v) = fut.as_mut().poll(&mut cx) {
                return v;
            }
            thread::sleep(Duration::from_millis(2));
        }
    }

    #[test]
    fn single_awaiter_observes_the_value() {
        let (p, f) = result::channel::<i32>();
        let shared = SharedResult::new(f);
        p.set_value(5);
        assert_eq!(block_on(shared.wait()), Ok(5));
    }

    #[test]
    fn all_clones_observe_the_same_value_after_fan_out() {
        let (p, f) = result::channel::<i32>();
        let shared = SharedResult::new(f);
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let shared = shared.clone();
                thread::spawn(move || block_on(shared.wait()))
            })
            .collect();
        thread::sleep(Duration::from_millis(10));
        p.set_value(99);
        for h in handles {
            assert_eq!(h.join().unwrap(), Ok(99));
        }
    }

    #[test]
    fn ready_result_is_observed_without_suspending() {
        let shared = SharedResult::new(CoroResultFuture::ready(Ok::<_, crate::error::CoroError>(1)));
        assert_eq!(block_on(shared.clone().wait()), Ok(1));
        assert!(shared.is_ready());
    }
}
