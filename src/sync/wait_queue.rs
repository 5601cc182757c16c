//! A FIFO queue of parked wakers, for primitives with more than one waiter.
//!
//! [`WaitCell`](super::WaitCell) only ever holds a single registration, which is enough for the
//! base result's single consumer. [`SharedResult`](crate::result::SharedResult), the async lock
//! and the async condition variable all have to park an arbitrary number of waiters and wake some
//! or all of them later, so they build on this instead — same closed/woken vocabulary, a
//! `Mutex`-protected list rather than an intrusive one.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll, Waker};

struct Ticket {
    id: u64,
    waker: Option<Waker>,
}

pub struct WaitQueue {
    inner: Mutex<Inner>,
}

struct Inner {
    waiters: VecDeque<Ticket>,
    next_id: u64,
    closed: bool,
}

/// A registration for one waiter in a [`WaitQueue`]. Polling drives registration and removal;
/// dropping it before it is woken removes it from the queue (so a cancelled `.await` doesn't
/// leave a stale waker behind).
pub struct Wait<'a> {
    queue: &'a WaitQueue,
    id: Option<u64>,
}

impl WaitQueue {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                waiters: VecDeque::new(),
                next_id: 0,
                closed: false,
            }),
        }
    }

    /// Begin a new wait. The returned [`Wait`] must be polled to actually enqueue a waker.
    #[must_use]
    pub fn wait(&self) -> Wait<'_> {
        Wait { queue: self, id: None }
    }

    /// Wake the oldest parked waiter, if any. Returns `true` if one was woken.
    pub fn wake_one(&self) -> bool {
        let waker = {
            let mut inner = self.inner.lock();
            inner.waiters.pop_front().and_then(|t| t.waker)
        };
        let woke = waker.is_some();
        if let Some(w) = waker {
            w.wake();
        }
        woke
    }

    /// Wake every parked waiter.
    pub fn wake_all(&self) {
        let drained: Vec<_> = {
            let mut inner = self.inner.lock();
            inner.waiters.drain(..).filter_map(|t| t.waker).collect()
        };
        for w in drained {
            w.wake();
        }
    }

    /// Mark the queue closed and wake everyone currently parked; further `wait()` calls still
    /// enqueue (closing does not reject new waiters — callers check their own "closed" signal
    /// independently, the way `AsyncLock`/`AsyncCondition` check `Engine` shutdown).
    pub fn close(&self) {
        let drained: Vec<_> = {
            let mut inner = self.inner.lock();
            inner.closed = true;
            inner.waiters.drain(..).filter_map(|t| t.waker).collect()
        };
        for w in drained {
            w.wake();
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().waiters.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Register `cx`'s waker under a fresh ticket id, for callers that need to hold the id
    /// across poll calls without borrowing the queue (see [`crate::result::shared`], which can't
    /// use [`Self::wait`]'s borrowed [`Wait`] because it stores the registration alongside the
    /// `Arc` it was borrowed from).
    pub fn register(&self, cx: &mut Context<'_>) -> u64 {
        let mut inner = self.inner.lock();
        let id = inner.next_id;
        inner.next_id = inner.next_id.wrapping_add(1);
        inner.waiters.push_back(Ticket { id, waker: Some(cx.waker().clone()) });
        id
    }

    /// Refresh the waker for `id`, or report that it has already been woken (removed from the
    /// queue by `wake_one`/`wake_all`).
    pub fn poll_registered(&self, id: u64, cx: &mut Context<'_>) -> Poll<()> {
        let mut inner = self.inner.lock();
        if let Some(ticket) = inner.waiters.iter_mut().find(|t| t.id == id) {
            ticket.waker = Some(cx.waker().clone());
            Poll::Pending
        } else {
            Poll::Ready(())
        }
    }

    /// Remove a ticket that will never be polled again (e.g. its future was dropped).
    pub fn cancel(&self, id: u64) {
        self.inner.lock().waiters.retain(|t| t.id != id);
    }

    /// Continue waiting on a ticket already registered via [`Self::register`]. Pairs with eager
    /// registration performed before some other action (e.g. releasing a lock) that must not
    /// race a concurrent `notify`/`wake_all`.
    #[must_use]
    pub fn wait_registered(&self, id: u64) -> Wait<'_> {
        Wait { queue: self, id: Some(id) }
    }
}

impl Default for WaitQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl Wait<'_> {
    /// Poll this registration: enqueues (or updates) the current task's waker and returns
    /// `Pending` until explicitly woken via [`WaitQueue::wake_one`]/[`wake_all`](WaitQueue::wake_all).
    pub fn poll_wait(&mut self, cx: &mut Context<'_>) -> Poll<()> {
        let mut inner = self.queue.inner.lock();
        match self.id {
            None => {
                let id = inner.next_id;
                inner.next_id = inner.next_id.wrapping_add(1);
                inner.waiters.push_back(Ticket {
                    id,
                    waker: Some(cx.waker().clone()),
                });
                self.id = Some(id);
                Poll::Pending
            }
            Some(id) => {
                if let Some(ticket) = inner.waiters.iter_mut().find(|t| t.id == id) {
                    ticket.waker = Some(cx.waker().clone());
                    Poll::Pending
                } else {
                    // Removed from the front by wake_one/wake_all/close: we've been woken.
                    Poll::Ready(())
                }
            }
        }
    }
}

impl Future for Wait<'_> {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        self.poll_wait(cx)
    }
}

impl Drop for Wait<'_> {
    fn drop(&mut self) {
        if let Some(id) = self.id {
            let mut inner = self.queue.inner.lock();
            inner.waiters.retain(|t| t.id != id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wake_one_wakes_oldest_first() {
        let queue = WaitQueue::new();
        let w1 = Waker::noop();
        let w2 = Waker::noop();
        let mut a = queue.wait();
        let mut b = queue.wait();
        assert_eq!(a.poll_wait(&mut Context::from_waker(w1)), Poll::Pending);
        assert_eq!(b.poll_wait(&mut Context::from_waker(w2)), Poll::Pending);
        assert_eq!(queue.len(), 2);

        queue.wake_one();
        assert_eq!(queue.len(), 1);
        assert_eq!(a.poll_wait(&mut Context::from_waker(w1)), Poll::Ready(()));
    }

    #[test]
    fn wake_all_drains_queue() {
        let queue = WaitQueue::new();
        let w = Waker::noop();
        let mut a = queue.wait();
        let mut b = queue.wait();
        let _ = a.poll_wait(&mut Context::from_waker(w));
        let _ = b.poll_wait(&mut Context::from_waker(w));
        queue.wake_all();
        assert!(queue.is_empty());
    }

    #[test]
    fn dropping_a_pending_wait_removes_its_ticket() {
        let queue = WaitQueue::new();
        let w = Waker::noop();
        {
            let mut a = queue.wait();
            let _ = a.poll_wait(&mut Context::from_waker(w));
            assert_eq!(queue.len(), 1);
        }
        assert_eq!(queue.len(), 0);
    }
}
