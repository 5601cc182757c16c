//! An atomically registered single [`Waker`] slot.
//!
//! Adapted directly from the teacher's `WaitCell` (itself inspired by tokio's `AtomicWaker`):
//! a cell holds at most one consumer's waker, set by [`WaitCell::poll_wait`] and consumed by
//! [`WaitCell::wake`]. This is the building block the base [`crate::result::CoroResultFuture`]
//! registers itself in — a single producer, single consumer rendezvous.

use bitflags::bitflags;
use parking_lot::Mutex;
use std::fmt;
use std::task::{Context, Poll, Waker};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    struct State: u8 {
        const WAITING = 0b0000;
        const REGISTERING = 0b0001;
        const WAKING = 0b0010;
        const WOKEN = 0b0100;
        const CLOSED = 0b1000;
    }
}

/// Error returned when a [`WaitCell`] was closed while a waiter was registering, or is already
/// closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Closed(());

pub struct WaitCell {
    state: std::sync::atomic::AtomicU8,
    waker: Mutex<Option<Waker>>,
}

impl WaitCell {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: std::sync::atomic::AtomicU8::new(0),
            waker: Mutex::new(None),
        }
    }

    /// Register `cx`'s waker, returning `Ready(Ok(()))` if the cell was already woken,
    /// `Ready(Err(Closed))` if it is closed, or `Pending` once the waker is stored.
    pub fn poll_wait(&self, cx: &mut Context<'_>) -> Poll<Result<(), Closed>> {
        use std::sync::atomic::Ordering;

        match self.compare_exchange(State::WAITING, State::REGISTERING, Ordering::Acquire) {
            Err(actual) if actual.contains(State::CLOSED) => return Poll::Ready(Err(Closed(()))),
            Err(actual) if actual.contains(State::WOKEN) => {
                self.fetch_and(!State::WOKEN, Ordering::Release);
                return Poll::Ready(Ok(()));
            }
            Err(actual) if actual.contains(State::WAKING) => return Poll::Ready(Ok(())),
            Err(_) => {
                // Someone else is mid-registration; yield and retry.
                cx.waker().wake_by_ref();
                return Poll::Pending;
            }
            Ok(_) => {}
        }

        let waker = cx.waker();
        tracing::trace!(wait_cell = ?self, ?waker, "registering waker");
        let prev = {
            let mut slot = self.waker.lock();
            match &*slot {
                Some(old) if waker.will_wake(old) => None,
                _ => slot.replace(waker.clone()),
            }
        };
        if let Some(prev) = prev {
            tracing::trace!("replaced an old waker in cell, waking");
            prev.wake();
        }

        if let Err(actual) =
            self.compare_exchange(State::REGISTERING, State::WAITING, Ordering::AcqRel)
        {
            let waker = self.waker.lock().take();
            let state = self.fetch_and(State::CLOSED, Ordering::AcqRel);
            debug_assert!(state == actual || state == actual | State::CLOSED);

            if let Some(waker) = waker {
                waker.wake();
            }

            return if state.contains(State::CLOSED) {
                Poll::Ready(Err(Closed(())))
            } else {
                Poll::Ready(Ok(()))
            };
        }

        Poll::Pending
    }

    /// Wake the registered waker, if any. Returns `true` if a waiter was woken.
    pub fn wake(&self) -> bool {
        let woken = self.take_waker(false).map(|w| w.wake()).is_some();
        tracing::trace!(wait_cell = ?self, woken, "wake");
        woken
    }

    /// Close the cell, waking any registered waiter with [`Closed`].
    pub fn close(&self) -> bool {
        let woken = self.take_waker(true).map(|w| w.wake()).is_some();
        tracing::trace!(wait_cell = ?self, woken, "close");
        woken
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.current_state().contains(State::CLOSED)
    }

    fn take_waker(&self, close: bool) -> Option<Waker> {
        use std::sync::atomic::Ordering;

        let mut bits = State::WAKING | State::WOKEN;
        if close {
            bits |= State::CLOSED;
        }
        let state = self.fetch_or(bits, Ordering::AcqRel);

        if !state.intersects(State::WAKING | State::REGISTERING | State::CLOSED) {
            let waker = self.waker.lock().take();
            self.fetch_and(!State::WAKING, Ordering::Release);
            return waker;
        }
        None
    }

    fn compare_exchange(
        &self,
        curr: State,
        new: State,
        order: std::sync::atomic::Ordering,
    ) -> Result<State, State> {
        self.state
            .compare_exchange(curr.bits(), new.bits(), order, std::sync::atomic::Ordering::Acquire)
            .map(State::from_bits_retain)
            .map_err(State::from_bits_retain)
    }

    fn fetch_and(&self, state: State, order: std::sync::atomic::Ordering) -> State {
        State::from_bits_retain(self.state.fetch_and(state.bits(), order))
    }

    fn fetch_or(&self, state: State, order: std::sync::atomic::Ordering) -> State {
        State::from_bits_retain(self.state.fetch_or(state.bits(), order))
    }

    fn current_state(&self) -> State {
        State::from_bits_retain(self.state.load(std::sync::atomic::Ordering::Acquire))
    }
}

impl Default for WaitCell {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for WaitCell {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for WaitCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WaitCell")
            .field("state", &self.current_state())
            .finish_non_exhaustive()
    }
}

impl fmt::Display for Closed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad("closed")
    }
}

impl std::error::Error for Closed {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wake_before_poll_is_observed() {
        let cell = WaitCell::new();
        cell.wake();
        let waker = Waker::noop();
        let mut cx = Context::from_waker(waker);
        assert_eq!(cell.poll_wait(&mut cx), Poll::Ready(Ok(())));
    }

    #[test]
    fn poll_then_wake_completes() {
        let cell = WaitCell::new();
        let waker = Waker::noop();
        let mut cx = Context::from_waker(waker);
        assert_eq!(cell.poll_wait(&mut cx), Poll::Pending);
        assert!(cell.wake());
    }

    #[test]
    fn close_notifies_registered_waiter() {
        let cell = WaitCell::new();
        let waker = Waker::noop();
        let mut cx = Context::from_waker(waker);
        assert_eq!(cell.poll_wait(&mut cx), Poll::Pending);
        cell.close();
        assert_eq!(cell.poll_wait(&mut cx), Poll::Ready(Err(Closed(()))));
    }
}
