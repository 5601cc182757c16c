//! When-any / when-all composition over a set of results.
//!
//! §4.5 describes a race-to-publish scheme: every participant's consumer-context points at a
//! shared "who finished first" slot, and whichever completion wins a CAS into it resumes the
//! composing coroutine. Rust's poll-based futures give this for free without the CAS: a
//! combinator future holds every participant and, on every wake, re-polls each one in order —
//! since all participants share the waker passed in by the executor, any of them completing
//! (on any thread) causes a re-poll, and "first to be observed Ready when we scan" is exactly
//! "first to win the race". See `DESIGN.md` for why this replaces the shared-pointer CAS.

use super::CoroResultFuture;
use crate::error::CoroResult;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

/// The outcome of [`when_any`]: the index of the participant that finished first, and its value.
pub struct WhenAnyOutcome<T> {
    pub index: usize,
    pub value: CoroResult<T>,
}

/// Suspend until the first of `futures` completes. The outcome is paired with every other
/// participant, still awaitable, in their original order — the winner's slot comes back as
/// [`CoroResultFuture::empty`] so the returned vector stays index-aligned with the input one.
pub fn when_any<T>(futures: Vec<CoroResultFuture<T>>) -> WhenAny<T> {
    WhenAny { futures: futures.into_iter().map(Some).collect() }
}

pub struct WhenAny<T> {
    futures: Vec<Option<CoroResultFuture<T>>>,
}

impl<T> Future for WhenAny<T> {
    type Output = (WhenAnyOutcome<T>, Vec<CoroResultFuture<T>>);

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        for (index, slot) in this.futures.iter_mut().enumerate() {
            if let Some(fut) = slot {
                let pinned = Pin::new(fut);
                if let Poll::Ready(value) = pinned.poll(cx) {
                    *slot = None;
                    let survivors = this
                        .futures
                        .iter_mut()
                        .map(|s| s.take().unwrap_or_else(CoroResultFuture::empty))
                        .collect();
                    return Poll::Ready((WhenAnyOutcome { index, value }, survivors));
                }
            }
        }
        Poll::Pending
    }
}

/// Suspend until every one of `futures` has completed, collecting results in input order.
/// "Any order works because each is independent" (§4.5) — this polls every not-yet-finished
/// participant on each wake, same as [`WhenAny`], rather than awaiting them one at a time.
pub async fn when_all<T>(futures: Vec<CoroResultFuture<T>>) -> Vec<CoroResult<T>> {
    WhenAll {
        futures: futures.into_iter().map(Some).collect(),
        done: Vec::new(),
    }
    .await
}

struct WhenAll<T> {
    futures: Vec<Option<CoroResultFuture<T>>>,
    done: Vec<Option<CoroResult<T>>>,
}

// Nothing in `WhenAll` needs structural pinning (every field is moved freely between polls), so
// it is `Unpin` regardless of whether `T` is — the auto-derived bound would otherwise require it.
impl<T> Unpin for WhenAll<T> {}

impl<T> Future for WhenAll<T> {
    type Output = Vec<CoroResult<T>>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        if this.done.is_empty() {
            this.done = this.futures.iter().map(|_| None).collect();
        }
        let mut all_done = true;
        for (slot, done) in this.futures.iter_mut().zip(this.done.iter_mut()) {
            if let Some(fut) = slot {
                let pinned = Pin::new(fut);
                match pinned.poll(cx) {
                    Poll::Ready(value) => {
                        *done = Some(value);
                        *slot = None;
                    }
                    Poll::Pending => all_done = false,
                }
            }
        }
        if all_done {
            Poll::Ready(std::mem::take(&mut this.done).into_iter().map(Option::unwrap).collect())
        } else {
            Poll::Pending
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
    fn first_completion_wins() {
        let (_p1, f1) = result::channel::<i32>();
        let (p2, f2) = result::channel::<i32>();
        let (_p3, f3) = result::channel::<i32>();

        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            p2.set_value(2);
        });

        let (outcome, survivors) = block_on(when_any(vec![f1, f2, f3]));
        assert_eq!(outcome.index, 1);
        assert_eq!(outcome.value, Ok(2));
        assert_eq!(survivors.len(), 3);
        assert!(!survivors[0].is_empty());
        assert!(survivors[1].is_empty(), "winner's slot is the one replaced with empty()");
        assert!(!survivors[2].is_empty());
        handle.join().unwrap();
    }

    #[test]
    fn when_all_collects_every_result_in_order() {
        let (p1, f1) = result::channel::<i32>();
        let (p2, f2) = result::channel::<i32>();
        let (p3, f3) = result::channel::<i32>();

        let h1 = thread::spawn(move || {
            thread::sleep(Duration::from_millis(5));
            p1.set_value(1);
        });
        let h2 = thread::spawn(move || p2.set_value(2));
        let h3 = thread::spawn(move || {
            thread::sleep(Duration::from_millis(15));
            p3.set_value(3);
        });

        let results = block_on(when_all(vec![f1, f2, f3]));
        assert_eq!(results, vec![Ok(1), Ok(2), Ok(3)]);
        h1.join().unwrap();
        h2.join().unwrap();
        h3.join().unwrap();
    }
}
