//! A type-erased, move-only, one-shot callable with a 64-byte budget.
//!
//! Mirrors the small-buffer-optimized `Task` type from the original design: a callable that
//! fits inline is stored byte-for-byte in the task; anything larger is boxed and only the
//! pointer lives inline. Running a task consumes it; dropping an un-run task still runs its
//! "cancel" path so an [`AwaitVia`] functor can signal interruption.

use std::marker::PhantomData;
use std::mem::{MaybeUninit, align_of, size_of};
use std::ptr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::Waker;

/// Total size budget of a [`Task`], matching the original 64-byte design.
const TASK_SIZE: usize = 64;
const PAYLOAD_SIZE: usize = TASK_SIZE - size_of::<usize>();
const PAYLOAD_ALIGN: usize = align_of::<usize>();

static_assertions::const_assert_eq!(size_of::<Task>(), TASK_SIZE);

/// The body of a [`Task`]. `run` executes the callable; `cancel` is invoked instead if the
/// task is dropped without ever being run (the default does nothing, which is correct for
/// plain closures — only [`AwaitVia`] overrides it to signal interruption).
trait TaskBody: Sized + Send + 'static {
    fn run(self);

    fn cancel(self) {}
}

struct Closure<F>(F);

impl<F: FnOnce() + Send + 'static> TaskBody for Closure<F> {
    fn run(self) {
        (self.0)();
    }
}

/// A [`Task`] that resumes a suspended coroutine (via its [`Waker`]) and, if it is dropped
/// without ever running, marks the coroutine as interrupted before waking it anyway so the
/// pending `poll` observes the interruption (see `interrupted` in `error.rs`).
pub(crate) struct AwaitVia {
    waker: Waker,
    interrupted: Arc<AtomicBool>,
}

impl AwaitVia {
    pub(crate) fn new(waker: Waker, interrupted: Arc<AtomicBool>) -> Self {
        Self { waker, interrupted }
    }
}

impl TaskBody for AwaitVia {
    fn run(self) {
        self.waker.wake();
    }

    fn cancel(self) {
        self.interrupted.store(true, Ordering::Release);
        self.waker.wake();
    }
}

struct TaskVTable {
    execute_destroy: unsafe fn(*mut u8),
    destroy: unsafe fn(*mut u8),
}

struct VTableOf<T>(PhantomData<T>);

impl<T: TaskBody> VTableOf<T> {
    const INLINE: TaskVTable = TaskVTable {
        execute_destroy: Self::execute_inline,
        destroy: Self::destroy_inline,
    };
    const HEAP: TaskVTable = TaskVTable {
        execute_destroy: Self::execute_heap,
        destroy: Self::destroy_heap,
    };

    /// # Safety
    /// `ptr` must point at a live, properly aligned `T` that has not yet been read out.
    unsafe fn execute_inline(ptr: *mut u8) {
        let body = unsafe { ptr::read(ptr.cast::<T>()) };
        body.run();
    }

    /// # Safety
    /// See [`Self::execute_inline`].
    unsafe fn destroy_inline(ptr: *mut u8) {
        let body = unsafe { ptr::read(ptr.cast::<T>()) };
        body.cancel();
    }

    /// # Safety
    /// `ptr` must point at a live `*mut T` obtained from [`Box::into_raw`].
    unsafe fn execute_heap(ptr: *mut u8) {
        let raw = unsafe { ptr::read(ptr.cast::<*mut T>()) };
        let body = unsafe { Box::from_raw(raw) };
        body.run();
    }

    /// # Safety
    /// See [`Self::execute_heap`].
    unsafe fn destroy_heap(ptr: *mut u8) {
        let raw = unsafe { ptr::read(ptr.cast::<*mut T>()) };
        let body = unsafe { Box::from_raw(raw) };
        body.cancel();
    }
}

/// A type-erased, move-only, one-shot callable with a fixed 64-byte footprint.
///
/// Callables that are small enough (and whose alignment doesn't exceed that of a pointer) are
/// stored inline; everything else is heap-allocated and only the pointer lives in the task.
/// Running a [`Task`] consumes it and invokes the callable exactly once; an un-run task still
/// gets its "cancel" path invoked on drop so cleanup (and, for [`AwaitVia`], interruption
/// signalling) always happens.
#[repr(C)]
pub struct Task {
    vtable: Option<&'static TaskVTable>,
    payload: MaybeUninit<[u8; PAYLOAD_SIZE]>,
}

// Safety: `Task` only ever stores `T: Send` values (enforced by `TaskBody: Send`), whether
// inline or behind a heap pointer.
unsafe impl Send for Task {}

impl Task {
    /// Construct an empty task. Running or dropping it is a no-op.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            vtable: None,
            payload: MaybeUninit::uninit(),
        }
    }

    /// Construct a task from a plain closure.
    pub fn new<F>(f: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self::from_body(Closure(f))
    }

    pub(crate) fn from_await_via(waker: Waker, interrupted: Arc<AtomicBool>) -> Self {
        Self::from_body(AwaitVia::new(waker, interrupted))
    }

    fn from_body<T: TaskBody>(body: T) -> Self {
        if size_of::<T>() <= PAYLOAD_SIZE && align_of::<T>() <= PAYLOAD_ALIGN {
            let mut payload = MaybeUninit::<[u8; PAYLOAD_SIZE]>::uninit();
            // Safety: size/align checked above; the payload buffer is never read until the
            // vtable we install here reads it back out as `T`.
            unsafe {
                payload.as_mut_ptr().cast::<T>().write(body);
            }
            Self {
                vtable: Some(&VTableOf::<T>::INLINE),
                payload,
            }
        } else {
            let raw = Box::into_raw(Box::new(body));
            let mut payload = MaybeUninit::<[u8; PAYLOAD_SIZE]>::uninit();
            // Safety: a `*mut T` always fits in `PAYLOAD_SIZE` bytes (it is pointer-sized and
            // `PAYLOAD_SIZE >= size_of::<usize>()`).
            unsafe {
                payload.as_mut_ptr().cast::<*mut T>().write(raw);
            }
            Self {
                vtable: Some(&VTableOf::<T>::HEAP),
                payload,
            }
        }
    }

    /// Returns `true` if this task holds no callable.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.vtable.is_none()
    }

    /// Run the task, consuming it. Invokes the stored callable exactly once. A no-op if the
    /// task is empty. A panicking callable is caught and logged rather than unwinding through
    /// the executor's worker loop — otherwise a single misbehaving task would tear down the OS
    /// thread running it.
    pub fn run(mut self) {
        if let Some(vt) = self.vtable.take() {
            let ptr = self.payload.as_mut_ptr().cast::<u8>();
            // Safety: `vt` was installed together with a payload matching its expectations,
            // and we only ever call this once per task (the vtable slot is cleared above).
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| unsafe {
                (vt.execute_destroy)(ptr);
            }));
            if let Err(payload) = result {
                tracing::warn!(
                    message = %crate::error::panic_message(&*payload),
                    "task panicked during execution"
                );
            }
        }
    }
}

impl Drop for Task {
    fn drop(&mut self) {
        if let Some(vt) = self.vtable.take() {
            let ptr = self.payload.as_mut_ptr().cast::<u8>();
            // Safety: see `run` — the task was never run (vtable was still `Some`), so the
            // payload is still live.
            unsafe {
                (vt.destroy)(ptr);
            }
        }
    }
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task").field("empty", &self.is_empty()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn run_invokes_exactly_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        let task = Task::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        task.run();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn drop_without_run_invokes_zero_times() {
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        let task = Task::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        drop(task);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn empty_task_run_is_noop() {
        Task::empty().run();
    }

    #[test]
    fn large_capture_is_heap_allocated_but_still_runs_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        // Oversized capture forces the heap path.
        let big = [0u8; 128];
        let task = Task::new(move || {
            let _ = big.len();
            c.fetch_add(1, Ordering::SeqCst);
        });
        task.run();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn await_via_wakes_on_run() {
        use std::sync::atomic::AtomicUsize;
        struct NoopWake(AtomicUsize);
        impl std::task::Wake for NoopWake {
            fn wake(self: Arc<Self>) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }
        let inner = Arc::new(NoopWake(AtomicUsize::new(0)));
        let waker = Waker::from(inner.clone());
        let interrupted = Arc::new(AtomicBool::new(false));
        let task = Task::from_await_via(waker, interrupted.clone());
        task.run();
        assert_eq!(inner.0.load(Ordering::SeqCst), 1);
        assert!(!interrupted.load(Ordering::Acquire));
    }

    #[test]
    fn await_via_signals_interrupted_on_drop() {
        use std::sync::atomic::AtomicUsize;
        struct NoopWake(AtomicUsize);
        impl std::task::Wake for NoopWake {
            fn wake(self: Arc<Self>) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }
        let inner = Arc::new(NoopWake(AtomicUsize::new(0)));
        let waker = Waker::from(inner.clone());
        let interrupted = Arc::new(AtomicBool::new(false));
        let task = Task::from_await_via(waker, interrupted.clone());
        drop(task);
        assert_eq!(inner.0.load(Ordering::SeqCst), 1);
        assert!(interrupted.load(Ordering::Acquire));
    }

    #[test]
    fn panicking_callable_is_caught_instead_of_unwinding() {
        let task = Task::new(|| panic!("boom"));
        task.run();
    }

    #[test]
    fn task_is_64_bytes() {
        assert_eq!(size_of::<Task>(), TASK_SIZE);
    }

    #[test]
    fn task_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<Task>();
    }
}
