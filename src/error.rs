//! Typed errors surfaced by the runtime.
//!
//! Mirrors the error kinds in the original design: most failures are represented as a
//! [`CoroError`] variant, but a timed wait reports a [`WaitStatus`] instead of erroring, since
//! a timeout is an expected outcome rather than a failure.

use thiserror::Error;

/// Errors that can be surfaced by executors, results, timers and the async synchronization
/// primitives.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoroError {
    /// Operation attempted after `shutdown()` on the target executor.
    #[error("executor has been shut down")]
    ExecutorShutdown,

    /// A required executor handle was null/absent (resume-on, timer creation, condition await).
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// `lock()` called on a scoped lock already owned by this handle.
    #[error("deadlock would occur: lock is already held by this handle")]
    DeadlockWouldOccur,

    /// A scoped lock was operated on (`unlock`, etc.) while referencing no mutex.
    #[error("operation not permitted: scoped lock references no mutex")]
    OperationNotPermitted,

    /// An await resumed without its producer ever completing (executor died, timer queue shut
    /// down, or a rescheduling post failed).
    #[error("associated task was interrupted abnormally")]
    Interrupted,

    /// Observation of an empty (moved-from or default-constructed) result handle.
    #[error("observation of an empty result")]
    EmptyResult,

    /// The callable submitted to an executor returned an application error.
    #[error("{0}")]
    TaskFailed(String),

    /// The callable submitted to an executor panicked instead of returning.
    #[error("task panicked: {0}")]
    Panicked(String),
}

/// Render a caught [`std::panic::catch_unwind`] payload as a human-readable message, falling
/// back to a generic message for payloads that are neither `&str` nor `String` (the two types
/// `panic!`/`unwrap`/`expect` actually produce).
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "task panicked with a non-string payload".to_string()
    }
}

/// The crate-wide `Result` alias.
pub type CoroResult<T> = Result<T, CoroError>;

/// The outcome of a timed wait: unlike other failures, a timeout is reported as a status, not
/// as an error, per §7 of the design.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitStatus<T> {
    /// The wait completed with a value before the deadline.
    Ready(T),
    /// The deadline elapsed before the wait completed.
    Timeout,
}

impl<T> WaitStatus<T> {
    /// Returns `true` if this is [`WaitStatus::Ready`].
    #[must_use]
    pub fn is_ready(&self) -> bool {
        matches!(self, WaitStatus::Ready(_))
    }

    /// Returns `true` if this is [`WaitStatus::Timeout`].
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, WaitStatus::Timeout)
    }
}
