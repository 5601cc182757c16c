//! A general-purpose asynchronous coroutine runtime.
//!
//! This crate provides the executors, result/promise state machine, task representation and
//! timer queue that together let application code express suspendable work, schedule it on a
//! small set of executors, await its completion, compose results, and drive them with timers —
//! plus the coroutine-aware synchronization primitives (async mutex, async condition variable)
//! built directly on top of them.

pub mod engine;
pub mod error;
pub mod executor;
pub mod result;
pub mod sync;
pub mod task;
pub mod timer;

pub use error::{CoroError, CoroResult, WaitStatus};
pub use task::Task;
