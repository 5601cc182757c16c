//! Coroutine-aware synchronization primitives: an async mutex and an async condition variable,
//! plus the waker-parking building blocks they (and [`crate::result`]) share.

pub mod condition;
pub mod lock;
pub mod wait_cell;
pub mod wait_queue;
pub(crate) mod wait_via;

pub use condition::AsyncCondition;
pub use lock::{AsyncLock, ScopedLock};
pub use wait_cell::WaitCell;
pub use wait_queue::WaitQueue;
