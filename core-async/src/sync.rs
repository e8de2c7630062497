//! Synchronization primitives.
//!
//! Channels and async locks come from `tokio::sync`; cooperative cancellation
//! comes from `tokio_util`. The reader uses unbounded `mpsc` channels as
//! per-track event queues, `oneshot` for promise settlement and replies,
//! `watch` for the data-arrival generation, and [`CancellationToken`] to abort
//! demuxer initialization and pending seeks.

pub use tokio::sync::{
    broadcast, mpsc, oneshot, watch, Barrier, Mutex, MutexGuard, Notify, RwLock, RwLockReadGuard,
    RwLockWriteGuard, Semaphore, SemaphorePermit,
};

pub use tokio_util::sync::{CancellationToken, DropGuard};
