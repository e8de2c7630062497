//! Task spawning and execution abstractions.
//!
//! Thin wrappers over `tokio::task`. Spawned tasks must be `Send + 'static`
//! because the reader's track actors and collaborator calls may migrate across
//! worker threads.
//!
//! # Examples
//!
//! ```rust
//! use core_async::task;
//!
//! async fn example() {
//!     let handle = task::spawn(async { 42 });
//!     let result = handle.await.unwrap();
//!     assert_eq!(result, 42);
//! }
//! ```

pub use tokio::task::{spawn_blocking, yield_now, AbortHandle, JoinError, JoinHandle};

/// Spawns a new asynchronous task on the current Tokio runtime.
///
/// The spawned task may run on a different thread. The returned handle can be
/// awaited for the task's output, or turned into an [`AbortHandle`] to cancel
/// it without waiting.
///
/// # Panics
///
/// Panics if called outside of a Tokio runtime.
pub fn spawn<F>(future: F) -> JoinHandle<F::Output>
where
    F: std::future::Future + Send + 'static,
    F::Output: Send + 'static,
{
    tokio::task::spawn(future)
}

/// Result type for task operations.
pub type Result<T> = std::result::Result<T, JoinError>;
