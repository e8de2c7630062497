//! Async abstraction layer for the media format reader.
//!
//! All workspace crates go through this crate instead of reaching for tokio
//! directly. It re-exports the executor surface the reader needs and adds the
//! two primitives the decode pipeline is built on:
//!
//! - [`promise`]: single-shot [`Promise`]/[`Resolver`] pairs, a
//!   [`PromiseHolder`](promise::PromiseHolder) for "at most one outstanding
//!   request" slots, and a [`RequestHolder`](promise::RequestHolder) that tracks
//!   one in-flight collaborator call and can disconnect it.
//!
//! # Modules
//!
//! - `task`: Task spawning and execution
//! - `time`: Time-related operations (sleep, duration, instant)
//! - `sync`: Synchronization primitives (channels, cancellation)
//! - `runtime`: Runtime entry points used by the attribute macros
//! - `promise`: Promise and request bookkeeping
//!
//! # Examples
//!
//! ```rust
//! use core_async::promise::Promise;
//!
//! async fn example() {
//!     let (resolver, promise) = Promise::<u32, core_async::promise::Abandoned>::pending();
//!     core_async::task::spawn(async move { resolver.resolve(7) });
//!     assert_eq!(promise.await, Ok(7));
//! }
//! ```

// Re-export the async entry-point/test macros so downstream crates never need
// direct Tokio dependencies.
pub use core_async_macros::{main, test};

// Lets the attribute macros' `core_async::` paths resolve inside this crate.
extern crate self as core_async;

pub mod promise;
pub mod runtime;
pub mod sync;
pub mod task;
pub mod time;

pub use promise::{Promise, Resolver};
pub use tokio::{join, select};
pub use task::spawn;
pub use time::{sleep, Duration, Instant};
