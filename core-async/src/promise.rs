//! # Promise & Request Bookkeeping
//!
//! Single-shot settlement primitives used by the reader's request protocol.
//!
//! ## Overview
//!
//! - [`Promise`] / [`Resolver`]: a one-shot future and the half that settles
//!   it. `Resolver::resolve`/`reject` consume the resolver, so a promise can be
//!   settled at most once. A resolver dropped without settling settles its
//!   promise with `E::from(Abandoned)`; a consumer is never left hanging.
//! - [`PromiseHolder`]: a slot for at most one outstanding resolver.
//! - [`RequestHolder`]: tracks one in-flight collaborator call (a spawned task)
//!   by request id. Disconnecting aborts the task and makes its eventual
//!   completion message stale.
//!
//! ```rust
//! use core_async::promise::{Abandoned, Promise, PromiseHolder};
//!
//! # core_async::runtime::block_on(async {
//! let mut holder = PromiseHolder::<u32, Abandoned>::new();
//! let (resolver, promise) = Promise::pending();
//! holder.hold(resolver).ok();
//! assert!(holder.resolve(3));
//! assert!(!holder.resolve(4));
//! assert_eq!(promise.await, Ok(3));
//! # }).unwrap();
//! ```

use crate::sync::oneshot;
use crate::task::{self, AbortHandle};
use futures::FutureExt;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use thiserror::Error;

/// The resolving side went away without settling the promise.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("promise abandoned before it was settled")]
pub struct Abandoned;

/// A request of this kind is already outstanding.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("a request is already in flight")]
pub struct RequestInFlight;

// ============================================================================
// Promise / Resolver
// ============================================================================

/// A single-shot asynchronous result.
///
/// Awaiting yields `Ok(T)` on resolution, `Err(E)` on rejection, and
/// `Err(E::from(Abandoned))` if the resolver was dropped unsettled.
#[must_use = "a promise does nothing unless awaited or inspected"]
pub struct Promise<T, E> {
    rx: oneshot::Receiver<Result<T, E>>,
}

/// The settling half of a [`Promise`].
pub struct Resolver<T, E> {
    tx: oneshot::Sender<Result<T, E>>,
}

impl<T, E> Promise<T, E> {
    /// Creates an unsettled promise together with its resolver.
    pub fn pending() -> (Resolver<T, E>, Promise<T, E>) {
        let (tx, rx) = oneshot::channel();
        (Resolver { tx }, Promise { rx })
    }

    /// Creates a promise that is already resolved.
    pub fn resolved(value: T) -> Self {
        let (resolver, promise) = Self::pending();
        resolver.resolve(value);
        promise
    }

    /// Creates a promise that is already rejected.
    pub fn rejected(error: E) -> Self {
        let (resolver, promise) = Self::pending();
        resolver.reject(error);
        promise
    }
}

impl<T, E: From<Abandoned>> Promise<T, E> {
    /// Returns the outcome if the promise has been settled, without waiting.
    ///
    /// Once this returns `Some`, later calls and awaits observe the promise as
    /// abandoned; the outcome is handed out exactly once.
    pub fn try_settled(&mut self) -> Option<Result<T, E>> {
        match self.rx.try_recv() {
            Ok(outcome) => Some(outcome),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(Err(E::from(Abandoned))),
        }
    }
}

impl<T, E: From<Abandoned>> Future for Promise<T, E> {
    type Output = Result<T, E>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.rx.poll_unpin(cx).map(|received| match received {
            Ok(outcome) => outcome,
            Err(_) => Err(E::from(Abandoned)),
        })
    }
}

impl<T, E> fmt::Debug for Promise<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Promise").finish_non_exhaustive()
    }
}

impl<T, E> Resolver<T, E> {
    /// Settles the promise with a value. Returns `false` if the promise was
    /// already dropped by its consumer.
    pub fn resolve(self, value: T) -> bool {
        self.tx.send(Ok(value)).is_ok()
    }

    /// Settles the promise with an error. Returns `false` if the promise was
    /// already dropped by its consumer.
    pub fn reject(self, error: E) -> bool {
        self.tx.send(Err(error)).is_ok()
    }

    /// Returns `true` if the consumer dropped the promise.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl<T, E> fmt::Debug for Resolver<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolver")
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}

// ============================================================================
// PromiseHolder
// ============================================================================

/// A slot holding at most one unsettled resolver.
pub struct PromiseHolder<T, E> {
    resolver: Option<Resolver<T, E>>,
}

impl<T, E> PromiseHolder<T, E> {
    pub fn new() -> Self {
        Self { resolver: None }
    }

    /// Stores `resolver`, handing it back if the slot is occupied.
    pub fn hold(&mut self, resolver: Resolver<T, E>) -> Result<(), Resolver<T, E>> {
        if self.resolver.is_some() {
            return Err(resolver);
        }
        self.resolver = Some(resolver);
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.resolver.is_none()
    }

    pub fn exists(&self) -> bool {
        self.resolver.is_some()
    }

    /// Resolves the held promise, if any. Returns whether one was settled.
    pub fn resolve(&mut self, value: T) -> bool {
        match self.resolver.take() {
            Some(resolver) => {
                resolver.resolve(value);
                true
            }
            None => false,
        }
    }

    /// Rejects the held promise, if any. Returns whether one was settled.
    pub fn reject(&mut self, error: E) -> bool {
        match self.resolver.take() {
            Some(resolver) => {
                resolver.reject(error);
                true
            }
            None => false,
        }
    }
}

impl<T, E> Default for PromiseHolder<T, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, E> fmt::Debug for PromiseHolder<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PromiseHolder")
            .field("pending", &self.exists())
            .finish()
    }
}

// ============================================================================
// RequestHolder
// ============================================================================

/// Identifies one request issued through a [`RequestHolder`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(u64);

impl RequestId {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Tracks at most one in-flight asynchronous request.
///
/// The request body is spawned as a task that receives its [`RequestId`] and
/// is expected to report completion carrying that id. The owner calls
/// [`complete`](Self::complete) with the reported id; a `false` return means the
/// request was disconnected (or superseded) and the completion must be ignored.
#[derive(Default)]
pub struct RequestHolder {
    last_id: u64,
    current: Option<(RequestId, AbortHandle)>,
}

impl RequestHolder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawns the request produced by `start`.
    ///
    /// # Errors
    ///
    /// Returns [`RequestInFlight`] without spawning anything if a request is
    /// already outstanding.
    pub fn begin<F, Fut>(&mut self, start: F) -> Result<RequestId, RequestInFlight>
    where
        F: FnOnce(RequestId) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if self.current.is_some() {
            return Err(RequestInFlight);
        }
        self.last_id += 1;
        let id = RequestId(self.last_id);
        let handle = task::spawn(start(id));
        self.current = Some((id, handle.abort_handle()));
        Ok(id)
    }

    /// Marks `id` as completed. Returns `false` for stale ids.
    pub fn complete(&mut self, id: RequestId) -> bool {
        match self.current {
            Some((current, _)) if current == id => {
                self.current = None;
                true
            }
            _ => false,
        }
    }

    /// Aborts the outstanding request, if any. Returns whether one existed.
    pub fn disconnect(&mut self) -> bool {
        match self.current.take() {
            Some((_, handle)) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    pub fn exists(&self) -> bool {
        self.current.is_some()
    }

    pub fn current(&self) -> Option<RequestId> {
        self.current.as_ref().map(|(id, _)| *id)
    }
}

impl Drop for RequestHolder {
    fn drop(&mut self) {
        self.disconnect();
    }
}

impl fmt::Debug for RequestHolder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestHolder")
            .field("current", &self.current())
            .finish()
    }
}
