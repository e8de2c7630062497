//! # Event Bus System
//!
//! Broadcast channel carrying reader lifecycle events to any number of
//! observers (UI, diagnostics, tests) without coupling them to the reader.
//!
//! ## Overview
//!
//! - **Event Types**: [`CoreEvent`] wraps the domain enum [`ReaderEvent`]
//! - **EventBus**: cloneable handle over `tokio::sync::broadcast`
//! - **EventStream**: receiver wrapper with optional filtering
//!
//! ```text
//! ┌──────────────┐  emit   ┌───────────┐  subscribe  ┌────────────┐
//! │ track actors ├────────>│           ├────────────>│ Subscriber │
//! └──────────────┘         │ EventBus  │             └────────────┘
//! ┌──────────────┐  emit   │           │  subscribe  ┌────────────┐
//! │ seek / init  ├────────>│           ├────────────>│ Subscriber │
//! └──────────────┘         └───────────┘             └────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use core_runtime::events::{CoreEvent, EventBus, ReaderEvent};
//!
//! let bus = EventBus::new(16);
//! let mut rx = bus.subscribe();
//!
//! bus.emit(CoreEvent::Reader(ReaderEvent::Reset)).ok();
//! assert_eq!(rx.try_recv().unwrap(), CoreEvent::Reader(ReaderEvent::Reset));
//! ```
//!
//! ## Error Handling
//!
//! - **`RecvError::Lagged(n)`**: the subscriber missed `n` events and may keep
//!   receiving.
//! - **`RecvError::Closed`**: every sender was dropped; treat it as shutdown.
//!
//! Emitting with no subscribers returns `Err`; the reader ignores it.

use serde::{Deserialize, Serialize};
use std::fmt;
use core_async::sync::broadcast;

pub use core_async::sync::broadcast::error::{RecvError, SendError};
pub use core_async::sync::broadcast::Receiver;

/// Default buffer size for the event bus channel.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 100;

// ============================================================================
// Core Event Types
// ============================================================================

/// Top-level event published through the bus.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "payload")]
pub enum CoreEvent {
    /// Media format reader events
    Reader(ReaderEvent),
}

impl CoreEvent {
    /// Returns a human-readable description of the event.
    pub fn description(&self) -> &str {
        match self {
            CoreEvent::Reader(e) => e.description(),
        }
    }

    /// Returns the severity level of the event.
    pub fn severity(&self) -> EventSeverity {
        match self {
            CoreEvent::Reader(ReaderEvent::DecodeError { .. })
            | CoreEvent::Reader(ReaderEvent::SeekFailed { .. }) => EventSeverity::Error,
            CoreEvent::Reader(ReaderEvent::WaitingForData { .. })
            | CoreEvent::Reader(ReaderEvent::DecoderRecreated { .. }) => EventSeverity::Warning,
            CoreEvent::Reader(ReaderEvent::MetadataLoaded { .. })
            | CoreEvent::Reader(ReaderEvent::SeekCompleted { .. })
            | CoreEvent::Reader(ReaderEvent::ShutdownComplete) => EventSeverity::Info,
            _ => EventSeverity::Debug,
        }
    }
}

/// Event severity levels for filtering and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventSeverity {
    Debug,
    Info,
    Warning,
    Error,
}

// ============================================================================
// Reader Events
// ============================================================================

/// Lifecycle events of a media format reader.
///
/// Track names are `"audio"` or `"video"`; times are microseconds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum ReaderEvent {
    /// Container parsed and decoders set up
    MetadataLoaded {
        has_audio: bool,
        has_video: bool,
        duration_us: Option<i64>,
    },
    /// A track stalled until more bytes arrive
    WaitingForData { track: String },
    SeekStarted { target_us: i64 },
    SeekCompleted { time_us: i64 },
    SeekFailed { message: String },
    /// A track hit a fatal demux or decode failure
    DecodeError { track: String, message: String },
    EndOfStream { track: String },
    /// The decoder was rebuilt for a new stream configuration
    DecoderRecreated { track: String, stream_id: u32 },
    /// Decoding was reset, typically ahead of a seek
    Reset,
    ShutdownComplete,
}

impl ReaderEvent {
    fn description(&self) -> &str {
        match self {
            ReaderEvent::MetadataLoaded { .. } => "Media metadata loaded",
            ReaderEvent::WaitingForData { .. } => "Track waiting for data",
            ReaderEvent::SeekStarted { .. } => "Seek started",
            ReaderEvent::SeekCompleted { .. } => "Seek completed",
            ReaderEvent::SeekFailed { .. } => "Seek failed",
            ReaderEvent::DecodeError { .. } => "Decode error",
            ReaderEvent::EndOfStream { .. } => "End of stream reached",
            ReaderEvent::DecoderRecreated { .. } => "Decoder recreated",
            ReaderEvent::Reset => "Decoding reset",
            ReaderEvent::ShutdownComplete => "Reader shut down",
        }
    }
}

// ============================================================================
// Event Bus
// ============================================================================

/// Cloneable broadcast handle; every subscriber sees every event emitted
/// after it subscribed.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    /// Creates a new event bus buffering up to `capacity` events per
    /// subscriber before it lags.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Creates a new event bus with the default buffer size.
    #[allow(clippy::should_implement_trait)]
    pub fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }

    /// Publishes an event, returning how many subscribers received it.
    ///
    /// Fails only when nobody is subscribed.
    pub fn emit(&self, event: CoreEvent) -> Result<usize, SendError<CoreEvent>> {
        self.sender.send(event)
    }

    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ============================================================================
// Event Stream Wrapper
// ============================================================================

type EventFilter = Box<dyn Fn(&CoreEvent) -> bool + Send + Sync>;

/// A `broadcast::Receiver` with an optional predicate.
///
/// ```rust
/// use core_runtime::events::{EventBus, EventSeverity, EventStream};
///
/// let bus = EventBus::new(16);
/// let errors = EventStream::new(bus.subscribe())
///     .filter(|event| event.severity() >= EventSeverity::Error);
/// ```
pub struct EventStream {
    receiver: Receiver<CoreEvent>,
    filter: Option<EventFilter>,
}

impl EventStream {
    pub fn new(receiver: Receiver<CoreEvent>) -> Self {
        Self {
            receiver,
            filter: None,
        }
    }

    /// Only events matching `predicate` are returned from `recv`/`try_recv`.
    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&CoreEvent) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Box::new(predicate));
        self
    }

    fn matches(&self, event: &CoreEvent) -> bool {
        self.filter.as_ref().map_or(true, |filter| filter(event))
    }

    /// Receives the next event that passes the filter.
    ///
    /// # Errors
    ///
    /// `RecvError::Lagged(n)` if the subscriber fell behind by `n` events,
    /// `RecvError::Closed` once all senders are gone.
    pub async fn recv(&mut self) -> Result<CoreEvent, RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if self.matches(&event) {
                return Ok(event);
            }
        }
    }

    /// Returns `None` when no matching event is currently queued.
    pub fn try_recv(&mut self) -> Option<Result<CoreEvent, RecvError>> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    if self.matches(&event) {
                        return Some(Ok(event));
                    }
                }
                Err(broadcast::error::TryRecvError::Empty) => return None,
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    return Some(Err(RecvError::Lagged(n)))
                }
                Err(broadcast::error::TryRecvError::Closed) => return Some(Err(RecvError::Closed)),
            }
        }
    }
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("has_filter", &self.filter.is_some())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
