//! # Core Runtime Module
//!
//! Foundational runtime infrastructure shared by the media format reader:
//! - Logging and tracing infrastructure
//! - Host log forwarding through [`sink::LoggerSink`]
//! - Event bus carrying reader lifecycle events
//!
//! ## Overview
//!
//! The reader itself only emits `tracing` events and [`events::CoreEvent`]s.
//! Hosts decide where those go: [`logging::init_logging`] installs the
//! subscriber, and an [`events::EventBus`] handed to the reader fans events
//! out to any number of observers.

pub mod error;
pub mod events;
pub mod logging;
pub mod sink;

pub use error::{Error, Result};
