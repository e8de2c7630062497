//! # Media Format Reader
//!
//! Coordinates a container demuxer, per-track decoders and a playback
//! consumer through a promise-based request protocol.
//!
//! ## Overview
//!
//! - [`MediaFormatReader`] is the consumer-facing entry point: metadata,
//!   data requests, seeking, buffered ranges and teardown.
//! - Every active track (audio, video) runs an actor that owns the track's
//!   demuxer cursor and decoder. All per-track state changes happen inside
//!   that actor, in message order.
//! - Collaborators are injected through the traits in [`traits`]; the reader
//!   never parses containers or codecs itself.
//!
//! ## Usage
//!
//! ```ignore
//! use core_reader::{MediaFormatReader, ReaderConfig, TimeUnit};
//! use core_runtime::events::EventBus;
//!
//! let reader = MediaFormatReader::new(demuxer, platform, ReaderConfig::default(), EventBus::default())?;
//! let info = reader.read_metadata().await?;
//!
//! if info.has_audio() {
//!     let frame = reader.request_audio_data()?.await?;
//!     tracing::info!(time = %frame.time, "decoded audio");
//! }
//!
//! let landed = reader.seek(TimeUnit::from_seconds(30.0))?.await?;
//! reader.shutdown().await;
//! ```

pub mod config;
pub mod error;
pub mod interval;
pub mod media;
pub mod reader;
pub mod stats;
pub mod traits;

mod buffered;
mod seek;
mod track;

pub use config::ReaderConfig;
pub use error::{DemuxerFailureReason, NotDecodedReason, ReaderError, Result, SkipFailure};
pub use interval::{Interval, TimeIntervals, TimeUnit};
pub use media::{
    AudioParams, EncryptionInfo, EncryptionInitData, MediaData, MediaInfo, MediaKind,
    MediaRawData, TrackInfo, TrackParams, TrackType, VideoParams,
};
pub use reader::MediaFormatReader;
pub use stats::{FrameStatistics, FrameStatisticsSnapshot};
pub use track::{DrainState, TrackStatus, WaitReason};
pub use traits::{
    MediaDataDecoder, MediaDataDecoderCallback, MediaDataDemuxer, MediaTrackDemuxer,
    PlatformDecoderModule, SharedDecoderManager,
};
