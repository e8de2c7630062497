//! # Collaborator Traits
//!
//! The reader never parses containers or codecs. Everything it coordinates is
//! injected through the traits in this module:
//!
//! - [`MediaDataDemuxer`]: the container. Initializes asynchronously and hands
//!   out one [`MediaTrackDemuxer`] cursor per elementary stream.
//! - [`MediaTrackDemuxer`]: a cursor over one stream's compressed samples.
//! - [`PlatformDecoderModule`]: creates a [`MediaDataDecoder`] for a track.
//! - [`SharedDecoderManager`]: an optional alternative factory for video
//!   decoders that are shared between readers.
//!
//! ## Threading Model
//!
//! Demuxer calls are `async` and may complete on any worker. Decoders are
//! driven synchronously from a single track actor and report results through
//! a [`MediaDataDecoderCallback`], which may be invoked from any thread.

use crate::error::{DemuxerFailureReason, Result, SkipFailure};
use crate::interval::{TimeIntervals, TimeUnit};
use crate::media::{EncryptionInfo, MediaData, MediaRawData, TrackInfo, TrackType};
use async_trait::async_trait;
use std::sync::Arc;

// ============================================================================
// Demuxers
// ============================================================================

/// Container-level demuxer.
#[async_trait]
pub trait MediaDataDemuxer: Send + Sync {
    /// Parses enough of the container to enumerate its tracks.
    ///
    /// Fails with [`DemuxerFailureReason::WaitingForData`] when more bytes are
    /// needed first.
    async fn init(&self) -> std::result::Result<(), DemuxerFailureReason>;

    fn track_count(&self, track: TrackType) -> u32;

    /// Returns the cursor for the `index`-th track of the given type.
    fn track_demuxer(&self, track: TrackType, index: u32) -> Option<Arc<dyn MediaTrackDemuxer>>;

    fn is_seekable(&self) -> bool;

    /// Whether this object may be used from the consumer's context as well as
    /// from the track actors. When `false` the reader works on a clone.
    fn is_thread_safe(&self) -> bool {
        false
    }

    /// Returns an independent demuxer over the same resource.
    fn clone_demuxer(&self) -> Option<Arc<dyn MediaDataDemuxer>>;

    fn crypto(&self) -> EncryptionInfo {
        EncryptionInfo::default()
    }

    /// When `false` the stream start time is forced to zero.
    fn should_compute_start_time(&self) -> bool {
        true
    }

    fn notify_data_arrived(&self, _length: u32, _offset: i64) {}

    fn notify_data_removed(&self) {}
}

/// Cursor over one elementary stream.
#[async_trait]
pub trait MediaTrackDemuxer: Send + Sync {
    fn info(&self) -> Arc<TrackInfo>;

    /// Returns up to `count` samples, or the reason none are available.
    async fn get_samples(
        &self,
        count: u32,
    ) -> std::result::Result<Vec<MediaRawData>, DemuxerFailureReason>;

    /// Repositions the cursor at or before `time`; returns the time reached.
    async fn seek(&self, time: TimeUnit) -> std::result::Result<TimeUnit, DemuxerFailureReason>;

    /// Skips forward to the first keyframe at or after `threshold`.
    ///
    /// Returns the number of samples skipped.
    async fn skip_to_next_random_access_point(
        &self,
        threshold: TimeUnit,
    ) -> std::result::Result<u32, SkipFailure>;

    /// Time of the next keyframe, if known.
    fn next_random_access_point(&self) -> Option<TimeUnit>;

    fn buffered(&self) -> TimeIntervals;

    /// Drops any internal sample state, keeping the cursor position.
    fn reset(&self);

    /// Byte offset before which data is no longer needed to play `time`.
    fn eviction_offset(&self, _time: TimeUnit) -> i64 {
        i64::MAX
    }

    /// Releases references that could keep the demuxer graph alive.
    fn break_cycles(&self) {}
}

// ============================================================================
// Decoders
// ============================================================================

/// Receives decoder results. Implemented by the reader.
pub trait MediaDataDecoderCallback: Send + Sync {
    fn output(&self, data: MediaData);

    /// The decoder wants more input.
    fn input_exhausted(&self);

    fn error(&self, message: String);

    /// All frames for previously fed input have been output.
    fn drain_complete(&self);
}

/// A decoder instance driven by one track actor.
///
/// Every call returns promptly; results arrive via the callback.
pub trait MediaDataDecoder: Send {
    fn init(&mut self) -> Result<()>;

    fn input(&mut self, sample: MediaRawData) -> Result<()>;

    /// Discards all pending input and output.
    fn flush(&mut self) -> Result<()>;

    /// Emits every pending frame, then calls `drain_complete`.
    fn drain(&mut self) -> Result<()>;

    fn shutdown(&mut self);

    fn is_hardware_accelerated(&self) -> bool {
        false
    }
}

/// Decoder factory for the current platform.
pub trait PlatformDecoderModule: Send + Sync {
    fn supports_mime_type(&self, mime_type: &str) -> bool;

    /// Whether video decoders for `info` may be created through a
    /// [`SharedDecoderManager`].
    fn supports_shared_decoders(&self, _info: &TrackInfo) -> bool {
        false
    }

    fn create_decoder(
        &self,
        info: &TrackInfo,
        callback: Arc<dyn MediaDataDecoderCallback>,
    ) -> Result<Box<dyn MediaDataDecoder>>;
}

/// Hands out video decoders that may be shared between readers.
pub trait SharedDecoderManager: Send + Sync {
    fn create_video_decoder(
        &self,
        platform: Arc<dyn PlatformDecoderModule>,
        info: &TrackInfo,
        callback: Arc<dyn MediaDataDecoderCallback>,
    ) -> Result<Box<dyn MediaDataDecoder>>;

    /// Decoders created from now on must not use hardware acceleration.
    fn disable_hardware_acceleration(&self) {}

    /// The reader's video decoder for `info` will not be fed for a while;
    /// the manager may lend its resources to another reader.
    fn set_idle(&self, _info: &TrackInfo) {}
}
