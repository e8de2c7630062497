//! # Reader Error Types
//!
//! [`ReaderError`] covers API misuse, metadata and decoder set-up failures.
//! The per-request outcomes a consumer must branch on are separate closed
//! enums: [`NotDecodedReason`] for data requests and
//! [`DemuxerFailureReason`] for collaborator results.

use crate::media::TrackType;
use crate::track::DrainState;
use core_async::promise::Abandoned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors returned by the reader.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReaderError {
    // ========================================================================
    // Configuration / Lifecycle
    // ========================================================================
    /// Invalid reader configuration.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Operation requires metadata to have been read first.
    #[error("Reader not initialized")]
    NotInitialized,

    /// The reader has been shut down.
    #[error("Reader is shut down")]
    Shutdown,

    /// The operation was canceled by a reset or shutdown.
    #[error("Operation canceled")]
    Canceled,

    // ========================================================================
    // Request Protocol
    // ========================================================================
    /// A data request for this track is already outstanding.
    #[error("A {0} data request is already pending")]
    RequestAlreadyPending(TrackType),

    /// A seek is already outstanding.
    #[error("A seek is already pending")]
    SeekAlreadyPending,

    /// Seeking while a data request is outstanding.
    #[error("Cannot seek while a data request is pending")]
    RequestPendingDuringSeek,

    // ========================================================================
    // Seeking
    // ========================================================================
    /// The media does not support seeking.
    #[error("Media is not seekable")]
    NotSeekable,

    /// A track demuxer failed to seek.
    #[error("Seek failed on {track} track: {reason}")]
    SeekFailed {
        track: TrackType,
        reason: DemuxerFailureReason,
    },

    // ========================================================================
    // Metadata
    // ========================================================================
    /// The container could not be initialized.
    #[error("Metadata error: {0}")]
    Metadata(String),

    /// `read_metadata` is already running.
    #[error("Metadata read already in progress")]
    MetadataAlreadyPending,

    /// The demuxer needs more data before metadata is available.
    #[error("Waiting for resources")]
    WaitingForResources,

    /// The container has neither an audio nor a video track.
    #[error("Media has no audio or video track")]
    NoTracks,

    // ========================================================================
    // Decoders
    // ========================================================================
    /// No platform decoder handles this mime type.
    #[error("Unsupported mime type: {0}")]
    UnsupportedMimeType(String),

    /// Media is encrypted and no key system is available.
    #[error("Media is encrypted")]
    Encrypted,

    /// The platform failed to create or initialize a decoder.
    #[error("Decoder creation failed: {0}")]
    DecoderCreation(String),

    /// A decoder operation failed.
    #[error("Decoder error: {0}")]
    Decoder(String),

    /// A drain state change that the state machine does not allow.
    #[error("Illegal drain transition from {from:?} to {to:?}")]
    IllegalTransition { from: DrainState, to: DrainState },

    /// Internal error (should not occur in normal operation).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ReaderError {
    /// Returns `true` if the operation failed because of a reset or shutdown.
    pub fn is_canceled(&self) -> bool {
        matches!(self, ReaderError::Canceled | ReaderError::Shutdown)
    }

    /// Returns `true` if this error reports misuse of the request protocol.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            ReaderError::NotInitialized
                | ReaderError::RequestAlreadyPending(_)
                | ReaderError::SeekAlreadyPending
                | ReaderError::RequestPendingDuringSeek
                | ReaderError::MetadataAlreadyPending
        )
    }

    /// Returns `true` if this error is related to decoder set-up or operation.
    pub fn is_decoder_error(&self) -> bool {
        matches!(
            self,
            ReaderError::UnsupportedMimeType(_)
                | ReaderError::Encrypted
                | ReaderError::DecoderCreation(_)
                | ReaderError::Decoder(_)
        )
    }
}

impl From<Abandoned> for ReaderError {
    fn from(_: Abandoned) -> Self {
        ReaderError::Canceled
    }
}

/// Result type for reader operations.
pub type Result<T> = std::result::Result<T, ReaderError>;

/// Why a data request did not produce a frame.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NotDecodedReason {
    #[error("decode error")]
    DecodeError,
    #[error("end of stream")]
    EndOfStream,
    #[error("waiting for data")]
    WaitingForData,
    #[error("canceled")]
    Canceled,
}

impl From<Abandoned> for NotDecodedReason {
    fn from(_: Abandoned) -> Self {
        NotDecodedReason::Canceled
    }
}

/// Failure reported by a demuxer collaborator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DemuxerFailureReason {
    /// Not enough data buffered yet; retry once more arrives.
    #[error("waiting for data")]
    WaitingForData,
    #[error("end of stream")]
    EndOfStream,
    /// The container is malformed or the demuxer broke.
    #[error("demuxer error: {0}")]
    DemuxerError(String),
    #[error("canceled")]
    Canceled,
    #[error("shutdown")]
    Shutdown,
}

impl DemuxerFailureReason {
    pub fn is_abort(&self) -> bool {
        matches!(
            self,
            DemuxerFailureReason::Canceled | DemuxerFailureReason::Shutdown
        )
    }
}

/// A failed skip-to-keyframe, with the number of samples skipped before it
/// failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("skip failed after {skipped} samples: {failure}")]
pub struct SkipFailure {
    pub failure: DemuxerFailureReason,
    pub skipped: u32,
}

impl SkipFailure {
    pub fn new(failure: DemuxerFailureReason, skipped: u32) -> Self {
        Self { failure, skipped }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_predicates() {
        assert!(ReaderError::Canceled.is_canceled());
        assert!(ReaderError::Shutdown.is_canceled());
        assert!(!ReaderError::NotSeekable.is_canceled());

        assert!(ReaderError::RequestAlreadyPending(TrackType::Audio).is_protocol_violation());
        assert!(ReaderError::SeekAlreadyPending.is_protocol_violation());
        assert!(!ReaderError::NoTracks.is_protocol_violation());

        assert!(ReaderError::Encrypted.is_decoder_error());
        assert!(ReaderError::UnsupportedMimeType("video/x".into()).is_decoder_error());
    }

    #[test]
    fn test_abandoned_maps_to_canceled() {
        assert_eq!(ReaderError::from(Abandoned), ReaderError::Canceled);
        assert_eq!(NotDecodedReason::from(Abandoned), NotDecodedReason::Canceled);
    }

    #[test]
    fn test_display_messages() {
        let err = ReaderError::SeekFailed {
            track: TrackType::Video,
            reason: DemuxerFailureReason::DemuxerError("bad moof".into()),
        };
        assert_eq!(
            err.to_string(),
            "Seek failed on video track: demuxer error: bad moof"
        );

        let skip = SkipFailure::new(DemuxerFailureReason::EndOfStream, 4);
        assert_eq!(skip.to_string(), "skip failed after 4 samples: end of stream");
    }
}
