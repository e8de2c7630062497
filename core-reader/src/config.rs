//! # Reader Configuration
//!
//! Tuning knobs for the per-track decode pipelines.

use serde::{Deserialize, Serialize};

/// Reader configuration.
///
/// Controls how far each decoder may run ahead of the consumer and how many
/// samples are pulled from a track demuxer per request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReaderConfig {
    /// Maximum number of audio samples in flight inside the decoder
    /// (fed but not yet returned as frames).
    ///
    /// Default: 2.
    #[serde(default = "default_decode_ahead")]
    pub audio_decode_ahead: usize,

    /// Maximum number of video samples in flight inside the decoder.
    ///
    /// Default: 2.
    #[serde(default = "default_decode_ahead")]
    pub video_decode_ahead: usize,

    /// Number of samples requested from a track demuxer at once.
    ///
    /// Default: 1.
    #[serde(default = "default_demux_batch_size")]
    pub demux_batch_size: u32,

    /// Route video decoder creation through the shared decoder manager when
    /// one is installed and the platform allows it.
    ///
    /// Default: true.
    #[serde(default = "default_prefer_shared_video_decoder")]
    pub prefer_shared_video_decoder: bool,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            audio_decode_ahead: default_decode_ahead(),
            video_decode_ahead: default_decode_ahead(),
            demux_batch_size: default_demux_batch_size(),
            prefer_shared_video_decoder: default_prefer_shared_video_decoder(),
        }
    }
}

impl ReaderConfig {
    /// Minimal look-ahead: one sample in flight per decoder.
    pub fn low_latency() -> Self {
        Self {
            audio_decode_ahead: 1,
            video_decode_ahead: 1,
            ..Default::default()
        }
    }

    /// Deeper decoder pipelines and batched demuxing.
    pub fn high_throughput() -> Self {
        Self {
            audio_decode_ahead: 8,
            video_decode_ahead: 4,
            demux_batch_size: 4,
            ..Default::default()
        }
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.audio_decode_ahead == 0 {
            return Err("audio_decode_ahead must be > 0".to_string());
        }

        if self.video_decode_ahead == 0 {
            return Err("video_decode_ahead must be > 0".to_string());
        }

        if self.demux_batch_size == 0 {
            return Err("demux_batch_size must be > 0".to_string());
        }

        Ok(())
    }

    pub(crate) fn decode_ahead(&self, track: crate::media::TrackType) -> usize {
        match track {
            crate::media::TrackType::Audio => self.audio_decode_ahead,
            crate::media::TrackType::Video => self.video_decode_ahead,
        }
    }
}

// ============================================================================
// Default Functions (for serde)
// ============================================================================

fn default_decode_ahead() -> usize {
    2
}

fn default_demux_batch_size() -> u32 {
    1
}

fn default_prefer_shared_video_decoder() -> bool {
    true
}
