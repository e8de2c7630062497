//! # Media Types
//!
//! Track descriptions, compressed samples coming out of the demuxer, decoded
//! frames going to the consumer, and the container-level [`MediaInfo`].

use crate::interval::TimeUnit;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

// ============================================================================
// Tracks
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackType {
    Audio,
    Video,
}

impl TrackType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackType::Audio => "audio",
            TrackType::Video => "video",
        }
    }
}

impl fmt::Display for TrackType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioParams {
    /// Sample rate in Hz
    pub rate: u32,
    pub channels: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoParams {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TrackParams {
    Audio(AudioParams),
    Video(VideoParams),
}

/// Description of one elementary stream.
///
/// `id` is the stream-source id. Samples carrying a `TrackInfo` with a
/// different id than the active decoder's mark a configuration change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackInfo {
    pub id: u32,
    pub mime_type: String,
    pub duration: Option<TimeUnit>,
    pub params: TrackParams,
}

impl TrackInfo {
    pub fn audio(id: u32, mime_type: impl Into<String>, rate: u32, channels: u32) -> Self {
        Self {
            id,
            mime_type: mime_type.into(),
            duration: None,
            params: TrackParams::Audio(AudioParams { rate, channels }),
        }
    }

    pub fn video(id: u32, mime_type: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            id,
            mime_type: mime_type.into(),
            duration: None,
            params: TrackParams::Video(VideoParams { width, height }),
        }
    }

    pub fn with_duration(mut self, duration: TimeUnit) -> Self {
        self.duration = Some(duration);
        self
    }

    pub fn track_type(&self) -> TrackType {
        match self.params {
            TrackParams::Audio(_) => TrackType::Audio,
            TrackParams::Video(_) => TrackType::Video,
        }
    }

    pub fn audio_params(&self) -> Option<AudioParams> {
        match self.params {
            TrackParams::Audio(params) => Some(params),
            TrackParams::Video(_) => None,
        }
    }

    pub fn video_params(&self) -> Option<VideoParams> {
        match self.params {
            TrackParams::Video(params) => Some(params),
            TrackParams::Audio(_) => None,
        }
    }
}

// ============================================================================
// Samples
// ============================================================================

/// A compressed sample produced by a track demuxer.
#[derive(Debug, Clone)]
pub struct MediaRawData {
    /// Presentation time
    pub time: TimeUnit,
    /// Decode time
    pub timecode: TimeUnit,
    pub duration: TimeUnit,
    pub keyframe: bool,
    /// Byte offset in the resource
    pub offset: i64,
    pub data: Bytes,
    /// Set when the sample belongs to a (possibly new) stream configuration.
    pub track_info: Option<Arc<TrackInfo>>,
}

impl MediaRawData {
    pub fn new(time: TimeUnit, keyframe: bool) -> Self {
        Self {
            time,
            timecode: time,
            duration: TimeUnit::ZERO,
            keyframe,
            offset: 0,
            data: Bytes::new(),
            track_info: None,
        }
    }

    pub fn with_duration(mut self, duration: TimeUnit) -> Self {
        self.duration = duration;
        self
    }

    pub fn with_timecode(mut self, timecode: TimeUnit) -> Self {
        self.timecode = timecode;
        self
    }

    pub fn with_offset(mut self, offset: i64) -> Self {
        self.offset = offset;
        self
    }

    pub fn with_data(mut self, data: impl Into<Bytes>) -> Self {
        self.data = data.into();
        self
    }

    pub fn with_track_info(mut self, info: Arc<TrackInfo>) -> Self {
        self.track_info = Some(info);
        self
    }

    pub fn stream_source_id(&self) -> Option<u32> {
        self.track_info.as_ref().map(|info| info.id)
    }
}

/// Format-specific part of a decoded frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Audio { rate: u32, channels: u32, frames: u32 },
    Video { width: u32, height: u32 },
}

/// A decoded frame returned to the consumer.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaData {
    pub time: TimeUnit,
    pub duration: TimeUnit,
    pub offset: i64,
    pub keyframe: bool,
    /// First frame delivered after a flush.
    pub discontinuity: bool,
    pub payload: Bytes,
    pub kind: MediaKind,
}

impl MediaData {
    pub fn audio(time: TimeUnit, duration: TimeUnit, rate: u32, channels: u32, frames: u32) -> Self {
        Self::new(
            time,
            duration,
            MediaKind::Audio {
                rate,
                channels,
                frames,
            },
        )
    }

    pub fn video(time: TimeUnit, duration: TimeUnit, width: u32, height: u32) -> Self {
        Self::new(time, duration, MediaKind::Video { width, height })
    }

    fn new(time: TimeUnit, duration: TimeUnit, kind: MediaKind) -> Self {
        Self {
            time,
            duration,
            offset: 0,
            keyframe: false,
            discontinuity: false,
            payload: Bytes::new(),
            kind,
        }
    }

    pub fn with_keyframe(mut self, keyframe: bool) -> Self {
        self.keyframe = keyframe;
        self
    }

    pub fn with_offset(mut self, offset: i64) -> Self {
        self.offset = offset;
        self
    }

    pub fn with_payload(mut self, payload: impl Into<Bytes>) -> Self {
        self.payload = payload.into();
        self
    }

    pub fn track_type(&self) -> TrackType {
        match self.kind {
            MediaKind::Audio { .. } => TrackType::Audio,
            MediaKind::Video { .. } => TrackType::Video,
        }
    }

    pub fn end_time(&self) -> TimeUnit {
        self.time + self.duration
    }
}

// ============================================================================
// Container metadata
// ============================================================================

/// Key-system initialization data found in the container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptionInitData {
    /// e.g. "cenc", "keyids"
    pub init_type: String,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptionInfo {
    pub init_data: Vec<EncryptionInitData>,
}

impl EncryptionInfo {
    pub fn is_encrypted(&self) -> bool {
        !self.init_data.is_empty()
    }

    pub fn add_init_data(&mut self, init_type: impl Into<String>, data: Vec<u8>) {
        self.init_data.push(EncryptionInitData {
            init_type: init_type.into(),
            data,
        });
    }
}

/// Metadata snapshot produced by `read_metadata`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaInfo {
    pub audio: Option<TrackInfo>,
    pub video: Option<TrackInfo>,
    pub crypto: EncryptionInfo,
    /// Longest track duration, if any track reports one
    pub duration: Option<TimeUnit>,
}

impl MediaInfo {
    pub fn has_audio(&self) -> bool {
        self.audio.is_some()
    }

    pub fn has_video(&self) -> bool {
        self.video.is_some()
    }

    pub fn is_encrypted(&self) -> bool {
        self.crypto.is_encrypted()
    }

    pub fn track(&self, track: TrackType) -> Option<&TrackInfo> {
        match track {
            TrackType::Audio => self.audio.as_ref(),
            TrackType::Video => self.video.as_ref(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_track_info_params() {
        let audio = TrackInfo::audio(1, "audio/opus", 48_000, 2)
            .with_duration(TimeUnit::from_seconds(3.0));
        assert_eq!(audio.track_type(), TrackType::Audio);
        assert_eq!(audio.audio_params().map(|p| p.rate), Some(48_000));
        assert!(audio.video_params().is_none());

        let video = TrackInfo::video(2, "video/avc", 1280, 720);
        assert_eq!(video.track_type(), TrackType::Video);
        assert_eq!(video.video_params().map(|p| p.height), Some(720));
    }

    #[test]
    fn test_raw_sample_stream_id() {
        let info = Arc::new(TrackInfo::video(7, "video/vp9", 640, 360));
        let sample = MediaRawData::new(TimeUnit::from_micros(40_000), true)
            .with_duration(TimeUnit::from_micros(40_000))
            .with_track_info(info);
        assert_eq!(sample.stream_source_id(), Some(7));
        assert_eq!(sample.timecode, sample.time);

        let bare = MediaRawData::new(TimeUnit::ZERO, false);
        assert_eq!(bare.stream_source_id(), None);
    }

    #[test]
    fn test_media_data_kind() {
        let frame = MediaData::audio(
            TimeUnit::from_micros(100),
            TimeUnit::from_micros(20),
            44_100,
            2,
            1024,
        );
        assert_eq!(frame.track_type(), TrackType::Audio);
        assert_eq!(frame.end_time(), TimeUnit::from_micros(120));
        assert!(!frame.discontinuity);
    }

    #[test]
    fn test_media_info_serialization() {
        let mut info = MediaInfo {
            video: Some(TrackInfo::video(1, "video/avc", 320, 240)),
            ..Default::default()
        };
        info.crypto.add_init_data("cenc", vec![1, 2, 3]);
        assert!(info.is_encrypted());

        let json = serde_json::to_string(&info).unwrap();
        assert!(json.contains("\"kind\":\"video\""));
        let back: MediaInfo = serde_json::from_str(&json).unwrap();
        assert_eq!(back, info);
        assert!(back.track(TrackType::Audio).is_none());
    }
}
