//! Plays a synthetic in-memory stream through the reader.
//!
//! ```sh
//! cargo run -p core-reader --example reader_demo
//! ```

use anyhow::{Context, Result};
use async_trait::async_trait;
use core_reader::traits::{
    MediaDataDecoder, MediaDataDecoderCallback, MediaDataDemuxer, MediaTrackDemuxer,
    PlatformDecoderModule,
};
use core_reader::{
    DemuxerFailureReason, MediaData, MediaFormatReader, MediaRawData, NotDecodedReason,
    ReaderConfig, SkipFailure, TimeIntervals, TimeUnit, TrackInfo, TrackType,
};
use core_runtime::events::EventBus;
use core_runtime::logging::{init_logging, LogFormat, LoggingConfig};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::info;

/// A fixed-rate track: `count` packets of `step`, a keyframe every `gop`.
struct SyntheticTrack {
    info: Arc<TrackInfo>,
    step: TimeUnit,
    count: usize,
    gop: usize,
    cursor: Mutex<usize>,
}

impl SyntheticTrack {
    fn new(info: TrackInfo, step: TimeUnit, count: usize, gop: usize) -> Arc<Self> {
        Arc::new(Self {
            info: Arc::new(info),
            step,
            count,
            gop,
            cursor: Mutex::new(0),
        })
    }

    fn time_of(&self, index: usize) -> TimeUnit {
        TimeUnit::from_micros(self.step.as_micros() * index as i64)
    }

    fn packet(&self, index: usize) -> MediaRawData {
        MediaRawData::new(self.time_of(index), index % self.gop == 0)
            .with_duration(self.step)
            .with_offset(index as i64 * 1_024)
            .with_data(vec![0_u8; 16])
    }
}

#[async_trait]
impl MediaTrackDemuxer for SyntheticTrack {
    fn info(&self) -> Arc<TrackInfo> {
        self.info.clone()
    }

    async fn get_samples(&self, count: u32) -> Result<Vec<MediaRawData>, DemuxerFailureReason> {
        let mut cursor = self.cursor.lock();
        if *cursor >= self.count {
            return Err(DemuxerFailureReason::EndOfStream);
        }
        let end = (*cursor + count as usize).min(self.count);
        let packets = (*cursor..end).map(|i| self.packet(i)).collect();
        *cursor = end;
        Ok(packets)
    }

    async fn seek(&self, time: TimeUnit) -> Result<TimeUnit, DemuxerFailureReason> {
        let index = (time.as_micros().max(0) / self.step.as_micros()) as usize;
        let keyframe = (index.min(self.count.saturating_sub(1)) / self.gop) * self.gop;
        *self.cursor.lock() = keyframe;
        Ok(self.time_of(keyframe))
    }

    async fn skip_to_next_random_access_point(
        &self,
        threshold: TimeUnit,
    ) -> Result<u32, SkipFailure> {
        let mut cursor = self.cursor.lock();
        let mut skipped = 0;
        while *cursor < self.count {
            if *cursor % self.gop == 0 && self.time_of(*cursor) >= threshold {
                return Ok(skipped);
            }
            *cursor += 1;
            skipped += 1;
        }
        Err(SkipFailure::new(DemuxerFailureReason::EndOfStream, skipped))
    }

    fn next_random_access_point(&self) -> Option<TimeUnit> {
        let cursor = *self.cursor.lock();
        let next = cursor.div_ceil(self.gop) * self.gop;
        (next < self.count).then(|| self.time_of(next))
    }

    fn buffered(&self) -> TimeIntervals {
        TimeIntervals::single(TimeUnit::ZERO, self.time_of(self.count))
    }

    fn reset(&self) {}
}

struct SyntheticDemuxer {
    audio: Arc<SyntheticTrack>,
    video: Arc<SyntheticTrack>,
}

#[async_trait]
impl MediaDataDemuxer for SyntheticDemuxer {
    async fn init(&self) -> Result<(), DemuxerFailureReason> {
        Ok(())
    }

    fn track_count(&self, _track: TrackType) -> u32 {
        1
    }

    fn track_demuxer(&self, track: TrackType, _index: u32) -> Option<Arc<dyn MediaTrackDemuxer>> {
        Some(match track {
            TrackType::Audio => self.audio.clone(),
            TrackType::Video => self.video.clone(),
        })
    }

    fn is_seekable(&self) -> bool {
        true
    }

    fn is_thread_safe(&self) -> bool {
        true
    }

    fn clone_demuxer(&self) -> Option<Arc<dyn MediaDataDemuxer>> {
        None
    }

    fn should_compute_start_time(&self) -> bool {
        false
    }
}

/// "Decodes" by emitting one frame per packet.
struct PassthroughDecoder {
    info: TrackInfo,
    callback: Arc<dyn MediaDataDecoderCallback>,
}

impl MediaDataDecoder for PassthroughDecoder {
    fn init(&mut self) -> core_reader::Result<()> {
        Ok(())
    }

    fn input(&mut self, sample: MediaRawData) -> core_reader::Result<()> {
        let frame = match (self.info.audio_params(), self.info.video_params()) {
            (Some(audio), _) => {
                MediaData::audio(sample.time, sample.duration, audio.rate, audio.channels, 960)
            }
            (_, Some(video)) => {
                MediaData::video(sample.time, sample.duration, video.width, video.height)
            }
            _ => return Err(core_reader::ReaderError::Decoder("unknown track".into())),
        };
        self.callback.output(frame.with_keyframe(sample.keyframe));
        self.callback.input_exhausted();
        Ok(())
    }

    fn flush(&mut self) -> core_reader::Result<()> {
        Ok(())
    }

    fn drain(&mut self) -> core_reader::Result<()> {
        self.callback.drain_complete();
        Ok(())
    }

    fn shutdown(&mut self) {}
}

struct PassthroughPlatform;

impl PlatformDecoderModule for PassthroughPlatform {
    fn supports_mime_type(&self, mime_type: &str) -> bool {
        matches!(mime_type, "audio/opus" | "video/vp9")
    }

    fn create_decoder(
        &self,
        info: &TrackInfo,
        callback: Arc<dyn MediaDataDecoderCallback>,
    ) -> core_reader::Result<Box<dyn MediaDataDecoder>> {
        Ok(Box::new(PassthroughDecoder {
            info: info.clone(),
            callback,
        }))
    }
}

#[core_async::main]
async fn main() -> Result<()> {
    run().await
}

async fn run() -> Result<()> {
    init_logging(LoggingConfig::default().with_format(LogFormat::Compact))
        .context("failed to install logging")?;

    let demuxer = Arc::new(SyntheticDemuxer {
        audio: SyntheticTrack::new(
            TrackInfo::audio(1, "audio/opus", 48_000, 2).with_duration(TimeUnit::from_seconds(2.0)),
            TimeUnit::from_millis(20),
            100,
            1,
        ),
        video: SyntheticTrack::new(
            TrackInfo::video(1, "video/vp9", 1280, 720).with_duration(TimeUnit::from_seconds(2.0)),
            TimeUnit::from_millis(40),
            50,
            10,
        ),
    });

    let reader = MediaFormatReader::new(
        demuxer,
        Arc::new(PassthroughPlatform),
        ReaderConfig::low_latency(),
        EventBus::default(),
    )?;
    let media = reader.read_metadata().await?;
    info!(?media.duration, buffered = ?reader.buffered(), "Metadata ready");

    for _ in 0..5 {
        let video = reader.request_video_data(false, TimeUnit::ZERO)?.await?;
        let audio = reader.request_audio_data()?.await?;
        info!(video = %video.time, audio = %audio.time, "Frames");
    }

    let landed = reader.seek(TimeUnit::from_millis(1_300))?.await?;
    info!(%landed, "Seeked");

    loop {
        match reader.request_video_data(false, TimeUnit::ZERO)?.await {
            Ok(frame) => info!(time = %frame.time, keyframe = frame.keyframe, "Video"),
            Err(NotDecodedReason::EndOfStream) => break,
            Err(reason) => anyhow::bail!("video stopped: {reason}"),
        }
    }

    info!(stats = ?reader.frame_statistics(), "Done");
    reader.shutdown().await;
    Ok(())
}
