//! Scripted collaborators shared by the reader integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use core_async::time::{self, Duration};
use core_reader::traits::{
    MediaDataDecoder, MediaDataDecoderCallback, MediaDataDemuxer, MediaTrackDemuxer,
    PlatformDecoderModule,
};
use core_reader::{
    DemuxerFailureReason, EncryptionInfo, MediaData, MediaFormatReader, MediaRawData,
    ReaderConfig, ReaderError, SkipFailure, TimeIntervals, TimeUnit, TrackInfo, TrackType,
};
use core_runtime::events::EventBus;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

pub type Log = Arc<Mutex<Vec<String>>>;

pub fn us(micros: i64) -> TimeUnit {
    TimeUnit::from_micros(micros)
}

/// A sample at `time_us` lasting 10µs.
pub fn sample(time_us: i64, keyframe: bool) -> MediaRawData {
    MediaRawData::new(us(time_us), keyframe).with_duration(us(10))
}

pub fn audio_info() -> TrackInfo {
    TrackInfo::audio(1, "audio/mp4a-latm", 48_000, 2)
}

pub fn video_info() -> TrackInfo {
    TrackInfo::video(1, "video/avc", 640, 360)
}

/// Polls `condition` every few milliseconds for up to two seconds.
pub async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..400 {
        if condition() {
            return true;
        }
        time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}

// ============================================================================
// Track Demuxer
// ============================================================================

struct Script {
    samples: Vec<MediaRawData>,
    available: usize,
    cursor: usize,
    demux_error: Option<String>,
}

/// A cursor over a fixed list of samples, of which a prefix is "downloaded".
pub struct ScriptedTrack {
    info: Arc<TrackInfo>,
    script: Mutex<Script>,
    log: Log,
}

impl ScriptedTrack {
    pub fn new(info: TrackInfo, samples: Vec<MediaRawData>, log: Log) -> Arc<Self> {
        let available = samples.len();
        Arc::new(Self {
            info: Arc::new(info),
            script: Mutex::new(Script {
                samples,
                available,
                cursor: 0,
                demux_error: None,
            }),
            log,
        })
    }

    /// Limits the downloaded prefix to `count` samples.
    pub fn set_available(&self, count: usize) {
        let mut script = self.script.lock();
        script.available = count.min(script.samples.len());
    }

    /// The next `get_samples` fails with a demuxer error.
    pub fn fail_next_demux(&self, message: &str) {
        self.script.lock().demux_error = Some(message.to_string());
    }

    pub fn cursor(&self) -> usize {
        self.script.lock().cursor
    }
}

#[async_trait]
impl MediaTrackDemuxer for ScriptedTrack {
    fn info(&self) -> Arc<TrackInfo> {
        self.info.clone()
    }

    async fn get_samples(&self, count: u32) -> Result<Vec<MediaRawData>, DemuxerFailureReason> {
        let mut script = self.script.lock();
        if let Some(message) = script.demux_error.take() {
            return Err(DemuxerFailureReason::DemuxerError(message));
        }
        if script.cursor >= script.samples.len() {
            return Err(DemuxerFailureReason::EndOfStream);
        }
        if script.cursor >= script.available {
            return Err(DemuxerFailureReason::WaitingForData);
        }
        let end = (script.cursor + count as usize).min(script.available);
        let samples = script.samples[script.cursor..end].to_vec();
        script.cursor = end;
        Ok(samples)
    }

    async fn seek(&self, time: TimeUnit) -> Result<TimeUnit, DemuxerFailureReason> {
        self.log
            .lock()
            .push(format!("seek {} {}", self.info.track_type(), time.as_micros()));
        let mut script = self.script.lock();
        let index = script
            .samples
            .iter()
            .enumerate()
            .filter(|(_, s)| s.keyframe && s.time <= time)
            .map(|(index, _)| index)
            .last()
            .unwrap_or(0);
        if index >= script.available {
            return Err(DemuxerFailureReason::WaitingForData);
        }
        script.cursor = index;
        Ok(script.samples.get(index).map_or(TimeUnit::ZERO, |s| s.time))
    }

    async fn skip_to_next_random_access_point(
        &self,
        threshold: TimeUnit,
    ) -> Result<u32, SkipFailure> {
        let mut script = self.script.lock();
        let mut skipped = 0;
        while script.cursor < script.available {
            let next = &script.samples[script.cursor];
            if next.keyframe && next.time >= threshold {
                return Ok(skipped);
            }
            script.cursor += 1;
            skipped += 1;
        }
        let failure = if script.cursor >= script.samples.len() {
            DemuxerFailureReason::EndOfStream
        } else {
            DemuxerFailureReason::WaitingForData
        };
        Err(SkipFailure::new(failure, skipped))
    }

    fn next_random_access_point(&self) -> Option<TimeUnit> {
        let script = self.script.lock();
        script.samples[script.cursor.min(script.available)..script.available]
            .iter()
            .find(|s| s.keyframe)
            .map(|s| s.time)
    }

    fn buffered(&self) -> TimeIntervals {
        let script = self.script.lock();
        let downloaded = &script.samples[..script.available];
        let end = downloaded.iter().map(|s| s.time + s.duration).max();
        match (downloaded.first(), end) {
            (Some(first), Some(end)) => TimeIntervals::single(first.time, end),
            _ => TimeIntervals::default(),
        }
    }

    fn reset(&self) {}
}

// ============================================================================
// Container Demuxer
// ============================================================================

pub struct ScriptedDemuxer {
    pub audio: Option<Arc<ScriptedTrack>>,
    pub video: Option<Arc<ScriptedTrack>>,
    pub init_result: Result<(), DemuxerFailureReason>,
    pub seekable: bool,
    pub thread_safe: bool,
    pub crypto: EncryptionInfo,
    pub start_time_known: bool,
    pub notified: Arc<AtomicUsize>,
}

impl ScriptedDemuxer {
    pub fn new(audio: Option<Arc<ScriptedTrack>>, video: Option<Arc<ScriptedTrack>>) -> Self {
        Self {
            audio,
            video,
            init_result: Ok(()),
            seekable: true,
            thread_safe: true,
            crypto: EncryptionInfo::default(),
            start_time_known: false,
            notified: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn track(&self, track: TrackType) -> Option<&Arc<ScriptedTrack>> {
        match track {
            TrackType::Audio => self.audio.as_ref(),
            TrackType::Video => self.video.as_ref(),
        }
    }
}

#[async_trait]
impl MediaDataDemuxer for ScriptedDemuxer {
    async fn init(&self) -> Result<(), DemuxerFailureReason> {
        self.init_result.clone()
    }

    fn track_count(&self, track: TrackType) -> u32 {
        u32::from(self.track(track).is_some())
    }

    fn track_demuxer(&self, track: TrackType, index: u32) -> Option<Arc<dyn MediaTrackDemuxer>> {
        if index != 0 {
            return None;
        }
        self.track(track)
            .map(|t| t.clone() as Arc<dyn MediaTrackDemuxer>)
    }

    fn is_seekable(&self) -> bool {
        self.seekable
    }

    fn is_thread_safe(&self) -> bool {
        self.thread_safe
    }

    fn clone_demuxer(&self) -> Option<Arc<dyn MediaDataDemuxer>> {
        Some(Arc::new(Self {
            audio: self.audio.clone(),
            video: self.video.clone(),
            init_result: self.init_result.clone(),
            seekable: self.seekable,
            thread_safe: self.thread_safe,
            crypto: self.crypto.clone(),
            start_time_known: self.start_time_known,
            notified: self.notified.clone(),
        }))
    }

    fn crypto(&self) -> EncryptionInfo {
        self.crypto.clone()
    }

    fn should_compute_start_time(&self) -> bool {
        !self.start_time_known
    }

    fn notify_data_arrived(&self, _length: u32, _offset: i64) {
        self.notified.fetch_add(1, Ordering::SeqCst);
    }
}

// ============================================================================
// Decoders
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderMode {
    /// Outputs one frame per input, immediately.
    Echo,
    /// Buffers input until drained.
    Hold,
    FailInput,
    FailInit,
}

/// Counters and a handle on the most recent decoder's callback.
#[derive(Default)]
pub struct DecoderProbe {
    pub created: AtomicUsize,
    pub inputs: AtomicUsize,
    pub flushes: AtomicUsize,
    pub drains: AtomicUsize,
    pub shutdowns: AtomicUsize,
    callback: Mutex<Option<Arc<dyn MediaDataDecoderCallback>>>,
}

impl DecoderProbe {
    pub fn inputs(&self) -> usize {
        self.inputs.load(Ordering::SeqCst)
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn shutdowns(&self) -> usize {
        self.shutdowns.load(Ordering::SeqCst)
    }

    /// Reports an asynchronous failure from the latest decoder.
    pub fn fail(&self, message: &str) {
        let callback = self.callback.lock().clone();
        if let Some(callback) = callback {
            callback.error(message.to_string());
        }
    }
}

pub fn frame_for(info: &TrackInfo, sample: &MediaRawData) -> MediaData {
    let frame = match (info.audio_params(), info.video_params()) {
        (Some(audio), _) => {
            MediaData::audio(sample.time, sample.duration, audio.rate, audio.channels, 480)
        }
        (_, Some(video)) => MediaData::video(sample.time, sample.duration, video.width, video.height),
        _ => MediaData::audio(sample.time, sample.duration, 48_000, 2, 480),
    };
    frame.with_keyframe(sample.keyframe)
}

struct ScriptedDecoder {
    mode: DecoderMode,
    info: TrackInfo,
    callback: Arc<dyn MediaDataDecoderCallback>,
    held: Vec<MediaRawData>,
    probe: Arc<DecoderProbe>,
}

impl MediaDataDecoder for ScriptedDecoder {
    fn init(&mut self) -> core_reader::Result<()> {
        if self.mode == DecoderMode::FailInit {
            return Err(ReaderError::DecoderCreation("init refused".to_string()));
        }
        Ok(())
    }

    fn input(&mut self, sample: MediaRawData) -> core_reader::Result<()> {
        self.probe.inputs.fetch_add(1, Ordering::SeqCst);
        match self.mode {
            DecoderMode::Echo => self.callback.output(frame_for(&self.info, &sample)),
            DecoderMode::Hold => self.held.push(sample),
            DecoderMode::FailInput => {
                return Err(ReaderError::Decoder("corrupt sample".to_string()))
            }
            DecoderMode::FailInit => {}
        }
        Ok(())
    }

    fn flush(&mut self) -> core_reader::Result<()> {
        self.probe.flushes.fetch_add(1, Ordering::SeqCst);
        self.held.clear();
        Ok(())
    }

    fn drain(&mut self) -> core_reader::Result<()> {
        self.probe.drains.fetch_add(1, Ordering::SeqCst);
        for sample in std::mem::take(&mut self.held) {
            self.callback.output(frame_for(&self.info, &sample));
        }
        self.callback.drain_complete();
        Ok(())
    }

    fn shutdown(&mut self) {
        self.probe.shutdowns.fetch_add(1, Ordering::SeqCst);
    }
}

pub struct ScriptedPlatform {
    pub mode: Mutex<DecoderMode>,
    pub probe: Arc<DecoderProbe>,
    pub shared_decoders: bool,
}

impl ScriptedPlatform {
    pub fn new(mode: DecoderMode) -> Arc<Self> {
        Arc::new(Self {
            mode: Mutex::new(mode),
            probe: Arc::new(DecoderProbe::default()),
            shared_decoders: false,
        })
    }

    pub fn with_shared_decoders(mode: DecoderMode) -> Arc<Self> {
        Arc::new(Self {
            mode: Mutex::new(mode),
            probe: Arc::new(DecoderProbe::default()),
            shared_decoders: true,
        })
    }
}

impl PlatformDecoderModule for ScriptedPlatform {
    fn supports_mime_type(&self, mime_type: &str) -> bool {
        mime_type.starts_with("audio/") || mime_type.starts_with("video/")
    }

    fn supports_shared_decoders(&self, _info: &TrackInfo) -> bool {
        self.shared_decoders
    }

    fn create_decoder(
        &self,
        info: &TrackInfo,
        callback: Arc<dyn MediaDataDecoderCallback>,
    ) -> core_reader::Result<Box<dyn MediaDataDecoder>> {
        self.probe.created.fetch_add(1, Ordering::SeqCst);
        *self.probe.callback.lock() = Some(callback.clone());
        Ok(Box::new(ScriptedDecoder {
            mode: *self.mode.lock(),
            info: info.clone(),
            callback,
            held: Vec::new(),
            probe: self.probe.clone(),
        }))
    }
}

// ============================================================================
// Reader
// ============================================================================

pub fn reader(
    demuxer: ScriptedDemuxer,
    platform: Arc<ScriptedPlatform>,
    config: ReaderConfig,
) -> MediaFormatReader {
    reader_with_events(demuxer, platform, config, EventBus::default())
}

pub fn reader_with_events(
    demuxer: ScriptedDemuxer,
    platform: Arc<ScriptedPlatform>,
    config: ReaderConfig,
    events: EventBus,
) -> MediaFormatReader {
    MediaFormatReader::new(Arc::new(demuxer), platform, config, events).expect("valid config")
}

pub fn audio_samples(count: i64) -> Vec<MediaRawData> {
    (0..count).map(|i| sample(i * 10, true)).collect()
}
