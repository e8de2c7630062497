//! # Media Format Reader
//!
//! The consumer-facing coordinator.
//!
//! ## Lifecycle
//!
//! 1. [`MediaFormatReader::new`] validates the configuration; nothing runs yet.
//! 2. [`read_metadata`](MediaFormatReader::read_metadata) initializes the
//!    demuxer, starts one actor per present track and creates the decoders.
//! 3. The consumer pulls frames with
//!    [`request_audio_data`](MediaFormatReader::request_audio_data) /
//!    [`request_video_data`](MediaFormatReader::request_video_data), seeks,
//!    and forwards byte-arrival notifications.
//! 4. [`shutdown`](MediaFormatReader::shutdown) tears everything down. Any
//!    request still outstanding settles as `Canceled`.
//!
//! ## Request Protocol
//!
//! At most one data request per track may be outstanding, and none while a
//! seek is pending. Violations are reported as `Err` at call time; outcomes
//! (end of stream, waiting for data, decode errors, cancellation) arrive
//! through the returned promise.

use crate::buffered::{combine, BufferedCache};
use crate::config::ReaderConfig;
use crate::error::{DemuxerFailureReason, NotDecodedReason, ReaderError, Result};
use crate::interval::{TimeIntervals, TimeUnit};
use crate::media::{MediaData, MediaInfo, TrackType};
use crate::seek::{SeekCoordinator, SeekSlot};
use crate::stats::{FrameStatistics, FrameStatisticsSnapshot};
use crate::track::{self, TrackContext, TrackEvent, TrackHandle, TrackStatus};
use crate::traits::{
    MediaDataDemuxer, MediaTrackDemuxer, PlatformDecoderModule, SharedDecoderManager,
};
use core_async::promise::Promise;
use core_async::sync::{oneshot, watch, CancellationToken};
use core_runtime::events::{CoreEvent, EventBus, ReaderEvent};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, info_span, instrument, warn, Instrument};
use uuid::Uuid;

#[derive(Debug, Default)]
struct InitState {
    init_done: bool,
    seekable: bool,
    encrypted: bool,
}

type TrackSlot = RwLock<Option<Arc<TrackHandle>>>;

/// Coordinates a demuxer, per-track decoders and a playback consumer.
pub struct MediaFormatReader {
    id: Uuid,
    config: ReaderConfig,
    demuxer: RwLock<Option<Arc<dyn MediaDataDemuxer>>>,
    platform: Arc<dyn PlatformDecoderModule>,
    shared_decoder_manager: Arc<RwLock<Option<Arc<dyn SharedDecoderManager>>>>,
    events: EventBus,

    audio: TrackSlot,
    video: TrackSlot,

    state: Mutex<InitState>,
    info: Arc<RwLock<MediaInfo>>,
    start_time: RwLock<Option<TimeUnit>>,

    seek: Arc<Mutex<SeekSlot>>,
    /// Bumped after every data notification; parked seeks retry on change.
    data_generation: watch::Sender<u64>,

    buffered: Mutex<BufferedCache>,
    stats: Arc<FrameStatistics>,

    shutdown: AtomicBool,
    cancel: CancellationToken,
    metadata_pending: AtomicBool,
}

impl MediaFormatReader {
    /// Creates a reader over `demuxer`.
    ///
    /// # Errors
    ///
    /// Returns [`ReaderError::Config`] if `config` fails validation.
    pub fn new(
        demuxer: Arc<dyn MediaDataDemuxer>,
        platform: Arc<dyn PlatformDecoderModule>,
        config: ReaderConfig,
        events: EventBus,
    ) -> Result<Self> {
        config.validate().map_err(ReaderError::Config)?;
        let id = Uuid::new_v4();
        debug!(reader_id = %id, ?config, "Creating reader");

        Ok(Self {
            id,
            config,
            demuxer: RwLock::new(Some(demuxer)),
            platform,
            shared_decoder_manager: Arc::new(RwLock::new(None)),
            events,
            audio: RwLock::new(None),
            video: RwLock::new(None),
            state: Mutex::new(InitState::default()),
            info: Arc::new(RwLock::new(MediaInfo::default())),
            start_time: RwLock::new(None),
            seek: Arc::new(Mutex::new(SeekSlot::default())),
            data_generation: watch::channel(0).0,
            buffered: Mutex::new(BufferedCache::new()),
            stats: Arc::new(FrameStatistics::new()),
            shutdown: AtomicBool::new(false),
            cancel: CancellationToken::new(),
            metadata_pending: AtomicBool::new(false),
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    // ========================================================================
    // Metadata
    // ========================================================================

    /// Initializes the demuxer and the track pipelines.
    ///
    /// Once metadata has been read, later calls return the cached
    /// [`MediaInfo`] after making sure decoders exist again (they may have
    /// been released with [`release_media_resources`](Self::release_media_resources)).
    ///
    /// # Errors
    ///
    /// - [`ReaderError::WaitingForResources`] if the demuxer needs more data
    /// - [`ReaderError::NoTracks`] if there is neither audio nor video
    /// - [`ReaderError::Metadata`] for malformed containers and decoder set-up
    ///   failures
    /// - [`ReaderError::Canceled`] if the reader shut down meanwhile
    #[instrument(skip(self), fields(reader_id = %self.id))]
    pub async fn read_metadata(&self) -> Result<MediaInfo> {
        if self.is_shut_down() {
            return Err(ReaderError::Shutdown);
        }
        if self.is_initialized() {
            self.ensure_decoders().await?;
            return Ok(self.media_info());
        }
        if self.metadata_pending.swap(true, Ordering::SeqCst) {
            return Err(ReaderError::MetadataAlreadyPending);
        }

        let result = self.load_metadata().await;
        self.metadata_pending.store(false, Ordering::SeqCst);
        match &result {
            Ok(info) => info!(
                has_audio = info.has_audio(),
                has_video = info.has_video(),
                encrypted = info.is_encrypted(),
                "Metadata loaded"
            ),
            Err(e) => warn!(error = %e, "Metadata read failed"),
        }
        result
    }

    async fn load_metadata(&self) -> Result<MediaInfo> {
        let demuxer = self.demuxer.read().clone().ok_or(ReaderError::Shutdown)?;

        let init = core_async::select! {
            _ = self.cancel.cancelled() => return Err(ReaderError::Canceled),
            result = demuxer.init() => result,
        };
        init.map_err(|failure| match failure {
            DemuxerFailureReason::WaitingForData => ReaderError::WaitingForResources,
            other => ReaderError::Metadata(other.to_string()),
        })?;

        let video = first_track(demuxer.as_ref(), TrackType::Video, true)?;
        let audio = first_track(demuxer.as_ref(), TrackType::Audio, true)?;

        let crypto = demuxer.crypto();
        let encrypted = crypto.is_encrypted();
        let video_info = video.as_ref().map(|track| (*track.info()).clone());
        let audio_info = audio.as_ref().map(|track| (*track.info()).clone());
        let duration = [&video_info, &audio_info]
            .into_iter()
            .flatten()
            .filter_map(|info| info.duration)
            .max();
        let seekable = demuxer.is_seekable();

        // The consumer side queries buffered ranges concurrently with the
        // actors, so it needs its own demuxer unless the original is
        // thread-safe.
        let (main, distinct) = if demuxer.is_thread_safe() {
            (demuxer.clone(), false)
        } else {
            let clone = demuxer
                .clone_demuxer()
                .ok_or_else(|| ReaderError::Metadata("unable to clone demuxer".to_string()))?;
            (clone, true)
        };

        if video.is_none() && audio.is_none() {
            return Err(ReaderError::NoTracks);
        }
        let main_video = first_track(main.as_ref(), TrackType::Video, video.is_some())?;
        let main_audio = first_track(main.as_ref(), TrackType::Audio, audio.is_some())?;

        if self.is_shut_down() {
            return Err(ReaderError::Canceled);
        }

        let info = MediaInfo {
            audio: audio_info,
            video: video_info,
            crypto,
            duration,
        };
        *self.info.write() = info.clone();

        let video_handle = video.map(|track| self.spawn_track(TrackType::Video, track, encrypted));
        let audio_handle = audio.map(|track| self.spawn_track(TrackType::Audio, track, encrypted));
        *self.video.write() = video_handle;
        *self.audio.write() = audio_handle;
        self.buffered
            .lock()
            .attach(main, main_audio, main_video, distinct);

        if !demuxer.should_compute_start_time() {
            *self.start_time.write() = Some(TimeUnit::ZERO);
        }
        {
            let mut state = self.state.lock();
            state.init_done = true;
            state.seekable = seekable;
            state.encrypted = encrypted;
        }

        self.ensure_decoders().await?;

        let _ = self.events.emit(CoreEvent::Reader(ReaderEvent::MetadataLoaded {
            has_audio: info.has_audio(),
            has_video: info.has_video(),
            duration_us: info.duration.map(TimeUnit::as_micros),
        }));
        Ok(info)
    }

    fn spawn_track(
        &self,
        track: TrackType,
        demuxer: Arc<dyn MediaTrackDemuxer>,
        encrypted: bool,
    ) -> Arc<TrackHandle> {
        let ctx = TrackContext::for_track(
            track,
            self.id,
            &self.config,
            self.platform.clone(),
            self.shared_decoder_manager.clone(),
            self.events.clone(),
            self.stats.clone(),
            self.info.clone(),
            encrypted,
        );
        Arc::new(track::spawn(track, demuxer, ctx))
    }

    /// Creates any missing decoder. Encrypted media has no decoders until a
    /// key system exists, which this reader does not provide.
    async fn ensure_decoders(&self) -> Result<()> {
        if self.state.lock().encrypted {
            debug!("Encrypted media, skipping decoder set-up");
            return Ok(());
        }
        for handle in self.handles() {
            let (reply, response) = oneshot::channel();
            if !handle.send(TrackEvent::EnsureDecoder { reply }) {
                return Err(ReaderError::Canceled);
            }
            match response.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    return Err(ReaderError::Metadata(format!(
                        "{} decoder: {e}",
                        handle.track
                    )))
                }
                Err(_) => return Err(ReaderError::Canceled),
            }
        }
        Ok(())
    }

    // ========================================================================
    // Data Requests
    // ========================================================================

    /// Requests the next decoded audio frame.
    ///
    /// # Errors
    ///
    /// [`ReaderError::RequestAlreadyPending`] if an audio request is still
    /// outstanding.
    pub fn request_audio_data(&self) -> Result<Promise<MediaData, NotDecodedReason>> {
        self.request_data(TrackType::Audio, false, TimeUnit::ZERO)
    }

    /// Requests the next decoded video frame.
    ///
    /// When the next keyframe lies before `time_threshold` (or its position
    /// is unknown and `skip_to_keyframe` is set), everything up to the next
    /// keyframe past the threshold is skipped and counted as dropped.
    pub fn request_video_data(
        &self,
        skip_to_keyframe: bool,
        time_threshold: TimeUnit,
    ) -> Result<Promise<MediaData, NotDecodedReason>> {
        self.request_data(TrackType::Video, skip_to_keyframe, time_threshold)
    }

    fn request_data(
        &self,
        track: TrackType,
        skip_to_keyframe: bool,
        time_threshold: TimeUnit,
    ) -> Result<Promise<MediaData, NotDecodedReason>> {
        if self.is_shut_down() {
            warn!(%track, "Data request on shut down reader");
            return Ok(Promise::rejected(NotDecodedReason::Canceled));
        }
        let Some(handle) = self.handle(track) else {
            debug!(%track, "Data request for absent track");
            return Ok(Promise::rejected(NotDecodedReason::DecodeError));
        };
        {
            // Held across the flag swap so `seek` never observes a request
            // slipping in after its own check.
            let seek = self.seek.lock();
            if seek.is_pending() {
                debug!(%track, "Data request during seek");
                return Ok(Promise::rejected(NotDecodedReason::Canceled));
            }
            if handle
                .shared
                .request_pending
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_err()
            {
                return Err(ReaderError::RequestAlreadyPending(track));
            }
        }

        let (resolver, promise) = Promise::pending();
        let sent = handle.send(TrackEvent::Request {
            resolver,
            skip_to_keyframe,
            time_threshold,
        });
        if !sent {
            handle.shared.request_pending.store(false, Ordering::SeqCst);
        }
        Ok(promise)
    }

    /// Resolves once `track` is no longer waiting for data.
    pub fn wait_for_data(&self, track: TrackType) -> Promise<TrackType, NotDecodedReason> {
        if self.is_shut_down() {
            return Promise::rejected(NotDecodedReason::Canceled);
        }
        let Some(handle) = self.handle(track) else {
            return Promise::rejected(NotDecodedReason::Canceled);
        };
        let (resolver, promise) = Promise::pending();
        handle.send(TrackEvent::WaitForData { resolver });
        promise
    }

    // ========================================================================
    // Seeking
    // ========================================================================

    /// Seeks every track to `target`.
    ///
    /// Must be called from within the runtime; the seek runs as its own task.
    ///
    /// # Errors
    ///
    /// - [`ReaderError::NotInitialized`] before metadata was read
    /// - [`ReaderError::SeekAlreadyPending`] if a seek is outstanding
    /// - [`ReaderError::RequestPendingDuringSeek`] if a data request is
    ///   outstanding on any track
    pub fn seek(&self, target: TimeUnit) -> Result<Promise<TimeUnit, ReaderError>> {
        let seekable = {
            let state = self.state.lock();
            if !state.init_done {
                return Err(ReaderError::NotInitialized);
            }
            state.seekable
        };

        let mut slot = self.seek.lock();
        if let Some(pending) = slot.target() {
            debug!(%pending, %target, "Seek already pending");
            return Err(ReaderError::SeekAlreadyPending);
        }
        let video = self.video.read().clone();
        let audio = self.audio.read().clone();
        if [&video, &audio]
            .into_iter()
            .flatten()
            .any(|handle| handle.shared.is_request_pending())
        {
            return Err(ReaderError::RequestPendingDuringSeek);
        }
        if self.is_shut_down() {
            return Ok(Promise::rejected(ReaderError::Shutdown));
        }
        if !seekable {
            debug!("Seek on unseekable media");
            return Ok(Promise::rejected(ReaderError::NotSeekable));
        }

        let (resolver, promise) = Promise::pending();
        let cancel = self.cancel.child_token();
        let id = slot.begin(target, resolver, cancel.clone());
        drop(slot);

        info!(reader_id = %self.id, %target, "Seeking");
        let _ = self.events.emit(CoreEvent::Reader(ReaderEvent::SeekStarted {
            target_us: target.as_micros(),
        }));

        let coordinator = SeekCoordinator {
            id,
            target,
            video,
            audio,
            slot: self.seek.clone(),
            data: self.data_generation.subscribe(),
            cancel,
            events: self.events.clone(),
        };
        let span = info_span!("seek", reader_id = %self.id, target = %target);
        core_async::task::spawn(coordinator.run().instrument(span));
        Ok(promise)
    }

    pub fn is_seeking(&self) -> bool {
        self.seek.lock().is_pending()
    }

    // ========================================================================
    // Data Notifications & Buffered Ranges
    // ========================================================================

    /// Reports that `length` bytes at `offset` became available.
    pub fn notify_data_arrived(&self, length: u32, offset: i64) {
        self.buffered.lock().notify_data_arrived(length, offset);
        if !self.is_initialized() || self.is_shut_down() {
            return;
        }
        let demuxer = self.demuxer.read().clone();
        if let Some(demuxer) = demuxer {
            demuxer.notify_data_arrived(length, offset);
        }
        self.notify_tracks();
    }

    /// Reports that previously available data was evicted.
    pub fn notify_data_removed(&self) {
        self.buffered.lock().notify_data_removed();
        if !self.is_initialized() || self.is_shut_down() {
            return;
        }
        let demuxer = self.demuxer.read().clone();
        if let Some(demuxer) = demuxer {
            demuxer.notify_data_removed();
        }
        self.notify_tracks();
    }

    fn notify_tracks(&self) {
        for handle in self.handles() {
            handle.send(TrackEvent::DataArrived);
        }
        // After the tracks, so a retried seek sees their refreshed state.
        self.data_generation.send_modify(|generation| *generation += 1);
    }

    /// Playable ranges on every present track, relative to the start time.
    ///
    /// Empty until metadata has been read and a start time is known.
    pub fn buffered(&self) -> TimeIntervals {
        let Some(start) = self.buffered_start() else {
            return TimeIntervals::default();
        };
        self.buffered.lock().buffered().shifted(-start)
    }

    /// Like [`buffered`](Self::buffered), but built from the ranges the track
    /// actors last published, without touching any demuxer.
    pub fn buffered_snapshot(&self) -> TimeIntervals {
        let Some(start) = self.buffered_start() else {
            return TimeIntervals::default();
        };
        let video = self.handle(TrackType::Video).map(|h| (*h.shared.buffered()).clone());
        let audio = self.handle(TrackType::Audio).map(|h| (*h.shared.buffered()).clone());
        combine(video, audio).shifted(-start)
    }

    fn buffered_start(&self) -> Option<TimeUnit> {
        if !self.is_initialized() {
            return None;
        }
        self.compute_start_time()
    }

    /// Returns the stream start time, working it out if still unknown.
    ///
    /// Demuxers that do not ask for computation start at zero. Otherwise the
    /// start time is the earliest of the first frames handed out on each
    /// present track, so it stays unknown until every track delivered one.
    /// Once known it is kept.
    pub fn compute_start_time(&self) -> Option<TimeUnit> {
        if let Some(start) = *self.start_time.read() {
            return Some(start);
        }
        let handles = self.handles();
        if handles.is_empty() {
            return None;
        }
        let start = handles
            .iter()
            .map(|handle| handle.shared.first_frame_time())
            .collect::<Option<Vec<_>>>()?
            .into_iter()
            .min()?;

        let start = *self.start_time.write().get_or_insert(start);
        debug!(%start, "Start time computed from first frames");
        Some(start)
    }

    /// Byte offset before which data is not needed to play from `time`.
    pub fn eviction_offset(&self, time: TimeUnit) -> i64 {
        self.buffered.lock().eviction_offset(time)
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn media_info(&self) -> MediaInfo {
        self.info.read().clone()
    }

    pub fn is_initialized(&self) -> bool {
        self.state.lock().init_done
    }

    pub fn is_seekable(&self) -> bool {
        self.state.lock().seekable
    }

    pub fn is_encrypted(&self) -> bool {
        self.state.lock().encrypted
    }

    pub fn has_audio(&self) -> bool {
        self.audio.read().is_some()
    }

    pub fn has_video(&self) -> bool {
        self.video.read().is_some()
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    pub fn track_status(&self, track: TrackType) -> Option<TrackStatus> {
        self.handle(track).map(|handle| handle.shared.status())
    }

    /// Samples fed to the audio decoder whose frames were not yet returned.
    pub fn size_of_audio_queue_in_frames(&self) -> usize {
        self.queue_size(TrackType::Audio)
    }

    pub fn size_of_video_queue_in_frames(&self) -> usize {
        self.queue_size(TrackType::Video)
    }

    fn queue_size(&self, track: TrackType) -> usize {
        self.handle(track)
            .map(|handle| handle.shared.size_of_queue.load(Ordering::SeqCst))
            .unwrap_or(0)
    }

    pub fn frame_statistics(&self) -> FrameStatisticsSnapshot {
        self.stats.snapshot()
    }

    pub fn set_start_time(&self, start: TimeUnit) {
        *self.start_time.write() = Some(start);
    }

    pub fn start_time(&self) -> Option<TimeUnit> {
        *self.start_time.read()
    }

    pub fn force_zero_start_time(&self) {
        self.set_start_time(TimeUnit::ZERO);
    }

    /// Installs (or removes) the manager used for shared video decoders.
    /// Affects decoders created afterwards.
    pub fn set_shared_decoder_manager(&self, manager: Option<Arc<dyn SharedDecoderManager>>) {
        *self.shared_decoder_manager.write() = manager;
    }

    fn handle(&self, track: TrackType) -> Option<Arc<TrackHandle>> {
        match track {
            TrackType::Audio => self.audio.read().clone(),
            TrackType::Video => self.video.read().clone(),
        }
    }

    /// Active tracks, video first.
    fn handles(&self) -> Vec<Arc<TrackHandle>> {
        [self.handle(TrackType::Video), self.handle(TrackType::Audio)]
            .into_iter()
            .flatten()
            .collect()
    }

    // ========================================================================
    // Reset & Teardown
    // ========================================================================

    /// Cancels the pending seek and every outstanding request, and flushes
    /// all decoders.
    #[instrument(skip(self), fields(reader_id = %self.id))]
    pub async fn reset_decode(&self) {
        debug!("Resetting decode");
        self.seek.lock().cancel();
        for handle in self.handles() {
            let (done, finished) = oneshot::channel();
            if handle.send(TrackEvent::ResetDecode { done }) {
                let _ = finished.await;
            }
        }
        let _ = self.events.emit(CoreEvent::Reader(ReaderEvent::Reset));
    }

    /// Shuts down the video decoder to free platform resources. It is
    /// recreated on the next request or metadata read.
    pub async fn release_media_resources(&self) {
        self.video_round_trip(|done| TrackEvent::ReleaseDecoder { done })
            .await;
    }

    /// Tells the shared decoder manager to stop using hardware acceleration
    /// and replaces the video decoder accordingly. If no replacement can be
    /// created the video track enters the error state.
    ///
    /// Does nothing without a shared decoder manager.
    #[instrument(skip(self), fields(reader_id = %self.id))]
    pub async fn disable_hardware_acceleration(&self) {
        if self.shared_decoder_manager.read().is_none() {
            return;
        }
        self.video_round_trip(|done| TrackEvent::DisableHardwareAcceleration { done })
            .await;
    }

    /// Lets the shared decoder manager know the video decoder is idle.
    pub async fn set_idle(&self) {
        if self.shared_decoder_manager.read().is_none() {
            return;
        }
        self.video_round_trip(|done| TrackEvent::SetIdle { done })
            .await;
    }

    async fn video_round_trip(&self, event: impl FnOnce(oneshot::Sender<()>) -> TrackEvent) {
        let Some(handle) = self.handle(TrackType::Video) else {
            return;
        };
        let (done, finished) = oneshot::channel();
        if handle.send(event(done)) {
            let _ = finished.await;
        }
    }

    /// Tears the reader down. Safe to call more than once.
    #[instrument(skip(self), fields(reader_id = %self.id))]
    pub async fn shutdown(&self) {
        if self.shutdown.swap(true, Ordering::SeqCst) {
            debug!("Reader already shut down");
            return;
        }
        info!("Shutting down reader");
        self.cancel.cancel();
        self.seek.lock().cancel();

        let audio = self.audio.write().take();
        let video = self.video.write().take();
        for handle in [audio, video].into_iter().flatten() {
            handle.shutdown().await;
        }

        *self.demuxer.write() = None;
        self.buffered.lock().release();
        let _ = self
            .events
            .emit(CoreEvent::Reader(ReaderEvent::ShutdownComplete));
        info!("Reader shut down");
    }
}

impl Drop for MediaFormatReader {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl std::fmt::Debug for MediaFormatReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaFormatReader")
            .field("id", &self.id)
            .field("config", &self.config)
            .field("initialized", &self.is_initialized())
            .field("shutdown", &self.is_shut_down())
            .finish_non_exhaustive()
    }
}

/// The first track of `track` type, when `wanted` and the demuxer has one.
fn first_track(
    demuxer: &dyn MediaDataDemuxer,
    track: TrackType,
    wanted: bool,
) -> Result<Option<Arc<dyn MediaTrackDemuxer>>> {
    if !wanted || demuxer.track_count(track) == 0 {
        return Ok(None);
    }
    demuxer
        .track_demuxer(track, 0)
        .map(Some)
        .ok_or_else(|| ReaderError::Metadata(format!("missing {track} track demuxer")))
}
