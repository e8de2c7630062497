//! # Track Actors
//!
//! Each active track runs one actor task that owns the track's demuxer
//! cursor, its decoder and all decode bookkeeping. Everything that touches
//! that state arrives as a [`TrackEvent`] on the actor's queue: consumer
//! requests, demuxer completions, decoder callbacks and reschedules. Events
//! are processed one at a time, in order.
//!
//! The reader keeps a [`TrackHandle`] per track. State that the consumer
//! reads without a round trip (buffered ranges, queue size, status) lives in
//! [`TrackShared`].

mod state;
mod worker;

pub use state::DrainState;

use crate::config::ReaderConfig;
use crate::error::{DemuxerFailureReason, NotDecodedReason, SkipFailure};
use crate::interval::{TimeIntervals, TimeUnit};
use crate::media::{MediaData, MediaInfo, MediaRawData, TrackType};
use crate::stats::FrameStatistics;
use crate::traits::{MediaTrackDemuxer, PlatformDecoderModule, SharedDecoderManager};
use core_async::promise::{RequestId, Resolver};
use core_async::sync::{mpsc, oneshot, CancellationToken, DropGuard};
use core_async::task::JoinHandle;
use core_runtime::events::EventBus;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info_span, Instrument};
use uuid::Uuid;
use worker::TrackWorker;

/// Why a track is stalled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WaitReason {
    /// The demuxer has no samples buffered yet.
    Demux,
    /// A seek needs data that has not arrived.
    Seek,
    /// A skip-to-keyframe needs data that has not arrived.
    Skip,
}

/// Observable status of a track pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrackStatus {
    Idle,
    Demuxing,
    Decoding,
    WaitingForData(WaitReason),
    Draining,
    Errored,
}

pub(crate) type SampleResult = Result<Vec<MediaRawData>, DemuxerFailureReason>;
pub(crate) type SeekResult = Result<TimeUnit, DemuxerFailureReason>;

pub(crate) enum TrackEvent {
    /// Re-run the scheduler.
    Update,
    Request {
        resolver: Resolver<MediaData, NotDecodedReason>,
        skip_to_keyframe: bool,
        time_threshold: TimeUnit,
    },
    WaitForData {
        resolver: Resolver<TrackType, NotDecodedReason>,
    },
    DataArrived,
    DemuxCompleted {
        id: RequestId,
        result: SampleResult,
    },
    SkipCompleted {
        id: RequestId,
        result: Result<u32, SkipFailure>,
    },
    InternalSeekCompleted {
        id: RequestId,
        result: SeekResult,
    },
    Seek {
        target: TimeUnit,
        reply: oneshot::Sender<SeekResult>,
    },
    SeekCompleted {
        id: RequestId,
        result: SeekResult,
    },
    DecoderOutput {
        epoch: u64,
        data: MediaData,
    },
    InputExhausted {
        epoch: u64,
    },
    DecoderError {
        epoch: u64,
        message: String,
    },
    DrainComplete {
        epoch: u64,
    },
    EnsureDecoder {
        reply: oneshot::Sender<crate::Result<()>>,
    },
    ResetDecode {
        done: oneshot::Sender<()>,
    },
    ReleaseDecoder {
        done: oneshot::Sender<()>,
    },
    /// Fall back to a software video decoder.
    DisableHardwareAcceleration {
        done: oneshot::Sender<()>,
    },
    SetIdle {
        done: oneshot::Sender<()>,
    },
    Shutdown {
        done: oneshot::Sender<()>,
    },
}

// ============================================================================
// Shared State
// ============================================================================

/// Track state readable from the consumer side without messaging the actor.
pub(crate) struct TrackShared {
    buffered: RwLock<Arc<TimeIntervals>>,
    /// Set by the reader when a data request is issued, cleared by the actor
    /// when it settles.
    pub request_pending: AtomicBool,
    pub size_of_queue: AtomicUsize,
    status: Mutex<TrackStatus>,
    first_frame_time: Mutex<Option<TimeUnit>>,
}

impl TrackShared {
    fn new() -> Self {
        Self {
            buffered: RwLock::new(Arc::new(TimeIntervals::default())),
            request_pending: AtomicBool::new(false),
            size_of_queue: AtomicUsize::new(0),
            status: Mutex::new(TrackStatus::Idle),
            first_frame_time: Mutex::new(None),
        }
    }

    /// Latest published buffered ranges.
    pub fn buffered(&self) -> Arc<TimeIntervals> {
        self.buffered.read().clone()
    }

    pub fn publish_buffered(&self, ranges: TimeIntervals) {
        *self.buffered.write() = Arc::new(ranges);
    }

    pub fn status(&self) -> TrackStatus {
        *self.status.lock()
    }

    pub fn set_status(&self, status: TrackStatus) {
        *self.status.lock() = status;
    }

    /// Time of the first frame ever handed to the consumer.
    pub fn first_frame_time(&self) -> Option<TimeUnit> {
        *self.first_frame_time.lock()
    }

    pub fn record_first_frame(&self, time: TimeUnit) {
        self.first_frame_time.lock().get_or_insert(time);
    }

    pub fn is_request_pending(&self) -> bool {
        self.request_pending.load(Ordering::SeqCst)
    }
}

// ============================================================================
// Context
// ============================================================================

/// Everything an actor needs from its reader.
#[derive(Clone)]
pub(crate) struct TrackContext {
    pub reader_id: Uuid,
    pub decode_ahead: usize,
    pub demux_batch_size: u32,
    pub prefer_shared_decoder: bool,
    pub platform: Arc<dyn PlatformDecoderModule>,
    pub shared_decoder_manager: Arc<RwLock<Option<Arc<dyn SharedDecoderManager>>>>,
    pub events: EventBus,
    pub stats: Arc<FrameStatistics>,
    pub media_info: Arc<RwLock<MediaInfo>>,
    pub encrypted: bool,
}

impl TrackContext {
    #[allow(clippy::too_many_arguments)]
    pub fn for_track(
        track: TrackType,
        reader_id: Uuid,
        config: &ReaderConfig,
        platform: Arc<dyn PlatformDecoderModule>,
        shared_decoder_manager: Arc<RwLock<Option<Arc<dyn SharedDecoderManager>>>>,
        events: EventBus,
        stats: Arc<FrameStatistics>,
        media_info: Arc<RwLock<MediaInfo>>,
        encrypted: bool,
    ) -> Self {
        Self {
            reader_id,
            decode_ahead: config.decode_ahead(track),
            demux_batch_size: config.demux_batch_size,
            prefer_shared_decoder: config.prefer_shared_video_decoder,
            platform,
            shared_decoder_manager,
            events,
            stats,
            media_info,
            encrypted,
        }
    }
}

// ============================================================================
// Handle
// ============================================================================

/// The reader's side of a running track actor.
///
/// Dropping the handle stops the actor.
pub(crate) struct TrackHandle {
    pub track: TrackType,
    tx: mpsc::UnboundedSender<TrackEvent>,
    pub shared: Arc<TrackShared>,
    join: Mutex<Option<JoinHandle<()>>>,
    _stop: DropGuard,
}

impl TrackHandle {
    /// Queues an event. Returns `false` if the actor has stopped; any
    /// resolver carried by the event is then dropped and settles as canceled.
    pub fn send(&self, event: TrackEvent) -> bool {
        self.tx.send(event).is_ok()
    }

    /// Tears the actor down and waits for its task to finish.
    pub async fn shutdown(&self) {
        let (done, finished) = oneshot::channel();
        if self.send(TrackEvent::Shutdown { done }) {
            let _ = finished.await;
        }
        let join = self.join.lock().take();
        if let Some(join) = join {
            if let Err(e) = join.await {
                tracing::warn!(track = %self.track, error = %e, "Track actor ended abnormally");
            }
        }
    }
}

/// Starts the actor for `track`.
pub(crate) fn spawn(
    track: TrackType,
    demuxer: Arc<dyn MediaTrackDemuxer>,
    ctx: TrackContext,
) -> TrackHandle {
    let (tx, rx) = mpsc::unbounded_channel();
    let shared = Arc::new(TrackShared::new());
    let stop = CancellationToken::new();
    let span = info_span!("track_loop", track = %track, reader_id = %ctx.reader_id);

    let worker = TrackWorker::new(track, demuxer, ctx, tx.clone(), shared.clone());
    let join = core_async::task::spawn(worker.run(rx, stop.clone()).instrument(span));
    debug!(track = %track, "Spawned track actor");

    TrackHandle {
        track,
        tx,
        shared,
        join: Mutex::new(Some(join)),
        _stop: stop.drop_guard(),
    }
}
