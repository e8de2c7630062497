//! # Seek Coordination
//!
//! A seek moves the video track first and then the audio track to the time
//! video actually reached, so both resume from the same keyframe-aligned
//! position. The seek resolves with the video-achieved time (audio's when
//! there is no video).
//!
//! A track that reports `WaitingForData` keeps the seek pending: the
//! coordinator parks until the reader's data generation moves and then
//! retries the same step. Reset and shutdown cancel the parked seek.

use crate::error::{DemuxerFailureReason, ReaderError, Result};
use crate::interval::TimeUnit;
use crate::track::{TrackEvent, TrackHandle};
use core_async::promise::Resolver;
use core_async::sync::{oneshot, watch, CancellationToken};
use core_runtime::events::{CoreEvent, EventBus, ReaderEvent};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info, warn};

// ============================================================================
// Seek Slot
// ============================================================================

struct PendingSeek {
    id: u64,
    target: TimeUnit,
    resolver: Resolver<TimeUnit, ReaderError>,
    cancel: CancellationToken,
}

/// The reader's single outstanding seek, if any.
#[derive(Default)]
pub(crate) struct SeekSlot {
    generation: u64,
    pending: Option<PendingSeek>,
}

impl SeekSlot {
    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn target(&self) -> Option<TimeUnit> {
        self.pending.as_ref().map(|seek| seek.target)
    }

    /// Stores a new pending seek and returns its id.
    pub fn begin(
        &mut self,
        target: TimeUnit,
        resolver: Resolver<TimeUnit, ReaderError>,
        cancel: CancellationToken,
    ) -> u64 {
        self.generation += 1;
        self.pending = Some(PendingSeek {
            id: self.generation,
            target,
            resolver,
            cancel,
        });
        self.generation
    }

    /// Settles seek `id`. Returns `false` if it was already canceled.
    pub fn finish(&mut self, id: u64, result: Result<TimeUnit>) -> bool {
        match self.pending.take() {
            Some(seek) if seek.id == id => {
                match result {
                    Ok(time) => seek.resolver.resolve(time),
                    Err(e) => seek.resolver.reject(e),
                };
                true
            }
            other => {
                self.pending = other;
                false
            }
        }
    }

    /// Cancels the pending seek, rejecting it with `Canceled`.
    pub fn cancel(&mut self) -> bool {
        match self.pending.take() {
            Some(seek) => {
                debug!(target = %seek.target, "Canceling pending seek");
                seek.cancel.cancel();
                seek.resolver.reject(ReaderError::Canceled);
                true
            }
            None => false,
        }
    }
}

// ============================================================================
// Coordinator
// ============================================================================

/// Drives one seek across the tracks. Spawned by the reader.
pub(crate) struct SeekCoordinator {
    pub id: u64,
    pub target: TimeUnit,
    pub video: Option<Arc<TrackHandle>>,
    pub audio: Option<Arc<TrackHandle>>,
    pub slot: Arc<Mutex<SeekSlot>>,
    pub data: watch::Receiver<u64>,
    pub cancel: CancellationToken,
    pub events: EventBus,
}

impl SeekCoordinator {
    pub async fn run(mut self) {
        let result = match self.execute().await {
            Some(Ok(time)) => {
                info!(%time, "Seek completed");
                let _ = self.events.emit(CoreEvent::Reader(ReaderEvent::SeekCompleted {
                    time_us: time.as_micros(),
                }));
                Ok(time)
            }
            Some(Err(e)) => {
                warn!(error = %e, "Seek failed");
                let _ = self.events.emit(CoreEvent::Reader(ReaderEvent::SeekFailed {
                    message: e.to_string(),
                }));
                Err(e)
            }
            None => {
                debug!("Seek aborted");
                Err(ReaderError::Canceled)
            }
        };
        self.slot.lock().finish(self.id, result);
    }

    async fn execute(&mut self) -> Option<Result<TimeUnit>> {
        let mut target = self.target;
        let mut landed = None;

        if let Some(video) = self.video.clone() {
            match self.seek_track(&video, target).await? {
                Ok(time) => {
                    target = time;
                    landed = Some(time);
                }
                Err(e) => return Some(Err(e)),
            }
        }

        if let Some(audio) = self.audio.clone() {
            match self.seek_track(&audio, target).await? {
                Ok(time) => {
                    landed.get_or_insert(time);
                }
                Err(e) => return Some(Err(e)),
            }
        }

        Some(landed.ok_or(ReaderError::NoTracks))
    }

    /// Seeks one track, retrying while it waits for data. `None` means the
    /// seek was aborted.
    async fn seek_track(
        &mut self,
        handle: &TrackHandle,
        target: TimeUnit,
    ) -> Option<Result<TimeUnit>> {
        loop {
            if self.cancel.is_cancelled() {
                return None;
            }
            // Anything arriving after this point wakes a parked retry.
            self.data.borrow_and_update();

            let (reply, response) = oneshot::channel();
            if !handle.send(TrackEvent::Seek { target, reply }) {
                return None;
            }

            let result = core_async::select! {
                _ = self.cancel.cancelled() => return None,
                result = response => result,
            };

            match result {
                Ok(Ok(time)) => {
                    debug!(track = %handle.track, %time, "Track seeked");
                    return Some(Ok(time));
                }
                Ok(Err(DemuxerFailureReason::WaitingForData)) => {
                    debug!(track = %handle.track, "Seek waiting for data");
                    core_async::select! {
                        _ = self.cancel.cancelled() => return None,
                        changed = self.data.changed() => {
                            if changed.is_err() {
                                return None;
                            }
                        }
                    }
                }
                Ok(Err(reason)) if reason.is_abort() => return None,
                Ok(Err(reason)) => {
                    return Some(Err(ReaderError::SeekFailed {
                        track: handle.track,
                        reason,
                    }))
                }
                Err(_) => return None,
            }
        }
    }
}
