//! Per-track decode bookkeeping, owned exclusively by the track actor.

use super::{TrackStatus, WaitReason};
use crate::error::{NotDecodedReason, ReaderError, Result};
use crate::interval::{TimeIntervals, TimeUnit};
use crate::media::{MediaData, MediaRawData, TrackType};
use core_async::promise::{PromiseHolder, RequestHolder};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

// ============================================================================
// Drain State Machine
// ============================================================================

/// Progress of a decoder drain.
///
/// ```text
/// None ──> Pending ──> Draining ──> Complete ──> None
///             └────────────────────────^
/// ```
///
/// Any state may return to `None` on reset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DrainState {
    #[default]
    None,
    /// Requested, decoder not told yet
    Pending,
    /// Decoder is flushing out its held frames
    Draining,
    /// Drain-complete observed, outcome not yet delivered
    Complete,
}

impl DrainState {
    pub fn can_transition(self, next: DrainState) -> bool {
        use DrainState::*;
        matches!(
            (self, next),
            (None, Pending)
                | (Pending, Draining)
                | (Pending, Complete)
                | (Draining, Complete)
                | (_, None)
        )
    }

    /// Moves to `next`, refusing moves outside the legal table.
    pub fn transition(&mut self, next: DrainState) -> Result<()> {
        if !self.can_transition(next) {
            return Err(ReaderError::IllegalTransition {
                from: *self,
                to: next,
            });
        }
        *self = next;
        Ok(())
    }
}

// ============================================================================
// Track State
// ============================================================================

pub(crate) struct TrackState {
    pub track: TrackType,
    pub queued: VecDeque<MediaRawData>,
    pub output: VecDeque<MediaData>,
    pub decode_ahead: usize,
    pub num_input: u64,
    pub num_output: u64,
    pub last_reported_decoded: u64,

    pub waiting: Option<WaitReason>,
    pub demux_eos: bool,
    /// EOS has been delivered to a consumer after the final drain.
    pub demux_eos_serviced: bool,
    pub error: bool,
    pub drain: DrainState,
    pub output_requested: bool,
    pub input_exhausted: bool,
    pub update_scheduled: bool,
    pub received_new_data: bool,
    pub discontinuity: bool,

    pub time_threshold: Option<TimeUnit>,
    /// Earliest sample fed to the current decoder contents.
    pub first_input_time: Option<TimeUnit>,
    /// Latest frame the current decoder contents produced.
    pub last_output_time: Option<TimeUnit>,
    pub last_stream_source_id: u32,
    pub next_stream_source_id: Option<u32>,

    pub promise: PromiseHolder<MediaData, NotDecodedReason>,
    pub waiting_promise: PromiseHolder<TrackType, NotDecodedReason>,
    pub demux_request: RequestHolder,
    pub seek_request: RequestHolder,
    pub skip_request: RequestHolder,

    pub time_ranges: TimeIntervals,
}

impl TrackState {
    pub fn new(track: TrackType, decode_ahead: usize, stream_source_id: u32) -> Self {
        Self {
            track,
            queued: VecDeque::new(),
            output: VecDeque::new(),
            decode_ahead,
            num_input: 0,
            num_output: 0,
            last_reported_decoded: 0,
            waiting: None,
            demux_eos: false,
            demux_eos_serviced: false,
            error: false,
            drain: DrainState::None,
            output_requested: false,
            input_exhausted: false,
            update_scheduled: false,
            received_new_data: false,
            discontinuity: false,
            time_threshold: None,
            first_input_time: None,
            last_output_time: None,
            last_stream_source_id: stream_source_id,
            next_stream_source_id: None,
            promise: PromiseHolder::new(),
            waiting_promise: PromiseHolder::new(),
            demux_request: RequestHolder::new(),
            seek_request: RequestHolder::new(),
            skip_request: RequestHolder::new(),
            time_ranges: TimeIntervals::default(),
        }
    }

    pub fn has_promise(&self) -> bool {
        self.promise.exists()
    }

    pub fn in_flight(&self) -> u64 {
        self.num_input.saturating_sub(self.num_output)
    }

    /// Whether the pipeline should pull more samples for the pending request.
    pub fn need_input(&self) -> bool {
        self.drain == DrainState::None
            && !self.error
            && self.has_promise()
            && !self.demux_request.exists()
            && !self.seek_request.exists()
            && !self.skip_request.exists()
            && self.output.is_empty()
            && (self.input_exhausted
                || !self.queued.is_empty()
                || self.time_threshold.is_some()
                || self.in_flight() < self.decode_ahead as u64)
    }

    /// Asks for a drain unless one is already under way.
    pub fn request_drain(&mut self) {
        if self.drain == DrainState::None {
            self.drain = DrainState::Pending;
        }
    }

    /// Moves the drain machine, logging and ignoring illegal moves.
    pub fn set_drain(&mut self, next: DrainState) {
        if let Err(e) = self.drain.transition(next) {
            tracing::warn!(track = %self.track, error = %e, "Ignoring drain transition");
        }
    }

    /// Clears everything tied to the decoder's current contents.
    ///
    /// The error flag survives: a broken track stays broken until it is
    /// released.
    pub fn reset(&mut self) {
        self.demux_eos = false;
        self.demux_eos_serviced = false;
        self.waiting = None;
        self.received_new_data = false;
        self.queued.clear();
        self.output_requested = false;
        self.input_exhausted = false;
        self.drain = DrainState::None;
        self.output.clear();
        self.num_input = 0;
        self.num_output = 0;
        self.last_reported_decoded = 0;
        self.time_threshold = None;
        self.first_input_time = None;
        self.last_output_time = None;
        self.discontinuity = true;
    }

    /// Where decoding must resume to regenerate every frame not yet handed
    /// out, once the decoder holding them is replaced. `None` when nothing is
    /// in flight and the output queue can be kept as is.
    pub fn resume_point(&self) -> Option<TimeUnit> {
        if self.in_flight() == 0 {
            return None;
        }
        self.output
            .front()
            .map(|frame| frame.time)
            .or_else(|| {
                self.last_output_time
                    .map(|last| last + TimeUnit::from_micros(1))
            })
            .or(self.first_input_time)
    }

    pub fn status(&self) -> TrackStatus {
        if self.error {
            TrackStatus::Errored
        } else if self.drain != DrainState::None {
            TrackStatus::Draining
        } else if let Some(reason) = self.waiting {
            TrackStatus::WaitingForData(reason)
        } else if self.demux_request.exists() {
            TrackStatus::Demuxing
        } else if !self.queued.is_empty() || self.num_input != self.num_output {
            TrackStatus::Decoding
        } else {
            TrackStatus::Idle
        }
    }
}
