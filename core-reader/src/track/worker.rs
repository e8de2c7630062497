//! The per-track actor: one task, one event queue, one owner of the decoder.

use super::state::{DrainState, TrackState};
use super::{SampleResult, SeekResult, TrackContext, TrackEvent, TrackShared, WaitReason};
use crate::error::{DemuxerFailureReason, NotDecodedReason, ReaderError, SkipFailure};
use crate::interval::TimeUnit;
use crate::media::{MediaData, MediaKind, TrackInfo, TrackParams, TrackType};
use crate::stats::FrameCounter;
use crate::traits::{MediaDataDecoder, MediaDataDecoderCallback, MediaTrackDemuxer};
use core_async::promise::{RequestId, Resolver};
use core_async::sync::{mpsc, oneshot, CancellationToken};
use core_runtime::events::{CoreEvent, ReaderEvent};
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

// ============================================================================
// Decoder Callback
// ============================================================================

/// Forwards decoder callbacks into the actor's queue, tagged with the decoder
/// epoch current at send time. The epoch moves on every flush, so callbacks
/// racing a flush are recognized as stale and dropped.
struct DecoderCallbackProxy {
    epoch: Arc<AtomicU64>,
    tx: mpsc::UnboundedSender<TrackEvent>,
}

impl DecoderCallbackProxy {
    fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }
}

impl MediaDataDecoderCallback for DecoderCallbackProxy {
    fn output(&self, data: MediaData) {
        let epoch = self.epoch();
        let _ = self.tx.send(TrackEvent::DecoderOutput { epoch, data });
    }

    fn input_exhausted(&self) {
        let epoch = self.epoch();
        let _ = self.tx.send(TrackEvent::InputExhausted { epoch });
    }

    fn error(&self, message: String) {
        let epoch = self.epoch();
        let _ = self.tx.send(TrackEvent::DecoderError { epoch, message });
    }

    fn drain_complete(&self) {
        let epoch = self.epoch();
        let _ = self.tx.send(TrackEvent::DrainComplete { epoch });
    }
}

// ============================================================================
// Worker
// ============================================================================

pub(super) struct TrackWorker {
    track: TrackType,
    ctx: TrackContext,
    demuxer: Arc<dyn MediaTrackDemuxer>,
    decoder: Option<Box<dyn MediaDataDecoder>>,
    info: Arc<TrackInfo>,
    state: TrackState,
    seek_reply: Option<oneshot::Sender<SeekResult>>,
    tx: mpsc::UnboundedSender<TrackEvent>,
    shared: Arc<TrackShared>,
    epoch: Arc<AtomicU64>,
    shutdown: bool,
}

impl TrackWorker {
    pub(super) fn new(
        track: TrackType,
        demuxer: Arc<dyn MediaTrackDemuxer>,
        ctx: TrackContext,
        tx: mpsc::UnboundedSender<TrackEvent>,
        shared: Arc<TrackShared>,
    ) -> Self {
        let info = demuxer.info();
        let mut state = TrackState::new(track, ctx.decode_ahead, info.id);
        state.time_ranges = demuxer.buffered();
        shared.publish_buffered(state.time_ranges.clone());
        Self {
            track,
            ctx,
            demuxer,
            decoder: None,
            info,
            state,
            seek_reply: None,
            tx,
            shared,
            epoch: Arc::new(AtomicU64::new(0)),
            shutdown: false,
        }
    }

    pub(super) async fn run(
        mut self,
        mut rx: mpsc::UnboundedReceiver<TrackEvent>,
        stop: CancellationToken,
    ) {
        debug!("Track actor started");
        loop {
            let event = core_async::select! {
                biased;
                _ = stop.cancelled() => None,
                event = rx.recv() => event,
            };
            let Some(event) = event else { break };

            let flow = self.handle(event);
            self.publish_status();
            if flow.is_break() {
                break;
            }
        }

        if !self.shutdown {
            self.teardown();
        }
        debug!("Track actor stopped");
    }

    fn handle(&mut self, event: TrackEvent) -> ControlFlow<()> {
        match event {
            TrackEvent::Update => self.update(),
            TrackEvent::Request {
                resolver,
                skip_to_keyframe,
                time_threshold,
            } => self.on_request(resolver, skip_to_keyframe, time_threshold),
            TrackEvent::WaitForData { resolver } => self.on_wait_for_data(resolver),
            TrackEvent::DataArrived => {
                self.state.received_new_data = true;
                self.schedule_update();
            }
            TrackEvent::DemuxCompleted { id, result } => self.on_demux_completed(id, result),
            TrackEvent::SkipCompleted { id, result } => self.on_skip_completed(id, result),
            TrackEvent::InternalSeekCompleted { id, result } => {
                self.on_internal_seek_completed(id, result)
            }
            TrackEvent::Seek { target, reply } => self.on_seek(target, reply),
            TrackEvent::SeekCompleted { id, result } => self.on_seek_completed(id, result),
            TrackEvent::DecoderOutput { epoch, data } if self.is_current(epoch) => {
                self.on_decoder_output(data)
            }
            TrackEvent::InputExhausted { epoch } if self.is_current(epoch) => {
                self.state.input_exhausted = true;
                self.schedule_update();
            }
            TrackEvent::DecoderError { epoch, message } if self.is_current(epoch) => {
                self.notify_error(&message)
            }
            TrackEvent::DrainComplete { epoch } if self.is_current(epoch) => {
                self.on_drain_complete()
            }
            TrackEvent::DecoderOutput { .. }
            | TrackEvent::InputExhausted { .. }
            | TrackEvent::DecoderError { .. }
            | TrackEvent::DrainComplete { .. } => {
                trace!("Dropping callback from a flushed decoder");
            }
            TrackEvent::EnsureDecoder { reply } => {
                let _ = reply.send(self.ensure_decoder());
            }
            TrackEvent::ResetDecode { done } => {
                self.reset_decode();
                let _ = done.send(());
            }
            TrackEvent::ReleaseDecoder { done } => {
                self.release_decoder();
                let _ = done.send(());
            }
            TrackEvent::DisableHardwareAcceleration { done } => {
                self.disable_hardware_acceleration();
                let _ = done.send(());
            }
            TrackEvent::SetIdle { done } => {
                self.set_idle();
                let _ = done.send(());
            }
            TrackEvent::Shutdown { done } => {
                self.teardown();
                let _ = done.send(());
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }

    fn is_current(&self, epoch: u64) -> bool {
        self.epoch.load(Ordering::SeqCst) == epoch
    }

    fn publish_status(&self) {
        self.shared.set_status(self.state.status());
    }

    fn emit(&self, event: ReaderEvent) {
        let _ = self.ctx.events.emit(CoreEvent::Reader(event));
    }

    fn schedule_update(&mut self) {
        if self.shutdown || self.state.update_scheduled {
            return;
        }
        self.state.update_scheduled = true;
        let _ = self.tx.send(TrackEvent::Update);
    }

    // ========================================================================
    // Scheduler
    // ========================================================================

    fn update(&mut self) {
        if self.shutdown {
            return;
        }
        self.state.update_scheduled = false;

        if self.update_received_new_data() {
            return;
        }

        if !self.state.has_promise() && self.state.waiting.is_some() {
            trace!("Still waiting for data");
            return;
        }

        let video = self.track == TrackType::Video;
        let mut counter = FrameCounter::new(video.then(|| self.ctx.stats.clone()));
        if video {
            counter.decoded = self
                .state
                .num_output
                .saturating_sub(self.state.last_reported_decoded);
            self.state.last_reported_decoded = self.state.num_output;
        }

        if self.state.has_promise() {
            if !self.state.output.is_empty() {
                self.deliver_output();
            } else if self.state.drain == DrainState::Complete {
                self.state.set_drain(DrainState::None);
                if self.state.error {
                    self.reject(NotDecodedReason::DecodeError);
                    return;
                }
                if self.state.demux_eos {
                    self.reject(NotDecodedReason::EndOfStream);
                    self.state.demux_eos_serviced = true;
                }
            } else if self.state.demux_eos && self.state.demux_eos_serviced {
                self.reject(NotDecodedReason::EndOfStream);
                return;
            } else if self.state.error
                && (self.decoder.is_none() || self.state.drain == DrainState::None)
            {
                self.reject(NotDecodedReason::DecodeError);
                return;
            } else if self.state.waiting.is_some() {
                self.reject(NotDecodedReason::WaitingForData);
                return;
            }
        }

        if self.state.drain == DrainState::Pending {
            self.drain_decoder();
            return;
        }

        if !self.state.need_input() {
            trace!("No need for additional input");
            return;
        }

        self.request_demux_samples();
        self.decode_demuxed_samples(&mut counter);
    }

    /// Returns the oldest frame at or above the time threshold, dropping the
    /// ones below it.
    fn deliver_output(&mut self) {
        while let Some(frame) = self.state.output.pop_front() {
            let _ = self
                .shared
                .size_of_queue
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
            match self.state.time_threshold {
                Some(threshold) if frame.time < threshold => {
                    trace!(time = %frame.time, %threshold, "Internal seek: dropping frame");
                }
                _ => {
                    self.state.time_threshold = None;
                    self.return_output(frame);
                    return;
                }
            }
        }
    }

    fn update_received_new_data(&mut self) -> bool {
        if !self.state.received_new_data {
            return false;
        }
        self.state.received_new_data = false;
        self.state.waiting = None;

        let last_end = self.state.time_ranges.end();
        self.state.time_ranges = self.demuxer.buffered();
        self.shared.publish_buffered(self.state.time_ranges.clone());
        if let Some(end) = self.state.time_ranges.end() {
            if last_end.map_or(true, |last| end > last) {
                // Data was appended past the previous end; EOS may no longer hold.
                self.state.demux_eos = false;
                self.state.demux_eos_serviced = false;
            }
        }

        if self.state.error {
            return false;
        }
        if self.state.waiting_promise.exists() {
            debug!("New data, resolving wait");
            self.state.waiting_promise.resolve(self.track);
            return true;
        }
        false
    }

    fn request_demux_samples(&mut self) {
        if !self.state.queued.is_empty() || self.state.demux_eos {
            return;
        }

        let demuxer = self.demuxer.clone();
        let tx = self.tx.clone();
        let count = self.ctx.demux_batch_size;
        let begun = self.state.demux_request.begin(move |id| async move {
            let result = demuxer.get_samples(count).await;
            let _ = tx.send(TrackEvent::DemuxCompleted { id, result });
        });
        if begun.is_err() {
            trace!("Demux request already in flight");
        }
    }

    fn decode_demuxed_samples(&mut self, counter: &mut FrameCounter) {
        let mut samples_pending = false;

        loop {
            let Some(front) = self.state.queued.front() else {
                break;
            };
            let keyframe = front.keyframe;
            let time = front.time;
            let changed = front
                .track_info
                .as_ref()
                .filter(|info| info.id != self.state.last_stream_source_id)
                .cloned();

            if let Some(info) = changed {
                if samples_pending {
                    // Let the samples already fed finish first.
                    return;
                }
                if self.state.next_stream_source_id != Some(info.id) {
                    debug!(
                        from = self.state.last_stream_source_id,
                        to = info.id,
                        "Stream id changed, draining decoder"
                    );
                    self.state.request_drain();
                    self.state.next_stream_source_id = Some(info.id);
                    self.schedule_update();
                    return;
                }

                if !self.recreate_decoder(info) {
                    return;
                }
                let samples = std::mem::take(&mut self.state.queued);
                if keyframe {
                    self.state.queued = samples;
                    continue;
                }
                debug!(time = %time, "Stream change on a non-keyframe, seeking");
                self.state.time_threshold = Some(time);
                self.begin_internal_seek(time);
                return;
            }

            let Some(sample) = self.state.queued.pop_front() else {
                break;
            };
            trace!(time = %sample.time, keyframe = sample.keyframe, "Input");
            self.state.first_input_time.get_or_insert(sample.time);
            self.state.output_requested = true;
            self.state.num_input += 1;
            self.shared.size_of_queue.fetch_add(1, Ordering::SeqCst);
            if self.track == TrackType::Video {
                counter.parsed += 1;
            }

            let result = match self.decoder.as_mut() {
                Some(decoder) => decoder.input(sample),
                None => Err(ReaderError::Internal("no decoder".to_string())),
            };
            if let Err(e) = result {
                warn!(error = %e, "Unable to pass sample to decoder");
                self.notify_error(&e.to_string());
                return;
            }
            samples_pending = true;
        }

        self.state.input_exhausted = false;
        if samples_pending && self.state.need_input() {
            // Keep filling the decode-ahead window.
            self.schedule_update();
        }
    }

    /// Replaces the decoder for a new stream configuration. Queued samples
    /// survive the flush. Returns `false` if the track is now in error.
    fn recreate_decoder(&mut self, info: Arc<TrackInfo>) -> bool {
        debug!(
            from = self.state.last_stream_source_id,
            to = info.id,
            "Stream id changed, recreating decoder"
        );
        self.state.last_stream_source_id = info.id;
        self.state.next_stream_source_id = None;
        self.info = info;
        {
            let mut media_info = self.ctx.media_info.write();
            match self.track {
                TrackType::Audio => media_info.audio = Some((*self.info).clone()),
                TrackType::Video => media_info.video = Some((*self.info).clone()),
            }
        }

        let samples = std::mem::take(&mut self.state.queued);
        self.flush();
        self.state.queued = samples;
        if let Some(mut decoder) = self.decoder.take() {
            decoder.shutdown();
        }

        if let Err(e) = self.ensure_decoder() {
            warn!(error = %e, "Unable to recreate decoder");
            self.notify_error(&e.to_string());
            return false;
        }
        self.emit(ReaderEvent::DecoderRecreated {
            track: self.track.to_string(),
            stream_id: self.info.id,
        });
        true
    }

    fn drain_decoder(&mut self) {
        if self.state.drain != DrainState::Pending {
            return;
        }
        // Must be set or the drain-complete callback is ignored after a
        // recent flush.
        self.state.output_requested = true;

        let in_flight = self.state.num_input != self.state.num_output;
        let result = match self.decoder.as_mut() {
            Some(decoder) if in_flight => Some(decoder.drain()),
            _ => None,
        };

        match result {
            None => {
                trace!("Nothing to drain");
                self.state.set_drain(DrainState::Complete);
                self.schedule_update();
            }
            Some(Ok(())) => {
                debug!("Requesting decoder drain");
                self.state.set_drain(DrainState::Draining);
            }
            Some(Err(e)) => {
                warn!(error = %e, "Decoder drain failed");
                self.state.error = true;
                self.state.set_drain(DrainState::Complete);
                self.schedule_update();
            }
        }
    }

    fn return_output(&mut self, mut frame: MediaData) {
        if std::mem::take(&mut self.state.discontinuity) {
            frame.discontinuity = true;
        }

        match frame.kind {
            MediaKind::Audio { rate, channels, .. } => {
                let mut media_info = self.ctx.media_info.write();
                if let Some(TrackParams::Audio(params)) =
                    media_info.audio.as_mut().map(|audio| &mut audio.params)
                {
                    if params.rate != rate || params.channels != channels {
                        warn!(
                            old_rate = params.rate,
                            new_rate = rate,
                            "Audio format changed mid-stream"
                        );
                        params.rate = rate;
                        params.channels = channels;
                    }
                }
            }
            MediaKind::Video { width, height } => {
                let mut media_info = self.ctx.media_info.write();
                if let Some(TrackParams::Video(params)) =
                    media_info.video.as_mut().map(|video| &mut video.params)
                {
                    if params.width != width || params.height != height {
                        debug!(width, height, "Video display size changed");
                        params.width = width;
                        params.height = height;
                    }
                }
            }
        }

        trace!(time = %frame.time, "Returning frame");
        self.shared.record_first_frame(frame.time);
        self.shared.request_pending.store(false, Ordering::SeqCst);
        self.state.promise.resolve(frame);
    }

    fn reject(&mut self, reason: NotDecodedReason) {
        if !self.state.has_promise() {
            return;
        }
        debug!(%reason, "Rejecting request");
        self.shared.request_pending.store(false, Ordering::SeqCst);
        self.state.promise.reject(reason);
    }

    // ========================================================================
    // Notifications
    // ========================================================================

    fn notify_error(&mut self, message: &str) {
        warn!(error = %message, "Track error");
        self.state.error = true;
        self.state.request_drain();
        self.schedule_update();
        self.emit(ReaderEvent::DecodeError {
            track: self.track.to_string(),
            message: message.to_string(),
        });
    }

    fn notify_end_of_stream(&mut self) {
        debug!("End of stream");
        self.state.demux_eos = true;
        self.state.request_drain();
        self.schedule_update();
        self.emit(ReaderEvent::EndOfStream {
            track: self.track.to_string(),
        });
    }

    fn notify_waiting_for_data(&mut self, reason: WaitReason) {
        debug!(?reason, "Waiting for data");
        self.state.waiting = Some(reason);
        self.schedule_update();
        self.emit(ReaderEvent::WaitingForData {
            track: self.track.to_string(),
        });
    }

    // ========================================================================
    // Event Handlers
    // ========================================================================

    fn on_request(
        &mut self,
        resolver: Resolver<MediaData, NotDecodedReason>,
        skip_to_keyframe: bool,
        time_threshold: TimeUnit,
    ) {
        if let Err(resolver) = self.state.promise.hold(resolver) {
            warn!("Data request while another is pending");
            resolver.reject(NotDecodedReason::Canceled);
            return;
        }

        if let Err(e) = self.ensure_decoder() {
            warn!(error = %e, "Decoder unavailable");
            self.reject(NotDecodedReason::DecodeError);
            return;
        }

        if self.track == TrackType::Video && self.should_skip(skip_to_keyframe, time_threshold) {
            self.state.demux_request.disconnect();
            let queued = self.shared.size_of_queue.load(Ordering::SeqCst) as u64;
            self.ctx.stats.notify_decoded_frames(0, 0, queued);
            self.flush();
            self.skip_to_next_keyframe(time_threshold);
            return;
        }

        self.schedule_update();
    }

    fn should_skip(&self, skip_to_keyframe: bool, threshold: TimeUnit) -> bool {
        match self.demuxer.next_random_access_point() {
            Some(next) => next < threshold && !next.is_negative(),
            None => skip_to_keyframe,
        }
    }

    fn skip_to_next_keyframe(&mut self, threshold: TimeUnit) {
        debug!(%threshold, "Skipping to next keyframe");
        if self.state.error {
            self.reject(NotDecodedReason::DecodeError);
            return;
        }

        let demuxer = self.demuxer.clone();
        let tx = self.tx.clone();
        let begun = self.state.skip_request.begin(move |id| async move {
            let result = demuxer.skip_to_next_random_access_point(threshold).await;
            let _ = tx.send(TrackEvent::SkipCompleted { id, result });
        });
        if begun.is_err() {
            trace!("Skip already in flight");
        }
    }

    fn on_skip_completed(&mut self, id: RequestId, result: Result<u32, SkipFailure>) {
        if !self.state.skip_request.complete(id) {
            return;
        }
        match result {
            Ok(skipped) => {
                debug!(skipped, "Skip succeeded");
                let skipped = u64::from(skipped);
                self.ctx.stats.notify_decoded_frames(skipped, 0, skipped);
                self.schedule_update();
            }
            Err(SkipFailure { failure, skipped }) => {
                debug!(skipped, %failure, "Skip failed");
                let skipped = u64::from(skipped);
                self.ctx.stats.notify_decoded_frames(skipped, 0, skipped);
                match failure {
                    DemuxerFailureReason::EndOfStream => {
                        self.notify_end_of_stream();
                        self.reject(NotDecodedReason::EndOfStream);
                    }
                    DemuxerFailureReason::WaitingForData => {
                        self.notify_waiting_for_data(WaitReason::Skip);
                        self.reject(NotDecodedReason::WaitingForData);
                    }
                    DemuxerFailureReason::Canceled | DemuxerFailureReason::Shutdown => {}
                    DemuxerFailureReason::DemuxerError(message) => {
                        self.notify_error(&message);
                        self.reject(NotDecodedReason::DecodeError);
                    }
                }
            }
        }
    }

    fn on_demux_completed(&mut self, id: RequestId, result: SampleResult) {
        if !self.state.demux_request.complete(id) {
            trace!(%id, "Stale demux completion");
            return;
        }
        match result {
            Ok(samples) => {
                trace!(count = samples.len(), "Demuxed samples");
                self.state.queued.extend(samples);
                self.schedule_update();
            }
            Err(DemuxerFailureReason::EndOfStream) => self.notify_end_of_stream(),
            Err(DemuxerFailureReason::WaitingForData) => {
                self.notify_waiting_for_data(WaitReason::Demux)
            }
            Err(DemuxerFailureReason::DemuxerError(message)) => self.notify_error(&message),
            Err(DemuxerFailureReason::Canceled | DemuxerFailureReason::Shutdown) => {
                self.reject(NotDecodedReason::Canceled);
                self.schedule_update();
            }
        }
    }

    fn begin_internal_seek(&mut self, target: TimeUnit) {
        self.state.demux_request.disconnect();
        self.state.seek_request.disconnect();
        self.demuxer.reset();
        self.state.queued.clear();

        let demuxer = self.demuxer.clone();
        let tx = self.tx.clone();
        let begun = self.state.seek_request.begin(move |id| async move {
            let result = demuxer.seek(target).await;
            let _ = tx.send(TrackEvent::InternalSeekCompleted { id, result });
        });
        if begun.is_err() {
            trace!("Seek already in flight");
        }
    }

    fn on_internal_seek_completed(&mut self, id: RequestId, result: SeekResult) {
        if !self.state.seek_request.complete(id) {
            return;
        }
        let failure = match result {
            Ok(time) => {
                debug!(%time, "Internal seek completed");
                self.schedule_update();
                return;
            }
            Err(failure) => failure,
        };

        match failure {
            DemuxerFailureReason::WaitingForData => {
                self.notify_waiting_for_data(WaitReason::Seek)
            }
            DemuxerFailureReason::EndOfStream => self.notify_end_of_stream(),
            DemuxerFailureReason::Canceled | DemuxerFailureReason::Shutdown => {}
            DemuxerFailureReason::DemuxerError(message) => self.notify_error(&message),
        }
        self.state.time_threshold = None;
    }

    fn on_seek(&mut self, target: TimeUnit, reply: oneshot::Sender<SeekResult>) {
        self.state.seek_request.disconnect();
        self.state.skip_request.disconnect();
        if let Some(previous) = self.seek_reply.take() {
            let _ = previous.send(Err(DemuxerFailureReason::Canceled));
        }
        self.state.demux_request.disconnect();
        self.flush();

        let demuxer = self.demuxer.clone();
        let tx = self.tx.clone();
        let begun = self.state.seek_request.begin(move |id| async move {
            let result = demuxer.seek(target).await;
            let _ = tx.send(TrackEvent::SeekCompleted { id, result });
        });
        match begun {
            Ok(_) => {
                debug!(%target, "Seeking");
                self.seek_reply = Some(reply);
            }
            Err(_) => {
                let _ = reply.send(Err(DemuxerFailureReason::Canceled));
            }
        }
    }

    fn on_seek_completed(&mut self, id: RequestId, result: SeekResult) {
        if !self.state.seek_request.complete(id) {
            return;
        }
        match &result {
            Ok(time) => {
                debug!(%time, "Seek completed");
                self.state.waiting = None;
            }
            Err(DemuxerFailureReason::WaitingForData) => {
                self.notify_waiting_for_data(WaitReason::Seek)
            }
            Err(failure) => debug!(%failure, "Seek failed"),
        }
        if let Some(reply) = self.seek_reply.take() {
            let _ = reply.send(result);
        }
    }

    fn on_wait_for_data(&mut self, resolver: Resolver<TrackType, NotDecodedReason>) {
        if self.state.waiting.is_none() {
            resolver.resolve(self.track);
            return;
        }
        if let Err(resolver) = self.state.waiting_promise.hold(resolver) {
            warn!("Wait request while another is pending");
            resolver.reject(NotDecodedReason::Canceled);
            return;
        }
        self.schedule_update();
    }

    fn on_decoder_output(&mut self, data: MediaData) {
        if !self.state.output_requested {
            trace!(time = %data.time, "Ignoring unrequested output");
            return;
        }
        self.state.last_output_time = Some(
            self.state
                .last_output_time
                .map_or(data.time, |last| last.max(data.time)),
        );
        self.state.output.push_back(data);
        self.state.num_output += 1;
        self.schedule_update();
    }

    fn on_drain_complete(&mut self) {
        if !self.state.output_requested {
            trace!("Ignoring drain completion after flush");
            return;
        }
        if matches!(self.state.drain, DrainState::Pending | DrainState::Draining) {
            self.state.set_drain(DrainState::Complete);
        }
        self.schedule_update();
    }

    // ========================================================================
    // Decoder Lifecycle
    // ========================================================================

    fn ensure_decoder(&mut self) -> crate::Result<()> {
        if self.decoder.is_some() {
            return Ok(());
        }
        if self.ctx.encrypted {
            return Err(ReaderError::Encrypted);
        }
        let platform = self.ctx.platform.clone();
        if !platform.supports_mime_type(&self.info.mime_type) {
            return Err(ReaderError::UnsupportedMimeType(self.info.mime_type.clone()));
        }

        let callback: Arc<dyn MediaDataDecoderCallback> = Arc::new(DecoderCallbackProxy {
            epoch: self.epoch.clone(),
            tx: self.tx.clone(),
        });

        let manager = if self.track == TrackType::Video
            && self.ctx.prefer_shared_decoder
            && platform.supports_shared_decoders(&self.info)
        {
            self.ctx.shared_decoder_manager.read().clone()
        } else {
            None
        };

        let mut decoder = match manager {
            Some(manager) => {
                debug!("Creating video decoder through shared manager");
                manager.create_video_decoder(platform, &self.info, callback)?
            }
            None => platform.create_decoder(&self.info, callback)?,
        };

        if let Err(e) = decoder.init() {
            decoder.shutdown();
            return Err(e);
        }

        info!(
            mime_type = %self.info.mime_type,
            stream_id = self.info.id,
            hardware = decoder.is_hardware_accelerated(),
            "Decoder created"
        );
        self.decoder = Some(decoder);
        Ok(())
    }

    fn flush(&mut self) {
        if let Some(decoder) = self.decoder.as_mut() {
            if let Err(e) = decoder.flush() {
                warn!(error = %e, "Decoder flush failed");
            }
        }
        self.epoch.fetch_add(1, Ordering::SeqCst);
        self.state.reset();
        self.shared.size_of_queue.store(0, Ordering::SeqCst);
    }

    fn reset_decode(&mut self) {
        debug!("Resetting decode");
        self.state.seek_request.disconnect();
        self.state.skip_request.disconnect();
        if let Some(reply) = self.seek_reply.take() {
            let _ = reply.send(Err(DemuxerFailureReason::Canceled));
        }
        self.state.waiting_promise.reject(NotDecodedReason::Canceled);

        self.state.demux_request.disconnect();
        self.demuxer.reset();
        self.flush();
        self.reject(NotDecodedReason::Canceled);
    }

    fn release_decoder(&mut self) {
        if self.decoder.is_none() {
            return;
        }
        debug!("Releasing decoder");
        self.flush();
        if let Some(mut decoder) = self.decoder.take() {
            decoder.shutdown();
        }
        self.reject(NotDecodedReason::Canceled);
    }

    /// Asks the shared manager for software decoding and swaps the current
    /// decoder for one created under that policy. Frames already decoded are
    /// kept; samples the old decoder still held are demuxed again.
    fn disable_hardware_acceleration(&mut self) {
        let Some(manager) = self.ctx.shared_decoder_manager.read().clone() else {
            debug!("No shared decoder manager, nothing to disable");
            return;
        };
        info!("Disabling hardware acceleration");
        manager.disable_hardware_acceleration();
        if self.decoder.is_none() {
            // The next decoder is created under the new policy anyway.
            return;
        }

        let resume = self.state.resume_point();
        let discontinuity = self.state.discontinuity;
        // Past a resume point every undelivered frame is decoded again.
        let output = match resume {
            Some(_) => Default::default(),
            None => std::mem::take(&mut self.state.output),
        };
        let queued = std::mem::take(&mut self.state.queued);
        self.flush();
        self.shared.size_of_queue.store(output.len(), Ordering::SeqCst);
        self.state.output = output;
        self.state.queued = queued;
        if let Some(mut decoder) = self.decoder.take() {
            decoder.shutdown();
        }

        if let Err(e) = self.ensure_decoder() {
            warn!(error = %e, "Unable to recreate decoder without hardware acceleration");
            self.notify_error(&e.to_string());
            return;
        }
        self.emit(ReaderEvent::DecoderRecreated {
            track: self.track.to_string(),
            stream_id: self.info.id,
        });

        match resume {
            Some(time) => {
                debug!(%time, "Re-demuxing samples lost with the old decoder");
                self.state.time_threshold = Some(time);
                self.begin_internal_seek(time);
            }
            None => {
                self.state.discontinuity = discontinuity;
                self.schedule_update();
            }
        }
    }

    fn set_idle(&mut self) {
        if self.decoder.is_none() {
            return;
        }
        let Some(manager) = self.ctx.shared_decoder_manager.read().clone() else {
            return;
        };
        debug!("Marking decoder idle");
        manager.set_idle(&self.info);
    }

    /// Releases everything the actor owns; the actor stops afterwards.
    fn teardown(&mut self) {
        self.shutdown = true;
        self.state.skip_request.disconnect();
        self.state.seek_request.disconnect();
        if let Some(reply) = self.seek_reply.take() {
            let _ = reply.send(Err(DemuxerFailureReason::Shutdown));
        }

        self.flush();
        self.reject(NotDecodedReason::Canceled);
        self.state.waiting_promise.reject(NotDecodedReason::Canceled);

        if let Some(mut decoder) = self.decoder.take() {
            decoder.shutdown();
        }

        self.state.demux_request.disconnect();
        self.demuxer.reset();
        self.demuxer.break_cycles();
        debug!("Track torn down");
    }
}
