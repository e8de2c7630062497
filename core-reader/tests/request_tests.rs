//! Data request protocol: ordering, decode-ahead, end of stream, errors and
//! teardown.

mod common;

use common::*;
use core_async::time::{self, Duration};
use core_reader::{
    DemuxerFailureReason, EncryptionInfo, NotDecodedReason, ReaderConfig, ReaderError, TrackInfo,
    TrackParams, TrackStatus, TrackType, VideoParams,
};
use core_runtime::events::{CoreEvent, EventBus, ReaderEvent};
use futures::FutureExt;
use std::sync::Arc;

fn audio_only(samples: i64) -> (ScriptedDemuxer, Arc<ScriptedTrack>) {
    let track = ScriptedTrack::new(audio_info(), audio_samples(samples), Log::default());
    (ScriptedDemuxer::new(Some(track.clone()), None), track)
}

#[core_async::test]
async fn test_read_metadata_reports_tracks() {
    let audio = ScriptedTrack::new(
        audio_info().with_duration(us(2_000)),
        audio_samples(3),
        Log::default(),
    );
    let video = ScriptedTrack::new(
        video_info().with_duration(us(5_000)),
        vec![sample(0, true)],
        Log::default(),
    );
    let platform = ScriptedPlatform::new(DecoderMode::Echo);
    let reader = reader(
        ScriptedDemuxer::new(Some(audio), Some(video)),
        platform.clone(),
        ReaderConfig::default(),
    );

    let info = reader.read_metadata().await.unwrap();
    assert!(info.has_audio());
    assert!(info.has_video());
    assert_eq!(info.duration, Some(us(5_000)));
    assert!(reader.is_initialized());
    assert!(reader.is_seekable());
    // One decoder per track, created while reading metadata.
    assert_eq!(platform.probe.created(), 2);

    reader.shutdown().await;
}

#[core_async::test]
async fn test_read_metadata_without_tracks_fails() {
    let reader = reader(
        ScriptedDemuxer::new(None, None),
        ScriptedPlatform::new(DecoderMode::Echo),
        ReaderConfig::default(),
    );

    assert_eq!(reader.read_metadata().await, Err(ReaderError::NoTracks));
    assert!(!reader.is_initialized());
}

#[core_async::test]
async fn test_read_metadata_waiting_for_data() {
    let (mut demuxer, _) = audio_only(1);
    demuxer.init_result = Err(DemuxerFailureReason::WaitingForData);
    let reader = reader(
        demuxer,
        ScriptedPlatform::new(DecoderMode::Echo),
        ReaderConfig::default(),
    );

    assert_eq!(
        reader.read_metadata().await,
        Err(ReaderError::WaitingForResources)
    );
}

#[core_async::test]
async fn test_read_metadata_fails_when_decoder_init_fails() {
    let (demuxer, _) = audio_only(1);
    let reader = reader(
        demuxer,
        ScriptedPlatform::new(DecoderMode::FailInit),
        ReaderConfig::default(),
    );

    let err = reader.read_metadata().await.unwrap_err();
    assert!(matches!(err, ReaderError::Metadata(_)), "got {err:?}");
    reader.shutdown().await;
}

#[core_async::test]
async fn test_frames_in_order_then_end_of_stream() {
    let (demuxer, _) = audio_only(3);
    let reader = reader(
        demuxer,
        ScriptedPlatform::new(DecoderMode::Echo),
        ReaderConfig::default(),
    );
    reader.read_metadata().await.unwrap();

    for expected in [0, 10, 20] {
        let frame = reader.request_audio_data().unwrap().await.unwrap();
        assert_eq!(frame.time, us(expected));
        assert_eq!(frame.track_type(), TrackType::Audio);
    }

    // End of stream is an outcome, not an error, and it sticks.
    let first = reader.request_audio_data().unwrap().await;
    assert_eq!(first, Err(NotDecodedReason::EndOfStream));
    let second = reader.request_audio_data().unwrap().await;
    assert_eq!(second, Err(NotDecodedReason::EndOfStream));

    reader.shutdown().await;
}

#[core_async::test]
async fn test_duplicate_request_rejected_at_call_time() {
    let (demuxer, _) = audio_only(4);
    let reader = reader(
        demuxer,
        ScriptedPlatform::new(DecoderMode::Hold),
        ReaderConfig::default(),
    );
    reader.read_metadata().await.unwrap();

    let pending = reader.request_audio_data().unwrap();
    let err = reader.request_audio_data().unwrap_err();
    assert_eq!(err, ReaderError::RequestAlreadyPending(TrackType::Audio));
    assert!(err.is_protocol_violation());

    reader.shutdown().await;
    assert_eq!(pending.await, Err(NotDecodedReason::Canceled));
}

#[core_async::test]
async fn test_decode_ahead_bounds_in_flight_samples() {
    let (demuxer, _) = audio_only(10);
    let platform = ScriptedPlatform::new(DecoderMode::Hold);
    let reader = reader(demuxer, platform.clone(), ReaderConfig::default());
    reader.read_metadata().await.unwrap();

    let mut pending = reader.request_audio_data().unwrap();
    assert!(wait_until(|| platform.probe.inputs() == 2).await);

    // Nothing comes out, so nothing more may go in.
    time::sleep(Duration::from_millis(50)).await;
    assert!((&mut pending).now_or_never().is_none());
    assert_eq!(platform.probe.inputs(), 2);
    assert_eq!(reader.size_of_audio_queue_in_frames(), 2);

    reader.shutdown().await;
}

#[core_async::test]
async fn test_drain_delivers_buffered_frames_before_error() {
    let (demuxer, _) = audio_only(10);
    let platform = ScriptedPlatform::new(DecoderMode::Hold);
    let reader = reader(demuxer, platform.clone(), ReaderConfig::default());
    reader.read_metadata().await.unwrap();

    let first = reader.request_audio_data().unwrap();
    assert!(wait_until(|| platform.probe.inputs() == 2).await);
    platform.probe.fail("bitstream corrupted");

    assert_eq!(first.await.unwrap().time, us(0));
    let second = reader.request_audio_data().unwrap().await.unwrap();
    assert_eq!(second.time, us(10));
    let third = reader.request_audio_data().unwrap().await;
    assert_eq!(third, Err(NotDecodedReason::DecodeError));
    assert_eq!(reader.track_status(TrackType::Audio), Some(TrackStatus::Errored));

    // Errors are sticky until reset.
    let again = reader.request_audio_data().unwrap().await;
    assert_eq!(again, Err(NotDecodedReason::DecodeError));

    reader.shutdown().await;
}

#[core_async::test]
async fn test_demuxer_error_rejects_with_decode_error() {
    let (demuxer, track) = audio_only(3);
    track.fail_next_demux("truncated box");
    let reader = reader(
        demuxer,
        ScriptedPlatform::new(DecoderMode::Echo),
        ReaderConfig::default(),
    );
    reader.read_metadata().await.unwrap();

    let result = reader.request_audio_data().unwrap().await;
    assert_eq!(result, Err(NotDecodedReason::DecodeError));
    reader.shutdown().await;
}

#[core_async::test]
async fn test_decoder_input_failure_rejects_with_decode_error() {
    let (demuxer, _) = audio_only(3);
    let reader = reader(
        demuxer,
        ScriptedPlatform::new(DecoderMode::FailInput),
        ReaderConfig::default(),
    );
    reader.read_metadata().await.unwrap();

    let result = reader.request_audio_data().unwrap().await;
    assert_eq!(result, Err(NotDecodedReason::DecodeError));
    reader.shutdown().await;
}

#[core_async::test]
async fn test_waiting_for_data_then_resumes() {
    let (demuxer, track) = audio_only(3);
    track.set_available(1);
    let reader = reader(
        demuxer,
        ScriptedPlatform::new(DecoderMode::Echo),
        ReaderConfig::default(),
    );
    reader.read_metadata().await.unwrap();

    assert_eq!(reader.request_audio_data().unwrap().await.unwrap().time, us(0));
    let starved = reader.request_audio_data().unwrap().await;
    assert_eq!(starved, Err(NotDecodedReason::WaitingForData));

    let wait = reader.wait_for_data(TrackType::Audio);
    track.set_available(3);
    reader.notify_data_arrived(1_024, 0);
    assert_eq!(wait.await, Ok(TrackType::Audio));

    assert_eq!(reader.request_audio_data().unwrap().await.unwrap().time, us(10));
    reader.shutdown().await;
}

#[core_async::test]
async fn test_request_for_absent_track_is_rejected() {
    let (demuxer, _) = audio_only(1);
    let reader = reader(
        demuxer,
        ScriptedPlatform::new(DecoderMode::Echo),
        ReaderConfig::default(),
    );
    reader.read_metadata().await.unwrap();

    let result = reader.request_video_data(false, us(0)).unwrap().await;
    assert_eq!(result, Err(NotDecodedReason::DecodeError));
    reader.shutdown().await;
}

#[core_async::test]
async fn test_encrypted_media_loads_but_cannot_decode() {
    let (mut demuxer, _) = audio_only(2);
    let mut crypto = EncryptionInfo::default();
    crypto.add_init_data("cenc", vec![0x00, 0x01]);
    demuxer.crypto = crypto;
    let platform = ScriptedPlatform::new(DecoderMode::Echo);
    let reader = reader(demuxer, platform.clone(), ReaderConfig::default());

    let info = reader.read_metadata().await.unwrap();
    assert!(info.is_encrypted());
    assert!(reader.is_encrypted());
    assert_eq!(platform.probe.created(), 0);

    let result = reader.request_audio_data().unwrap().await;
    assert_eq!(result, Err(NotDecodedReason::DecodeError));
    reader.shutdown().await;
}

#[core_async::test]
async fn test_stream_change_drains_then_seeks_to_threshold() {
    let first = Arc::new(video_info());
    let second = Arc::new(TrackInfo::video(2, "video/avc", 1280, 720));
    let samples = vec![
        sample(90, true).with_track_info(first.clone()),
        sample(100, false).with_track_info(second.clone()),
        sample(95, true).with_track_info(second.clone()),
        sample(99, false).with_track_info(second.clone()),
        sample(100, false).with_track_info(second.clone()),
        sample(101, false).with_track_info(second.clone()),
    ];
    let video = ScriptedTrack::new(video_info(), samples, Log::default());
    let platform = ScriptedPlatform::new(DecoderMode::Echo);
    let events = EventBus::default();
    let mut rx = events.subscribe();
    let reader = reader_with_events(
        ScriptedDemuxer::new(None, Some(video)),
        platform.clone(),
        ReaderConfig::default(),
        events,
    );
    reader.read_metadata().await.unwrap();

    let a = reader.request_video_data(false, us(0)).unwrap().await.unwrap();
    assert_eq!(a.time, us(90));

    // The non-keyframe at 100 forces a seek back to the keyframe at 95;
    // frames below 100 are decoded but never returned.
    let e = reader.request_video_data(false, us(0)).unwrap().await.unwrap();
    assert_eq!(e.time, us(100));
    assert!(e.discontinuity);

    let f = reader.request_video_data(false, us(0)).unwrap().await.unwrap();
    assert_eq!(f.time, us(101));
    assert!(!f.discontinuity);

    assert_eq!(platform.probe.created(), 2);
    let video_params = reader.media_info().video.map(|info| info.params);
    assert_eq!(
        video_params,
        Some(TrackParams::Video(VideoParams {
            width: 1280,
            height: 720
        }))
    );

    let mut recreated = false;
    while let Ok(event) = rx.try_recv() {
        if let CoreEvent::Reader(ReaderEvent::DecoderRecreated { stream_id, .. }) = event {
            assert_eq!(stream_id, 2);
            recreated = true;
        }
    }
    assert!(recreated);
    reader.shutdown().await;
}

#[core_async::test]
async fn test_skip_to_keyframe_counts_dropped_frames() {
    let samples = vec![
        sample(0, true),
        sample(10, false),
        sample(20, false),
        sample(30, true),
        sample(40, false),
    ];
    let video = ScriptedTrack::new(video_info(), samples, Log::default());
    let reader = reader(
        ScriptedDemuxer::new(None, Some(video)),
        ScriptedPlatform::new(DecoderMode::Echo),
        ReaderConfig::default(),
    );
    reader.read_metadata().await.unwrap();

    let frame = reader.request_video_data(false, us(25)).unwrap().await.unwrap();
    assert_eq!(frame.time, us(30));
    assert_eq!(reader.frame_statistics().dropped, 3);

    reader.shutdown().await;
}

#[core_async::test]
async fn test_release_media_resources_recreates_on_demand() {
    let video = ScriptedTrack::new(video_info(), vec![sample(0, true)], Log::default());
    let platform = ScriptedPlatform::new(DecoderMode::Echo);
    let reader = reader(
        ScriptedDemuxer::new(None, Some(video)),
        platform.clone(),
        ReaderConfig::default(),
    );
    reader.read_metadata().await.unwrap();
    assert_eq!(platform.probe.created(), 1);

    reader.release_media_resources().await;
    assert_eq!(platform.probe.shutdowns(), 1);

    // A repeated metadata read brings the decoder back.
    reader.read_metadata().await.unwrap();
    assert_eq!(platform.probe.created(), 2);

    reader.shutdown().await;
}

#[core_async::test]
async fn test_shutdown_is_idempotent() {
    let (demuxer, _) = audio_only(4);
    let platform = ScriptedPlatform::new(DecoderMode::Hold);
    let events = EventBus::default();
    let mut rx = events.subscribe();
    let reader = reader_with_events(demuxer, platform.clone(), ReaderConfig::default(), events);
    reader.read_metadata().await.unwrap();

    let pending = reader.request_audio_data().unwrap();
    reader.shutdown().await;
    reader.shutdown().await;

    assert_eq!(pending.await, Err(NotDecodedReason::Canceled));
    assert!(reader.is_shut_down());
    assert_eq!(platform.probe.shutdowns(), 1);

    let after = reader.request_audio_data().unwrap().await;
    assert_eq!(after, Err(NotDecodedReason::Canceled));
    assert_eq!(reader.read_metadata().await, Err(ReaderError::Shutdown));

    let mut completions = 0;
    while let Ok(event) = rx.try_recv() {
        if matches!(event, CoreEvent::Reader(ReaderEvent::ShutdownComplete)) {
            completions += 1;
        }
    }
    assert_eq!(completions, 1);
}

#[core_async::test]
async fn test_shutdown_cancels_requests_on_both_tracks() {
    let audio = ScriptedTrack::new(audio_info(), audio_samples(4), Log::default());
    let video = ScriptedTrack::new(
        video_info(),
        vec![sample(0, true), sample(10, true), sample(20, true), sample(30, true)],
        Log::default(),
    );
    let platform = ScriptedPlatform::new(DecoderMode::Hold);
    let reader = reader(
        ScriptedDemuxer::new(Some(audio), Some(video)),
        platform.clone(),
        ReaderConfig::default(),
    );
    reader.read_metadata().await.unwrap();

    let audio_pending = reader.request_audio_data().unwrap();
    let video_pending = reader.request_video_data(false, us(0)).unwrap();
    reader.shutdown().await;
    reader.shutdown().await;

    assert_eq!(audio_pending.await, Err(NotDecodedReason::Canceled));
    assert_eq!(video_pending.await, Err(NotDecodedReason::Canceled));
    assert_eq!(platform.probe.shutdowns(), 2);
    assert!(!reader.has_audio());
    assert!(!reader.has_video());

    let after = reader.request_video_data(false, us(0)).unwrap().await;
    assert_eq!(after, Err(NotDecodedReason::Canceled));
}
