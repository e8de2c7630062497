//! Consumer-side buffered range cache.
//!
//! Byte-range notifications accumulate here and are only forwarded to the
//! consumer-side demuxer when ranges are next queried. The result is cached
//! until the next notification.

use crate::interval::{TimeIntervals, TimeUnit};
use crate::traits::{MediaDataDemuxer, MediaTrackDemuxer};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ByteRange {
    start: i64,
    end: i64,
}

impl ByteRange {
    fn new(offset: i64, length: u32) -> Self {
        Self {
            start: offset,
            end: offset.saturating_add(i64::from(length)),
        }
    }

    fn span(self, other: ByteRange) -> ByteRange {
        ByteRange {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }

    fn length(&self) -> u32 {
        u32::try_from(self.end.saturating_sub(self.start)).unwrap_or(u32::MAX)
    }
}

pub(crate) struct BufferedCache {
    pending: Option<ByteRange>,
    stale: bool,
    cached: TimeIntervals,
    main: Option<Arc<dyn MediaDataDemuxer>>,
    audio: Option<Arc<dyn MediaTrackDemuxer>>,
    video: Option<Arc<dyn MediaTrackDemuxer>>,
    /// Only a distinct clone needs byte notifications replayed to it.
    flush_to_main: bool,
}

impl BufferedCache {
    pub fn new() -> Self {
        Self {
            pending: None,
            stale: true,
            cached: TimeIntervals::default(),
            main: None,
            audio: None,
            video: None,
            flush_to_main: false,
        }
    }

    pub fn attach(
        &mut self,
        main: Arc<dyn MediaDataDemuxer>,
        audio: Option<Arc<dyn MediaTrackDemuxer>>,
        video: Option<Arc<dyn MediaTrackDemuxer>>,
        flush_to_main: bool,
    ) {
        self.main = Some(main);
        self.audio = audio;
        self.video = video;
        self.flush_to_main = flush_to_main;
        self.stale = true;
    }

    pub fn notify_data_arrived(&mut self, length: u32, offset: i64) {
        let range = ByteRange::new(offset, length);
        self.pending = Some(match self.pending {
            Some(pending) => pending.span(range),
            None => range,
        });
        self.stale = true;
    }

    pub fn notify_data_removed(&mut self) {
        self.pending = None;
        self.stale = true;
        if self.flush_to_main {
            if let Some(main) = &self.main {
                main.notify_data_removed();
            }
        }
    }

    /// Buffered ranges across the active tracks, recomputed when stale.
    pub fn buffered(&mut self) -> TimeIntervals {
        if self.stale {
            if let Some(range) = self.pending.take() {
                if let (true, Some(main)) = (self.flush_to_main, &self.main) {
                    main.notify_data_arrived(range.length(), range.start);
                }
            }
            let video = self.video.as_ref().map(|demuxer| demuxer.buffered());
            let audio = self.audio.as_ref().map(|demuxer| demuxer.buffered());
            self.cached = combine(video, audio);
            self.stale = false;
        }
        self.cached.clone()
    }

    pub fn eviction_offset(&self, time: TimeUnit) -> i64 {
        [&self.audio, &self.video]
            .into_iter()
            .flatten()
            .map(|demuxer| demuxer.eviction_offset(time))
            .min()
            .unwrap_or(i64::MAX)
    }

    pub fn release(&mut self) {
        *self = Self::new();
    }
}

/// Ranges playable on every present track.
pub(crate) fn combine(video: Option<TimeIntervals>, audio: Option<TimeIntervals>) -> TimeIntervals {
    match (video, audio) {
        (Some(video), Some(audio)) => video.intersection(&audio),
        (Some(only), None) | (None, Some(only)) => only,
        (None, None) => TimeIntervals::default(),
    }
}
