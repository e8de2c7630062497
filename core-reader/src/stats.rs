//! Decoded-frame statistics shared between the reader and its video actor.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Running totals of parsed, decoded and dropped video frames.
#[derive(Debug, Default)]
pub struct FrameStatistics {
    parsed: AtomicU64,
    decoded: AtomicU64,
    dropped: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameStatisticsSnapshot {
    pub parsed: u64,
    pub decoded: u64,
    pub dropped: u64,
}

impl FrameStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notify_decoded_frames(&self, parsed: u64, decoded: u64, dropped: u64) {
        if parsed == 0 && decoded == 0 && dropped == 0 {
            return;
        }
        self.parsed.fetch_add(parsed, Ordering::Relaxed);
        self.decoded.fetch_add(decoded, Ordering::Relaxed);
        self.dropped.fetch_add(dropped, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> FrameStatisticsSnapshot {
        FrameStatisticsSnapshot {
            parsed: self.parsed.load(Ordering::Relaxed),
            decoded: self.decoded.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

/// Accumulates counts during one update pass and reports them on drop.
pub(crate) struct FrameCounter {
    stats: Option<Arc<FrameStatistics>>,
    pub parsed: u64,
    pub decoded: u64,
    pub dropped: u64,
}

impl FrameCounter {
    /// A counter that reports to `stats`, or discards everything when `None`.
    pub fn new(stats: Option<Arc<FrameStatistics>>) -> Self {
        Self {
            stats,
            parsed: 0,
            decoded: 0,
            dropped: 0,
        }
    }
}

impl Drop for FrameCounter {
    fn drop(&mut self) {
        if let Some(stats) = &self.stats {
            stats.notify_decoded_frames(self.parsed, self.decoded, self.dropped);
        }
    }
}
