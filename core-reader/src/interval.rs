//! # Time & Interval Types
//!
//! Sample timestamps and buffered ranges.
//!
//! - [`TimeUnit`]: signed microseconds. Arithmetic saturates instead of
//!   wrapping; a corrupt timestamp must not turn into a panic.
//! - [`Interval`]: half-open `[start, end)`.
//! - [`TimeIntervals`]: sorted, non-overlapping intervals. Overlapping or
//!   touching intervals are merged on insertion.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Neg, Sub};

// ============================================================================
// TimeUnit
// ============================================================================

/// A media timestamp in microseconds.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct TimeUnit(i64);

impl TimeUnit {
    pub const ZERO: TimeUnit = TimeUnit(0);

    pub const fn from_micros(micros: i64) -> Self {
        Self(micros)
    }

    pub fn from_millis(millis: i64) -> Self {
        Self(millis.saturating_mul(1_000))
    }

    pub fn from_seconds(seconds: f64) -> Self {
        Self((seconds * 1_000_000.0).round() as i64)
    }

    pub const fn as_micros(self) -> i64 {
        self.0
    }

    pub fn as_seconds(self) -> f64 {
        self.0 as f64 / 1_000_000.0
    }

    pub fn is_negative(self) -> bool {
        self.0 < 0
    }
}

impl Add for TimeUnit {
    type Output = TimeUnit;

    fn add(self, rhs: TimeUnit) -> TimeUnit {
        TimeUnit(self.0.saturating_add(rhs.0))
    }
}

impl Sub for TimeUnit {
    type Output = TimeUnit;

    fn sub(self, rhs: TimeUnit) -> TimeUnit {
        TimeUnit(self.0.saturating_sub(rhs.0))
    }
}

impl Neg for TimeUnit {
    type Output = TimeUnit;

    fn neg(self) -> TimeUnit {
        TimeUnit(self.0.saturating_neg())
    }
}

impl fmt::Display for TimeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.6}s", self.as_seconds())
    }
}

// ============================================================================
// Interval
// ============================================================================

/// Half-open time range `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Interval {
    pub start: TimeUnit,
    pub end: TimeUnit,
}

impl Interval {
    pub fn new(start: TimeUnit, end: TimeUnit) -> Self {
        Self { start, end }
    }

    pub fn from_micros(start: i64, end: i64) -> Self {
        Self::new(TimeUnit::from_micros(start), TimeUnit::from_micros(end))
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    pub fn length(&self) -> TimeUnit {
        if self.is_empty() {
            TimeUnit::ZERO
        } else {
            self.end - self.start
        }
    }

    pub fn contains(&self, time: TimeUnit) -> bool {
        self.start <= time && time < self.end
    }

    fn intersection(&self, other: &Interval) -> Option<Interval> {
        let overlap = Interval::new(self.start.max(other.start), self.end.min(other.end));
        (!overlap.is_empty()).then_some(overlap)
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

// ============================================================================
// TimeIntervals
// ============================================================================

/// A normalized set of time ranges.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeIntervals {
    intervals: Vec<Interval>,
}

impl TimeIntervals {
    pub fn new() -> Self {
        Self::default()
    }

    /// A set holding the single interval `[start, end)`.
    pub fn single(start: TimeUnit, end: TimeUnit) -> Self {
        let mut set = Self::new();
        set.add(Interval::new(start, end));
        set
    }

    /// Inserts `interval`, merging it with any overlapping or touching range.
    /// Empty intervals are ignored.
    pub fn add(&mut self, interval: Interval) {
        if interval.is_empty() {
            return;
        }

        let position = self
            .intervals
            .partition_point(|existing| existing.start < interval.start);
        self.intervals.insert(position, interval);
        self.normalize();
    }

    fn normalize(&mut self) {
        let mut merged: Vec<Interval> = Vec::with_capacity(self.intervals.len());
        for interval in self.intervals.drain(..) {
            match merged.last_mut() {
                Some(last) if interval.start <= last.end => {
                    last.end = last.end.max(interval.end);
                }
                _ => merged.push(interval),
            }
        }
        self.intervals = merged;
    }

    pub fn union(&self, other: &TimeIntervals) -> TimeIntervals {
        let mut result = self.clone();
        for interval in &other.intervals {
            result.add(*interval);
        }
        result
    }

    pub fn intersection(&self, other: &TimeIntervals) -> TimeIntervals {
        let mut result = Vec::new();
        let (mut i, mut j) = (0, 0);

        while i < self.intervals.len() && j < other.intervals.len() {
            let a = &self.intervals[i];
            let b = &other.intervals[j];
            if let Some(overlap) = a.intersection(b) {
                result.push(overlap);
            }
            if a.end < b.end {
                i += 1;
            } else {
                j += 1;
            }
        }

        TimeIntervals { intervals: result }
    }

    /// Every interval moved by `offset`.
    pub fn shifted(&self, offset: TimeUnit) -> TimeIntervals {
        TimeIntervals {
            intervals: self
                .intervals
                .iter()
                .map(|interval| Interval::new(interval.start + offset, interval.end + offset))
                .collect(),
        }
    }

    pub fn start(&self) -> Option<TimeUnit> {
        self.intervals.first().map(|interval| interval.start)
    }

    pub fn end(&self) -> Option<TimeUnit> {
        self.intervals.last().map(|interval| interval.end)
    }

    pub fn contains(&self, time: TimeUnit) -> bool {
        self.intervals.iter().any(|interval| interval.contains(time))
    }

    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }

    pub fn len(&self) -> usize {
        self.intervals.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Interval> {
        self.intervals.iter()
    }

    pub fn as_slice(&self) -> &[Interval] {
        &self.intervals
    }
}

impl FromIterator<Interval> for TimeIntervals {
    fn from_iter<I: IntoIterator<Item = Interval>>(iter: I) -> Self {
        let mut set = TimeIntervals::new();
        for interval in iter {
            set.add(interval);
        }
        set
    }
}
