//! Sample types and the step-function sequence used for prices and metrics

use crate::models::Meta;
use serde::{Deserialize, Serialize};
use std::ops::Deref;
use std::time::Duration;

const NANOS_PER_HOUR: f64 = 3_600_000_000_000.0;

/// A single timestamped sample
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataPoint {
    /// Nanoseconds since the epoch
    pub timestamp: u64,
    pub value: f64,
    #[serde(default, skip_serializing_if = "Meta::is_empty")]
    pub meta: Meta,
}

impl DataPoint {
    pub fn new(timestamp: u64, value: f64) -> Self {
        Self {
            timestamp,
            value,
            meta: Meta::new(),
        }
    }

    pub fn with_meta(mut self, meta: Meta) -> Self {
        self.meta = meta;
        self
    }

    fn at(&self, timestamp: u64) -> Self {
        Self {
            timestamp,
            value: self.value,
            meta: self.meta.clone(),
        }
    }
}

/// Ordered sequence of samples forming a step function.
///
/// The value at a timestamp holds until the next later sample. Nothing is
/// known past the last sample, so integration needs an explicit end marker.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DataPoints(Vec<DataPoint>);

impl DataPoints {
    pub fn new() -> Self {
        Self::default()
    }

    /// Smallest contiguous run covering `[start, end]`, including the
    /// bracketing points on either side. Bounds outside the stored range are
    /// clamped. The receiver must be sorted.
    pub fn get(&self, start: u64, end: u64) -> DataPoints {
        if self.0.is_empty() || start > end {
            return DataPoints::new();
        }

        // Last point at or before start, or the first point when none is
        let si = self
            .0
            .partition_point(|p| p.timestamp <= start)
            .saturating_sub(1);
        // First point at or after end, or the last point when none is
        let ei = self
            .0
            .partition_point(|p| p.timestamp < end)
            .min(self.0.len() - 1)
            .max(si);

        DataPoints(self.0[si..=ei].to_vec())
    }

    /// Append points. Order is not restored.
    pub fn insert<I: IntoIterator<Item = DataPoint>>(&mut self, points: I) {
        self.0.extend(points);
    }

    pub fn push(&mut self, point: DataPoint) {
        self.0.push(point);
    }

    /// Stable sort by timestamp
    pub fn sort(&mut self) {
        self.0.sort_by_key(|p| p.timestamp);
    }

    /// Collapse consecutive identical points. Expects sorted input.
    pub fn dedup(&mut self) {
        self.0.dedup();
    }

    /// Keep only the last occurrence of each timestamp. Expects sorted input.
    pub fn latest_per_timestamp(&mut self) {
        let mut out: Vec<DataPoint> = Vec::with_capacity(self.0.len());
        for point in self.0.drain(..) {
            match out.last_mut() {
                Some(last) if last.timestamp == point.timestamp => *last = point,
                _ => out.push(point),
            }
        }
        self.0 = out;
    }

    /// New sequence with every value multiplied by `factor`
    pub fn scale(&self, factor: f64) -> DataPoints {
        self.0
            .iter()
            .map(|p| DataPoint {
                timestamp: p.timestamp,
                value: p.value * factor,
                meta: p.meta.clone(),
            })
            .collect()
    }

    pub fn sum(&self) -> f64 {
        self.0.iter().map(|p| p.value).sum()
    }

    /// Integrate the step function in value-hours. The last point only
    /// terminates the previous step.
    pub fn sum_per_hour(&self) -> f64 {
        self.0
            .windows(2)
            .map(|w| {
                let elapsed = w[1].timestamp.saturating_sub(w[0].timestamp);
                w[0].value * elapsed as f64 / NANOS_PER_HOUR
            })
            .sum()
    }

    pub fn min(&self) -> Option<f64> {
        self.0.iter().map(|p| p.value).reduce(f64::min)
    }

    pub fn max(&self) -> Option<f64> {
        self.0.iter().map(|p| p.value).reduce(f64::max)
    }

    /// True when `[start, end]` lies within the stored span
    pub fn encompasses(&self, start: u64, end: u64) -> bool {
        match (self.0.first(), self.0.last()) {
            (Some(first), Some(last)) => {
                start >= first.timestamp
                    && start < last.timestamp
                    && end > first.timestamp
                    && end <= last.timestamp
            }
            _ => false,
        }
    }

    /// Restrict the step function to `[start, end]`.
    ///
    /// The value in effect at `start` is moved up to `start`, later points
    /// past `end` are dropped and an end marker is appended when missing.
    pub fn clip(&self, start: u64, end: u64) -> DataPoints {
        let mut out = Vec::with_capacity(self.0.len() + 1);

        let first_after = self.0.partition_point(|p| p.timestamp <= start);
        if first_after > 0 {
            out.push(self.0[first_after - 1].at(start));
        }
        out.extend(
            self.0[first_after..]
                .iter()
                .take_while(|p| p.timestamp <= end)
                .cloned(),
        );

        if let Some(marker) = out.last().filter(|p| p.timestamp < end).map(|p| p.at(end)) {
            out.push(marker);
        }

        DataPoints(out)
    }

    /// Fill each gap with repeated values every `interval`
    pub fn per(&self, interval: Duration) -> DataPoints {
        let step = interval.as_nanos() as u64;
        if step == 0 || self.0.len() < 2 {
            return self.clone();
        }

        let mut filled = Vec::new();
        for w in self.0.windows(2) {
            let slots = w[1].timestamp.saturating_sub(w[0].timestamp) / step;
            for i in 1..slots {
                filled.push(w[0].at(w[0].timestamp + i * step));
            }
        }

        if filled.is_empty() {
            return self.clone();
        }

        let mut out = DataPoints(filled);
        out.insert(self.0.iter().cloned());
        out.sort();
        out
    }
}

impl Deref for DataPoints {
    type Target = [DataPoint];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<Vec<DataPoint>> for DataPoints {
    fn from(points: Vec<DataPoint>) -> Self {
        DataPoints(points)
    }
}

impl FromIterator<DataPoint> for DataPoints {
    fn from_iter<I: IntoIterator<Item = DataPoint>>(iter: I) -> Self {
        DataPoints(iter.into_iter().collect())
    }
}

impl IntoIterator for DataPoints {
    type Item = DataPoint;
    type IntoIter = std::vec::IntoIter<DataPoint>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a DataPoints {
    type Item = &'a DataPoint;
    type IntoIter = std::slice::Iter<'a, DataPoint>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
