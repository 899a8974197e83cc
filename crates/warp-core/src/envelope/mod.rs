//! Volume and pan envelopes
//!
//! Pure DSP shared by the interactive path and the offline stretch/export
//! path. Both paths call the same functions with the same inputs, so the
//! rendered gain curves are bit-identical.
//!
//! - [`EnvelopeCurve`]: one piecewise-linear volume segment on the timeline
//! - [`processor`]: `volume_at`, `pan_gains` and the buffer-level apply functions
//! - [`EnvelopeLane`]: a track's ordered curve list with explicit edit operations

mod lane;
pub mod processor;

use serde::{Deserialize, Serialize};

pub use lane::EnvelopeLane;
pub use processor::{apply_pan, apply_volume, apply_volume_and_pan, pan_gains, volume_at};

/// Denominator floor used by the stereo pan scaling
pub const MIN_PAN_GAIN: f32 = 0.001;

/// A piecewise-linear volume curve occupying `[start_time, start_time + duration_time]`
///
/// `times` are normalized (0..1) positions inside the window and `values`
/// the gains at those positions. Missing fields deserialize as empty lists,
/// which the processor treats as "no curve".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvelopeCurve {
    pub start_time: f64,
    pub duration_time: f64,
    #[serde(default)]
    pub times: Vec<f64>,
    #[serde(default)]
    pub values: Vec<f32>,
}

impl EnvelopeCurve {
    pub fn new(start_time: f64, duration_time: f64, times: Vec<f64>, values: Vec<f32>) -> Self {
        Self {
            start_time,
            duration_time,
            times,
            values,
        }
    }

    /// A two-point ramp from `from` to `to` over the window
    pub fn ramp(start_time: f64, duration_time: f64, from: f32, to: f32) -> Self {
        Self::new(start_time, duration_time, vec![0.0, 1.0], vec![from, to])
    }

    /// End of the curve window in seconds
    #[inline]
    pub fn end_time(&self) -> f64 {
        self.start_time + self.duration_time
    }

    /// Number of usable points (common prefix of `times` and `values`)
    #[inline]
    fn point_count(&self) -> usize {
        self.times.len().min(self.values.len())
    }

    /// Whether the curve can be evaluated at all
    pub fn is_well_formed(&self) -> bool {
        self.point_count() > 0
            && self.start_time.is_finite()
            && self.duration_time.is_finite()
            && self.duration_time > 0.0
    }

    /// Whether `time` falls inside the closed window
    #[inline]
    pub fn contains(&self, time: f64) -> bool {
        time >= self.start_time && time <= self.end_time()
    }

    /// Value of the last point
    pub fn terminal_value(&self) -> Option<f32> {
        match self.point_count() {
            0 => None,
            n => Some(self.values[n - 1]),
        }
    }

    /// Evaluate the curve at an absolute time inside its window
    ///
    /// Before the first point returns the first value, past the last point
    /// returns the last value. Returns `None` for a malformed curve.
    pub fn value_at(&self, time: f64) -> Option<f32> {
        if !self.is_well_formed() {
            return None;
        }
        let n = self.point_count();
        let pos = (time - self.start_time) / self.duration_time;

        if pos <= self.times[0] {
            return Some(self.values[0]);
        }
        for i in 0..n - 1 {
            let (t1, t2) = (self.times[i], self.times[i + 1]);
            if pos >= t1 && pos <= t2 {
                let (v1, v2) = (self.values[i], self.values[i + 1]);
                if t2 <= t1 {
                    return Some(v2);
                }
                let ratio = ((pos - t1) / (t2 - t1)) as f32;
                return Some(v1 + (v2 - v1) * ratio);
            }
        }
        Some(self.values[n - 1])
    }

    /// Copy of the part of this curve inside `[from, to]`, re-normalized
    ///
    /// Interpolated points are inserted at the cut positions so the gain
    /// shape inside the kept range is unchanged. Returns `None` when the
    /// ranges don't overlap by a positive amount.
    pub fn sub_range(&self, from: f64, to: f64) -> Option<Self> {
        if !self.is_well_formed() {
            return None;
        }
        let start = from.max(self.start_time);
        let end = to.min(self.end_time());
        if end - start <= f64::EPSILON {
            return None;
        }

        let mut points: Vec<(f64, f32)> = Vec::with_capacity(self.point_count() + 2);
        points.push((start, self.value_at(start)?));
        for i in 0..self.point_count() {
            let abs = self.start_time + self.times[i] * self.duration_time;
            if abs > start && abs < end {
                points.push((abs, self.values[i]));
            }
        }
        points.push((end, self.value_at(end)?));

        let duration = end - start;
        Some(Self {
            start_time: start,
            duration_time: duration,
            times: points.iter().map(|(t, _)| (t - start) / duration).collect(),
            values: points.iter().map(|(_, v)| *v).collect(),
        })
    }
}

/// Volume curves, default volume and pan for one track
///
/// This is the bundle handed to the processing pipeline when a track's
/// envelopes must be baked into a stretched buffer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvelopeSettings {
    #[serde(default)]
    pub volume_curves: Vec<EnvelopeCurve>,
    #[serde(default = "unity")]
    pub default_volume: f32,
    #[serde(default)]
    pub pan_value: f32,
}

fn unity() -> f32 {
    1.0
}

impl EnvelopeSettings {
    /// Whether applying these settings would leave audio untouched
    pub fn is_neutral(&self) -> bool {
        self.volume_curves.is_empty() && self.default_volume == 1.0 && self.pan_value == 0.0
    }
}

impl Default for EnvelopeSettings {
    fn default() -> Self {
        Self {
            volume_curves: Vec::new(),
            default_volume: 1.0,
            pan_value: 0.0,
        }
    }
}
