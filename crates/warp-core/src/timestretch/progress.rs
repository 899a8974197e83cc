//! Monotonic progress reporting

use std::cell::Cell;

/// Wraps a progress sink so reported percentages never go backwards
///
/// Long-running operations report milestones (0–100) through this; values
/// at or below the last reported one are dropped.
pub struct PhaseProgress<'a> {
    sink: &'a dyn Fn(f32),
    last: Cell<f32>,
}

impl<'a> PhaseProgress<'a> {
    pub fn new(sink: &'a dyn Fn(f32)) -> Self {
        Self {
            sink,
            last: Cell::new(f32::NEG_INFINITY),
        }
    }

    /// Report an absolute percentage
    pub fn report(&self, percent: f32) {
        let percent = percent.clamp(0.0, 100.0);
        if percent > self.last.get() {
            self.last.set(percent);
            (self.sink)(percent);
        }
    }

    /// Report `fraction` (0..1) of the way through the `[from, to]` band
    pub fn phase(&self, from: f32, to: f32, fraction: f64) {
        let fraction = fraction.clamp(0.0, 1.0) as f32;
        self.report(from + (to - from) * fraction);
    }

    /// Last value passed to the sink (0 before any report)
    pub fn last(&self) -> f32 {
        self.last.get().max(0.0)
    }
}
