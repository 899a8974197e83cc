//! A track's volume curve list with explicit edit operations
//!
//! Curves are kept sorted by start time and never overlap. Only `draw`,
//! `clear_range` and `clear` mutate the list.

use super::EnvelopeCurve;
use crate::error::{WarpError, WarpResult};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnvelopeLane {
    curves: Vec<EnvelopeCurve>,
}

impl EnvelopeLane {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a lane from existing curves, sorting them and dropping
    /// malformed entries; later curves win where two overlap
    pub fn from_curves(curves: Vec<EnvelopeCurve>) -> Self {
        let mut lane = Self::new();
        for curve in curves.into_iter().filter(EnvelopeCurve::is_well_formed) {
            // Well-formed curves always draw successfully
            let _ = lane.draw(curve);
        }
        lane
    }

    /// Current curves, ordered by start time
    pub fn curves(&self) -> &[EnvelopeCurve] {
        &self.curves
    }

    pub fn is_empty(&self) -> bool {
        self.curves.is_empty()
    }

    /// Insert a newly drawn curve
    ///
    /// Whatever the new curve overlaps is cut away first; curves that
    /// straddle its window keep their parts on either side.
    pub fn draw(&mut self, curve: EnvelopeCurve) -> WarpResult<()> {
        if !curve.is_well_formed() {
            return Err(WarpError::InvalidInput(format!(
                "cannot draw malformed curve at {:.3}s ({} times, {} values)",
                curve.start_time,
                curve.times.len(),
                curve.values.len()
            )));
        }
        self.clear_range(curve.start_time, curve.end_time());

        let idx = self
            .curves
            .partition_point(|c| c.start_time < curve.start_time);
        log::debug!(
            "Envelope draw: {:.3}s..{:.3}s ({} points) at index {}",
            curve.start_time,
            curve.end_time(),
            curve.times.len(),
            idx
        );
        self.curves.insert(idx, curve);
        Ok(())
    }

    /// Remove envelope data inside `[start, end]`
    pub fn clear_range(&mut self, start: f64, end: f64) {
        if !(end > start) {
            return;
        }
        let mut kept = Vec::with_capacity(self.curves.len() + 1);
        for curve in self.curves.drain(..) {
            if curve.end_time() <= start || curve.start_time >= end {
                kept.push(curve);
                continue;
            }
            if let Some(before) = curve.sub_range(curve.start_time, start) {
                kept.push(before);
            }
            if let Some(after) = curve.sub_range(end, curve.end_time()) {
                kept.push(after);
            }
        }
        self.curves = kept;
    }

    /// Remove all curves
    pub fn clear(&mut self) {
        self.curves.clear();
    }

    /// Volume at `time`, see [`super::volume_at`]
    pub fn volume_at(&self, time: f64, default_volume: f32) -> f32 {
        super::volume_at(time, &self.curves, default_volume)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_draw_keeps_order() {
        let mut lane = EnvelopeLane::new();
        lane.draw(EnvelopeCurve::ramp(5.0, 1.0, 0.0, 1.0)).unwrap();
        lane.draw(EnvelopeCurve::ramp(1.0, 1.0, 0.0, 1.0)).unwrap();
        lane.draw(EnvelopeCurve::ramp(3.0, 1.0, 0.0, 1.0)).unwrap();

        let starts: Vec<f64> = lane.curves().iter().map(|c| c.start_time).collect();
        assert_eq!(starts, vec![1.0, 3.0, 5.0]);
    }

    #[test]
    fn test_draw_splits_overlapped_curve() {
        let mut lane = EnvelopeLane::new();
        lane.draw(EnvelopeCurve::ramp(0.0, 10.0, 0.0, 1.0)).unwrap();
        lane.draw(EnvelopeCurve::ramp(4.0, 2.0, 0.9, 0.9)).unwrap();

        let curves = lane.curves();
        assert_eq!(curves.len(), 3);
        assert_eq!(curves[0].end_time(), 4.0);
        assert_eq!(curves[1].start_time, 4.0);
        assert_eq!(curves[2].start_time, 6.0);

        // Outside the new curve the old ramp is unchanged
        assert!((lane.volume_at(2.0, 1.0) - 0.2).abs() < 1e-6);
        assert!((lane.volume_at(8.0, 1.0) - 0.8).abs() < 1e-6);
        assert!((lane.volume_at(5.0, 1.0) - 0.9).abs() < 1e-6);
    }

    #[test]
    fn test_draw_rejects_malformed() {
        let mut lane = EnvelopeLane::new();
        assert!(lane.draw(EnvelopeCurve::new(0.0, 1.0, vec![], vec![])).is_err());
        assert!(lane.is_empty());
    }

    #[test]
    fn test_clear_range_and_clear() {
        let mut lane = EnvelopeLane::from_curves(vec![
            EnvelopeCurve::ramp(0.0, 2.0, 0.0, 1.0),
            EnvelopeCurve::ramp(4.0, 2.0, 1.0, 0.0),
        ]);
        lane.clear_range(1.0, 5.0);

        let curves = lane.curves();
        assert_eq!(curves.len(), 2);
        assert_eq!(curves[0].end_time(), 1.0);
        assert_eq!(curves[1].start_time, 5.0);

        lane.clear();
        assert!(lane.is_empty());
        assert_eq!(lane.volume_at(3.0, 0.6), 0.6);
    }
}
