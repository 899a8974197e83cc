//! Envelope evaluation and application
//!
//! All functions are pure: they read immutable inputs and return new
//! buffers. Malformed curves are skipped, so the worst case is the default
//! volume rather than an error.

use std::f32::consts::FRAC_PI_4;

use super::{EnvelopeCurve, MIN_PAN_GAIN};
use crate::types::{AudioSegment, Sample};

/// Volume gain at `time` (seconds) for an ordered curve list
///
/// Curves are checked in list order and the first window containing `time`
/// wins, so a time exactly on a shared boundary belongs to the earlier
/// curve. Outside every window the terminal value of the nearest curve that
/// ended at or before `time` holds; with no such curve the default volume
/// applies.
pub fn volume_at(time: f64, curves: &[EnvelopeCurve], default_volume: f32) -> f32 {
    for curve in curves {
        if !curve.is_well_formed() || !curve.contains(time) {
            continue;
        }
        if let Some(value) = curve.value_at(time) {
            return value;
        }
    }

    let mut held: Option<(f64, f32)> = None;
    for curve in curves.iter().filter(|c| c.is_well_formed()) {
        let end = curve.end_time();
        if end > time {
            continue;
        }
        if held.map_or(true, |(held_end, _)| end >= held_end) {
            if let Some(value) = curve.terminal_value() {
                held = Some((end, value));
            }
        }
    }

    held.map_or(default_volume, |(_, value)| value)
}

/// Equal-power pan gains `(left, right)` for a pan value in [-1, 1]
///
/// `angle = (pan + 1)·π/4`, `left = cos(angle)`, `right = sin(angle)`.
/// Out-of-range values are clamped and NaN is treated as centre.
pub fn pan_gains(pan: f32) -> (f32, f32) {
    let pan = if pan.is_nan() { 0.0 } else { pan.clamp(-1.0, 1.0) };
    let angle = (pan + 1.0) * FRAC_PI_4;
    (angle.cos(), angle.sin())
}

/// Per-channel multipliers applied to an existing stereo pair
///
/// One channel passes through untouched and only the opposite channel is
/// attenuated: for `pan <= 0` the right channel is scaled by
/// `right / max(left, 0.001)`, for `pan > 0` the left channel by
/// `left / max(right, 0.001)`.
pub fn stereo_pan_scales(pan: f32) -> (f32, f32) {
    let (left, right) = pan_gains(pan);
    if pan.is_nan() || pan <= 0.0 {
        (1.0, right / left.max(MIN_PAN_GAIN))
    } else {
        (left / right.max(MIN_PAN_GAIN), 1.0)
    }
}

/// Apply the volume envelope only; channel layout is unchanged
pub fn apply_volume(
    segment: &AudioSegment,
    curves: &[EnvelopeCurve],
    default_volume: f32,
) -> AudioSegment {
    render(segment, Some((curves, default_volume)), None)
}

/// Apply the pan only
///
/// Mono input becomes stereo `[s·left, s·right]`; stereo input gets the
/// one-sided scaling of [`stereo_pan_scales`].
pub fn apply_pan(segment: &AudioSegment, pan: f32) -> AudioSegment {
    render(segment, None, Some(pan))
}

/// Apply volume and pan in a single pass
pub fn apply_volume_and_pan(
    segment: &AudioSegment,
    curves: &[EnvelopeCurve],
    default_volume: f32,
    pan: f32,
) -> AudioSegment {
    render(segment, Some((curves, default_volume)), Some(pan))
}

fn render(
    segment: &AudioSegment,
    volume: Option<(&[EnvelopeCurve], f32)>,
    pan: Option<f32>,
) -> AudioSegment {
    let len = segment.len();
    let sample_rate = segment.sample_rate() as f64;
    let input = segment.channels();

    let gain_at = |i: usize| -> Sample {
        match volume {
            Some((curves, default_volume)) => volume_at(i as f64 / sample_rate, curves, default_volume),
            None => 1.0,
        }
    };

    let channels = match (pan, input.len()) {
        (Some(pan), 1) => {
            let (left_gain, right_gain) = pan_gains(pan);
            let mut left = Vec::with_capacity(len);
            let mut right = Vec::with_capacity(len);
            for (i, &s) in input[0].iter().enumerate() {
                let v = s * gain_at(i);
                left.push(v * left_gain);
                right.push(v * right_gain);
            }
            vec![left, right]
        }
        (pan, _) => {
            let (left_scale, right_scale) = pan.map_or((1.0, 1.0), stereo_pan_scales);
            let mut out: Vec<Vec<Sample>> = input.iter().map(|_| Vec::with_capacity(len)).collect();
            for i in 0..len {
                let gain = gain_at(i);
                for (c, channel) in input.iter().enumerate() {
                    let scale = match c {
                        0 => left_scale,
                        1 => right_scale,
                        _ => 1.0,
                    };
                    out[c].push(channel[i] * gain * scale);
                }
            }
            out
        }
    };

    AudioSegment::from_trusted(channels, segment.sample_rate())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp() -> Vec<EnvelopeCurve> {
        vec![EnvelopeCurve::new(0.0, 10.0, vec![0.0, 1.0], vec![0.0, 1.0])]
    }

    #[test]
    fn test_volume_interpolation_boundaries() {
        let curves = ramp();
        assert_eq!(volume_at(0.0, &curves, 0.7), 0.0);
        assert_eq!(volume_at(10.0, &curves, 0.7), 1.0);
        assert_eq!(volume_at(5.0, &curves, 0.7), 0.5);
    }

    #[test]
    fn test_volume_outside_windows() {
        let curves = vec![
            EnvelopeCurve::ramp(2.0, 2.0, 0.1, 0.3),
            EnvelopeCurve::ramp(6.0, 2.0, 0.4, 0.9),
        ];
        // Before any curve: default
        assert_eq!(volume_at(1.0, &curves, 0.7), 0.7);
        // Gap between curves: first curve's terminal value holds
        assert_eq!(volume_at(5.0, &curves, 0.7), 0.3);
        // After everything: last curve's terminal value
        assert_eq!(volume_at(20.0, &curves, 0.7), 0.9);
    }

    #[test]
    fn test_first_matching_window_wins() {
        let curves = vec![
            EnvelopeCurve::ramp(0.0, 2.0, 0.0, 0.25),
            EnvelopeCurve::ramp(2.0, 2.0, 1.0, 1.0),
        ];
        // t = 2.0 is inside both closed windows
        assert_eq!(volume_at(2.0, &curves, 0.5), 0.25);
    }

    #[test]
    fn test_malformed_curve_falls_back_to_default() {
        let curves = vec![EnvelopeCurve::new(0.0, 10.0, vec![], vec![])];
        assert_eq!(volume_at(5.0, &curves, 0.8), 0.8);
        assert_eq!(volume_at(50.0, &curves, 0.8), 0.8);
    }

    #[test]
    fn test_equal_power_pan() {
        let (l, r) = pan_gains(0.0);
        assert!((l - FRAC_PI_4.cos()).abs() < 1e-6);
        assert!((r - FRAC_PI_4.sin()).abs() < 1e-6);

        let (l, r) = pan_gains(-1.0);
        assert!((l - 1.0).abs() < 1e-6);
        assert!(r.abs() < 1e-6);

        let (l, r) = pan_gains(1.0);
        assert!(l.abs() < 1e-6);
        assert!((r - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_mono_pan_produces_stereo() {
        let mono = AudioSegment::new(vec![vec![1.0, 0.5]], 48000).unwrap();
        let out = apply_pan(&mono, 0.0);

        assert_eq!(out.channel_count(), 2);
        let g = FRAC_PI_4.cos();
        assert!((out.channel(0)[0] - g).abs() < 1e-6);
        assert!((out.channel(1)[1] - 0.5 * FRAC_PI_4.sin()).abs() < 1e-6);
    }

    #[test]
    fn test_stereo_pan_keeps_one_channel_untouched() {
        let stereo = AudioSegment::new(vec![vec![0.8; 4], vec![0.8; 4]], 48000).unwrap();

        let left_pan = apply_pan(&stereo, -0.5);
        assert_eq!(left_pan.channel(0), &[0.8; 4]);
        let (l, r) = pan_gains(-0.5);
        assert!((left_pan.channel(1)[0] - 0.8 * r / l).abs() < 1e-6);

        let right_pan = apply_pan(&stereo, 0.5);
        assert_eq!(right_pan.channel(1), &[0.8; 4]);
        assert!(right_pan.channel(0)[0] < 0.8);

        // Hard left silences the right channel entirely
        let hard_left = apply_pan(&stereo, -1.0);
        assert!(hard_left.channel(1)[0].abs() < 1e-6);

        // Centre leaves both channels as they were
        let centre = apply_pan(&stereo, 0.0);
        assert!((centre.channel(1)[0] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_volume_and_pan_single_pass_matches_sequential() {
        let sr = 10;
        let data: Vec<f32> = (0..100).map(|i| ((i as f32) * 0.3).sin()).collect();
        let stereo = AudioSegment::new(vec![data.clone(), data], sr).unwrap();
        let curves = ramp();

        let combined = apply_volume_and_pan(&stereo, &curves, 1.0, 0.3);
        let sequential = apply_pan(&apply_volume(&stereo, &curves, 1.0), 0.3);

        for c in 0..2 {
            for (a, b) in combined.channel(c).iter().zip(sequential.channel(c)) {
                assert!((a - b).abs() < 1e-6);
            }
        }
    }

    #[test]
    fn test_apply_volume_is_sample_accurate() {
        let sr = 10;
        let seg = AudioSegment::new(vec![vec![1.0; 101]], sr).unwrap();
        let out = apply_volume(&seg, &ramp(), 1.0);

        assert_eq!(out.channel_count(), 1);
        assert_eq!(out.channel(0)[0], 0.0);
        assert_eq!(out.channel(0)[50], 0.5);
        assert_eq!(out.channel(0)[100], 1.0);
    }
}
