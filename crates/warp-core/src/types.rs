//! Common types for Warp
//!
//! This module contains the fundamental audio types shared by the stretch
//! pipeline, the envelope processor and the worker messages.

use crate::error::{WarpError, WarpResult};

/// Default sample rate used when a caller doesn't specify one
pub const DEFAULT_SAMPLE_RATE: u32 = 48000;

/// Audio sample type (32-bit float for processing)
pub type Sample = f32;

/// An ordered set of equal-length channel sample arrays plus a sample rate
///
/// Segments are produced by decoding or by a processing step and are
/// replaced, not mutated, by the next step. Channels are stored planar
/// (one `Vec` per channel) because every consumer in the pipeline works
/// per channel and the worker wire format carries one buffer per channel.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioSegment {
    channels: Vec<Vec<Sample>>,
    sample_rate: u32,
}

impl AudioSegment {
    /// Create a segment from planar channel data
    ///
    /// Fails if there are no channels, the sample rate is zero or the
    /// channels differ in length.
    pub fn new(channels: Vec<Vec<Sample>>, sample_rate: u32) -> WarpResult<Self> {
        if channels.is_empty() {
            return Err(WarpError::InvalidInput("segment has no channels".into()));
        }
        if sample_rate == 0 {
            return Err(WarpError::InvalidInput("sample rate must be positive".into()));
        }
        let len = channels[0].len();
        if let Some((idx, ch)) = channels.iter().enumerate().find(|(_, c)| c.len() != len) {
            return Err(WarpError::InvalidInput(format!(
                "channel {} has {} samples, expected {}",
                idx,
                ch.len(),
                len
            )));
        }
        Ok(Self { channels, sample_rate })
    }

    /// Wrap channel data produced inside the crate, where equal lengths hold
    /// by construction
    pub(crate) fn from_trusted(channels: Vec<Vec<Sample>>, sample_rate: u32) -> Self {
        debug_assert!(!channels.is_empty());
        debug_assert!(channels.iter().all(|c| c.len() == channels[0].len()));
        Self { channels, sample_rate }
    }

    /// Create a segment filled with silence
    pub fn silence(channel_count: usize, len: usize, sample_rate: u32) -> Self {
        Self {
            channels: vec![vec![0.0; len]; channel_count.max(1)],
            sample_rate,
        }
    }

    /// Create a segment from interleaved samples [c0, c1, .., c0, c1, ..]
    pub fn from_interleaved(
        interleaved: &[Sample],
        channel_count: usize,
        sample_rate: u32,
    ) -> WarpResult<Self> {
        if channel_count == 0 || interleaved.len() % channel_count != 0 {
            return Err(WarpError::InvalidInput(format!(
                "{} interleaved samples do not divide into {} channels",
                interleaved.len(),
                channel_count
            )));
        }
        let frames = interleaved.len() / channel_count;
        let mut channels = vec![Vec::with_capacity(frames); channel_count];
        for frame in interleaved.chunks_exact(channel_count) {
            for (ch, &s) in channels.iter_mut().zip(frame) {
                ch.push(s);
            }
        }
        Self::new(channels, sample_rate)
    }

    /// Copy samples out as interleaved [c0, c1, .., c0, c1, ..]
    pub fn to_interleaved(&self) -> Vec<Sample> {
        let count = self.channel_count();
        let mut out = vec![0.0; self.len() * count];
        for (c, channel) in self.channels.iter().enumerate() {
            for (i, &s) in channel.iter().enumerate() {
                out[i * count + c] = s;
            }
        }
        out
    }

    /// Number of sample frames (per channel)
    #[inline]
    pub fn len(&self) -> usize {
        self.channels.first().map_or(0, Vec::len)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    #[inline]
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Duration in seconds
    pub fn duration_secs(&self) -> f64 {
        self.len() as f64 / self.sample_rate as f64
    }

    /// Borrow one channel
    #[inline]
    pub fn channel(&self, index: usize) -> &[Sample] {
        &self.channels[index]
    }

    /// Borrow all channels
    #[inline]
    pub fn channels(&self) -> &[Vec<Sample>] {
        &self.channels
    }

    /// Take ownership of the channel data
    pub fn into_channels(self) -> Vec<Vec<Sample>> {
        self.channels
    }

    /// Copy out frames `[start, end)` as a new segment (clamped to the length)
    pub fn slice(&self, start: usize, end: usize) -> Self {
        let end = end.min(self.len());
        let start = start.min(end);
        Self {
            channels: self.channels.iter().map(|c| c[start..end].to_vec()).collect(),
            sample_rate: self.sample_rate,
        }
    }

    /// Peak absolute amplitude across all channels
    pub fn peak(&self) -> Sample {
        peak_of(&self.channels)
    }

    /// Root-mean-square level across all channels
    pub fn rms(&self) -> Sample {
        let count = self.len() * self.channel_count();
        if count == 0 {
            return 0.0;
        }
        let sum: f64 = self
            .channels
            .iter()
            .flat_map(|c| c.iter())
            .map(|&s| (s as f64) * (s as f64))
            .sum();
        (sum / count as f64).sqrt() as Sample
    }
}

/// Peak absolute amplitude over planar channel data
pub(crate) fn peak_of(channels: &[Vec<Sample>]) -> Sample {
    channels
        .iter()
        .flat_map(|c| c.iter())
        .map(|s| s.abs())
        .fold(0.0, Sample::max)
}

/// Parameters for one stretch invocation
///
/// `time_ratio` is output duration ÷ input duration (> 1 lengthens),
/// `pitch_scale` is the frequency multiplier `2^(semitones/12)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StretchParameters {
    pub time_ratio: f64,
    pub pitch_scale: f64,
}

impl StretchParameters {
    pub fn new(time_ratio: f64, pitch_scale: f64) -> Self {
        Self {
            time_ratio,
            pitch_scale,
        }
    }

    /// Build parameters from a pitch offset in semitones
    pub fn from_semitones(time_ratio: f64, semitones: f64) -> Self {
        Self::new(time_ratio, 2f64.powf(semitones / 12.0))
    }

    /// No stretch, no pitch change
    pub fn identity() -> Self {
        Self::new(1.0, 1.0)
    }

    /// Pitch offset in semitones
    pub fn semitones(&self) -> f64 {
        12.0 * self.pitch_scale.log2()
    }

    pub fn is_identity(&self) -> bool {
        (self.time_ratio - 1.0).abs() < 1e-9 && (self.pitch_scale - 1.0).abs() < 1e-9
    }

    /// Reject non-finite or non-positive values
    pub fn validate(&self) -> WarpResult<()> {
        if !self.time_ratio.is_finite() || self.time_ratio <= 0.0 {
            return Err(WarpError::InvalidInput(format!(
                "time ratio must be positive, got {}",
                self.time_ratio
            )));
        }
        if !self.pitch_scale.is_finite() || self.pitch_scale <= 0.0 {
            return Err(WarpError::InvalidInput(format!(
                "pitch scale must be positive, got {}",
                self.pitch_scale
            )));
        }
        Ok(())
    }
}

impl Default for StretchParameters {
    fn default() -> Self {
        Self::identity()
    }
}
