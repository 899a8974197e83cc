//! Stretch engine on top of signalsmith-stretch
//!
//! signalsmith-stretch is a block stretcher: the ratio is implied by how
//! many output frames are requested per input block. The session keeps a
//! running count of consumed input and produced output so the total output
//! tracks `round(consumed × ratio)` without drift, and holds the result in
//! a planar queue for [`EngineSession::retrieve`].

use std::collections::VecDeque;

use signalsmith_stretch::Stretch;

use super::{EngineFactory, EngineSession};
use crate::error::{WarpError, WarpResult};
use crate::types::Sample;

/// Chunk size the driver should feed per call
const SAMPLES_REQUIRED: usize = 2048;

/// Extra silence pushed after the final chunk, on top of the input latency
const TAIL_MARGIN: usize = 256;

/// Supported channel counts
const MAX_CHANNELS: usize = 8;

/// Supported sample rate range (Hz)
const MIN_SAMPLE_RATE: u32 = 8000;
const MAX_SAMPLE_RATE: u32 = 192_000;

/// Quality preset for new sessions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StretchPreset {
    #[default]
    Default,
    /// signalsmith's `preset_cheaper`: noticeably faster, slightly lower quality
    Cheaper,
}

/// Creates [`SignalsmithSession`]s
#[derive(Debug, Clone, Copy, Default)]
pub struct SignalsmithFactory {
    preset: StretchPreset,
}

impl SignalsmithFactory {
    pub fn new(preset: StretchPreset) -> Self {
        Self { preset }
    }

    pub fn preset(&self) -> StretchPreset {
        self.preset
    }
}

impl EngineFactory for SignalsmithFactory {
    fn name(&self) -> &'static str {
        match self.preset {
            StretchPreset::Default => "signalsmith",
            StretchPreset::Cheaper => "signalsmith-cheaper",
        }
    }

    fn create(&self, sample_rate: u32, channels: usize) -> WarpResult<Box<dyn EngineSession>> {
        Ok(Box::new(SignalsmithSession::new(
            sample_rate,
            channels,
            self.preset,
        )?))
    }
}

/// One signalsmith-stretch instance driven through the session protocol
pub struct SignalsmithSession {
    stretcher: Stretch,
    channels: usize,
    sample_rate: u32,
    time_ratio: f64,
    pitch_scale: f64,
    /// Frames seen by `study`
    studied: usize,
    /// Frames fed to the stretcher, tail silence included
    consumed: usize,
    /// Frames the stretcher has written out
    produced: usize,
    /// Planar output waiting to be retrieved
    pending: Vec<VecDeque<Sample>>,
    input_scratch: Vec<f32>,
    output_scratch: Vec<f32>,
    finished: bool,
}

impl SignalsmithSession {
    pub fn new(sample_rate: u32, channels: usize, preset: StretchPreset) -> WarpResult<Self> {
        if channels == 0 || channels > MAX_CHANNELS {
            return Err(WarpError::EngineInit {
                sample_rate,
                channels,
                reason: format!("channel count must be 1..={}", MAX_CHANNELS),
            });
        }
        if !(MIN_SAMPLE_RATE..=MAX_SAMPLE_RATE).contains(&sample_rate) {
            return Err(WarpError::EngineInit {
                sample_rate,
                channels,
                reason: format!(
                    "sample rate must be {}..={} Hz",
                    MIN_SAMPLE_RATE, MAX_SAMPLE_RATE
                ),
            });
        }

        let stretcher = match preset {
            StretchPreset::Default => Stretch::preset_default(channels as u32, sample_rate),
            StretchPreset::Cheaper => Stretch::preset_cheaper(channels as u32, sample_rate),
        };
        log::debug!(
            "Created signalsmith session: {} Hz, {} ch, latency in={} out={}",
            sample_rate,
            channels,
            stretcher.input_latency(),
            stretcher.output_latency()
        );

        Ok(Self {
            stretcher,
            channels,
            sample_rate,
            time_ratio: 1.0,
            pitch_scale: 1.0,
            studied: 0,
            consumed: 0,
            produced: 0,
            pending: vec![VecDeque::new(); channels],
            input_scratch: Vec::new(),
            output_scratch: Vec::new(),
            finished: false,
        })
    }

    pub fn input_latency(&self) -> usize {
        self.stretcher.input_latency()
    }

    /// Frames seen by the analysis pass so far
    pub fn studied_frames(&self) -> usize {
        self.studied
    }

    pub fn output_latency(&self) -> usize {
        self.stretcher.output_latency()
    }

    /// Run whatever is in `input_scratch` through the stretcher, producing
    /// enough output to keep `produced ≈ consumed × ratio`
    fn run_block(&mut self, frames: usize) {
        self.consumed += frames;
        let target = (self.consumed as f64 * self.time_ratio).round() as usize;
        let out_frames = target.saturating_sub(self.produced);
        if frames == 0 && out_frames == 0 {
            return;
        }

        self.output_scratch.clear();
        self.output_scratch.resize(out_frames * self.channels, 0.0);
        self.stretcher.process(
            &self.input_scratch[..frames * self.channels],
            &mut self.output_scratch[..],
        );
        self.produced += out_frames;
        self.queue_output(out_frames);
    }

    fn queue_output(&mut self, frames: usize) {
        for frame in self.output_scratch[..frames * self.channels].chunks_exact(self.channels) {
            for (queue, &s) in self.pending.iter_mut().zip(frame) {
                queue.push_back(s);
            }
        }
    }

    /// Push silence through the analysis window, then flush the stretcher
    fn finish(&mut self) {
        let tail = self.stretcher.input_latency() + TAIL_MARGIN;
        self.input_scratch.clear();
        self.input_scratch.resize(tail * self.channels, 0.0);
        self.run_block(tail);

        let flush_frames = self.stretcher.output_latency();
        self.output_scratch.clear();
        self.output_scratch.resize(flush_frames * self.channels, 0.0);
        self.stretcher.flush(&mut self.output_scratch[..]);
        self.produced += flush_frames;
        self.queue_output(flush_frames);

        self.finished = true;
        log::debug!(
            "Signalsmith session finished: {} frames in, {} frames out",
            self.consumed,
            self.produced
        );
    }
}

impl EngineSession for SignalsmithSession {
    fn set_time_ratio(&mut self, ratio: f64) {
        self.time_ratio = ratio;
    }

    fn set_pitch_scale(&mut self, scale: f64) {
        self.pitch_scale = scale;
        let semitones = 12.0 * scale.log2();
        // None: no tonality limit on formant handling
        self.stretcher
            .set_transpose_factor_semitones(semitones as f32, None);
    }

    fn samples_required(&self) -> usize {
        SAMPLES_REQUIRED
    }

    fn preferred_start_pad(&self) -> usize {
        self.stretcher.input_latency()
    }

    fn start_delay(&self) -> usize {
        // Output latency is measured in output frames; express it in input frames
        let output_in_input = (self.stretcher.output_latency() as f64 / self.time_ratio).ceil();
        self.stretcher.input_latency() + output_in_input as usize
    }

    /// signalsmith-stretch analyses as it streams, so studying only records
    /// how much input the processing pass should expect
    fn study(&mut self, input: &[&[Sample]], final_chunk: bool) {
        self.studied += input.first().map_or(0, |c| c.len());
        if final_chunk {
            log::trace!(
                "Signalsmith study complete: {} frames at {} Hz",
                self.studied,
                self.sample_rate
            );
        }
    }

    fn process(&mut self, input: &[&[Sample]], final_chunk: bool) {
        if self.finished {
            log::warn!("Signalsmith session received input after the final chunk");
            return;
        }

        let frames = input.first().map_or(0, |c| c.len());
        if self.consumed + frames > self.studied {
            log::warn!(
                "Signalsmith session processing {} frames past the {} studied",
                self.consumed + frames - self.studied,
                self.studied
            );
        }
        self.input_scratch.clear();
        self.input_scratch.resize(frames * self.channels, 0.0);
        for (c, channel) in input.iter().take(self.channels).enumerate() {
            for (i, &s) in channel.iter().take(frames).enumerate() {
                self.input_scratch[i * self.channels + c] = s;
            }
        }
        self.run_block(frames);

        if final_chunk {
            self.finish();
        }
    }

    fn available(&self) -> usize {
        self.pending.first().map_or(0, VecDeque::len)
    }

    fn retrieve(&mut self, frames: usize, output: &mut [Vec<Sample>]) -> usize {
        let n = frames.min(self.available());
        for (queue, out) in self.pending.iter_mut().zip(output.iter_mut()) {
            out.extend(queue.drain(..n));
        }
        n
    }
}

impl Drop for SignalsmithSession {
    fn drop(&mut self) {
        log::trace!(
            "Released signalsmith session ({} ch, ratio {:.3}, pitch {:.3})",
            self.channels,
            self.time_ratio,
            self.pitch_scale
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_creation() {
        let session = SignalsmithSession::new(48000, 2, StretchPreset::Default).unwrap();
        assert!(session.input_latency() > 0);
        assert!(session.output_latency() > 0);
        assert_eq!(session.preferred_start_pad(), session.input_latency());
        assert!(session.start_delay() >= session.input_latency() + session.output_latency());
    }

    #[test]
    fn test_rejects_unsupported_configuration() {
        let factory = SignalsmithFactory::default();
        assert!(matches!(
            factory.create(48000, 0),
            Err(WarpError::EngineInit { channels: 0, .. })
        ));
        assert!(matches!(
            factory.create(1000, 2),
            Err(WarpError::EngineInit { sample_rate: 1000, .. })
        ));
    }

    #[test]
    fn test_output_tracks_ratio() {
        let mut session = SignalsmithSession::new(44100, 1, StretchPreset::Cheaper).unwrap();
        session.set_time_ratio(1.5);

        let input = vec![0.0f32; 10_000];
        session.study(&[&input[..4000]], false);
        session.study(&[&input[4000..]], true);
        assert_eq!(session.studied_frames(), 10_000);
        assert_eq!(session.available(), 0);

        session.process(&[&input[..4000]], false);
        assert_eq!(session.available(), 6000);
        session.process(&[&input[4000..]], false);
        assert_eq!(session.available(), 15_000);

        let mut out = vec![Vec::new()];
        assert_eq!(session.retrieve(1000, &mut out), 1000);
        assert_eq!(out[0].len(), 1000);
        assert_eq!(session.available(), 14_000);
    }

    #[test]
    fn test_final_chunk_flushes_tail() {
        let mut session = SignalsmithSession::new(48000, 2, StretchPreset::Default).unwrap();
        let chunk = vec![0.0f32; 1024];
        session.study(&[&chunk, &chunk], true);
        session.process(&[&chunk, &chunk], true);

        let expected = 1024 + session.input_latency() + TAIL_MARGIN + session.output_latency();
        assert_eq!(session.available(), expected);

        // Input after the final chunk is ignored
        session.process(&[&chunk, &chunk], false);
        assert_eq!(session.available(), expected);
    }
}
