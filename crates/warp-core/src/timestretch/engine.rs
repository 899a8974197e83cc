//! Single-buffer stretch driver
//!
//! Drives one [`EngineSession`] through the whole offline protocol:
//!
//! 1. configure ratio and pitch (5%)
//! 2. prepend the engine's preferred start pad of silence
//! 3. study the padded signal in `samples_required` chunks (10–30%)
//! 4. process the same chunks, draining output as it becomes available (30–90%)
//! 5. trim the start delay and clip to the target length (95%)
//! 6. normalize the peak back towards the input's (100%)
//!
//! The session is dropped before returning.

use std::sync::Arc;

use super::{EngineFactory, EngineSession, PhaseProgress, SignalsmithFactory};
use crate::error::WarpResult;
use crate::types::{peak_of, AudioSegment, Sample, StretchParameters};

/// Peaks at or below this are treated as silence and never normalized
pub const NORMALIZATION_FLOOR: Sample = 0.001;

/// Upper bound on the gain applied while normalizing
pub const MAX_NORMALIZATION_GAIN: Sample = 2.0;

/// Gain that brings `output_peak` back to `input_peak`
///
/// `None` when either peak is effectively silent; otherwise
/// `min(input_peak / output_peak, MAX_NORMALIZATION_GAIN)`.
pub fn normalization_gain(input_peak: Sample, output_peak: Sample) -> Option<Sample> {
    if input_peak > NORMALIZATION_FLOOR && output_peak > NORMALIZATION_FLOOR {
        Some((input_peak / output_peak).min(MAX_NORMALIZATION_GAIN))
    } else {
        None
    }
}

/// Stretches whole buffers with engines from one factory
#[derive(Clone)]
pub struct StretchEngine {
    factory: Arc<dyn EngineFactory>,
}

impl StretchEngine {
    pub fn new(factory: Arc<dyn EngineFactory>) -> Self {
        Self { factory }
    }

    /// Engine backed by signalsmith-stretch with the default preset
    pub fn signalsmith() -> Self {
        Self::new(Arc::new(SignalsmithFactory::default()))
    }

    pub fn factory(&self) -> &Arc<dyn EngineFactory> {
        &self.factory
    }

    /// Stretch `input` by `params`
    ///
    /// Output has the input's channel count and sample rate and length
    /// `ceil(len × time_ratio)` (shorter only if the engine under-produces).
    /// `progress` receives monotonically increasing percentages ending at 100.
    pub fn stretch(
        &self,
        input: &AudioSegment,
        params: StretchParameters,
        progress: &dyn Fn(f32),
    ) -> WarpResult<AudioSegment> {
        params.validate()?;
        let progress = PhaseProgress::new(progress);
        let channels = input.channel_count();
        let sample_rate = input.sample_rate();

        if input.is_empty() {
            progress.report(100.0);
            return Ok(AudioSegment::silence(channels, 0, sample_rate));
        }

        let mut session = self.factory.create(sample_rate, channels)?;
        session.set_time_ratio(params.time_ratio);
        session.set_pitch_scale(params.pitch_scale);
        let block = session.samples_required().max(1);
        let pad = session.preferred_start_pad();
        let delay = session.start_delay();
        log::debug!(
            "Stretching {} frames x {} ch with {} (ratio {:.4}, pitch {:.4}, pad {}, delay {})",
            input.len(),
            channels,
            self.factory.name(),
            params.time_ratio,
            params.pitch_scale,
            pad,
            delay
        );
        progress.report(5.0);

        let padded: Vec<Vec<Sample>> = input
            .channels()
            .iter()
            .map(|channel| {
                let mut buf = Vec::with_capacity(pad + channel.len());
                buf.resize(pad, 0.0);
                buf.extend_from_slice(channel);
                buf
            })
            .collect();
        let total = pad + input.len();

        let mut pos = 0;
        while pos < total {
            let end = (pos + block).min(total);
            session.study(&chunk(&padded, pos, end), end == total);
            pos = end;
            progress.phase(10.0, 30.0, pos as f64 / total as f64);
        }

        let expected = (total as f64 * params.time_ratio).ceil() as usize + block;
        let mut output: Vec<Vec<Sample>> = (0..channels).map(|_| Vec::with_capacity(expected)).collect();
        let mut pos = 0;
        while pos < total {
            let end = (pos + block).min(total);
            let last = end == total;
            session.process(&chunk(&padded, pos, end), last);
            if last {
                drain_all(session.as_mut(), &mut output);
            } else {
                let available = session.available();
                if available >= block {
                    session.retrieve(available, &mut output);
                }
            }
            pos = end;
            progress.phase(30.0, 90.0, pos as f64 / total as f64);
        }

        let produced = output.first().map_or(0, Vec::len);
        let start = ((pad + delay) as f64 * params.time_ratio).ceil() as usize;
        let target = (input.len() as f64 * params.time_ratio).ceil() as usize;
        let end = (start + target).min(produced);
        let start = start.min(end);
        if end - start < target {
            log::warn!(
                "{} produced {} frames, {} short of the {} expected",
                self.factory.name(),
                end - start,
                target - (end - start),
                target
            );
        }
        for channel in &mut output {
            channel.truncate(end);
            channel.drain(..start);
        }
        progress.report(95.0);

        if let Some(gain) = normalization_gain(input.peak(), peak_of(&output)) {
            for s in output.iter_mut().flat_map(|c| c.iter_mut()) {
                *s = (*s * gain).clamp(-1.0, 1.0);
            }
        }
        progress.report(100.0);

        drop(session);
        Ok(AudioSegment::from_trusted(output, sample_rate))
    }
}

fn chunk(channels: &[Vec<Sample>], start: usize, end: usize) -> Vec<&[Sample]> {
    channels.iter().map(|c| &c[start..end]).collect()
}

fn drain_all(session: &mut dyn EngineSession, output: &mut [Vec<Sample>]) {
    loop {
        let available = session.available();
        if available == 0 || session.retrieve(available, output) == 0 {
            break;
        }
    }
}
