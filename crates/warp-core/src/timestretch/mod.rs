//! Offline time-stretching and pitch-shifting
//!
//! A stretch engine is a stateful streaming DSP instance driven through a
//! fixed protocol:
//!
//! ```text
//! create → set ratio/pitch → study(chunks…, final) → process(chunk, final)
//!        → retrieve(available) … → drop
//! ```
//!
//! [`EngineFactory`] / [`EngineSession`] describe that protocol so the
//! pipeline never depends on a particular library. [`SignalsmithFactory`]
//! is the production implementation on top of signalsmith-stretch, and
//! [`StretchEngine`] is the driver that pads, studies, processes, trims and
//! normalizes one buffer.

mod engine;
mod progress;
mod signalsmith;

pub use engine::{normalization_gain, StretchEngine, MAX_NORMALIZATION_GAIN, NORMALIZATION_FLOOR};
pub use progress::PhaseProgress;
pub use signalsmith::{SignalsmithFactory, SignalsmithSession, StretchPreset};

use crate::error::WarpResult;
use crate::types::Sample;

/// One running engine instance, bound to a channel count and sample rate
///
/// Created for a single stretch invocation and dropped at its end. Input
/// chunks are planar: one slice per channel, all of equal length.
pub trait EngineSession: Send {
    fn set_time_ratio(&mut self, ratio: f64);

    fn set_pitch_scale(&mut self, scale: f64);

    /// Preferred chunk size for study/process calls
    fn samples_required(&self) -> usize;

    /// Silence to prepend so the engine's history fill doesn't eat real audio
    fn preferred_start_pad(&self) -> usize;

    /// Inherent latency in input samples
    fn start_delay(&self) -> usize;

    /// Analysis pass; the whole signal is studied before any processing
    ///
    /// Streaming engines may have nothing to analyse and only keep count.
    fn study(&mut self, input: &[&[Sample]], final_chunk: bool);

    /// Processing pass; output becomes available for [`Self::retrieve`]
    fn process(&mut self, input: &[&[Sample]], final_chunk: bool);

    /// Output frames ready to retrieve
    fn available(&self) -> usize;

    /// Append up to `frames` frames to `output` (one Vec per channel),
    /// returning how many were appended
    fn retrieve(&mut self, frames: usize, output: &mut [Vec<Sample>]) -> usize;
}

/// Creates engine sessions; shared between worker threads
pub trait EngineFactory: Send + Sync {
    /// Short name for logs
    fn name(&self) -> &'static str;

    /// Create a session for `(sample_rate, channels)`
    ///
    /// Unsupported combinations fail with `WarpError::EngineInit`.
    fn create(&self, sample_rate: u32, channels: usize) -> WarpResult<Box<dyn EngineSession>>;
}
