//! Warp Core - time-stretch/pitch-shift pipeline, playback clock and envelope DSP
//!
//! - [`timestretch`]: single-engine stretching through a lifecycle-driven engine
//! - [`parallel`]: one buffer fanned out over several engines and crossfaded back
//! - [`strategy`]: picks parallel, single-worker, blocking or server execution
//! - [`worker`]: request/response messages and the local worker thread
//! - [`remote`]: server fallback client with retry
//! - [`envelope`]: per-sample volume curves and stereo pan
//! - [`clock`]: authoritative playback time with drift correction
//! - [`audio_file`]: WAV decode/encode

pub mod audio_file;
pub mod clock;
pub mod config;
pub mod envelope;
pub mod error;
pub mod parallel;
pub mod remote;
pub mod strategy;
pub mod timestretch;
pub mod types;
pub mod worker;

#[cfg(test)]
mod testing;

pub use error::{WarpError, WarpResult};
pub use types::*;
