//! Error types for the processing pipeline
//!
//! DSP layers fail fast with a descriptive error; envelope evaluation never
//! produces one (malformed curves fall back to the default volume).

use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while stretching, dispatching or fetching audio
#[derive(Error, Debug)]
pub enum WarpError {
    /// Input audio could not be parsed
    #[error("Failed to decode audio: {0}")]
    Decode(String),

    /// The DSP engine rejected the requested configuration
    #[error("Stretch engine rejected {channels} channel(s) at {sample_rate} Hz: {reason}")]
    EngineInit {
        sample_rate: u32,
        channels: usize,
        reason: String,
    },

    /// A worker did not signal readiness in time
    #[error("Worker for segment {segment} not ready after {timeout:?}")]
    WorkerTimeout { segment: usize, timeout: Duration },

    /// A worker reported an error or terminated without a result
    #[error("Worker for segment {segment} failed: {message}")]
    WorkerFailed { segment: usize, message: String },

    /// The worker thread pool could not be started
    #[error("Failed to start worker pool: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),

    /// Server request failed after all retries
    #[error("Network request failed after {attempts} attempt(s): {message}")]
    Network { attempts: u32, message: String },

    /// Server fallback requested but not possible for this job
    #[error("Server processing unavailable: {0}")]
    RemoteUnavailable(String),

    /// Caller passed inconsistent or out-of-range data
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A newer request replaced this one before its result arrived
    #[error("Request {ticket} superseded by a newer request")]
    Superseded { ticket: u64 },

    /// Operation on a disposed context
    #[error("{0} has been disposed")]
    Disposed(&'static str),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl WarpError {
    /// Whether the single-engine path may be tried after this error
    ///
    /// An engine that rejected its configuration will reject it again, and
    /// a superseded request has no caller left to receive the result.
    pub fn allows_single_engine_retry(&self) -> bool {
        !matches!(self, WarpError::Superseded { .. } | WarpError::EngineInit { .. })
    }
}

/// Result type for pipeline operations
pub type WarpResult<T> = Result<T, WarpError>;
