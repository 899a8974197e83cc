//! Pipeline settings
//!
//! Loaded from `config.yaml`; every field has a default so a partial file
//! is valid. Call [`WarpConfig::validate`] (done by [`WarpConfig::load`])
//! before use to clamp hand-edited values into working ranges.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::load_config;

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WarpConfig {
    pub processing: ProcessingConfig,
    pub remote: RemoteConfig,
    pub clock: ClockConfig,
}

impl WarpConfig {
    /// Load from `path` (defaults if missing or invalid) and validate
    pub fn load(path: &Path) -> Self {
        let mut config: Self = load_config(path);
        config.validate();
        config
    }

    pub fn validate(&mut self) {
        self.processing.validate();
        self.remote.validate();
        self.clock.validate();
    }
}

/// Local processing: worker fan-out and dispatch thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingConfig {
    /// Upper bound on parallel stretch units
    /// Default: available parallelism, capped at 8
    pub max_workers: usize,

    /// Buffers shorter than this are never split
    /// Default: 2.0
    pub min_parallel_duration_secs: f64,

    /// Audio shared between adjacent parallel segments, per side
    /// Default: 0.5
    pub overlap_secs: f64,

    /// How long a stretch unit may take to bring up its engine
    /// Default: 10000
    pub worker_ready_timeout_ms: u64,

    /// Buffers longer than this always go to the server
    /// Default: 900 (15 minutes)
    pub local_duration_ceiling_secs: f64,

    /// Parallel execution units can be used
    pub parallel_available: bool,

    /// Heavy computation may run locally at all
    pub local_compute_available: bool,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        let cores = std::thread::available_parallelism().map_or(1, |n| n.get());
        Self {
            max_workers: cores.min(8),
            min_parallel_duration_secs: 2.0,
            overlap_secs: 0.5,
            worker_ready_timeout_ms: 10_000,
            local_duration_ceiling_secs: 900.0,
            parallel_available: true,
            local_compute_available: true,
        }
    }
}

impl ProcessingConfig {
    pub fn validate(&mut self) {
        self.max_workers = self.max_workers.clamp(1, 64);
        self.min_parallel_duration_secs = finite_or(self.min_parallel_duration_secs, 2.0).clamp(0.1, 600.0);
        self.overlap_secs = finite_or(self.overlap_secs, 0.5).clamp(0.01, 5.0);
        self.worker_ready_timeout_ms = self.worker_ready_timeout_ms.clamp(100, 120_000);
        self.local_duration_ceiling_secs =
            finite_or(self.local_duration_ceiling_secs, 900.0).clamp(1.0, 86_400.0);
    }

    pub fn worker_ready_timeout(&self) -> Duration {
        Duration::from_millis(self.worker_ready_timeout_ms)
    }
}

/// Server fallback endpoint and retry policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Base URL of the stretch server, without trailing slash
    pub base_url: String,

    /// Retries after the first attempt
    /// Default: 3
    pub max_retries: u32,

    /// Delay before the first retry, doubled on each further retry
    /// Default: 500
    pub initial_backoff_ms: u64,

    /// Cap on the retry delay
    /// Default: 8000
    pub max_backoff_ms: u64,

    /// Per-request timeout
    /// Default: 60
    pub request_timeout_secs: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:5000".to_string(),
            max_retries: 3,
            initial_backoff_ms: 500,
            max_backoff_ms: 8_000,
            request_timeout_secs: 60,
        }
    }
}

impl RemoteConfig {
    pub fn validate(&mut self) {
        let trimmed = self.base_url.trim().trim_end_matches('/').to_string();
        self.base_url = trimmed;
        self.max_retries = self.max_retries.min(10);
        self.initial_backoff_ms = self.initial_backoff_ms.clamp(10, 60_000);
        self.max_backoff_ms = self.max_backoff_ms.clamp(self.initial_backoff_ms, 300_000);
        self.request_timeout_secs = self.request_timeout_secs.clamp(1, 600);
    }
}

/// Playback clock drift correction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClockConfig {
    /// How often the clock compares itself against its sources
    /// Default: 500
    pub drift_check_interval_ms: u64,

    /// Drift beyond this is corrected
    /// Default: 50
    pub drift_threshold_ms: u64,
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            drift_check_interval_ms: 500,
            drift_threshold_ms: 50,
        }
    }
}

impl ClockConfig {
    pub fn validate(&mut self) {
        self.drift_check_interval_ms = self.drift_check_interval_ms.clamp(16, 10_000);
        self.drift_threshold_ms = self.drift_threshold_ms.clamp(1, 5_000);
    }

    pub fn drift_check_interval_secs(&self) -> f64 {
        self.drift_check_interval_ms as f64 / 1000.0
    }

    pub fn drift_threshold_secs(&self) -> f64 {
        self.drift_threshold_ms as f64 / 1000.0
    }
}

fn finite_or(value: f64, fallback: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        fallback
    }
}
