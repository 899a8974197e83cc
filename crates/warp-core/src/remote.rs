//! Server fallback for stretching
//!
//! Used when local computation is unavailable or a buffer is longer than
//! the local duration ceiling. Two calls per job:
//!
//! ```text
//! POST {base}/stretch  { audioId, pitchValue, ratio, startTime, duration } → { outputId }
//! GET  {base}/audio/{outputId}                                             → WAV bytes
//! ```
//!
//! Transport failures and 5xx/429 responses are retried with exponential
//! backoff; other responses fail immediately.

use std::io::Read;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::audio_file::decode_wav_bytes;
use crate::config::RemoteConfig;
use crate::error::{WarpError, WarpResult};
use crate::types::{AudioSegment, StretchParameters};

/// Largest response body accepted from the server
const MAX_AUDIO_BYTES: u64 = 2 * 1024 * 1024 * 1024;

/// Where the server finds the audio to stretch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteSource {
    /// Server-side id of the uploaded source audio
    pub audio_id: String,
    /// Offset into the source, seconds
    pub start_time: f64,
    /// Length of the region, seconds
    pub duration: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StretchJobRequest {
    pub audio_id: String,
    /// Pitch offset in semitones
    pub pitch_value: f64,
    pub ratio: f64,
    pub start_time: f64,
    pub duration: f64,
}

impl StretchJobRequest {
    pub fn new(source: &RemoteSource, params: StretchParameters) -> Self {
        Self {
            audio_id: source.audio_id.clone(),
            pitch_value: params.semitones(),
            ratio: params.time_ratio,
            start_time: source.start_time,
            duration: source.duration,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StretchJobResponse {
    pub output_id: String,
}

/// Anything that can stretch audio held by the server
pub trait RemoteStretcher: Send + Sync {
    fn stretch_remote(&self, source: &RemoteSource, params: StretchParameters) -> WarpResult<AudioSegment>;
}

/// Bounded exponential backoff
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &RemoteConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
        }
    }

    /// Delay before retry number `retry` (0-based): `initial · 2^retry`, capped
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 1u32.checked_shl(retry).unwrap_or(u32::MAX);
        self.initial_backoff
            .checked_mul(factor)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RemoteConfig::default())
    }
}

/// How a failed attempt should be treated
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptError {
    Retryable(String),
    Fatal(String),
}

impl From<ureq::Error> for AttemptError {
    fn from(e: ureq::Error) -> Self {
        match e {
            ureq::Error::Status(code, response) => {
                let message = format!("HTTP {} from {}", code, response.get_url());
                if code >= 500 || code == 429 {
                    AttemptError::Retryable(message)
                } else {
                    AttemptError::Fatal(message)
                }
            }
            ureq::Error::Transport(transport) => AttemptError::Retryable(transport.to_string()),
        }
    }
}

/// Run `op` until it succeeds, fails fatally or runs out of retries
///
/// `op` receives the 0-based attempt number. `sleep` is called with the
/// backoff before every retry.
pub fn retry_with<T>(
    policy: &RetryPolicy,
    label: &str,
    mut op: impl FnMut(u32) -> Result<T, AttemptError>,
    mut sleep: impl FnMut(Duration),
) -> WarpResult<T> {
    let mut attempt = 0u32;
    loop {
        match op(attempt) {
            Ok(value) => return Ok(value),
            Err(AttemptError::Fatal(message)) => {
                log::error!("{} failed: {}", label, message);
                return Err(WarpError::Network {
                    attempts: attempt + 1,
                    message,
                });
            }
            Err(AttemptError::Retryable(message)) => {
                if attempt >= policy.max_retries {
                    log::error!("{} failed after {} attempts: {}", label, attempt + 1, message);
                    return Err(WarpError::Network {
                        attempts: attempt + 1,
                        message,
                    });
                }
                let delay = policy.backoff(attempt);
                log::warn!(
                    "{} attempt {} failed: {}; retrying in {:?}",
                    label,
                    attempt + 1,
                    message,
                    delay
                );
                sleep(delay);
                attempt += 1;
            }
        }
    }
}

/// [`retry_with`] sleeping on the current thread
pub fn with_retry<T>(
    policy: &RetryPolicy,
    label: &str,
    op: impl FnMut(u32) -> Result<T, AttemptError>,
) -> WarpResult<T> {
    retry_with(policy, label, op, std::thread::sleep)
}

/// Blocking HTTP client for the stretch server
pub struct RemoteStretchClient {
    agent: ureq::Agent,
    base_url: String,
    policy: RetryPolicy,
}

impl RemoteStretchClient {
    pub fn new(config: &RemoteConfig) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build();
        Self {
            agent,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            policy: RetryPolicy::from_config(config),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Submit a stretch job, returning the server's output id
    pub fn request_stretch(&self, source: &RemoteSource, params: StretchParameters) -> WarpResult<String> {
        let url = format!("{}/stretch", self.base_url);
        let body = StretchJobRequest::new(source, params);
        log::info!(
            "Requesting server stretch of {} ({:.2}s at {:.2}s, ratio {:.4})",
            body.audio_id,
            body.duration,
            body.start_time,
            body.ratio
        );

        let response: StretchJobResponse = with_retry(&self.policy, "POST /stretch", |_| {
            let response = self.agent.post(&url).send_json(&body)?;
            response
                .into_json::<StretchJobResponse>()
                .map_err(|e| AttemptError::Fatal(format!("invalid stretch response: {}", e)))
        })?;
        Ok(response.output_id)
    }

    /// Download and decode processed audio
    pub fn fetch_audio(&self, output_id: &str) -> WarpResult<AudioSegment> {
        let url = format!("{}/audio/{}", self.base_url, output_id);
        let bytes = with_retry(&self.policy, "GET /audio", |_| {
            let response = self.agent.get(&url).call()?;
            let mut bytes = Vec::new();
            response
                .into_reader()
                .take(MAX_AUDIO_BYTES)
                .read_to_end(&mut bytes)
                .map_err(|e| AttemptError::Retryable(format!("reading body: {}", e)))?;
            Ok(bytes)
        })?;

        log::debug!("Fetched {} bytes for {}", bytes.len(), output_id);
        decode_wav_bytes(&bytes)
    }
}

impl RemoteStretcher for RemoteStretchClient {
    fn stretch_remote(&self, source: &RemoteSource, params: StretchParameters) -> WarpResult<AudioSegment> {
        let output_id = self.request_stretch(source, params)?;
        self.fetch_audio(&output_id)
    }
}
