//! Wire types exchanged with a processing unit
//!
//! JSON shapes (camelCase, `type`-tagged):
//!
//! ```text
//! → { "type": "stretch", "sampleRate", "channelBuffers", "timeRatio", "pitchSemitones" }
//! → { "type": "applyVolume" | "applyPan" | "applyVolumeAndPan",
//!     "sampleRate", "channelBuffers", "volumeCurves", "defaultVolume", "panValue" }
//! ← { "type": "progress", "percent" }                       (zero or more)
//! ← { "type": "complete", "channelBuffers", "actualLength" } (exactly one
//! ← { "type": "error", "message", "rejected"? }              terminal)
//! ```

use serde::{Deserialize, Serialize};

use crate::envelope::{EnvelopeCurve, EnvelopeSettings};
use crate::error::{WarpError, WarpResult};
use crate::types::{AudioSegment, Sample, StretchParameters};

/// A unit of work for a worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum WorkerRequest {
    #[serde(rename_all = "camelCase")]
    Stretch {
        sample_rate: u32,
        channel_buffers: Vec<Vec<Sample>>,
        #[serde(alias = "stretchFactor")]
        time_ratio: f64,
        #[serde(default)]
        pitch_semitones: f64,
    },
    ApplyVolume(EnvelopeRequest),
    ApplyPan(EnvelopeRequest),
    ApplyVolumeAndPan(EnvelopeRequest),
}

/// Payload shared by the envelope requests
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvelopeRequest {
    pub sample_rate: u32,
    pub channel_buffers: Vec<Vec<Sample>>,
    #[serde(default)]
    pub volume_curves: Vec<EnvelopeCurve>,
    #[serde(default = "unity")]
    pub default_volume: f32,
    #[serde(default)]
    pub pan_value: f32,
}

fn unity() -> f32 {
    1.0
}

impl EnvelopeRequest {
    /// Takes ownership of the segment's buffers
    pub fn new(segment: AudioSegment, settings: &EnvelopeSettings) -> Self {
        Self {
            sample_rate: segment.sample_rate(),
            channel_buffers: segment.into_channels(),
            volume_curves: settings.volume_curves.clone(),
            default_volume: settings.default_volume,
            pan_value: settings.pan_value,
        }
    }
}

impl WorkerRequest {
    /// Takes ownership of the segment's buffers; clone first to keep them
    pub fn stretch(segment: AudioSegment, params: StretchParameters) -> Self {
        Self::Stretch {
            sample_rate: segment.sample_rate(),
            channel_buffers: segment.into_channels(),
            time_ratio: params.time_ratio,
            pitch_semitones: params.semitones(),
        }
    }

    /// Volume and pan together; the usual envelope request
    pub fn envelope(segment: AudioSegment, settings: &EnvelopeSettings) -> Self {
        Self::ApplyVolumeAndPan(EnvelopeRequest::new(segment, settings))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Stretch { .. } => "stretch",
            Self::ApplyVolume(_) => "applyVolume",
            Self::ApplyPan(_) => "applyPan",
            Self::ApplyVolumeAndPan(_) => "applyVolumeAndPan",
        }
    }

    pub fn sample_rate(&self) -> u32 {
        match self {
            Self::Stretch { sample_rate, .. } => *sample_rate,
            Self::ApplyVolume(r) | Self::ApplyPan(r) | Self::ApplyVolumeAndPan(r) => r.sample_rate,
        }
    }
}

/// A message from a worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum WorkerResponse {
    Progress {
        percent: f32,
    },
    #[serde(rename_all = "camelCase")]
    Complete {
        channel_buffers: Vec<Vec<Sample>>,
        actual_length: usize,
    },
    Error {
        message: String,
        /// Present when the engine refused the configuration
        #[serde(default, skip_serializing_if = "Option::is_none")]
        rejected: Option<EngineRejection>,
    },
}

/// Why an engine refused to start, carried so the caller sees
/// [`WarpError::EngineInit`] rather than a generic failure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineRejection {
    pub sample_rate: u32,
    pub channels: usize,
    pub reason: String,
}

impl WorkerResponse {
    pub fn complete(segment: AudioSegment) -> Self {
        let actual_length = segment.len();
        Self::Complete {
            channel_buffers: segment.into_channels(),
            actual_length,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
            rejected: None,
        }
    }

    /// Terminal response for a failed request
    pub fn from_error(error: &WarpError) -> Self {
        let rejected = match error {
            WarpError::EngineInit {
                sample_rate,
                channels,
                reason,
            } => Some(EngineRejection {
                sample_rate: *sample_rate,
                channels: *channels,
                reason: reason.clone(),
            }),
            _ => None,
        };
        Self::Error {
            message: error.to_string(),
            rejected,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Progress { .. })
    }

    /// Turn a terminal response into audio
    ///
    /// Channels are cut to `actual_length` when they carry more.
    pub fn into_segment(self, sample_rate: u32) -> WarpResult<AudioSegment> {
        match self {
            Self::Complete {
                mut channel_buffers,
                actual_length,
            } => {
                for channel in &mut channel_buffers {
                    channel.truncate(actual_length);
                }
                AudioSegment::new(channel_buffers, sample_rate)
            }
            Self::Error {
                rejected: Some(r), ..
            } => Err(WarpError::EngineInit {
                sample_rate: r.sample_rate,
                channels: r.channels,
                reason: r.reason,
            }),
            Self::Error { message, .. } => Err(WarpError::WorkerFailed {
                segment: 0,
                message,
            }),
            Self::Progress { .. } => Err(WarpError::InvalidInput(
                "progress message is not a result".to_string(),
            )),
        }
    }
}
