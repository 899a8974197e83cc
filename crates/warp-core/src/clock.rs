//! PlaybackClock - the authoritative timeline position
//!
//! The clock advances a virtual `time` from frame timestamps passed to
//! [`PlaybackClock::tick`] and keeps two external sources in line with it:
//!
//! - a [`VideoSource`], whose position can be set directly
//! - an [`AudioOutputClock`], which only runs forward; the clock stores an
//!   offset translating its reading into timeline time
//!
//! Sources are corrected towards `time`, never the reverse. Every
//! state-changing call notifies subscribers with `(time, is_playing)`.
//! All times are seconds.

use std::panic::{self, AssertUnwindSafe};

use crate::config::ClockConfig;
use crate::error::{WarpError, WarpResult};
use crate::parallel::panic_message;

/// A seekable video element
pub trait VideoSource: Send {
    fn position(&self) -> f64;
    fn set_position(&mut self, seconds: f64);
}

/// A free-running audio output clock
pub trait AudioOutputClock: Send {
    fn now(&self) -> f64;
}

/// Subscriber callback, called with `(time, is_playing)`
pub type ClockCallback = Box<dyn FnMut(f64, bool) + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ClockState {
    pub time: f64,
    pub duration: f64,
    pub is_playing: bool,
    /// Timestamp of the previous tick; `None` until the next tick sets a baseline
    pub last_tick_timestamp: Option<f64>,
}

/// Corrections made by one drift check, as the drift that was removed
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct DriftCorrection {
    pub video: Option<f64>,
    pub audio: Option<f64>,
}

impl DriftCorrection {
    pub fn is_empty(&self) -> bool {
        self.video.is_none() && self.audio.is_none()
    }
}

pub struct PlaybackClock {
    state: ClockState,
    drift_interval: f64,
    drift_threshold: f64,
    video: Option<Box<dyn VideoSource>>,
    audio: Option<Box<dyn AudioOutputClock>>,
    /// Timeline time = audio clock reading + offset
    audio_offset: f64,
    last_drift_check: Option<f64>,
    subscribers: Vec<(SubscriptionId, ClockCallback)>,
    next_subscription: u64,
    disposed: bool,
}

impl PlaybackClock {
    pub fn new(config: &ClockConfig) -> Self {
        Self {
            state: ClockState::default(),
            drift_interval: config.drift_check_interval_secs(),
            drift_threshold: config.drift_threshold_secs(),
            video: None,
            audio: None,
            audio_offset: 0.0,
            last_drift_check: None,
            subscribers: Vec::new(),
            next_subscription: 0,
            disposed: false,
        }
    }

    pub fn set_video_source(&mut self, video: Option<Box<dyn VideoSource>>) {
        if self.ensure_live("set_video_source") {
            self.video = video;
        }
    }

    pub fn set_audio_clock(&mut self, audio: Option<Box<dyn AudioOutputClock>>) {
        if self.ensure_live("set_audio_clock") {
            self.audio = audio;
            self.resync_audio();
        }
    }

    pub fn state(&self) -> ClockState {
        self.state
    }

    pub fn time(&self) -> f64 {
        self.state.time
    }

    pub fn duration(&self) -> f64 {
        self.state.duration
    }

    pub fn is_playing(&self) -> bool {
        self.state.is_playing
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    /// Timeline position derived from the audio output clock
    pub fn audio_position(&self) -> Option<f64> {
        self.audio.as_ref().map(|audio| audio.now() + self.audio_offset)
    }

    /// Reset to time 0, paused, for a timeline of `duration` seconds
    pub fn init(&mut self, duration: f64) -> WarpResult<()> {
        if self.disposed {
            return Err(WarpError::Disposed("PlaybackClock"));
        }
        if !duration.is_finite() || duration < 0.0 {
            return Err(WarpError::InvalidInput(format!("invalid timeline duration: {}", duration)));
        }

        self.state = ClockState {
            duration,
            ..ClockState::default()
        };
        self.last_drift_check = None;
        self.sync_sources();
        log::debug!("PlaybackClock initialised ({:.3}s)", duration);
        self.notify();
        Ok(())
    }

    pub fn play(&mut self) {
        if !self.ensure_live("play") || self.state.is_playing {
            return;
        }
        self.state.is_playing = true;
        self.state.last_tick_timestamp = None;
        self.last_drift_check = None;
        self.resync_audio();
        self.notify();
    }

    pub fn pause(&mut self) {
        if !self.ensure_live("pause") {
            return;
        }
        self.state.is_playing = false;
        self.state.last_tick_timestamp = None;
        self.notify();
    }

    /// Pause and return to the start
    pub fn stop(&mut self) {
        if !self.ensure_live("stop") {
            return;
        }
        self.state.is_playing = false;
        self.state.time = 0.0;
        self.state.last_tick_timestamp = None;
        self.sync_sources();
        self.notify();
    }

    /// Jump to `time`, clamped to the timeline, and re-sync both sources
    pub fn seek_to(&mut self, time: f64) {
        if !self.ensure_live("seek_to") {
            return;
        }
        let time = if time.is_finite() { time } else { 0.0 };
        self.state.time = time.clamp(0.0, self.state.duration);
        self.state.last_tick_timestamp = None;
        self.sync_sources();
        self.notify();
    }

    /// Advance by the time since the previous tick
    ///
    /// The first tick after play, pause or seek only records `timestamp` as
    /// a baseline. Reaching the end clamps to `duration` and pauses. Runs a
    /// drift check once per drift interval.
    pub fn tick(&mut self, timestamp: f64) {
        if self.disposed || !self.state.is_playing || !timestamp.is_finite() {
            return;
        }

        let previous = self.state.last_tick_timestamp.replace(timestamp);
        let Some(previous) = previous else {
            self.last_drift_check.get_or_insert(timestamp);
            return;
        };
        // Timestamps going backwards only move the baseline
        let delta = timestamp - previous;
        if delta <= 0.0 {
            return;
        }

        self.state.time += delta;
        if self.state.time >= self.state.duration {
            self.state.time = self.state.duration;
            self.state.is_playing = false;
            self.state.last_tick_timestamp = None;
            log::debug!("PlaybackClock reached end ({:.3}s)", self.state.duration);
            self.notify();
            return;
        }

        match self.last_drift_check {
            Some(last) if timestamp - last >= self.drift_interval => {
                self.last_drift_check = Some(timestamp);
                self.check_drift();
            }
            None => self.last_drift_check = Some(timestamp),
            _ => {}
        }
        self.notify();
    }

    /// Pull the video and audio sources back to `time` if they drifted
    /// beyond the threshold. Does nothing while paused.
    pub fn check_drift(&mut self) -> DriftCorrection {
        let mut correction = DriftCorrection::default();
        if self.disposed || !self.state.is_playing {
            return correction;
        }
        let time = self.state.time;

        if let Some(video) = self.video.as_mut() {
            let drift = video.position() - time;
            if drift.abs() > self.drift_threshold {
                video.set_position(time);
                correction.video = Some(drift);
                log::debug!("Video drifted {:+.1}ms, corrected", drift * 1000.0);
            }
        }

        if let Some(audio) = self.audio.as_ref() {
            let now = audio.now();
            let drift = now + self.audio_offset - time;
            if drift.abs() > self.drift_threshold {
                self.audio_offset = time - now;
                correction.audio = Some(drift);
                log::debug!("Audio clock drifted {:+.1}ms, offset reset", drift * 1000.0);
            }
        }

        correction
    }

    pub fn subscribe(&mut self, callback: ClockCallback) -> SubscriptionId {
        let id = SubscriptionId(self.next_subscription);
        self.next_subscription += 1;
        if self.ensure_live("subscribe") {
            self.subscribers.push((id, callback));
        }
        id
    }

    /// Returns false if `id` was not subscribed
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.subscribers.len();
        self.subscribers.retain(|(sub, _)| *sub != id);
        self.subscribers.len() != before
    }

    /// Release sources and subscribers; the clock is unusable afterwards
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;
        self.state.is_playing = false;
        self.state.last_tick_timestamp = None;
        self.subscribers.clear();
        self.video = None;
        self.audio = None;
        log::debug!("PlaybackClock disposed");
    }

    fn ensure_live(&self, operation: &str) -> bool {
        if self.disposed {
            log::warn!("PlaybackClock::{} ignored, clock disposed", operation);
        }
        !self.disposed
    }

    fn sync_sources(&mut self) {
        let time = self.state.time;
        if let Some(video) = self.video.as_mut() {
            video.set_position(time);
        }
        self.resync_audio();
    }

    fn resync_audio(&mut self) {
        if let Some(audio) = self.audio.as_ref() {
            self.audio_offset = self.state.time - audio.now();
        }
    }

    fn notify(&mut self) {
        let ClockState { time, is_playing, .. } = self.state;
        for (id, callback) in self.subscribers.iter_mut() {
            let result = panic::catch_unwind(AssertUnwindSafe(|| callback(time, is_playing)));
            if let Err(payload) = result {
                log::error!(
                    "PlaybackClock subscriber {:?} panicked: {}",
                    id,
                    panic_message(payload.as_ref())
                );
            }
        }
    }
}

impl Drop for PlaybackClock {
    fn drop(&mut self) {
        self.dispose();
    }
}
