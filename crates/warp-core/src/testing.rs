//! Test helpers: signal generators and a deterministic stretch engine

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::{WarpError, WarpResult};
use crate::timestretch::{EngineFactory, EngineSession};
use crate::types::{AudioSegment, Sample};

/// `channels` identical sine channels
pub(crate) fn sine(freq: f32, amplitude: f32, len: usize, sample_rate: u32, channels: usize) -> AudioSegment {
    let data: Vec<Sample> = (0..len)
        .map(|i| amplitude * (2.0 * std::f32::consts::PI * freq * i as f32 / sample_rate as f32).sin())
        .collect();
    AudioSegment::new(vec![data; channels], sample_rate).unwrap()
}

/// One call into a [`FakeSession`], as recorded by its factory
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum SessionCall {
    Study { frames: usize, first: Sample, final_chunk: bool },
    Process { frames: usize, first: Sample, final_chunk: bool },
}

/// Linear-resampling engine with configurable misbehaviour
///
/// Output is the padded input resampled by the time ratio and scaled by
/// `gain`; pitch is ignored. Start delay is always zero.
#[derive(Debug, Clone)]
pub(crate) struct FakeFactory {
    pub gain: f32,
    pub start_pad: usize,
    pub block: usize,
    /// Fail the n-th `create` call (0-based)
    pub fail_on_create: Option<usize>,
    /// Sleep this long inside `create`
    pub create_delay: Duration,
    /// Panic on the first `process` call of the n-th session (0-based)
    pub panic_in_session: Option<usize>,
    pub creates: Arc<AtomicUsize>,
    /// Study and process calls of every session, in order
    pub calls: Arc<Mutex<Vec<SessionCall>>>,
}

impl Default for FakeFactory {
    fn default() -> Self {
        Self {
            gain: 1.0,
            start_pad: 0,
            block: 1024,
            fail_on_create: None,
            create_delay: Duration::ZERO,
            panic_in_session: None,
            creates: Arc::new(AtomicUsize::new(0)),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl EngineFactory for FakeFactory {
    fn name(&self) -> &'static str {
        "fake"
    }

    fn create(&self, sample_rate: u32, channels: usize) -> WarpResult<Box<dyn EngineSession>> {
        let n = self.creates.fetch_add(1, Ordering::SeqCst);
        if !self.create_delay.is_zero() {
            std::thread::sleep(self.create_delay);
        }
        if self.fail_on_create == Some(n) {
            return Err(WarpError::EngineInit {
                sample_rate,
                channels,
                reason: "fake engine refused".into(),
            });
        }
        Ok(Box::new(FakeSession {
            ratio: 1.0,
            gain: self.gain,
            start_pad: self.start_pad,
            block: self.block,
            panic_in_process: self.panic_in_session == Some(n),
            calls: self.calls.clone(),
            input: vec![Vec::new(); channels],
            emitted: 0,
            pending: vec![Vec::new(); channels],
        }))
    }
}

struct FakeSession {
    ratio: f64,
    gain: f32,
    start_pad: usize,
    block: usize,
    panic_in_process: bool,
    calls: Arc<Mutex<Vec<SessionCall>>>,
    input: Vec<Vec<Sample>>,
    emitted: usize,
    pending: Vec<Vec<Sample>>,
}

impl FakeSession {
    fn sample_at(&self, channel: usize, pos: f64) -> Sample {
        let data = &self.input[channel];
        let last = data.len() - 1;
        let i0 = (pos.floor() as usize).min(last);
        let i1 = (i0 + 1).min(last);
        let frac = (pos - i0 as f64).clamp(0.0, 1.0) as f32;
        (data[i0] + (data[i1] - data[i0]) * frac) * self.gain
    }
}

impl EngineSession for FakeSession {
    fn set_time_ratio(&mut self, ratio: f64) {
        self.ratio = ratio;
    }

    fn set_pitch_scale(&mut self, _scale: f64) {}

    fn samples_required(&self) -> usize {
        self.block
    }

    fn preferred_start_pad(&self) -> usize {
        self.start_pad
    }

    fn start_delay(&self) -> usize {
        0
    }

    fn study(&mut self, input: &[&[Sample]], final_chunk: bool) {
        let (frames, first) = chunk_head(input);
        self.calls.lock().unwrap().push(SessionCall::Study {
            frames,
            first,
            final_chunk,
        });
    }

    fn process(&mut self, input: &[&[Sample]], final_chunk: bool) {
        let (frames, first) = chunk_head(input);
        self.calls.lock().unwrap().push(SessionCall::Process {
            frames,
            first,
            final_chunk,
        });
        if self.panic_in_process {
            panic!("fake engine crashed");
        }
        for (buf, chunk) in self.input.iter_mut().zip(input) {
            buf.extend_from_slice(chunk);
        }
        let fed = self.input[0].len();
        if fed == 0 {
            return;
        }
        let ready = if final_chunk {
            (fed as f64 * self.ratio).ceil() as usize + 1
        } else {
            ((fed - 1) as f64 * self.ratio).floor() as usize
        };
        for j in self.emitted..ready {
            let pos = j as f64 / self.ratio;
            for c in 0..self.input.len() {
                let s = self.sample_at(c, pos);
                self.pending[c].push(s);
            }
        }
        self.emitted = self.emitted.max(ready);
    }

    fn available(&self) -> usize {
        self.pending[0].len()
    }

    fn retrieve(&mut self, frames: usize, output: &mut [Vec<Sample>]) -> usize {
        let n = frames.min(self.available());
        for (queue, out) in self.pending.iter_mut().zip(output.iter_mut()) {
            out.extend(queue.drain(..n));
        }
        n
    }
}

fn chunk_head(input: &[&[Sample]]) -> (usize, Sample) {
    let channel = input.first().copied().unwrap_or(&[]);
    (channel.len(), channel.first().copied().unwrap_or(0.0))
}
