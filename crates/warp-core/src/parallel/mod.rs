//! Parallel stretching of one buffer across several engines
//!
//! The coordinator splits a buffer into overlapping segments, stretches each
//! on its own pool thread with its own [`StretchEngine`] session, and
//! crossfades the results back together:
//!
//! ```text
//! input ──partition──▶ [seg 0] [seg 1] … [seg N-1]      (owned copies)
//!                        │       │           │          rayon pool
//!                        ▼       ▼           ▼
//!                 (index, UnitEvent) over one crossbeam channel
//!                        │
//!                        ▼
//!                 merge left→right by index ──▶ output
//! ```
//!
//! Any failing unit fails the whole operation; falling back to a single
//! engine is the caller's decision.

mod merge;
mod partition;

pub use merge::{merge_segments, Crossfade, Merged};
pub use partition::{partition, SegmentRange};

use std::panic::{self, AssertUnwindSafe};
use std::time::Instant;

use crossbeam::channel::{self, RecvTimeoutError, Sender};

use crate::config::ProcessingConfig;
use crate::error::{WarpError, WarpResult};
use crate::timestretch::{PhaseProgress, StretchEngine};
use crate::types::{AudioSegment, Sample, StretchParameters};

/// Result of a parallel attempt
#[derive(Debug)]
pub enum ParallelOutcome {
    Completed(AudioSegment),
    /// Buffer too short or a single worker requested; use one engine instead
    NotApplicable,
}

/// Messages from a stretch unit, tagged with its segment index on the channel
enum UnitEvent {
    /// Engine created and configured
    Ready,
    Progress(f32),
    Complete(Vec<Vec<Sample>>),
    Failed(WarpError),
}

/// Fans one stretch out over a rayon pool
pub struct ParallelStretchCoordinator {
    engine: StretchEngine,
    config: ProcessingConfig,
    thread_pool: rayon::ThreadPool,
}

impl ParallelStretchCoordinator {
    /// Create a coordinator with a pool of `config.max_workers` threads
    ///
    /// The pool is sized so every unit of one call runs at once; readiness
    /// timeouts would otherwise count time spent queued.
    pub fn new(engine: StretchEngine, config: ProcessingConfig) -> WarpResult<Self> {
        let thread_pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.max_workers.max(1))
            .thread_name(|i| format!("warp-stretch-{}", i))
            .build()?;

        Ok(Self {
            engine,
            config,
            thread_pool,
        })
    }

    pub fn config(&self) -> &ProcessingConfig {
        &self.config
    }

    pub fn engine(&self) -> &StretchEngine {
        &self.engine
    }

    /// Stretch `input` across up to `workers` units
    ///
    /// Returns [`ParallelOutcome::NotApplicable`] when the buffer is shorter
    /// than `min_parallel_duration_secs` or fewer than two units would run.
    /// `progress` receives the mean unit progress (up to 95%), then 100
    /// once merged.
    pub fn stretch(
        &self,
        input: &AudioSegment,
        params: StretchParameters,
        workers: usize,
        progress: &dyn Fn(f32),
    ) -> WarpResult<ParallelOutcome> {
        params.validate()?;
        let workers = workers.min(self.config.max_workers);
        if input.duration_secs() < self.config.min_parallel_duration_secs || workers <= 1 {
            log::debug!(
                "Parallel stretch not applicable ({:.2}s, {} workers)",
                input.duration_secs(),
                workers
            );
            return Ok(ParallelOutcome::NotApplicable);
        }

        let started = Instant::now();
        let progress = PhaseProgress::new(progress);
        let overlap = (self.config.overlap_secs * input.sample_rate() as f64).round() as usize;
        let (ranges, overlap) = partition(input.len(), workers, overlap);
        log::info!(
            "Parallel stretch: {} frames in {} segments, overlap {} frames, ratio {:.4}",
            input.len(),
            ranges.len(),
            overlap,
            params.time_ratio
        );

        let (tx, rx) = channel::unbounded::<(usize, UnitEvent)>();
        for range in &ranges {
            let segment = input.slice(range.start, range.end);
            let engine = self.engine.clone();
            let tx = tx.clone();
            let index = range.index;
            self.thread_pool
                .spawn(move || run_unit(index, &engine, &segment, params, &tx));
        }
        drop(tx);

        let outputs = self.collect(&rx, ranges.len(), &progress)?;

        let merged = merge_segments(&ranges, &outputs, input.len(), params.time_ratio, overlap);
        progress.report(100.0);
        log::info!(
            "Parallel stretch complete: {} frames out in {:?}",
            merged.channels.first().map_or(0, Vec::len),
            started.elapsed()
        );

        Ok(ParallelOutcome::Completed(AudioSegment::from_trusted(
            merged.channels,
            input.sample_rate(),
        )))
    }

    /// Wait for every unit, enforcing the readiness deadline
    fn collect(
        &self,
        rx: &channel::Receiver<(usize, UnitEvent)>,
        count: usize,
        progress: &PhaseProgress,
    ) -> WarpResult<Vec<Vec<Vec<Sample>>>> {
        let timeout = self.config.worker_ready_timeout();
        let deadline = Instant::now() + timeout;
        let mut ready = vec![false; count];
        let mut unit_progress = vec![0.0f32; count];
        let mut outputs: Vec<Option<Vec<Vec<Sample>>>> = (0..count).map(|_| None).collect();
        let mut remaining = count;

        while remaining > 0 {
            let received = if ready.iter().all(|&r| r) {
                rx.recv().map_err(|_| RecvTimeoutError::Disconnected)
            } else {
                rx.recv_deadline(deadline)
            };

            match received {
                Ok((index, UnitEvent::Ready)) => {
                    ready[index] = true;
                }
                Ok((index, UnitEvent::Progress(percent))) => {
                    ready[index] = true;
                    unit_progress[index] = percent;
                    let mean = unit_progress.iter().sum::<f32>() / count as f32;
                    progress.report(mean * 0.95);
                }
                Ok((index, UnitEvent::Complete(channels))) => {
                    ready[index] = true;
                    unit_progress[index] = 100.0;
                    if outputs[index].replace(channels).is_none() {
                        remaining -= 1;
                    }
                }
                Ok((index, UnitEvent::Failed(error))) => {
                    log::error!("Stretch unit {} failed: {}", index, error);
                    return Err(error);
                }
                Err(RecvTimeoutError::Timeout) => {
                    let segment = ready.iter().position(|&r| !r).unwrap_or(0);
                    log::error!("Stretch unit {} not ready after {:?}", segment, timeout);
                    return Err(WarpError::WorkerTimeout { segment, timeout });
                }
                Err(RecvTimeoutError::Disconnected) => {
                    let segment = outputs.iter().position(Option::is_none).unwrap_or(0);
                    return Err(WarpError::WorkerFailed {
                        segment,
                        message: "unit exited without a result".to_string(),
                    });
                }
            }
        }

        Ok(outputs.into_iter().flatten().collect())
    }
}

/// Body of one stretch unit; every outcome is reported over `tx`
fn run_unit(
    index: usize,
    engine: &StretchEngine,
    segment: &AudioSegment,
    params: StretchParameters,
    tx: &Sender<(usize, UnitEvent)>,
) {
    let announced = std::cell::Cell::new(false);
    let on_progress = |percent: f32| {
        if !announced.replace(true) {
            let _ = tx.send((index, UnitEvent::Ready));
        }
        let _ = tx.send((index, UnitEvent::Progress(percent)));
    };

    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        engine.stretch(segment, params, &on_progress)
    }));

    let event = match result {
        Ok(Ok(output)) => UnitEvent::Complete(output.into_channels()),
        // Rejected configuration stays typed so callers don't retry it
        Ok(Err(e @ WarpError::EngineInit { .. })) => UnitEvent::Failed(e),
        Ok(Err(e)) => UnitEvent::Failed(WarpError::WorkerFailed {
            segment: index,
            message: e.to_string(),
        }),
        Err(payload) => UnitEvent::Failed(WarpError::WorkerFailed {
            segment: index,
            message: format!("unit panicked: {}", panic_message(payload.as_ref())),
        }),
    };
    // Receiver gone means the attempt was abandoned
    let _ = tx.send((index, event));
}

pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{sine, FakeFactory};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    fn config(max_workers: usize) -> ProcessingConfig {
        ProcessingConfig {
            max_workers,
            min_parallel_duration_secs: 2.0,
            overlap_secs: 0.5,
            worker_ready_timeout_ms: 10_000,
            ..ProcessingConfig::default()
        }
    }

    fn coordinator(factory: FakeFactory, max_workers: usize) -> ParallelStretchCoordinator {
        ParallelStretchCoordinator::new(StretchEngine::new(Arc::new(factory)), config(max_workers))
            .unwrap()
    }

    fn completed(outcome: ParallelOutcome) -> AudioSegment {
        match outcome {
            ParallelOutcome::Completed(segment) => segment,
            ParallelOutcome::NotApplicable => panic!("expected a parallel result"),
        }
    }

    fn max_delta(samples: &[f32]) -> f32 {
        samples
            .windows(2)
            .map(|w| (w[1] - w[0]).abs())
            .fold(0.0, f32::max)
    }

    #[test]
    fn test_guard_short_buffer_and_single_worker() {
        let coord = coordinator(FakeFactory::default(), 4);
        let short = sine(100.0, 0.5, 48_000, 48_000, 1);
        let outcome = coord
            .stretch(&short, StretchParameters::identity(), 4, &|_| {})
            .unwrap();
        assert!(matches!(outcome, ParallelOutcome::NotApplicable));

        let long = sine(100.0, 0.5, 48_000 * 3, 48_000, 1);
        let outcome = coord
            .stretch(&long, StretchParameters::identity(), 1, &|_| {})
            .unwrap();
        assert!(matches!(outcome, ParallelOutcome::NotApplicable));
    }

    #[test]
    fn test_identity_parallel_reproduces_input() {
        let input = sine(50.0, 0.5, 48_000 * 3, 48_000, 2);
        let output = completed(
            coordinator(FakeFactory::default(), 4)
                .stretch(&input, StretchParameters::identity(), 4, &|_| {})
                .unwrap(),
        );

        assert_eq!(output.len(), input.len());
        assert_eq!(output.channel_count(), 2);
        for c in 0..2 {
            for (a, b) in output.channel(c).iter().zip(input.channel(c)) {
                assert!((a - b).abs() < 1e-5);
            }
        }
    }

    #[test]
    fn test_parallel_matches_single_engine() {
        let input = sine(50.0, 0.5, 48_000 * 3, 48_000, 1);
        let params = StretchParameters::new(1.5, 1.0);
        let coord = coordinator(FakeFactory::default(), 3);

        let parallel = completed(coord.stretch(&input, params, 3, &|_| {}).unwrap());
        let single = coord.engine().stretch(&input, params, &|_| {}).unwrap();

        assert!((parallel.len() as i64 - single.len() as i64).abs() <= 2);
        let diff = parallel
            .channel(0)
            .iter()
            .zip(single.channel(0))
            .map(|(a, b)| (a - b).abs())
            .fold(0.0, f32::max);
        assert!(diff < 0.01, "max deviation {}", diff);
        assert!(parallel.peak() <= single.peak() + 1e-3);
    }

    #[test]
    fn test_crossfade_boundaries_are_continuous() {
        let input = sine(50.0, 0.5, 48_000 * 4, 48_000, 1);
        let params = StretchParameters::new(1.25, 1.0);
        let coord = coordinator(FakeFactory::default(), 4);
        let output = completed(coord.stretch(&input, params, 4, &|_| {}).unwrap());
        let samples = output.channel(0);

        let (ranges, _) = partition(input.len(), 4, 24_000);
        let reference = max_delta(&samples[..4_800]);
        for range in &ranges[..3] {
            let boundary = (range.core_end as f64 * params.time_ratio).round() as usize;
            let window = &samples[boundary - 2_400..boundary + 2_400];
            assert!(max_delta(window) <= reference * 1.05 + 1e-4);
        }
    }

    /// 330 Hz tone inside `spans` (seconds), silence elsewhere
    fn bursts(len: usize, sample_rate: u32, spans: &[(f64, f64)]) -> AudioSegment {
        let tone = sine(330.0, 0.5, len, sample_rate, 1);
        let data = tone
            .channel(0)
            .iter()
            .enumerate()
            .map(|(i, &s)| {
                let t = i as f64 / sample_rate as f64;
                if spans.iter().any(|&(a, b)| t >= a && t < b) {
                    s
                } else {
                    0.0
                }
            })
            .collect();
        AudioSegment::new(vec![data], sample_rate).unwrap()
    }

    /// Energy-weighted mean frame index of `samples[from..to]`
    fn energy_centroid(samples: &[f32], from: usize, to: usize) -> f64 {
        let to = to.min(samples.len());
        let (weighted, total) = samples[from..to]
            .iter()
            .enumerate()
            .fold((0.0, 0.0), |(w, t), (i, &s)| {
                let e = (s as f64) * (s as f64);
                (w + (from + i) as f64 * e, t + e)
            });
        weighted / total
    }

    #[test]
    fn test_signalsmith_seams_are_continuous() {
        let input = sine(220.0, 0.5, 48_000 * 5 / 2, 48_000, 1);
        let params = StretchParameters::new(1.2, 1.0);
        let coord = ParallelStretchCoordinator::new(StretchEngine::signalsmith(), config(2)).unwrap();

        let parallel = completed(coord.stretch(&input, params, 2, &|_| {}).unwrap());
        let single = coord.engine().stretch(&input, params, &|_| {}).unwrap();
        assert!((parallel.len() as i64 - single.len() as i64).abs() <= 2);
        assert!(parallel.peak() <= 1.0);

        let (ranges, _) = partition(input.len(), 2, 24_000);
        let boundary = (ranges[0].core_end as f64 * params.time_ratio).round() as usize;
        let seam = &parallel.channel(0)[boundary - 2_400..boundary + 2_400];
        let reference = &single.channel(0)[boundary - 2_400..boundary + 2_400];

        assert!(max_delta(seam) <= max_delta(reference) * 1.25 + 1e-3);
        let seam_peak = seam.iter().fold(0.0f32, |m, s| m.max(s.abs()));
        assert!(seam_peak <= single.peak() + 0.02, "overshoot {} > {}", seam_peak, single.peak());
    }

    #[test]
    fn test_signalsmith_segments_line_up() {
        let sample_rate = 48_000;
        let spans = [(0.3, 0.6), (1.8, 2.1)];
        let input = bursts(sample_rate as usize * 5 / 2, sample_rate, &spans);
        let params = StretchParameters::new(1.2, 1.0);
        let coord = ParallelStretchCoordinator::new(StretchEngine::signalsmith(), config(2)).unwrap();

        let parallel = completed(coord.stretch(&input, params, 2, &|_| {}).unwrap());
        let single = coord.engine().stretch(&input, params, &|_| {}).unwrap();

        // One burst per segment, both clear of the crossfade
        let (ranges, _) = partition(input.len(), 2, 24_000);
        let boundary = (ranges[0].core_end as f64 * params.time_ratio).round() as usize;
        let regions = [(0, boundary), (boundary, single.len())];

        for (&(a, b), &(from, to)) in spans.iter().zip(&regions) {
            let expected = (a + b) / 2.0 * sample_rate as f64 * params.time_ratio;
            let single_at = energy_centroid(single.channel(0), from, to);
            let parallel_at = energy_centroid(parallel.channel(0), from, to);

            // 20 ms; a missed latency trim is several times that
            assert!((single_at - expected).abs() < 960.0, "single burst at {} not {}", single_at, expected);
            // 10 ms
            assert!(
                (parallel_at - single_at).abs() < 480.0,
                "parallel burst at {} but single at {}",
                parallel_at,
                single_at
            );
        }
    }

    #[test]
    fn test_engine_rejection_fails_whole_operation() {
        let factory = FakeFactory {
            fail_on_create: Some(1),
            ..FakeFactory::default()
        };
        let input = sine(50.0, 0.5, 48_000 * 3, 48_000, 1);
        let result = coordinator(factory, 3).stretch(&input, StretchParameters::identity(), 3, &|_| {});

        match result {
            Err(WarpError::EngineInit { reason, .. }) => assert!(reason.contains("refused")),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_unit_panic_is_reported() {
        let factory = FakeFactory {
            panic_in_session: Some(0),
            ..FakeFactory::default()
        };
        let input = sine(50.0, 0.5, 48_000 * 3, 48_000, 1);
        let result = coordinator(factory, 2).stretch(&input, StretchParameters::identity(), 2, &|_| {});

        match result {
            Err(WarpError::WorkerFailed { message, .. }) => assert!(message.contains("panicked")),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_readiness_timeout() {
        let factory = FakeFactory {
            create_delay: Duration::from_millis(300),
            ..FakeFactory::default()
        };
        let mut cfg = config(2);
        cfg.worker_ready_timeout_ms = 20;
        let coord = ParallelStretchCoordinator::new(StretchEngine::new(Arc::new(factory)), cfg).unwrap();
        let input = sine(50.0, 0.5, 48_000 * 3, 48_000, 1);

        let result = coord.stretch(&input, StretchParameters::identity(), 2, &|_| {});
        assert!(matches!(result, Err(WarpError::WorkerTimeout { .. })));
    }

    #[test]
    fn test_aggregated_progress_is_monotonic() {
        let input = sine(50.0, 0.5, 48_000 * 3, 48_000, 1);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = {
            let seen = seen.clone();
            move |p: f32| seen.lock().unwrap().push(p)
        };
        coordinator(FakeFactory::default(), 3)
            .stretch(&input, StretchParameters::identity(), 3, &sink)
            .unwrap();

        let seen = seen.lock().unwrap();
        assert!(seen.windows(2).all(|w| w[1] > w[0]));
        assert_eq!(seen.last(), Some(&100.0));
    }
}
