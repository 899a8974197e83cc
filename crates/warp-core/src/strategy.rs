//! Choosing where a stretch runs
//!
//! A [`ProcessingStrategySelector`] picks one of four execution strategies
//! for each job, runs it, and applies the volume/pan envelope to locally
//! produced audio:
//!
//! | Strategy          | Runs on                                   | Envelope  |
//! |-------------------|-------------------------------------------|-----------|
//! | `ParallelWorkers` | rayon pool, one engine per segment        | applied   |
//! | `SingleWorker`    | the dedicated [`LocalWorker`] thread      | applied   |
//! | `Blocking`        | the calling thread                        | applied   |
//! | `Server`          | remote stretch server                     | deferred  |
//!
//! A failed parallel attempt is retried once on a single engine. Every call
//! takes a ticket from the selector's [`RequestGeneration`]; results for a
//! ticket that has since been superseded are dropped.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::config::{ProcessingConfig, WarpConfig};
use crate::envelope::{apply_volume_and_pan, EnvelopeSettings};
use crate::error::{WarpError, WarpResult};
use crate::parallel::{ParallelOutcome, ParallelStretchCoordinator};
use crate::remote::{RemoteSource, RemoteStretchClient, RemoteStretcher};
use crate::timestretch::StretchEngine;
use crate::types::{AudioSegment, StretchParameters};
use crate::worker::LocalWorker;

/// Where a job is executed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProcessingStrategy {
    ParallelWorkers,
    SingleWorker,
    Blocking,
    Server,
}

impl fmt::Display for ProcessingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ParallelWorkers => "parallel workers",
            Self::SingleWorker => "single worker",
            Self::Blocking => "blocking",
            Self::Server => "server",
        };
        f.write_str(name)
    }
}

/// Pick a strategy for a buffer of `duration_secs`
///
/// Rules, first match wins:
/// 1. longer than the local ceiling → `Server`
/// 2. neither parallel units nor local compute available → `Server`
/// 3. parallel units available, buffer long enough and more than one
///    worker allowed → `ParallelWorkers`
/// 4. parallel units available → `SingleWorker`
/// 5. otherwise → `Blocking`
pub fn select_strategy(duration_secs: f64, config: &ProcessingConfig) -> ProcessingStrategy {
    if duration_secs > config.local_duration_ceiling_secs {
        return ProcessingStrategy::Server;
    }
    if !config.parallel_available && !config.local_compute_available {
        return ProcessingStrategy::Server;
    }
    if config.parallel_available {
        if duration_secs >= config.min_parallel_duration_secs && config.max_workers > 1 {
            return ProcessingStrategy::ParallelWorkers;
        }
        return ProcessingStrategy::SingleWorker;
    }
    ProcessingStrategy::Blocking
}

/// Monotonic request counter used to detect stale results
#[derive(Debug, Default)]
pub struct RequestGeneration {
    latest: AtomicU64,
}

impl RequestGeneration {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new request, superseding every earlier ticket
    pub fn next_ticket(&self) -> u64 {
        self.latest.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Supersede all outstanding tickets without starting a request
    pub fn invalidate(&self) {
        self.latest.fetch_add(1, Ordering::AcqRel);
    }

    pub fn is_current(&self, ticket: u64) -> bool {
        self.latest.load(Ordering::Acquire) == ticket
    }

    pub fn latest(&self) -> u64 {
        self.latest.load(Ordering::Acquire)
    }
}

/// One stretch request
#[derive(Debug, Clone)]
pub struct ProcessingJob {
    pub segment: AudioSegment,
    pub params: StretchParameters,
    /// Volume/pan to bake in after a local stretch
    pub envelope: Option<EnvelopeSettings>,
    /// Server-side copy of the audio, needed for the `Server` strategy
    pub remote_source: Option<RemoteSource>,
}

impl ProcessingJob {
    pub fn new(segment: AudioSegment, params: StretchParameters) -> Self {
        Self {
            segment,
            params,
            envelope: None,
            remote_source: None,
        }
    }

    pub fn with_envelope(mut self, envelope: EnvelopeSettings) -> Self {
        self.envelope = Some(envelope);
        self
    }

    pub fn with_remote_source(mut self, source: RemoteSource) -> Self {
        self.remote_source = Some(source);
        self
    }
}

/// Result of a job
#[derive(Debug, Clone)]
pub struct ProcessedAudio {
    pub segment: AudioSegment,
    /// Strategy that actually produced `segment`
    pub strategy: ProcessingStrategy,
    /// The envelope was not applied and must be applied at render time
    pub envelope_deferred: bool,
}

pub struct ProcessingStrategySelector {
    coordinator: ParallelStretchCoordinator,
    worker: Option<LocalWorker>,
    remote: Option<Arc<dyn RemoteStretcher>>,
    generation: RequestGeneration,
}

impl ProcessingStrategySelector {
    /// Selector with only the coordinator and blocking paths
    pub fn new(coordinator: ParallelStretchCoordinator) -> Self {
        Self {
            coordinator,
            worker: None,
            remote: None,
            generation: RequestGeneration::new(),
        }
    }

    /// Fully equipped selector built from configuration
    ///
    /// Spawns the local worker when parallel units are available and
    /// always configures the server client.
    pub fn from_config(engine: StretchEngine, config: &WarpConfig) -> WarpResult<Self> {
        let coordinator = ParallelStretchCoordinator::new(engine.clone(), config.processing.clone())?;
        let mut selector = Self::new(coordinator)
            .with_remote(Arc::new(RemoteStretchClient::new(&config.remote)));
        if config.processing.parallel_available {
            selector = selector.with_local_worker(LocalWorker::spawn(engine)?);
        }
        Ok(selector)
    }

    pub fn with_local_worker(mut self, worker: LocalWorker) -> Self {
        self.worker = Some(worker);
        self
    }

    pub fn with_remote(mut self, remote: Arc<dyn RemoteStretcher>) -> Self {
        self.remote = Some(remote);
        self
    }

    pub fn config(&self) -> &ProcessingConfig {
        self.coordinator.config()
    }

    pub fn generation(&self) -> &RequestGeneration {
        &self.generation
    }

    /// Strategy a job of this duration would start with
    pub fn strategy_for(&self, duration_secs: f64) -> ProcessingStrategy {
        select_strategy(duration_secs, self.config())
    }

    /// Run a job, superseding any request still in flight
    ///
    /// The job's buffers are handed to the local worker rather than copied.
    /// Returns [`WarpError::Superseded`] if a newer request started (or
    /// [`RequestGeneration::invalidate`] was called) before this one
    /// finished.
    pub fn process(&self, job: ProcessingJob, progress: &dyn Fn(f32)) -> WarpResult<ProcessedAudio> {
        let ticket = self.generation.next_ticket();
        let started = Instant::now();
        let duration = job.segment.duration_secs();
        let strategy = self.strategy_for(duration);
        log::info!(
            "Request {}: {:.2}s at ratio {:.4}, pitch {:+.2} st via {}",
            ticket,
            duration,
            job.params.time_ratio,
            job.params.semitones(),
            strategy
        );

        let result = match strategy {
            ProcessingStrategy::Server => self.run_server(&job).map(|segment| ProcessedAudio {
                segment,
                strategy,
                envelope_deferred: true,
            }),
            _ => self.run_local(ticket, strategy, job, progress),
        };

        let processed = result?;
        if !self.generation.is_current(ticket) {
            log::debug!("Request {} finished after being superseded, discarding", ticket);
            return Err(WarpError::Superseded { ticket });
        }
        log::info!(
            "Request {} done via {} in {:?} ({} frames)",
            ticket,
            processed.strategy,
            started.elapsed(),
            processed.segment.len()
        );
        Ok(processed)
    }

    fn run_server(&self, job: &ProcessingJob) -> WarpResult<AudioSegment> {
        let remote = self
            .remote
            .as_ref()
            .ok_or_else(|| WarpError::RemoteUnavailable("no server configured".to_string()))?;
        let source = job
            .remote_source
            .as_ref()
            .ok_or_else(|| WarpError::RemoteUnavailable("audio has no server-side copy".to_string()))?;
        remote.stretch_remote(source, job.params)
    }

    fn run_local(
        &self,
        ticket: u64,
        strategy: ProcessingStrategy,
        job: ProcessingJob,
        progress: &dyn Fn(f32),
    ) -> WarpResult<ProcessedAudio> {
        let ProcessingJob {
            segment,
            params,
            envelope,
            ..
        } = job;
        let (segment, strategy) = match strategy {
            ProcessingStrategy::ParallelWorkers => self.run_parallel(ticket, segment, params, progress)?,
            _ => self.run_single(segment, params, progress)?,
        };

        let segment = match &envelope {
            Some(envelope) if !envelope.is_neutral() => self.apply_envelope(strategy, segment, envelope)?,
            _ => segment,
        };

        Ok(ProcessedAudio {
            segment,
            strategy,
            envelope_deferred: false,
        })
    }

    fn run_parallel(
        &self,
        ticket: u64,
        segment: AudioSegment,
        params: StretchParameters,
        progress: &dyn Fn(f32),
    ) -> WarpResult<(AudioSegment, ProcessingStrategy)> {
        let workers = self.config().max_workers;
        match self.coordinator.stretch(&segment, params, workers, progress) {
            Ok(ParallelOutcome::Completed(stretched)) => Ok((stretched, ProcessingStrategy::ParallelWorkers)),
            Ok(ParallelOutcome::NotApplicable) => self.run_single(segment, params, progress),
            Err(e) if e.allows_single_engine_retry() && self.generation.is_current(ticket) => {
                log::warn!("Parallel stretch failed ({}), retrying on a single engine", e);
                self.run_single(segment, params, progress)
            }
            Err(e) => Err(e),
        }
    }

    /// Stretch on the local worker if there is one, else on this thread
    fn run_single(
        &self,
        segment: AudioSegment,
        params: StretchParameters,
        progress: &dyn Fn(f32),
    ) -> WarpResult<(AudioSegment, ProcessingStrategy)> {
        match &self.worker {
            Some(worker) => {
                let timeout = self.config().worker_ready_timeout();
                let stretched = worker.stretch(segment, params, progress, Some(timeout))?;
                Ok((stretched, ProcessingStrategy::SingleWorker))
            }
            None => {
                let stretched = self.coordinator.engine().stretch(&segment, params, progress)?;
                Ok((stretched, ProcessingStrategy::Blocking))
            }
        }
    }

    fn apply_envelope(
        &self,
        strategy: ProcessingStrategy,
        segment: AudioSegment,
        envelope: &EnvelopeSettings,
    ) -> WarpResult<AudioSegment> {
        match (&self.worker, strategy) {
            (Some(worker), ProcessingStrategy::SingleWorker | ProcessingStrategy::ParallelWorkers) => {
                worker.apply_envelope(segment, envelope)
            }
            _ => Ok(apply_volume_and_pan(
                &segment,
                &envelope.volume_curves,
                envelope.default_volume,
                envelope.pan_value,
            )),
        }
    }
}
