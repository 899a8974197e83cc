//! LocalWorker - a background thread answering processing requests
//!
//! The worker owns a [`StretchEngine`] and handles one request at a time.
//! Commands arrive over a crossbeam channel and each result goes back
//! through its own oneshot reply channel, so the caller can block on it or
//! drop it to abandon the request.

use std::panic::{self, AssertUnwindSafe};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam::channel::{Receiver, RecvTimeoutError, Sender};
use tokio::sync::oneshot;

use super::{handle_request, WorkerRequest, WorkerResponse};
use crate::envelope::EnvelopeSettings;
use crate::error::{WarpError, WarpResult};
use crate::parallel::panic_message;
use crate::timestretch::StretchEngine;
use crate::types::{AudioSegment, StretchParameters};

/// Progress sink carried along with a request into the worker thread
pub type ProgressCallback = Box<dyn Fn(f32) + Send>;

/// Commands sent to the worker thread
pub enum WorkerCommand {
    Process {
        request: WorkerRequest,
        progress: Option<ProgressCallback>,
        reply: oneshot::Sender<WorkerResponse>,
    },

    /// Stop after the current request
    Shutdown,
}

/// Handle to a service thread: its command sender plus the join handle
pub struct ServiceHandle<Cmd> {
    pub command_tx: Sender<Cmd>,
    pub thread_handle: Option<thread::JoinHandle<()>>,
}

impl<Cmd> ServiceHandle<Cmd> {
    /// Send a command to the service
    pub fn send(&self, cmd: Cmd) -> Result<(), crossbeam::channel::SendError<Cmd>> {
        self.command_tx.send(cmd)
    }

    /// Check if the service is still running
    pub fn is_running(&self) -> bool {
        self.thread_handle
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }
}

struct WorkerLoop {
    engine: StretchEngine,
    command_rx: Receiver<WorkerCommand>,
}

impl WorkerLoop {
    fn run(self) {
        log::info!("LocalWorker started ({})", self.engine.factory().name());

        while let Ok(cmd) = self.command_rx.recv() {
            match cmd {
                WorkerCommand::Shutdown => {
                    log::info!("LocalWorker shutting down");
                    break;
                }
                WorkerCommand::Process {
                    request,
                    progress,
                    reply,
                } => {
                    let response = self.process(request, progress);
                    // Receiver dropped means the caller abandoned the request
                    if reply.send(response).is_err() {
                        log::debug!("LocalWorker result discarded, caller gone");
                    }
                }
            }
        }

        log::info!("LocalWorker stopped");
    }

    fn process(&self, request: WorkerRequest, progress: Option<ProgressCallback>) -> WorkerResponse {
        let started = Instant::now();
        let kind = request.kind();
        let on_progress = |percent: f32| {
            if let Some(progress) = &progress {
                progress(percent);
            }
        };

        let response = panic::catch_unwind(AssertUnwindSafe(|| {
            handle_request(&self.engine, request, &on_progress)
        }))
        .unwrap_or_else(|payload| {
            let message = format!("worker panicked: {}", panic_message(payload.as_ref()));
            log::error!("LocalWorker {} request: {}", kind, message);
            WorkerResponse::error(message)
        });

        log::debug!("LocalWorker {} request took {:?}", kind, started.elapsed());
        response
    }
}

/// A single local processing unit running on its own thread
pub struct LocalWorker {
    handle: ServiceHandle<WorkerCommand>,
}

impl LocalWorker {
    /// Spawn the worker thread
    pub fn spawn(engine: StretchEngine) -> WarpResult<Self> {
        let (command_tx, command_rx) = crossbeam::channel::unbounded();
        let worker = WorkerLoop { engine, command_rx };

        let thread_handle = thread::Builder::new()
            .name("warp-local-worker".into())
            .spawn(move || worker.run())?;

        Ok(Self {
            handle: ServiceHandle {
                command_tx,
                thread_handle: Some(thread_handle),
            },
        })
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_running()
    }

    /// Queue a request; the returned receiver yields its terminal response
    pub fn submit(
        &self,
        request: WorkerRequest,
        progress: Option<ProgressCallback>,
    ) -> WarpResult<oneshot::Receiver<WorkerResponse>> {
        let (reply, reply_rx) = oneshot::channel();
        self.handle
            .send(WorkerCommand::Process {
                request,
                progress,
                reply,
            })
            .map_err(|_| stopped())?;
        Ok(reply_rx)
    }

    /// Run a request and wait for its terminal response
    ///
    /// Progress is forwarded from the worker thread and `progress` is
    /// called on the current thread. With `ready_timeout`, the worker must
    /// report its first progress (for a stretch: engine created) within that
    /// time or the request is abandoned with [`WarpError::WorkerTimeout`].
    /// Time spent queued behind earlier requests counts towards it.
    pub fn process(
        &self,
        request: WorkerRequest,
        progress: &dyn Fn(f32),
        ready_timeout: Option<Duration>,
    ) -> WarpResult<WorkerResponse> {
        let (progress_tx, progress_rx) = crossbeam::channel::unbounded::<f32>();
        let forward: ProgressCallback = Box::new(move |percent| {
            let _ = progress_tx.send(percent);
        });
        let reply_rx = self.submit(request, Some(forward))?;

        // The worker drops the forwarder before replying, so a disconnect
        // means the reply is on its way
        let deadline = ready_timeout.map(|timeout| (Instant::now() + timeout, timeout));
        let mut ready = false;
        loop {
            let event = match deadline {
                Some((at, _)) if !ready => progress_rx.recv_deadline(at),
                _ => progress_rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
            };
            match event {
                Ok(percent) => {
                    ready = true;
                    progress(percent);
                }
                Err(RecvTimeoutError::Disconnected) => break,
                Err(RecvTimeoutError::Timeout) => {
                    let timeout = deadline.map_or(Duration::ZERO, |(_, t)| t);
                    log::error!("LocalWorker not ready after {:?}", timeout);
                    return Err(WarpError::WorkerTimeout { segment: 0, timeout });
                }
            }
        }
        reply_rx.blocking_recv().map_err(|_| stopped())
    }

    /// Stretch a segment on the worker thread
    ///
    /// The segment's buffers move to the worker without copying.
    pub fn stretch(
        &self,
        segment: AudioSegment,
        params: StretchParameters,
        progress: &dyn Fn(f32),
        ready_timeout: Option<Duration>,
    ) -> WarpResult<AudioSegment> {
        let sample_rate = segment.sample_rate();
        let request = WorkerRequest::stretch(segment, params);
        self.process(request, progress, ready_timeout)?
            .into_segment(sample_rate)
    }

    /// Bake volume and pan into a segment on the worker thread
    pub fn apply_envelope(
        &self,
        segment: AudioSegment,
        settings: &EnvelopeSettings,
    ) -> WarpResult<AudioSegment> {
        let sample_rate = segment.sample_rate();
        let request = WorkerRequest::envelope(segment, settings);
        self.process(request, &|_| {}, None)?
            .into_segment(sample_rate)
    }

    /// Stop the thread and wait for it to finish its current request
    pub fn shutdown(&mut self) {
        if let Some(handle) = self.handle.thread_handle.take() {
            let _ = self.handle.send(WorkerCommand::Shutdown);
            if handle.join().is_err() {
                log::error!("LocalWorker thread panicked");
            }
        }
    }
}

impl Drop for LocalWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn stopped() -> WarpError {
    WarpError::WorkerFailed {
        segment: 0,
        message: "local worker stopped".to_string(),
    }
}
