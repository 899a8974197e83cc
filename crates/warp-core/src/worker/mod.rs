//! Processing units reached through messages
//!
//! - [`messages`]: the request/response wire types
//! - [`handle_request`]: executes one request against a [`StretchEngine`]
//! - [`serve_lines`]: newline-delimited JSON transport for out-of-process hosts
//! - [`LocalWorker`]: a dedicated background thread answering requests

mod messages;
mod service;

pub use messages::{EngineRejection, EnvelopeRequest, WorkerRequest, WorkerResponse};
pub use service::{LocalWorker, ProgressCallback, ServiceHandle, WorkerCommand};

use std::cell::RefCell;
use std::io::{BufRead, Write};

use crate::envelope::{apply_pan, apply_volume, apply_volume_and_pan};
use crate::error::{WarpError, WarpResult};
use crate::timestretch::StretchEngine;
use crate::types::{AudioSegment, StretchParameters};

/// Execute one request, returning its terminal response
///
/// Never fails: every error becomes [`WorkerResponse::Error`]. Stretch
/// requests report progress through `progress`; envelope requests report
/// 100 once done.
pub fn handle_request(
    engine: &StretchEngine,
    request: WorkerRequest,
    progress: &dyn Fn(f32),
) -> WorkerResponse {
    let kind = request.kind();
    let result = match request {
        WorkerRequest::Stretch {
            sample_rate,
            channel_buffers,
            time_ratio,
            pitch_semitones,
        } => AudioSegment::new(channel_buffers, sample_rate).and_then(|segment| {
            let params = StretchParameters::from_semitones(time_ratio, pitch_semitones);
            engine.stretch(&segment, params, progress)
        }),
        WorkerRequest::ApplyVolume(r) => AudioSegment::new(r.channel_buffers, r.sample_rate)
            .map(|segment| apply_volume(&segment, &r.volume_curves, r.default_volume)),
        WorkerRequest::ApplyPan(r) => AudioSegment::new(r.channel_buffers, r.sample_rate)
            .map(|segment| apply_pan(&segment, r.pan_value)),
        WorkerRequest::ApplyVolumeAndPan(r) => AudioSegment::new(r.channel_buffers, r.sample_rate)
            .map(|segment| {
                apply_volume_and_pan(&segment, &r.volume_curves, r.default_volume, r.pan_value)
            }),
    };

    match result {
        Ok(segment) => {
            progress(100.0);
            WorkerResponse::complete(segment)
        }
        Err(e) => {
            log::warn!("Worker {} request failed: {}", kind, e);
            WorkerResponse::from_error(&e)
        }
    }
}

/// Answer newline-delimited JSON requests until `input` is exhausted
///
/// Each request line produces zero or more `progress` lines, written as the
/// work advances, followed by exactly one `complete` or `error` line.
/// Unparsable lines get an `error` response; blank lines are skipped. Only
/// I/O errors end the loop early.
pub fn serve_lines<R, W>(engine: &StretchEngine, input: R, output: W) -> WarpResult<()>
where
    R: BufRead,
    W: Write,
{
    let output = RefCell::new(output);
    let write_failure: RefCell<Option<WarpError>> = RefCell::new(None);
    let mut served = 0usize;

    for line in input.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<WorkerRequest>(&line) {
            Ok(request) => {
                let on_progress = |percent: f32| {
                    if write_failure.borrow().is_some() {
                        return;
                    }
                    let message = WorkerResponse::Progress { percent };
                    if let Err(e) = write_message(&mut *output.borrow_mut(), &message) {
                        *write_failure.borrow_mut() = Some(e);
                    }
                };
                handle_request(engine, request, &on_progress)
            }
            Err(e) => WorkerResponse::error(format!("invalid request: {}", e)),
        };
        if let Some(e) = write_failure.borrow_mut().take() {
            return Err(e);
        }
        write_message(&mut *output.borrow_mut(), &response)?;
        served += 1;
    }

    log::info!("Served {} worker request(s)", served);
    Ok(())
}

fn write_message<W: Write>(output: &mut W, message: &WorkerResponse) -> WarpResult<()> {
    serde_json::to_writer(&mut *output, message)?;
    output.write_all(b"\n")?;
    output.flush()?;
    Ok(())
}
