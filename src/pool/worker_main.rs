//! Worker process entry point.
//!
//! Runs when `picpool worker` is invoked by the pool. Reads `run` requests
//! from stdin, routes them through the codec router and writes frames to
//! stdout. Logging goes to stderr.

use super::ipc::{LineReader, LineWriter, PipeFd};
use super::protocol::{ErrorKind, Frame, Request, salvage_job_id};
use crate::codec::{CodecError, CodecPayload, CodecRouter};
use std::io;
use std::time::Duration;

/// Exit status when the router fails its startup check.
const EXIT_INVALID_ROUTER: i32 = 2;

/// Knobs for the worker process.
#[derive(Debug, Clone, Default)]
pub struct WorkerOptions {
    /// Sleep this long before each job. Used to open a window for tests
    /// that kill or reorder workers mid-job.
    pub simulate_latency: Option<Duration>,
}

fn write_frame(writer: &mut LineWriter, frame: &Frame) -> io::Result<()> {
    let line = frame.to_line().map_err(io::Error::other)?;
    writer.write_line(&line)
}

fn run_job(
    router: &CodecRouter,
    writer: &mut LineWriter,
    job_id: &str,
    payload: &CodecPayload,
) -> io::Result<()> {
    let mut write_error = None;
    let result = router.route(payload, &mut |stage| {
        if write_error.is_some() {
            return;
        }
        let frame = Frame::Progress {
            job_id: job_id.to_string(),
            stage,
        };
        if let Err(e) = write_frame(writer, &frame) {
            write_error = Some(e);
        }
    });
    if let Some(e) = write_error {
        return Err(e);
    }

    let frame = match result {
        Ok(output) => Frame::Result {
            job_id: job_id.to_string(),
            output,
        },
        Err(e) => {
            let kind = match e {
                CodecError::Unsupported(_) => ErrorKind::UnsupportedCodec,
                _ => ErrorKind::Codec,
            };
            tracing::debug!(job_id, error = %e, "Job failed");
            Frame::error(job_id, e.to_string(), kind)
        }
    };
    write_frame(writer, &frame)
}

/// Request loop. Returns when stdin closes or `exit` arrives.
fn worker_loop(
    reader: &mut LineReader,
    writer: &mut LineWriter,
    router: &CodecRouter,
    options: &WorkerOptions,
) -> io::Result<()> {
    write_frame(writer, &Frame::Ready)?;

    loop {
        let Some(line) = reader.read_line()? else {
            return Ok(());
        };
        if line.trim().is_empty() {
            continue;
        }

        let request = match Request::from_line(line) {
            Ok(request) => request,
            Err(e) => {
                match salvage_job_id(line) {
                    Some(job_id) => {
                        let message = format!("Invalid request: {}", e);
                        write_frame(writer, &Frame::error(job_id, message, ErrorKind::Codec))?;
                    }
                    None => tracing::warn!(error = %e, "Ignoring unparseable request"),
                }
                continue;
            }
        };

        match request {
            Request::Exit => return Ok(()),
            Request::Run { job_id, payload } => {
                tracing::debug!(job_id = %job_id, codec = %payload.codec, input = %payload.input_path, "Running job");
                if let Some(latency) = options.simulate_latency {
                    std::thread::sleep(latency);
                }
                run_job(router, writer, &job_id, &payload)?;
            }
        }
    }
}

/// Run the worker process. Never returns.
pub fn run_worker_main(options: WorkerOptions) -> ! {
    // Pipe errors surface as io::Error instead of killing the process.
    unsafe {
        nix::sys::signal::signal(
            nix::sys::signal::Signal::SIGPIPE,
            nix::sys::signal::SigHandler::SigIgn,
        )
        .ok();
    }

    let router = CodecRouter::builtin();
    if let Err(e) = router.validate() {
        tracing::error!(error = %e, "Codec router is incomplete");
        std::process::exit(EXIT_INVALID_ROUTER);
    }

    // Safety: descriptors 0 and 1 are open for the life of the process and
    // nothing else in the worker reads stdin or writes stdout.
    let stdin_fd = unsafe { PipeFd::from_raw(0) };
    let stdout_fd = unsafe { PipeFd::from_raw(1) };
    let mut reader = LineReader::new(stdin_fd);
    let mut writer = LineWriter::new(stdout_fd);

    match worker_loop(&mut reader, &mut writer, &router, &options) {
        Ok(()) => std::process::exit(0),
        Err(e) => {
            tracing::error!(error = %e, "Worker I/O failed");
            std::process::exit(1);
        }
    }
}
