//! Handles to a running worker process.
//!
//! A worker is split in two halves: [`Proc`] owns the pid and the request
//! pipe and lives in the pool state where dispatch, the watchdog and shutdown
//! can reach it. [`FrameReader`] owns the frame pipe and lives on the worker's
//! supervisor thread, which blocks on it.

use super::ipc::{LineReader, LineWriter, PipeFd};
use super::protocol::{Frame, Request};
use super::signals::{TerminationReason, analyze_wait_status};
use crate::error::{PoolError, Result};
use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::sys::wait::{WaitPidFlag, WaitStatus, waitpid};
use nix::unistd::Pid;
use std::io;
use std::os::unix::io::OwnedFd;
use std::time::{Duration, Instant};

/// Poll interval while waiting for a worker to exit.
const REAP_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Time a worker gets to honor SIGTERM before SIGKILL.
const TERM_GRACE: Duration = Duration::from_millis(100);

/// Control half of a worker process.
pub struct Proc {
    pid: Pid,
    /// `None` once `exit` was sent and the pipe closed.
    writer: Option<LineWriter>,
    reaped: Option<TerminationReason>,
}

/// One unit read from a worker's stdout.
#[derive(Debug)]
pub enum Incoming {
    Frame(Frame),
    /// A line that is not a valid frame.
    Malformed { line: String, error: String },
    /// The worker closed its stdout.
    Eof,
}

/// Reading half of a worker process.
pub struct FrameReader {
    reader: LineReader,
}

impl Proc {
    /// Take over a spawned child's stdin and stdout.
    pub fn from_child(mut child: std::process::Child) -> Result<(Self, FrameReader)> {
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| PoolError::Spawn("worker stdin was not captured".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| PoolError::Spawn("worker stdout was not captured".into()))?;

        let proc = Self {
            pid: Pid::from_raw(child.id() as i32),
            writer: Some(LineWriter::new(PipeFd::new(OwnedFd::from(stdin)))),
            reaped: None,
        };
        let reader = FrameReader {
            reader: LineReader::new(PipeFd::new(OwnedFd::from(stdout))),
        };
        Ok((proc, reader))
    }

    pub fn pid(&self) -> u32 {
        self.pid.as_raw() as u32
    }

    /// Write one request line.
    pub fn send(&mut self, request: &Request) -> Result<()> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| PoolError::Protocol("request pipe already closed".into()))?;
        writer.write_line(&request.to_line()?)?;
        Ok(())
    }

    /// Send `exit` and close the request pipe.
    pub fn request_exit(&mut self) {
        if let Err(e) = self.send(&Request::Exit) {
            tracing::debug!(pid = self.pid.as_raw(), error = %e, "Could not send exit to worker");
        }
        self.writer = None;
    }

    /// Send SIGTERM. A process that is already gone is not an error.
    pub fn terminate(&self) -> io::Result<()> {
        self.signal(Signal::SIGTERM)
    }

    /// Send SIGKILL without waiting for the exit.
    pub fn kill(&self) -> io::Result<()> {
        self.signal(Signal::SIGKILL)
    }

    fn signal(&self, sig: Signal) -> io::Result<()> {
        if self.reaped.is_some() {
            return Ok(());
        }
        match signal::kill(self.pid, sig) {
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(e) => Err(io::Error::from_raw_os_error(e as i32)),
        }
    }

    /// Collect the exit status if the process has exited.
    pub fn try_wait(&mut self) -> Option<TerminationReason> {
        if let Some(reason) = &self.reaped {
            return Some(reason.clone());
        }
        match waitpid(self.pid, Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::StillAlive) => None,
            Ok(status) => Some(self.record(analyze_wait_status(status))),
            Err(_) => Some(self.record(TerminationReason::Unknown)),
        }
    }

    /// Block until the process exits.
    pub fn wait(&mut self) -> TerminationReason {
        if let Some(reason) = &self.reaped {
            return reason.clone();
        }
        loop {
            match waitpid(self.pid, None) {
                Ok(WaitStatus::StillAlive) => continue,
                Ok(status) => return self.record(analyze_wait_status(status)),
                Err(Errno::EINTR) => continue,
                Err(_) => return self.record(TerminationReason::Unknown),
            }
        }
    }

    /// Wait up to `grace` for the process to exit on its own, then escalate
    /// to SIGTERM and finally SIGKILL.
    pub fn reap(&mut self, grace: Duration) -> TerminationReason {
        let start = Instant::now();
        while start.elapsed() < grace {
            if let Some(reason) = self.try_wait() {
                return reason;
            }
            std::thread::sleep(REAP_POLL_INTERVAL);
        }

        tracing::debug!(pid = self.pid.as_raw(), "Worker did not exit in time, sending SIGTERM");
        let _ = self.terminate();
        let start = Instant::now();
        while start.elapsed() < TERM_GRACE {
            if let Some(reason) = self.try_wait() {
                return reason;
            }
            std::thread::sleep(REAP_POLL_INTERVAL);
        }

        let _ = self.kill();
        self.wait()
    }

    fn record(&mut self, reason: TerminationReason) -> TerminationReason {
        self.reaped = Some(reason.clone());
        reason
    }
}

impl Drop for Proc {
    fn drop(&mut self) {
        if self.reaped.is_none() {
            self.writer = None;
            let _ = self.kill();
            self.wait();
        }
    }
}

impl FrameReader {
    /// Read the next frame. Blank lines are skipped.
    pub fn recv(&mut self) -> io::Result<Incoming> {
        loop {
            let Some(line) = self.reader.read_line()? else {
                return Ok(Incoming::Eof);
            };
            if line.trim().is_empty() {
                continue;
            }
            return Ok(match Frame::from_line(line) {
                Ok(frame) => Incoming::Frame(frame),
                Err(e) => Incoming::Malformed {
                    line: line.to_string(),
                    error: e.to_string(),
                },
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::{Command, Stdio};

    fn spawn(program: &str, args: &[&str]) -> (Proc, FrameReader) {
        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .spawn()
            .unwrap();
        Proc::from_child(child).unwrap()
    }

    #[test]
    fn test_frames_echo_through_cat() {
        let (mut proc, mut reader) = spawn("cat", &[]);

        // cat echoes the request line back; it parses as a frame only if valid
        proc.send(&Request::Exit).unwrap();
        match reader.recv().unwrap() {
            Incoming::Malformed { line, .. } => assert_eq!(line, "{\"type\":\"exit\"}"),
            other => panic!("expected malformed line, got {:?}", other),
        }

        proc.request_exit();
        assert!(matches!(reader.recv().unwrap(), Incoming::Eof));
        assert_eq!(proc.reap(Duration::from_secs(2)), TerminationReason::Exited(0));
    }

    #[test]
    fn test_ready_frame_is_parsed() {
        let (mut proc, mut reader) = spawn("sh", &["-c", "echo '{\"type\":\"ready\"}'"]);
        assert!(matches!(reader.recv().unwrap(), Incoming::Frame(Frame::Ready)));
        assert!(matches!(reader.recv().unwrap(), Incoming::Eof));
        assert!(proc.wait().is_clean());
    }

    #[test]
    fn test_reap_escalates_on_stubborn_process() {
        let (mut proc, _reader) = spawn("sleep", &["60"]);
        let reason = proc.reap(Duration::from_millis(50));
        assert_eq!(reason, TerminationReason::Terminated);
        assert_eq!(proc.try_wait(), Some(TerminationReason::Terminated));
    }

    #[test]
    fn test_kill_is_classified() {
        let (mut proc, _reader) = spawn("sleep", &["60"]);
        proc.kill().unwrap();
        assert_eq!(proc.wait(), TerminationReason::Killed);
        // Signalling a reaped process is a no-op
        assert!(proc.kill().is_ok());
    }

    #[test]
    fn test_send_after_exit_fails() {
        let (mut proc, _reader) = spawn("cat", &[]);
        proc.request_exit();
        assert!(proc.send(&Request::Exit).is_err());
        proc.reap(Duration::from_secs(2));
    }
}
