//! Spawning worker processes.

use super::proc::{FrameReader, Proc};
use crate::error::{PoolError, Result};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::thread::JoinHandle;

/// Environment variable telling a worker which slot it serves.
pub const WORKER_ID_ENV: &str = "PICPOOL_WORKER_ID";

/// How to launch a worker process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
}

impl WorkerCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
        }
    }

    /// The running executable in its hidden `worker` mode.
    pub fn current_exe() -> Result<Self> {
        let exe = std::env::current_exe()
            .map_err(|e| PoolError::Spawn(format!("cannot locate current executable: {}", e)))?;
        Ok(Self::new(exe).arg("worker"))
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }
}

/// Spawn one worker with piped stdin/stdout. Its stderr is inherited so
/// worker logs reach the parent's terminal without touching the frame pipe.
pub fn spawn_worker(command: &WorkerCommand, worker_id: usize) -> Result<(Proc, FrameReader)> {
    let mut cmd = Command::new(&command.program);
    cmd.args(&command.args)
        .envs(command.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .env(WORKER_ID_ENV, worker_id.to_string())
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit());

    let child = cmd.spawn().map_err(|e| {
        PoolError::Spawn(format!("{}: {}", command.program.display(), e))
    })?;

    Proc::from_child(child)
}

/// Spawn a named pool thread.
pub fn spawn_thread<F>(name: String, f: F) -> Result<JoinHandle<()>>
where
    F: FnOnce() + Send + 'static,
{
    std::thread::Builder::new()
        .name(name)
        .spawn(f)
        .map_err(|e| PoolError::Spawn(format!("cannot start pool thread: {}", e)))
}
