//! Error types for picpool.

use std::time::Duration;
use thiserror::Error;

/// Main error type for the worker pool and everything layered on it.
#[derive(Error, Debug)]
pub enum PoolError {
    #[error("Worker(s) {workers:?} did not signal ready within {timeout:?}")]
    Startup { workers: Vec<usize>, timeout: Duration },

    #[error("Unsupported codec: {0}")]
    UnsupportedCodec(String),

    #[error("{0}")]
    Codec(String),

    #[error("Worker {worker} crashed ({reason}) while running job {job_id}")]
    WorkerCrash {
        worker: usize,
        job_id: String,
        reason: String,
    },

    #[error("Job {job_id} timed out after {timeout:?} on worker {worker}")]
    JobTimeout {
        worker: usize,
        job_id: String,
        timeout: Duration,
    },

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Worker pool is not started")]
    NotStarted,

    #[error("Worker pool has no live workers left; every worker exhausted its respawn budget")]
    PoolExhausted,

    #[error("Job '{0}' is already queued or running")]
    DuplicateJob(String),

    #[error("Worker pool is shutting down")]
    ShuttingDown,

    #[error("Job queue is full ({max} jobs waiting)")]
    QueueFull { max: usize },

    #[error("Job '{0}' was cancelled")]
    Cancelled(String),

    #[error("Failed to spawn worker: {0}")]
    Spawn(String),

    #[error("Settings error: {0}")]
    Settings(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PoolError {
    /// Whether the failure only concerns a single job.
    ///
    /// Job-local failures end up in that file's `CompressionResult`; everything
    /// else is a pool-level condition the caller has to act on.
    pub fn is_job_local(&self) -> bool {
        matches!(
            self,
            Self::UnsupportedCodec(_)
                | Self::Codec(_)
                | Self::WorkerCrash { .. }
                | Self::JobTimeout { .. }
                | Self::Cancelled(_)
        )
    }
}

/// Result type alias for picpool operations.
pub type Result<T> = std::result::Result<T, PoolError>;
