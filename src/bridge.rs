//! Batch facade over the worker pool.
//!
//! [`Compressor`] turns a list of paths into jobs, reports each file as it
//! finishes on the `compression-progress` topic and the whole batch once on
//! `compression-completed`. Results arrive in completion order.

use crate::codec::{CodecOutput, asset_url};
use crate::error::{PoolError, Result};
use crate::events::{EventBus, ListenerId, Subscription};
use crate::pool::{PoolConfig, TaggedOutcome, WorkerPool};
use crate::settings::CompressionSettings;
use crossbeam_channel::Receiver;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

/// Topic carrying one [`CompressionResult`] per finished file.
pub const PROGRESS_TOPIC: &str = "compression-progress";

/// Topic carrying every result of a batch at once.
pub const COMPLETED_TOPIC: &str = "compression-completed";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompressionStatus {
    Success,
    Failed,
}

/// Outcome of one input file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompressionResult {
    pub input_path: String,
    pub status: CompressionStatus,
    pub output_path: String,
    /// `output_path` as an asset URL.
    pub output_path_converted: String,
    pub compressed_bytes_size: u64,
    pub compressed_disk_size: u64,
    /// Milliseconds.
    pub cost_time: u64,
    /// Size reduction in percent.
    pub compress_rate: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Asset URL of the backup copy, empty without one.
    pub original_temp_path: String,
}

impl CompressionResult {
    pub fn success(output: CodecOutput) -> Self {
        Self {
            output_path_converted: asset_url(&output.output_path),
            original_temp_path: asset_url(&output.original_temp_path),
            input_path: output.input_path,
            status: CompressionStatus::Success,
            output_path: output.output_path,
            compressed_bytes_size: output.output_size,
            compressed_disk_size: output.output_disk_size,
            cost_time: output.cost_time,
            compress_rate: output.compress_rate,
            error_message: None,
        }
    }

    /// The input file is left untouched, so the output points at it.
    pub fn failed(input_path: impl Into<String>, error: &PoolError) -> Self {
        let input_path = input_path.into();
        Self {
            output_path_converted: asset_url(&input_path),
            output_path: input_path.clone(),
            input_path,
            status: CompressionStatus::Failed,
            compressed_bytes_size: 0,
            compressed_disk_size: 0,
            cost_time: 0,
            compress_rate: 0.0,
            error_message: Some(error.to_string()),
            original_temp_path: String::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == CompressionStatus::Success
    }
}

type ProgressFn = Arc<dyn Fn(&CompressionResult) + Send + Sync>;
type CompletedFn = Arc<dyn Fn(&[CompressionResult]) + Send + Sync>;

/// Listeners that live only for one [`Compressor::compress`] call.
#[derive(Default, Clone)]
pub struct BatchCallbacks {
    on_progress: Option<ProgressFn>,
    on_completed: Option<CompletedFn>,
}

impl BatchCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_progress<F>(mut self, f: F) -> Self
    where
        F: Fn(&CompressionResult) + Send + Sync + 'static,
    {
        self.on_progress = Some(Arc::new(f));
        self
    }

    pub fn on_completed<F>(mut self, f: F) -> Self
    where
        F: Fn(&[CompressionResult]) + Send + Sync + 'static,
    {
        self.on_completed = Some(Arc::new(f));
        self
    }
}

/// Owns a worker pool and the two result topics.
pub struct Compressor {
    pool: WorkerPool,
    settings: CompressionSettings,
    progress: EventBus<CompressionResult>,
    completed: EventBus<Vec<CompressionResult>>,
    /// One batch at a time, so temporary listeners only see their own batch.
    batch: Mutex<()>,
}

impl Compressor {
    /// Nothing is spawned until the first batch (or [`WorkerPool::start`]).
    pub fn new(config: PoolConfig, settings: CompressionSettings) -> Self {
        Self {
            pool: WorkerPool::new(config),
            settings,
            progress: EventBus::new(),
            completed: EventBus::new(),
            batch: Mutex::new(()),
        }
    }

    pub fn settings(&self) -> &CompressionSettings {
        &self.settings
    }

    /// The underlying pool, for introspection.
    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    /// Compress every path and return one result per path.
    ///
    /// Files that fail are reported as [`CompressionStatus::Failed`]. Only
    /// pool-level failures (startup, exhaustion, shutdown) return `Err`. A
    /// full pool queue is not a failure: submission waits for a file to finish.
    pub fn compress(&self, paths: &[PathBuf], callbacks: BatchCallbacks) -> Result<Vec<CompressionResult>> {
        let _batch = self.batch.lock().unwrap_or_else(PoisonError::into_inner);
        self.settings.validate()?;

        let _progress = callbacks
            .on_progress
            .map(|f| Subscription::new(&self.progress, move |r: &CompressionResult| f(r)));
        let _completed = callbacks
            .on_completed
            .map(|f| Subscription::new(&self.completed, move |rs: &Vec<CompressionResult>| f(rs.as_slice())));

        if paths.is_empty() {
            self.completed.emit(&Vec::new());
            return Ok(Vec::new());
        }

        self.pool.start()?;
        let started = Instant::now();

        // Every job reports on this one channel, tagged with its path index
        let (reply, outcomes) = crossbeam_channel::unbounded();
        let mut inputs = Vec::with_capacity(paths.len());
        let mut results = Vec::with_capacity(paths.len());
        let mut pending = 0usize;

        for path in paths {
            let payload = self.settings.payload_for(path);
            let tag = inputs.len();
            inputs.push(payload.input_path.clone());
            loop {
                match self.pool.submit_tagged(payload.clone(), tag, reply.clone()) {
                    Ok(job_id) => {
                        tracing::debug!(job_id = %job_id, input = %inputs[tag], "Submitted file");
                        pending += 1;
                        break;
                    }
                    Err(PoolError::QueueFull { .. }) if pending > 0 => {
                        let result = self.collect(&outcomes, &inputs)?;
                        pending -= 1;
                        results.push(result);
                    }
                    Err(e) => return Err(e),
                }
            }
        }
        drop(reply);

        while pending > 0 {
            let result = self.collect(&outcomes, &inputs)?;
            pending -= 1;
            results.push(result);
        }

        let failed = results.iter().filter(|r| !r.is_success()).count();
        tracing::info!(
            files = results.len(),
            failed,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Batch completed"
        );
        self.completed.emit(&results);
        Ok(results)
    }

    /// Wait for the next finished file and publish its result.
    fn collect(&self, outcomes: &Receiver<TaggedOutcome>, inputs: &[String]) -> Result<CompressionResult> {
        // Every sender lives in a queued or running job until it settles
        let TaggedOutcome { tag, job_id, outcome } =
            outcomes.recv().map_err(|_| PoolError::ShuttingDown)?;
        let input = &inputs[tag];
        let result = match outcome {
            Ok(output) => CompressionResult::success(output),
            Err(e) if e.is_job_local() => {
                tracing::warn!(job_id = %job_id, input = %input, error = %e, "File failed");
                CompressionResult::failed(input.as_str(), &e)
            }
            Err(e) => return Err(e),
        };
        self.progress.emit(&result);
        Ok(result)
    }

    /// Persistent listener for [`PROGRESS_TOPIC`].
    pub fn on_progress<F>(&self, f: F) -> ListenerId
    where
        F: Fn(&CompressionResult) + Send + Sync + 'static,
    {
        self.progress.subscribe(f)
    }

    /// Persistent listener for [`COMPLETED_TOPIC`].
    pub fn on_completed<F>(&self, f: F) -> ListenerId
    where
        F: Fn(&[CompressionResult]) + Send + Sync + 'static,
    {
        self.completed.subscribe(move |rs: &Vec<CompressionResult>| f(rs.as_slice()))
    }

    /// Remove a listener from whichever topic holds it.
    pub fn off(&self, id: ListenerId) -> bool {
        self.progress.unsubscribe(id) || self.completed.unsubscribe(id)
    }

    /// Listeners currently registered on `topic`; `None` for unknown topics.
    pub fn listener_count(&self, topic: &str) -> Option<usize> {
        match topic {
            PROGRESS_TOPIC => Some(self.progress.len()),
            COMPLETED_TOPIC => Some(self.completed.len()),
            _ => None,
        }
    }

    /// Stop the pool and drop every listener.
    pub fn dispose(&self) {
        self.pool.shutdown();
        self.progress.clear();
        self.completed.clear();
    }
}
