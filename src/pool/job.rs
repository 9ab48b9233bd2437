//! Jobs and their outcome handles.

use crate::codec::{CodecOutput, CodecPayload, Stage};
use crate::error::{PoolError, Result};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError, bounded};
use std::time::Duration;

/// Terminal outcome of a job.
pub type JobOutcome = Result<CodecOutput>;

/// Where a job is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    /// Waiting in the queue, or waiting out a retry delay.
    Queued,
    Assigned { worker: usize },
    Completed,
    Failed,
    /// Removed from the queue before it ran.
    Cancelled,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// An outcome delivered on a channel shared by many jobs.
#[derive(Debug)]
pub struct TaggedOutcome {
    /// Caller-chosen tag given at submission.
    pub tag: usize,
    pub job_id: String,
    pub outcome: JobOutcome,
}

#[derive(Debug)]
enum Reply {
    Handle(Sender<JobOutcome>),
    Tagged { tag: usize, tx: Sender<TaggedOutcome> },
}

/// A unit of work owned by the pool queue or by exactly one worker slot.
///
/// [`Job::settle`] consumes the job, so a job delivers at most one outcome.
#[derive(Debug)]
pub struct Job {
    id: String,
    payload: CodecPayload,
    state: JobState,
    attempts: u32,
    reply: Reply,
}

impl Job {
    /// A queued job and the handle its outcome arrives on.
    pub fn new(id: impl Into<String>, payload: CodecPayload) -> (Self, JobHandle) {
        let id = id.into();
        let (reply, outcome) = bounded(1);
        let job = Self::with_reply(id.clone(), payload, Reply::Handle(reply));
        (job, JobHandle { id, outcome })
    }

    /// A queued job whose outcome is sent on `tx` together with `tag`.
    pub fn tagged(id: impl Into<String>, payload: CodecPayload, tag: usize, tx: Sender<TaggedOutcome>) -> Self {
        Self::with_reply(id.into(), payload, Reply::Tagged { tag, tx })
    }

    fn with_reply(id: String, payload: CodecPayload, reply: Reply) -> Self {
        Self {
            id,
            payload,
            state: JobState::Queued,
            attempts: 0,
            reply,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn payload(&self) -> &CodecPayload {
        &self.payload
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    /// Times the job was handed to a worker.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub(crate) fn assign(&mut self, worker: usize) {
        self.attempts += 1;
        self.state = JobState::Assigned { worker };
    }

    /// Back to the queue; attempts already made still count.
    pub(crate) fn requeue(&mut self) {
        self.state = JobState::Queued;
    }

    /// Deliver the outcome and return the final state.
    pub(crate) fn settle(mut self, outcome: JobOutcome) -> JobState {
        self.state = match &outcome {
            Ok(_) => JobState::Completed,
            Err(PoolError::Cancelled(_)) => JobState::Cancelled,
            Err(_) => JobState::Failed,
        };
        // A dropped receiver means nobody waits for this job any more.
        match self.reply {
            Reply::Handle(tx) => {
                let _ = tx.send(outcome);
            }
            Reply::Tagged { tag, tx } => {
                let _ = tx.send(TaggedOutcome {
                    tag,
                    job_id: self.id,
                    outcome,
                });
            }
        }
        self.state
    }
}

/// Receiving end for one job's outcome.
#[derive(Debug)]
pub struct JobHandle {
    id: String,
    outcome: Receiver<JobOutcome>,
}

impl JobHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Block until the job settles.
    pub fn wait(self) -> JobOutcome {
        self.outcome
            .recv()
            .unwrap_or_else(|_| Err(PoolError::ShuttingDown))
    }

    /// Block up to `timeout`; `None` if the job has not settled yet.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<JobOutcome> {
        match self.outcome.recv_timeout(timeout) {
            Ok(outcome) => Some(outcome),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => Some(Err(PoolError::ShuttingDown)),
        }
    }

    /// The outcome if the job already settled.
    pub fn try_result(&self) -> Option<JobOutcome> {
        match self.outcome.try_recv() {
            Ok(outcome) => Some(outcome),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(Err(PoolError::ShuttingDown)),
        }
    }

    /// Underlying channel, for selecting over many jobs at once.
    pub fn receiver(&self) -> &Receiver<JobOutcome> {
        &self.outcome
    }
}

/// A `progress` frame attributed to its worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobProgress {
    pub job_id: String,
    pub worker: usize,
    pub stage: Stage,
}
