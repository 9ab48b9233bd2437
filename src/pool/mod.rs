//! Process-isolated worker pool for codec jobs.
//!
//! The coordinator keeps a fixed number of worker processes alive, hands each
//! idle worker one job at a time and queues the rest in FIFO order. Workers
//! talk to the coordinator in newline-delimited JSON frames over their
//! stdin/stdout.
//!
//! # Architecture
//!
//! ```text
//!                  ┌──────────────────────────────┐
//!   run(job) ────▶ │  WorkerPool (Mutex<State>)   │ ◀── watchdog thread
//!   JobHandle ◀─── │  queue · slots · phase       │
//!                  └──────┬───────────┬───────────┘
//!                  supervisor    supervisor  ...  (one thread per slot)
//!                         │           │
//!                  ┌──────▼────┐ ┌────▼──────┐
//!                  │ worker 0  │ │ worker 1  │     picpool worker
//!                  │ router    │ │ router    │     (separate processes)
//!                  └───────────┘ └───────────┘
//! ```
//!
//! # Features
//!
//! - **Crash isolation**: a crashing worker fails only the job it was running
//! - **Respawn with backoff**: dead workers come back until their budget runs out
//! - **Deadlines**: startup handshake and per-job timeouts enforced by a watchdog
//! - **Bounded queue**: submissions beyond `queue_max` waiting jobs are refused
//! - **Retries**: optionally re-run jobs whose worker died, with backoff
//! - **Exactly-once outcomes**: every job settles once, through its [`JobHandle`]

mod coordinator;
mod ipc;
mod job;
mod proc;
mod protocol;
mod respawn;
mod signals;
mod spawn;
mod watchdog;
pub mod worker_main;

pub use coordinator::{
    DEFAULT_QUEUE_MAX, PoolConfig, PoolStats, SlotState, WorkerInfo, WorkerPool, default_pool_size,
};
pub use job::{Job, JobHandle, JobOutcome, JobProgress, JobState, TaggedOutcome};
pub use protocol::{ErrorKind, Frame, Request};
pub use respawn::{RespawnDecision, RespawnPolicy, RetryPolicy};
pub use signals::TerminationReason;
pub use spawn::{WORKER_ID_ENV, WorkerCommand};
pub use worker_main::{WorkerOptions, run_worker_main};
