//! The worker pool coordinator.
//!
//! All pool state lives behind one mutex. Each worker slot has a supervisor
//! thread that spawns the process, feeds its frames into the state, reaps it
//! when its stdout closes and respawns it under the [`RespawnPolicy`]. A
//! watchdog thread enforces the startup and job deadlines and releases jobs
//! waiting out a [`RetryPolicy`] delay.

use super::job::{Job, JobHandle, JobOutcome, JobProgress, JobState, TaggedOutcome};
use super::proc::{FrameReader, Incoming, Proc};
use super::protocol::{ErrorKind, Frame, Request};
use super::respawn::{RespawnDecision, RespawnPolicy, RetryPolicy};
use super::signals::TerminationReason;
use super::spawn::{WorkerCommand, spawn_thread, spawn_worker};
use super::watchdog;
use crate::codec::{CodecOutput, CodecPayload};
use crate::error::{PoolError, Result};
use crate::events::{EventBus, ListenerId};
use crossbeam_channel::Sender;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Default time a worker gets to send `ready`.
const DEFAULT_STARTUP_TIMEOUT: Duration = Duration::from_secs(30);

/// Default watchdog poll interval.
const DEFAULT_WATCHDOG_INTERVAL: Duration = Duration::from_millis(100);

/// Default time workers get to exit after `exit` before they are killed.
const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Default deadline for a single job.
const DEFAULT_JOB_TIMEOUT: Duration = Duration::from_secs(180);

/// Default number of jobs allowed to wait for a worker.
pub const DEFAULT_QUEUE_MAX: usize = 1000;

/// Settled jobs whose final state stays queryable.
const FINISHED_HISTORY: usize = 1024;

/// Longest malformed line echoed into the logs.
const MAX_LOGGED_LINE: usize = 200;

/// Half the available CPUs, at least one.
pub fn default_pool_size() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get() / 2)
        .unwrap_or(1)
        .max(1)
}

/// Configuration for a [`WorkerPool`].
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Number of worker processes.
    pub size: usize,
    /// Worker command. `None` runs the current executable's `worker` mode.
    pub worker: Option<WorkerCommand>,
    /// Deadline for the `ready` handshake, at start and on respawn.
    pub startup_timeout: Duration,
    /// Deadline for a single job. `None` lets jobs run indefinitely.
    pub job_timeout: Option<Duration>,
    /// Jobs allowed to wait for a worker before `run` fails with
    /// [`PoolError::QueueFull`].
    pub queue_max: usize,
    pub respawn: RespawnPolicy,
    /// Re-run jobs whose worker crashed or timed out. Off when `None`.
    pub retry: Option<RetryPolicy>,
    pub watchdog_interval: Duration,
    pub shutdown_grace: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            size: default_pool_size(),
            worker: None,
            startup_timeout: DEFAULT_STARTUP_TIMEOUT,
            job_timeout: Some(DEFAULT_JOB_TIMEOUT),
            queue_max: DEFAULT_QUEUE_MAX,
            respawn: RespawnPolicy::default(),
            retry: None,
            watchdog_interval: DEFAULT_WATCHDOG_INTERVAL,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }
}

impl PoolConfig {
    pub fn with_size(size: usize) -> Self {
        Self {
            size,
            ..Default::default()
        }
    }
}

/// Lifecycle state of one worker slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    /// Spawned, `ready` not seen yet.
    Starting,
    Idle,
    Busy,
    /// No live process: exited, waiting for respawn, or retired.
    Dead,
}

/// A job currently executing on a slot.
pub(super) struct ActiveJob {
    pub job: Job,
    pub started_at: Instant,
    /// Set by the watchdog before it terminates the worker.
    pub timed_out: bool,
}

pub(super) struct Slot {
    pub id: usize,
    pub state: SlotState,
    pub proc: Option<Proc>,
    pub pid: Option<u32>,
    pub active: Option<ActiveJob>,
    /// The slot reported `ready` at least once.
    pub ready_once: bool,
    /// The respawn budget is exhausted; the slot stays dead.
    pub retired: bool,
    pub consecutive_failures: u32,
    pub jobs_completed: u64,
    pub restarts: u64,
    pub spawned_at: Instant,
    pub term_sent_at: Option<Instant>,
    pub kill_sent: bool,
}

impl Slot {
    pub(super) fn new(id: usize) -> Self {
        Self {
            id,
            state: SlotState::Dead,
            proc: None,
            pid: None,
            active: None,
            ready_once: false,
            retired: false,
            consecutive_failures: 0,
            jobs_completed: 0,
            restarts: 0,
            spawned_at: Instant::now(),
            term_sent_at: None,
            kill_sent: false,
        }
    }

    fn attach(&mut self, proc: Proc) {
        let pid = proc.pid();
        self.pid = Some(pid);
        self.proc = Some(proc);
        self.state = SlotState::Starting;
        self.spawned_at = Instant::now();
        self.term_sent_at = None;
        self.kill_sent = false;
        tracing::debug!(worker_id = self.id, pid, "Worker spawned");
    }

    /// Send `job` to this (idle) worker. Hands the job back if that fails.
    fn assign(&mut self, mut job: Job) -> std::result::Result<(), Job> {
        let Some(proc) = self.proc.as_mut() else {
            self.state = SlotState::Dead;
            job.requeue();
            return Err(job);
        };

        match proc.send(&Request::run(job.id(), job.payload().clone())) {
            Ok(()) => {
                tracing::trace!(worker_id = self.id, job_id = %job.id(), "Job assigned");
                job.assign(self.id);
                self.state = SlotState::Busy;
                self.active = Some(ActiveJob {
                    job,
                    started_at: Instant::now(),
                    timed_out: false,
                });
                Ok(())
            }
            Err(e) => {
                tracing::warn!(
                    worker_id = self.id,
                    job_id = %job.id(),
                    error = %e,
                    "Failed to send job to worker, requeueing"
                );
                self.state = SlotState::Dead;
                let _ = proc.kill();
                job.requeue();
                Err(job)
            }
        }
    }

    fn current_job(&self) -> Option<&str> {
        self.active.as_ref().map(|a| a.job.id())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Phase {
    Stopped,
    Starting,
    Running,
    Stopping,
}

impl Phase {
    /// Workers are kept alive and respawned in this phase.
    pub(super) fn is_active(self) -> bool {
        matches!(self, Self::Starting | Self::Running)
    }
}

/// Final states of recently settled jobs, oldest forgotten first.
#[derive(Default)]
pub(super) struct History {
    states: HashMap<String, JobState>,
    order: VecDeque<String>,
}

impl History {
    /// Settle `job` and remember how it ended.
    pub(super) fn settle(&mut self, job: Job, outcome: JobOutcome) {
        let id = job.id().to_string();
        let state = job.settle(outcome);
        if self.states.insert(id.clone(), state).is_none() {
            self.order.push_back(id);
        }
        while self.order.len() > FINISHED_HISTORY {
            if let Some(oldest) = self.order.pop_front() {
                self.states.remove(&oldest);
            }
        }
    }

    fn get(&self, job_id: &str) -> Option<JobState> {
        self.states.get(job_id).copied()
    }
}

pub(super) struct PoolState {
    pub phase: Phase,
    pub slots: Vec<Slot>,
    pub queue: VecDeque<Job>,
    /// Jobs waiting out a retry delay, with the instant they may run again.
    pub retrying: Vec<(Instant, Job)>,
    pub history: History,
}

impl PoolState {
    fn new() -> Self {
        Self {
            phase: Phase::Stopped,
            slots: Vec::new(),
            queue: VecDeque::new(),
            retrying: Vec::new(),
            history: History::default(),
        }
    }

    fn exhausted(&self) -> bool {
        !self.slots.is_empty() && self.slots.iter().all(|s| s.retired)
    }

    /// Jobs not on a worker: queued plus waiting to be retried.
    fn waiting(&self) -> usize {
        self.queue.len() + self.retrying.len()
    }

    fn contains_job(&self, job_id: &str) -> bool {
        self.queue.iter().any(|j| j.id() == job_id)
            || self.retrying.iter().any(|(_, j)| j.id() == job_id)
            || self.slots.iter().any(|s| s.current_job() == Some(job_id))
    }

    /// Settle every job that is not on a worker. Returns how many there were.
    fn fail_waiting(&mut self, error: impl Fn() -> PoolError) -> usize {
        let mut jobs: Vec<Job> = self.queue.drain(..).collect();
        jobs.extend(self.retrying.drain(..).map(|(_, job)| job));
        let count = jobs.len();
        for job in jobs {
            self.history.settle(job, Err(error()));
        }
        count
    }

    /// Move retries whose delay elapsed to the front of the queue.
    pub(super) fn release_retries(&mut self, now: Instant) -> bool {
        if self.retrying.is_empty() {
            return false;
        }
        let (due, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut self.retrying)
            .into_iter()
            .partition(|(at, _)| *at <= now);
        self.retrying = waiting;
        let released = !due.is_empty();
        for (_, job) in due.into_iter().rev() {
            self.queue.push_front(job);
        }
        released
    }

    /// Every slot has been ready once, or one retired without ever being ready.
    fn startup_settled(&self) -> bool {
        self.slots.iter().all(|s| s.ready_once)
            || self.slots.iter().any(|s| s.retired && !s.ready_once)
    }

    fn count(&self, state: SlotState) -> usize {
        self.slots.iter().filter(|s| s.state == state).count()
    }
}

pub(super) struct Shared {
    pub state: Mutex<PoolState>,
    pub changed: Condvar,
    pub config: PoolConfig,
    pub stages: EventBus<JobProgress>,
}

impl Shared {
    pub(super) fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Wait on the state condvar while `condition` holds, up to `timeout`.
    /// Returns the guard and whether the wait timed out.
    pub(super) fn wait_while<'a, F>(
        &self,
        guard: MutexGuard<'a, PoolState>,
        timeout: Duration,
        condition: F,
    ) -> (MutexGuard<'a, PoolState>, bool)
    where
        F: FnMut(&mut PoolState) -> bool,
    {
        let (guard, result) = self
            .changed
            .wait_timeout_while(guard, timeout, condition)
            .unwrap_or_else(PoisonError::into_inner);
        (guard, result.timed_out())
    }
}

/// Point-in-time counters of a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolStats {
    /// Configured number of workers.
    pub capacity: usize,
    /// Live workers (idle + running).
    pub size: usize,
    pub idle: usize,
    pub running: usize,
    pub starting: usize,
    pub dead: usize,
    pub retired: usize,
    pub queued: usize,
    pub jobs_completed: u64,
    pub restarts: u64,
}

/// Identity of the worker running a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerInfo {
    pub id: usize,
    pub pid: u32,
}

/// A pool of worker processes executing codec jobs.
pub struct WorkerPool {
    shared: Arc<Shared>,
    /// Supervisor and watchdog threads; also serializes start and shutdown.
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    /// A stopped pool. Nothing is spawned until [`WorkerPool::start`].
    pub fn new(config: PoolConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(PoolState::new()),
                changed: Condvar::new(),
                config,
                stages: EventBus::new(),
            }),
            threads: Mutex::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.shared.config
    }

    /// Spawn every worker and wait for each to report `ready`.
    ///
    /// A no-op on a running pool. If some worker is not ready within
    /// `startup_timeout`, everything spawned is torn down again and the
    /// error names the slots that failed.
    pub fn start(&self) -> Result<()> {
        let mut threads = self.lock_threads();
        if self.shared.lock().phase == Phase::Running {
            return Ok(());
        }

        let command = match &self.shared.config.worker {
            Some(command) => command.clone(),
            None => WorkerCommand::current_exe()?,
        };
        let size = self.shared.config.size.max(1);
        {
            let mut st = self.shared.lock();
            st.phase = Phase::Starting;
            st.slots = (0..size).map(Slot::new).collect();
            st.queue.clear();
            st.retrying.clear();
        }
        tracing::info!(workers = size, program = %command.program.display(), "Starting worker pool");

        for id in 0..size {
            let shared = self.shared.clone();
            let command = command.clone();
            match spawn_thread(format!("picpool-worker-{}", id), move || {
                supervise(shared, id, command)
            }) {
                Ok(handle) => threads.push(handle),
                Err(e) => {
                    self.stop(&mut threads);
                    return Err(e);
                }
            }
        }
        let shared = self.shared.clone();
        match spawn_thread("picpool-watchdog".to_string(), move || watchdog::run(shared)) {
            Ok(handle) => threads.push(handle),
            Err(e) => {
                self.stop(&mut threads);
                return Err(e);
            }
        }

        let timeout = self.shared.config.startup_timeout;
        let st = self.shared.lock();
        let (mut st, _) = self
            .shared
            .wait_while(st, timeout, |s| !s.startup_settled());

        let failed: Vec<usize> = st
            .slots
            .iter()
            .filter(|s| !s.ready_once)
            .map(|s| s.id)
            .collect();
        if failed.is_empty() {
            st.phase = Phase::Running;
            dispatch(&mut st);
            tracing::info!(workers = size, "All workers ready");
            return Ok(());
        }
        drop(st);

        tracing::error!(workers = ?failed, ?timeout, "Workers failed to become ready");
        self.stop(&mut threads);
        Err(PoolError::Startup {
            workers: failed,
            timeout,
        })
    }

    /// Submit a job under a caller-chosen id.
    pub fn run(&self, job_id: impl Into<String>, payload: CodecPayload) -> Result<JobHandle> {
        let (job, handle) = Job::new(job_id, payload);
        self.enqueue(job)?;
        Ok(handle)
    }

    /// Submit a job under a fresh random id.
    pub fn submit(&self, payload: CodecPayload) -> Result<JobHandle> {
        self.run(uuid::Uuid::new_v4().to_string(), payload)
    }

    /// Submit a job whose outcome is sent on `reply`, labelled with `tag`.
    ///
    /// Many jobs can share one channel; the caller then collects outcomes in
    /// completion order from a single receiver. Returns the generated job id.
    pub fn submit_tagged(&self, payload: CodecPayload, tag: usize, reply: Sender<TaggedOutcome>) -> Result<String> {
        let job_id = uuid::Uuid::new_v4().to_string();
        self.enqueue(Job::tagged(job_id.clone(), payload, tag, reply))?;
        Ok(job_id)
    }

    fn enqueue(&self, job: Job) -> Result<()> {
        let mut st = self.shared.lock();
        match st.phase {
            Phase::Running => {}
            Phase::Stopping => return Err(PoolError::ShuttingDown),
            Phase::Stopped | Phase::Starting => return Err(PoolError::NotStarted),
        }
        if st.exhausted() {
            return Err(PoolError::PoolExhausted);
        }
        if st.contains_job(job.id()) {
            return Err(PoolError::DuplicateJob(job.id().to_string()));
        }
        let max = self.shared.config.queue_max;
        if st.waiting() >= max {
            tracing::debug!(job_id = %job.id(), max, "Queue full, rejecting job");
            return Err(PoolError::QueueFull { max });
        }

        st.queue.push_back(job);
        dispatch(&mut st);
        Ok(())
    }

    /// Where `job_id` is: waiting, on a worker, or how it ended.
    ///
    /// Only the most recent settled jobs are remembered.
    pub fn job_state(&self, job_id: &str) -> Option<JobState> {
        let st = self.shared.lock();
        if st.queue.iter().any(|j| j.id() == job_id)
            || st.retrying.iter().any(|(_, j)| j.id() == job_id)
        {
            return Some(JobState::Queued);
        }
        st.slots
            .iter()
            .filter_map(|s| s.active.as_ref())
            .find(|a| a.job.id() == job_id)
            .map(|a| a.job.state())
            .or_else(|| st.history.get(job_id))
    }

    /// Remove a job that has not reached a worker yet. It settles with
    /// [`PoolError::Cancelled`]. Running jobs cannot be cancelled.
    pub fn cancel(&self, job_id: &str) -> bool {
        let mut st = self.shared.lock();
        let job = if let Some(pos) = st.queue.iter().position(|j| j.id() == job_id) {
            st.queue.remove(pos)
        } else if let Some(pos) = st.retrying.iter().position(|(_, j)| j.id() == job_id) {
            Some(st.retrying.remove(pos).1)
        } else {
            None
        };
        let Some(job) = job else {
            return false;
        };
        tracing::debug!(job_id, "Job cancelled");
        st.history
            .settle(job, Err(PoolError::Cancelled(job_id.to_string())));
        true
    }

    /// Submit a job and block until it settles.
    pub fn run_and_wait(&self, job_id: impl Into<String>, payload: CodecPayload) -> Result<CodecOutput> {
        self.run(job_id, payload)?.wait()
    }

    pub fn is_running(&self) -> bool {
        self.shared.lock().phase == Phase::Running
    }

    /// Live workers (idle or running a job).
    pub fn size(&self) -> usize {
        let st = self.shared.lock();
        st.count(SlotState::Idle) + st.count(SlotState::Busy)
    }

    pub fn idle_count(&self) -> usize {
        self.shared.lock().count(SlotState::Idle)
    }

    pub fn running_count(&self) -> usize {
        self.shared.lock().count(SlotState::Busy)
    }

    /// Jobs waiting for a worker, retries included.
    pub fn queued_count(&self) -> usize {
        self.shared.lock().waiting()
    }

    /// Configured number of workers.
    pub fn capacity(&self) -> usize {
        self.shared.config.size.max(1)
    }

    /// All counters, read atomically.
    pub fn stats(&self) -> PoolStats {
        let st = self.shared.lock();
        let idle = st.count(SlotState::Idle);
        let running = st.count(SlotState::Busy);
        PoolStats {
            capacity: self.shared.config.size.max(1),
            size: idle + running,
            idle,
            running,
            starting: st.count(SlotState::Starting),
            dead: st.count(SlotState::Dead),
            retired: st.slots.iter().filter(|s| s.retired).count(),
            queued: st.waiting(),
            jobs_completed: st.slots.iter().map(|s| s.jobs_completed).sum(),
            restarts: st.slots.iter().map(|s| s.restarts).sum(),
        }
    }

    /// The worker currently running `job_id`.
    pub fn worker_for_job(&self, job_id: &str) -> Option<WorkerInfo> {
        let st = self.shared.lock();
        st.slots
            .iter()
            .find(|s| s.current_job() == Some(job_id))
            .and_then(|s| s.pid.map(|pid| WorkerInfo { id: s.id, pid }))
    }

    /// Subscribe to `progress` frames of every job.
    pub fn on_stage<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&JobProgress) + Send + Sync + 'static,
    {
        self.shared.stages.subscribe(listener)
    }

    pub fn off_stage(&self, id: ListenerId) -> bool {
        self.shared.stages.unsubscribe(id)
    }

    /// Stop every worker. Queued and running jobs settle with
    /// [`PoolError::ShuttingDown`]. The pool can be started again afterwards.
    pub fn shutdown(&self) {
        let mut threads = self.lock_threads();
        self.stop(&mut threads);
    }

    fn lock_threads(&self) -> MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.threads.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn stop(&self, threads: &mut Vec<JoinHandle<()>>) {
        {
            let mut st = self.shared.lock();
            if st.phase == Phase::Stopped && threads.is_empty() {
                return;
            }
            st.phase = Phase::Stopping;

            let queued = st.fail_waiting(|| PoolError::ShuttingDown);
            let mut in_flight = 0;
            let PoolState { slots, history, .. } = &mut *st;
            for slot in slots.iter_mut() {
                if let Some(active) = slot.active.take() {
                    in_flight += 1;
                    history.settle(active.job, Err(PoolError::ShuttingDown));
                }
                if let Some(proc) = slot.proc.as_mut() {
                    if slot.state == SlotState::Starting {
                        let _ = proc.terminate();
                    } else {
                        proc.request_exit();
                    }
                }
            }
            tracing::info!(queued, in_flight, "Shutting down worker pool");
            self.shared.changed.notify_all();
        }

        let grace = self.shared.config.shutdown_grace;
        let st = self.shared.lock();
        let (st, timed_out) = self
            .shared
            .wait_while(st, grace, |s| s.slots.iter().any(|slot| slot.proc.is_some()));
        if timed_out {
            for slot in st.slots.iter() {
                if let Some(proc) = &slot.proc {
                    tracing::warn!(worker_id = slot.id, pid = proc.pid(), "Worker ignored exit request, killing");
                    let _ = proc.kill();
                }
            }
        }
        drop(st);

        for handle in threads.drain(..) {
            if handle.join().is_err() {
                tracing::error!("Worker pool thread panicked");
            }
        }

        let mut st = self.shared.lock();
        for slot in st.slots.iter_mut() {
            slot.state = SlotState::Dead;
            slot.pid = None;
        }
        st.phase = Phase::Stopped;
        tracing::info!("Worker pool stopped");
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Hand queued jobs to idle workers, oldest first.
pub(super) fn dispatch(st: &mut PoolState) {
    if st.phase != Phase::Running {
        return;
    }
    while !st.queue.is_empty() {
        let Some(idx) = st.slots.iter().position(|s| s.state == SlotState::Idle) else {
            break;
        };
        let Some(job) = st.queue.pop_front() else {
            break;
        };
        if let Err(job) = st.slots[idx].assign(job) {
            st.queue.push_front(job);
        }
    }
}

/// What the supervisor does after its worker is gone.
enum ExitAction {
    Respawn(Duration),
    Stop,
}

/// Supervisor thread body for one slot.
fn supervise(shared: Arc<Shared>, slot_id: usize, command: WorkerCommand) {
    loop {
        let spawned = spawn_worker(&command, slot_id);

        let mut reader = {
            let mut st = shared.lock();
            if !st.phase.is_active() {
                drop(st);
                drop(spawned);
                return;
            }
            match spawned {
                Ok((proc, reader)) => {
                    st.slots[slot_id].attach(proc);
                    Some(reader)
                }
                Err(e) => {
                    tracing::warn!(worker_id = slot_id, error = %e, "Failed to spawn worker");
                    None
                }
            }
        };

        let reason = match reader.as_mut() {
            Some(reader) => {
                read_frames(&shared, slot_id, reader);
                reap(&shared, slot_id)
            }
            None => None,
        };

        let action = {
            let mut st = shared.lock();
            let action = on_exit(&mut st, &shared.config, slot_id, reason);
            shared.changed.notify_all();
            action
        };

        match action {
            ExitAction::Stop => return,
            ExitAction::Respawn(delay) => {
                let st = shared.lock();
                let (mut st, _) = shared.wait_while(st, delay, |s| s.phase.is_active());
                if !st.phase.is_active() {
                    return;
                }
                st.slots[slot_id].restarts += 1;
            }
        }
    }
}

/// Feed frames into the pool state until the worker's stdout closes.
fn read_frames(shared: &Shared, slot_id: usize, reader: &mut FrameReader) {
    loop {
        match reader.recv() {
            Ok(Incoming::Frame(frame)) => {
                let progress = {
                    let mut st = shared.lock();
                    let progress = handle_frame(&mut st, slot_id, frame);
                    shared.changed.notify_all();
                    progress
                };
                if let Some(progress) = progress {
                    shared.stages.emit(&progress);
                }
            }
            Ok(Incoming::Malformed { line, error }) => {
                let shown: String = line.chars().take(MAX_LOGGED_LINE).collect();
                tracing::warn!(worker_id = slot_id, %error, line = %shown, "Discarding malformed frame");
            }
            Ok(Incoming::Eof) => return,
            Err(e) => {
                tracing::warn!(worker_id = slot_id, error = %e, "Failed to read from worker");
                return;
            }
        }
    }
}

/// Detach the process from its slot and collect its exit status.
fn reap(shared: &Shared, slot_id: usize) -> Option<TerminationReason> {
    let proc = {
        let mut st = shared.lock();
        let slot = &mut st.slots[slot_id];
        slot.state = SlotState::Dead;
        let proc = slot.proc.take();
        shared.changed.notify_all();
        proc
    };
    let mut proc = proc?;
    Some(proc.reap(shared.config.shutdown_grace))
}

/// Apply one frame to the slot it came from.
///
/// Returns the progress event to publish once the lock is released.
fn handle_frame(st: &mut PoolState, slot_id: usize, frame: Frame) -> Option<JobProgress> {
    if !st.phase.is_active() {
        tracing::debug!(worker_id = slot_id, ?frame, "Ignoring frame during shutdown");
        return None;
    }

    match frame {
        Frame::Ready => {
            let slot = &mut st.slots[slot_id];
            if slot.state != SlotState::Starting {
                tracing::warn!(worker_id = slot_id, state = ?slot.state, "Protocol error: unexpected ready frame");
                return None;
            }
            slot.state = SlotState::Idle;
            slot.ready_once = true;
            tracing::debug!(worker_id = slot_id, pid = ?slot.pid, "Worker ready");
            dispatch(st);
            None
        }
        Frame::Progress { job_id, stage } => {
            let slot = &st.slots[slot_id];
            if slot.current_job() != Some(job_id.as_str()) {
                tracing::warn!(worker_id = slot_id, job_id = %job_id, "Protocol error: progress for a job this worker does not own");
                return None;
            }
            tracing::trace!(worker_id = slot_id, job_id = %job_id, %stage, "Job progress");
            Some(JobProgress {
                job_id,
                worker: slot_id,
                stage,
            })
        }
        Frame::Result { job_id, output } => {
            finish(st, slot_id, &job_id, FrameOutcome::Done(output));
            None
        }
        Frame::Error {
            job_id,
            message,
            kind,
        } => {
            finish(st, slot_id, &job_id, FrameOutcome::Failed { message, kind });
            None
        }
    }
}

enum FrameOutcome {
    Done(CodecOutput),
    Failed { message: String, kind: ErrorKind },
}

/// Settle the slot's job from a terminal frame and pick up the next one.
fn finish(st: &mut PoolState, slot_id: usize, job_id: &str, outcome: FrameOutcome) {
    let slot = &mut st.slots[slot_id];
    if slot.state != SlotState::Busy || slot.current_job() != Some(job_id) {
        tracing::warn!(worker_id = slot_id, job_id = %job_id, "Protocol error: terminal frame for a job this worker does not own");
        return;
    }
    let Some(active) = slot.active.take() else {
        return;
    };

    // A worker the watchdog already signalled is on its way out.
    slot.state = if slot.term_sent_at.is_some() {
        SlotState::Dead
    } else {
        SlotState::Idle
    };
    slot.consecutive_failures = 0;
    slot.jobs_completed += 1;

    let outcome = match outcome {
        FrameOutcome::Done(output) => Ok(output),
        FrameOutcome::Failed {
            kind: ErrorKind::UnsupportedCodec,
            ..
        } => Err(PoolError::UnsupportedCodec(active.job.payload().codec.clone())),
        FrameOutcome::Failed {
            message,
            kind: ErrorKind::Codec,
        } => Err(PoolError::Codec(message)),
    };
    tracing::debug!(
        worker_id = slot_id,
        job_id = %job_id,
        ok = outcome.is_ok(),
        elapsed_ms = active.started_at.elapsed().as_millis() as u64,
        "Job finished"
    );
    st.history.settle(active.job, outcome);
    dispatch(st);
}

/// Book-keeping after a worker exited (or failed to spawn).
fn on_exit(
    st: &mut PoolState,
    config: &PoolConfig,
    slot_id: usize,
    reason: Option<TerminationReason>,
) -> ExitAction {
    let active_phase = st.phase.is_active();
    let reason_text = reason
        .as_ref()
        .map_or_else(|| "failed to spawn".to_string(), |r| r.to_string());

    let decision = {
        let slot = &mut st.slots[slot_id];
        slot.state = SlotState::Dead;
        slot.pid = None;

        if let Some(active) = slot.active.take() {
            let mut job = active.job;
            let job_id = job.id().to_string();
            let attempts = job.attempts();
            let retry = config
                .retry
                .filter(|_| active_phase)
                .and_then(|policy| policy.next_delay(attempts));

            if let Some(delay) = retry {
                tracing::warn!(
                    worker_id = slot_id,
                    job_id = %job_id,
                    reason = %reason_text,
                    attempts,
                    delay_ms = delay.as_millis() as u64,
                    "Worker died while running a job, retrying"
                );
                job.requeue();
                st.retrying.push((Instant::now() + delay, job));
            } else {
                let err = if active.timed_out {
                    PoolError::JobTimeout {
                        worker: slot_id,
                        job_id: job_id.clone(),
                        timeout: config.job_timeout.unwrap_or_default(),
                    }
                } else {
                    PoolError::WorkerCrash {
                        worker: slot_id,
                        job_id: job_id.clone(),
                        reason: reason_text.clone(),
                    }
                };
                tracing::warn!(worker_id = slot_id, job_id = %job_id, reason = %reason_text, attempts, "Worker died while running a job");
                st.history.settle(job, Err(err));
            }
        }

        if !active_phase {
            tracing::debug!(worker_id = slot_id, reason = %reason_text, "Worker exited");
            return ExitAction::Stop;
        }

        slot.consecutive_failures += 1;
        let failures = slot.consecutive_failures;
        let decision = config.respawn.decide(failures);
        match decision {
            RespawnDecision::Retry(delay) => {
                tracing::warn!(
                    worker_id = slot_id,
                    reason = %reason_text,
                    failures,
                    delay_ms = delay.as_millis() as u64,
                    "Worker exited unexpectedly, respawning"
                );
            }
            RespawnDecision::Retire => {
                slot.retired = true;
                tracing::error!(
                    worker_id = slot_id,
                    reason = %reason_text,
                    failures,
                    "Worker exceeded its respawn budget, retiring slot"
                );
            }
        }
        decision
    };

    match decision {
        RespawnDecision::Retry(delay) => ExitAction::Respawn(delay),
        RespawnDecision::Retire => {
            if st.exhausted() {
                let queued = st.fail_waiting(|| PoolError::PoolExhausted);
                tracing::error!(queued, "Every worker is retired, failing queued jobs");
            }
            ExitAction::Stop
        }
    }
}
