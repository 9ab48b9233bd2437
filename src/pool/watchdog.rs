//! Deadline watchdog for worker slots.
//!
//! Polls the pool state and terminates workers that sit in `Starting` past the
//! startup timeout or run a single job past the job timeout. A worker that
//! ignores SIGTERM for [`KILL_GRACE`] gets SIGKILL. The supervisor thread sees
//! the resulting EOF and handles the exit like any other crash.
//!
//! Each tick also puts jobs whose retry delay elapsed back on the queue.

use super::coordinator::{PoolConfig, Shared, Slot, SlotState, dispatch};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Time between SIGTERM and SIGKILL.
const KILL_GRACE: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Verdict {
    /// No `ready` within the startup timeout.
    StartupExpired,
    /// The current job exceeded the job timeout.
    JobExpired,
    /// SIGTERM was ignored.
    Escalate,
}

pub(super) struct Deadlines {
    startup: Duration,
    job: Option<Duration>,
    kill_grace: Duration,
}

impl Deadlines {
    pub(super) fn from_config(config: &PoolConfig) -> Self {
        Self {
            startup: config.startup_timeout,
            job: config.job_timeout,
            kill_grace: KILL_GRACE,
        }
    }

    pub(super) fn inspect(&self, slot: &Slot, now: Instant) -> Option<Verdict> {
        if slot.kill_sent {
            return None;
        }
        if let Some(since) = slot.term_sent_at {
            return (now.saturating_duration_since(since) >= self.kill_grace)
                .then_some(Verdict::Escalate);
        }
        match slot.state {
            SlotState::Starting
                if now.saturating_duration_since(slot.spawned_at) >= self.startup =>
            {
                Some(Verdict::StartupExpired)
            }
            SlotState::Busy => {
                let limit = self.job?;
                let active = slot.active.as_ref()?;
                (now.saturating_duration_since(active.started_at) >= limit)
                    .then_some(Verdict::JobExpired)
            }
            _ => None,
        }
    }
}

fn apply(slot: &mut Slot, verdict: Verdict, now: Instant) {
    let Some(proc) = slot.proc.as_ref() else {
        return;
    };
    let pid = proc.pid();

    match verdict {
        Verdict::StartupExpired => {
            tracing::warn!(worker_id = slot.id, pid, "Worker did not signal ready in time, terminating");
            let _ = proc.terminate();
            slot.term_sent_at = Some(now);
        }
        Verdict::JobExpired => {
            if let Some(active) = slot.active.as_mut() {
                active.timed_out = true;
                tracing::warn!(
                    worker_id = slot.id,
                    pid,
                    job_id = %active.job.id(),
                    "Job exceeded its timeout, terminating worker"
                );
            }
            let _ = proc.terminate();
            slot.term_sent_at = Some(now);
        }
        Verdict::Escalate => {
            tracing::warn!(worker_id = slot.id, pid, "Worker ignored SIGTERM, sending SIGKILL");
            let _ = proc.kill();
            slot.kill_sent = true;
        }
    }
}

/// Watchdog thread body. Returns once the pool leaves its active phases.
pub(super) fn run(shared: Arc<Shared>) {
    let deadlines = Deadlines::from_config(&shared.config);
    let interval = shared.config.watchdog_interval;
    tracing::debug!("Watchdog thread started");

    let mut st = shared.lock();
    loop {
        let (guard, _) = shared.wait_while(st, interval, |s| s.phase.is_active());
        st = guard;
        if !st.phase.is_active() {
            break;
        }
        let now = Instant::now();
        for slot in st.slots.iter_mut() {
            if let Some(verdict) = deadlines.inspect(slot, now) {
                apply(slot, verdict, now);
            }
        }
        if st.release_retries(now) {
            dispatch(&mut st);
        }
    }

    tracing::debug!("Watchdog thread stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::CodecPayload;
    use crate::pool::coordinator::ActiveJob;
    use crate::pool::job::Job;

    fn deadlines(job: Option<Duration>) -> Deadlines {
        Deadlines {
            startup: Duration::from_secs(1),
            job,
            kill_grace: Duration::from_millis(500),
        }
    }

    #[test]
    fn test_starting_slot_expires_after_startup_timeout() {
        let mut slot = Slot::new(0);
        slot.state = SlotState::Starting;
        let start = slot.spawned_at;
        let d = deadlines(None);

        assert_eq!(d.inspect(&slot, start + Duration::from_millis(999)), None);
        assert_eq!(
            d.inspect(&slot, start + Duration::from_secs(1)),
            Some(Verdict::StartupExpired)
        );
    }

    #[test]
    fn test_busy_slot_expires_only_with_job_timeout() {
        let mut slot = Slot::new(0);
        slot.state = SlotState::Busy;
        let (job, _handle) = Job::new("a", CodecPayload::new("png", "/tmp/a.png"));
        let started_at = Instant::now();
        slot.active = Some(ActiveJob {
            job,
            started_at,
            timed_out: false,
        });
        let later = started_at + Duration::from_secs(10);

        assert_eq!(deadlines(None).inspect(&slot, later), None);
        assert_eq!(
            deadlines(Some(Duration::from_secs(5))).inspect(&slot, later),
            Some(Verdict::JobExpired)
        );
    }

    #[test]
    fn test_escalation_after_kill_grace() {
        let mut slot = Slot::new(0);
        slot.state = SlotState::Starting;
        let sent = Instant::now();
        slot.term_sent_at = Some(sent);
        let d = deadlines(None);

        assert_eq!(d.inspect(&slot, sent + Duration::from_millis(100)), None);
        assert_eq!(
            d.inspect(&slot, sent + Duration::from_millis(600)),
            Some(Verdict::Escalate)
        );

        slot.kill_sent = true;
        assert_eq!(d.inspect(&slot, sent + Duration::from_secs(60)), None);
    }

    #[test]
    fn test_idle_and_dead_slots_are_left_alone() {
        let d = deadlines(Some(Duration::ZERO));
        let far = Instant::now() + Duration::from_secs(3600);
        let mut slot = Slot::new(0);
        slot.state = SlotState::Idle;
        assert_eq!(d.inspect(&slot, far), None);
        slot.state = SlotState::Dead;
        assert_eq!(d.inspect(&slot, far), None);
    }
}
