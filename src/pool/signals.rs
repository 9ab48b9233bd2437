//! Classification of worker exits.

use nix::sys::signal::Signal;
use nix::sys::wait::WaitStatus;
use std::fmt;

/// Why a worker process went away.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminationReason {
    /// Normal exit with status code.
    Exited(i32),
    /// SIGKILL, from the watchdog, a shutdown escalation, or the OOM killer.
    Killed,
    /// SIGTERM, usually from the watchdog.
    Terminated,
    /// SIGSEGV or SIGBUS.
    Crashed(Signal),
    /// Any other signal.
    Signaled(Signal),
    /// The status could not be collected.
    Unknown,
}

impl TerminationReason {
    /// A zero exit status.
    pub fn is_clean(&self) -> bool {
        matches!(self, Self::Exited(0))
    }
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exited(code) => write!(f, "exited with code {}", code),
            Self::Killed => write!(f, "killed by SIGKILL"),
            Self::Terminated => write!(f, "terminated by SIGTERM"),
            Self::Crashed(sig) => write!(f, "crashed with {}", sig.as_str()),
            Self::Signaled(sig) => write!(f, "killed by signal {}", sig.as_str()),
            Self::Unknown => write!(f, "exited for an unknown reason"),
        }
    }
}

/// Map a reaped `WaitStatus` to a [`TerminationReason`].
pub fn analyze_wait_status(status: WaitStatus) -> TerminationReason {
    match status {
        WaitStatus::Exited(_, code) => TerminationReason::Exited(code),
        WaitStatus::Signaled(_, signal, _) => match signal {
            Signal::SIGKILL => TerminationReason::Killed,
            Signal::SIGTERM => TerminationReason::Terminated,
            Signal::SIGSEGV | Signal::SIGBUS => TerminationReason::Crashed(signal),
            other => TerminationReason::Signaled(other),
        },
        _ => TerminationReason::Unknown,
    }
}
