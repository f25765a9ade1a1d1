// Process instance domain model

use serde::{Deserialize, Serialize};

/// How a reaped process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExitStatus {
    /// Process exited on its own with a code
    Code(i32),
    /// Process was terminated by a signal
    Signal(i32),
}

impl ExitStatus {
    pub fn success(&self) -> bool {
        matches!(self, ExitStatus::Code(0))
    }
}

impl std::fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExitStatus::Code(c) => write!(f, "code {}", c),
            ExitStatus::Signal(s) => write!(f, "signal {}", s),
        }
    }
}

/// Why an instance reached its terminal state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExitReason {
    /// Natural exit with code 0
    Completed,
    /// Natural exit with nonzero code, or killed by an unrelated signal
    Crashed,
    /// Watchdog observed RSS above the configured limit
    MemoryExceeded,
    /// Operator stop command or supervisor shutdown
    StoppedByOperator,
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExitReason::Completed => write!(f, "COMPLETED"),
            ExitReason::Crashed => write!(f, "CRASHED"),
            ExitReason::MemoryExceeded => write!(f, "MEMORY_EXCEEDED"),
            ExitReason::StoppedByOperator => write!(f, "STOPPED_BY_OPERATOR"),
        }
    }
}

/// Terminal record of one finished run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitSummary {
    pub status: ExitStatus,
    pub reason: ExitReason,
    /// Epoch ms at which the instance was reaped
    pub at: i64,
}

impl ExitSummary {
    /// Classify a natural exit.
    pub fn natural(status: ExitStatus, at: i64) -> Self {
        let reason = if status.success() {
            ExitReason::Completed
        } else {
            ExitReason::Crashed
        };
        Self { status, reason, at }
    }
}

/// One live (or just-reaped) run of a job.
///
/// Created on spawn, destroyed once the exit status is recorded.
#[derive(Debug, Clone)]
pub struct ProcessInstance {
    pub pid: u32,
    /// Epoch ms at spawn
    pub started_at: i64,
    /// Highest RSS sample observed by the watchdog, bytes
    pub peak_rss: Option<u64>,
    /// Present once the process is reaped
    pub exit: Option<ExitStatus>,
}

impl ProcessInstance {
    pub fn new(pid: u32, started_at: i64) -> Self {
        Self {
            pid,
            started_at,
            peak_rss: None,
            exit: None,
        }
    }

    pub fn record_sample(&mut self, rss: u64) {
        match self.peak_rss {
            Some(peak) if peak >= rss => {}
            _ => self.peak_rss = Some(rss),
        }
    }
}
