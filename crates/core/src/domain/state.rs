// Supervisor state machine

use serde::{Deserialize, Serialize};

use crate::domain::error::{DomainError, Result};
use crate::domain::process::{ExitReason, ExitStatus, ExitSummary};

/// Per-job lifecycle state.
///
/// Legal transitions:
/// - `Idle`/`Scheduled`/`Exited` -> `Running` (cron fire, start command,
///   or autorestart respawn)
/// - `Running` -> `Exited` (natural exit)
/// - `Running` -> `Terminating` (memory watchdog or stop command)
/// - `Terminating` -> `Exited`
/// - `Exited` -> `Scheduled` (repeating jobs, next fire only)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE", tag = "phase")]
pub enum SupervisorState {
    /// One-shot job waiting for an explicit start
    Idle,
    /// Repeating job waiting for its next fire
    Scheduled { next_fire_at: i64 },
    Running { pid: u32, started_at: i64 },
    Terminating { pid: u32 },
    Exited { status: ExitStatus, reason: ExitReason },
}

impl SupervisorState {
    pub fn phase(&self) -> StatePhase {
        match self {
            SupervisorState::Idle => StatePhase::Idle,
            SupervisorState::Scheduled { .. } => StatePhase::Scheduled,
            SupervisorState::Running { .. } => StatePhase::Running,
            SupervisorState::Terminating { .. } => StatePhase::Terminating,
            SupervisorState::Exited { .. } => StatePhase::Exited,
        }
    }

    fn invalid(&self, to: &str) -> DomainError {
        DomainError::InvalidStateTransition {
            from: self.phase().to_string(),
            to: to.to_string(),
        }
    }

    /// Transition into `Running` on spawn.
    pub fn launch(&self, pid: u32, started_at: i64) -> Result<Self> {
        match self {
            SupervisorState::Idle
            | SupervisorState::Scheduled { .. }
            | SupervisorState::Exited { .. } => Ok(SupervisorState::Running { pid, started_at }),
            _ => Err(self.invalid("RUNNING")),
        }
    }

    /// Transition into `Terminating` when a kill has been requested.
    pub fn terminating(&self) -> Result<Self> {
        match self {
            SupervisorState::Running { pid, .. } => {
                Ok(SupervisorState::Terminating { pid: *pid })
            }
            _ => Err(self.invalid("TERMINATING")),
        }
    }

    /// Transition into `Exited` once the instance is reaped.
    pub fn exited(&self, summary: &ExitSummary) -> Result<Self> {
        match self {
            SupervisorState::Running { .. } | SupervisorState::Terminating { .. } => {
                Ok(SupervisorState::Exited {
                    status: summary.status,
                    reason: summary.reason,
                })
            }
            _ => Err(self.invalid("EXITED")),
        }
    }

    /// Transition back to waiting after a run (or at startup).
    ///
    /// `next_fire_at` is present for repeating jobs only.
    pub fn waiting(next_fire_at: Option<i64>) -> Self {
        match next_fire_at {
            Some(at) => SupervisorState::Scheduled { next_fire_at: at },
            None => SupervisorState::Idle,
        }
    }
}

/// Fieldless view of the state, for listings and filters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StatePhase {
    Idle,
    Scheduled,
    Running,
    Terminating,
    Exited,
}

impl std::fmt::Display for StatePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StatePhase::Idle => write!(f, "IDLE"),
            StatePhase::Scheduled => write!(f, "SCHEDULED"),
            StatePhase::Running => write!(f, "RUNNING"),
            StatePhase::Terminating => write!(f, "TERMINATING"),
            StatePhase::Exited => write!(f, "EXITED"),
        }
    }
}

/// Point-in-time status view published by a job's supervisor task.
///
/// The owning task is the only writer; readers get it over a watch
/// channel, so status queries never contend with the lifecycle itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub name: String,
    pub state: SupervisorState,
    /// Epoch ms of the next computed fire, repeating jobs only
    pub next_fire_at: Option<i64>,
    /// Same-cycle respawn count since the last scheduled launch
    pub restarts: u32,
    /// Highest RSS observed for the current or most recent instance, bytes
    pub peak_rss: Option<u64>,
    pub last_exit: Option<ExitSummary>,
    /// Most recent launch failure, if the last trigger could not spawn
    pub last_error: Option<String>,
}

impl JobSnapshot {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: SupervisorState::Idle,
            next_fire_at: None,
            restarts: 0,
            peak_rss: None,
            last_exit: None,
            last_error: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(code: i32) -> ExitSummary {
        ExitSummary::natural(ExitStatus::Code(code), 1000)
    }

    #[test]
    fn idle_can_launch() {
        let next = SupervisorState::Idle.launch(7, 100).unwrap();
        assert_eq!(next.phase(), StatePhase::Running);
    }

    #[test]
    fn scheduled_can_launch() {
        let state = SupervisorState::waiting(Some(5000));
        assert_eq!(state.phase(), StatePhase::Scheduled);
        assert!(state.launch(7, 100).is_ok());
    }

    #[test]
    fn exited_can_relaunch() {
        let state = SupervisorState::Idle
            .launch(7, 100)
            .unwrap()
            .exited(&summary(1))
            .unwrap();
        assert!(state.launch(8, 200).is_ok());
    }

    #[test]
    fn running_cannot_launch_again() {
        let state = SupervisorState::Idle.launch(7, 100).unwrap();
        let err = state.launch(8, 200).unwrap_err();
        assert_eq!(
            err,
            DomainError::InvalidStateTransition {
                from: "RUNNING".to_string(),
                to: "RUNNING".to_string(),
            }
        );
    }

    #[test]
    fn terminating_reaches_exited_only() {
        let state = SupervisorState::Idle
            .launch(7, 100)
            .unwrap()
            .terminating()
            .unwrap();
        assert!(state.launch(9, 300).is_err());
        assert!(state.exited(&summary(0)).is_ok());
    }

    #[test]
    fn idle_cannot_exit() {
        assert!(SupervisorState::Idle.exited(&summary(0)).is_err());
    }
}
