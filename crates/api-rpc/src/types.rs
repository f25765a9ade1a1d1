//! RPC Request/Response Types
//!
//! Defines the JSON-RPC method parameters and results.

use serde::{Deserialize, Serialize};

use cronvisor_core::domain::{ExitSummary, JobSnapshot};

/// job.start.v1 - Start a job ahead of (or without) its schedule
#[derive(Debug, Deserialize)]
pub struct StartRequest {
    pub name: String,
    /// Block until the triggered run reaches its terminal state
    #[serde(default)]
    pub wait: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct StartResponse {
    pub name: String,
    pub pid: u32,
    /// Present when `wait` was requested
    pub exit: Option<ExitSummary>,
}

/// job.stop.v1 - Stop a running instance
#[derive(Debug, Deserialize)]
pub struct StopRequest {
    pub name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct StopResponse {
    pub name: String,
    pub stopped: bool,
}

/// job.restart.v1 - Stop (if running) then start
#[derive(Debug, Deserialize)]
pub struct RestartRequest {
    pub name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RestartResponse {
    pub name: String,
    pub pid: u32,
}

/// job.status.v1 - One job's snapshot
#[derive(Debug, Deserialize)]
pub struct StatusRequest {
    pub name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
    #[serde(flatten)]
    pub snapshot: JobSnapshot,
}

/// job.list.v1 - All job snapshots
#[derive(Debug, Deserialize)]
pub struct ListRequest {}

#[derive(Debug, Clone, Serialize)]
pub struct ListResponse {
    pub jobs: Vec<JobSnapshot>,
}

/// logs.tail.v1 - Tail a job's combined log
#[derive(Debug, Deserialize)]
pub struct TailLogsRequest {
    pub name: String,
    #[serde(default = "default_lines")]
    pub lines: usize,
}

fn default_lines() -> usize {
    50
}

#[derive(Debug, Clone, Serialize)]
pub struct TailLogsResponse {
    pub name: String,
    /// Combined log path, for follow-mode tailing on the client side
    pub log_path: String,
    pub lines: Vec<String>,
}
