//! Cronvisor CLI - Command-line interface for the Cronvisor daemon

use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{Local, TimeZone};
use clap::{Parser, Subcommand};
use colored::Colorize;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tabled::{Table, Tabled};
use tokio::io::{AsyncReadExt, AsyncSeekExt};

const DEFAULT_RPC_URL: &str = "http://127.0.0.1:9611";

// Reserved exit codes for the one-shot invocation contract; a crashed
// job mirrors its own code instead.
const EXIT_CONFIG_ERROR: i32 = 78;
const EXIT_LAUNCH_FAILURE: i32 = 126;
const EXIT_ALREADY_RUNNING: i32 = 75;

// RPC error codes as served by the daemon
const RPC_CONFIG_ERROR: i32 = 4000;
const RPC_ALREADY_RUNNING: i32 = 4002;
const RPC_LAUNCH_FAILURE: i32 = 4004;

#[derive(Parser)]
#[command(name = "cronvisor")]
#[command(about = "Cronvisor process supervisor CLI", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// RPC server URL
    #[arg(long, env = "CRONVISOR_RPC_URL", default_value = DEFAULT_RPC_URL)]
    rpc_url: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a job ahead of (or without) its schedule
    Start {
        /// Job name
        name: String,

        /// Block until the run finishes and mirror its exit code
        #[arg(long)]
        wait: bool,
    },

    /// Stop a job's running instance
    Stop {
        /// Job name
        name: String,
    },

    /// Restart a job (stop if running, then start)
    Restart {
        /// Job name
        name: String,
    },

    /// Show one job's status
    Status {
        /// Job name
        name: String,
    },

    /// List all jobs
    List,

    /// Show a job's combined log
    Logs {
        /// Job name
        name: String,

        /// Number of lines to tail
        #[arg(short = 'n', long, default_value = "50")]
        lines: usize,

        /// Keep following the log file
        #[arg(short, long)]
        follow: bool,
    },
}

#[derive(Serialize)]
struct JsonRpcRequest {
    jsonrpc: String,
    method: String,
    params: serde_json::Value,
    id: u64,
}

#[derive(Deserialize)]
struct JsonRpcResponse {
    #[allow(dead_code)]
    jsonrpc: String,
    #[allow(dead_code)]
    id: u64,
    result: Option<serde_json::Value>,
    error: Option<JsonRpcError>,
}

#[derive(Deserialize)]
struct JsonRpcError {
    code: i32,
    message: String,
}

/// RPC-level failure kept typed so main can map it to an exit code
#[derive(Debug)]
struct RpcFailure {
    code: i32,
    message: String,
}

impl std::fmt::Display for RpcFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "RPC error ({}): {}", self.code, self.message)
    }
}

impl std::error::Error for RpcFailure {}

// Mirrors of the daemon's wire types (the CLI stays decoupled from core)

#[derive(Debug, Clone, Copy, Deserialize)]
enum ExitStatus {
    #[serde(rename = "CODE")]
    Code(i32),
    #[serde(rename = "SIGNAL")]
    Signal(i32),
}

#[derive(Debug, Deserialize)]
struct ExitSummary {
    status: ExitStatus,
    reason: String,
    #[allow(dead_code)]
    at: i64,
}

#[derive(Debug, Deserialize)]
struct StateView {
    phase: String,
    pid: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct Snapshot {
    name: String,
    state: StateView,
    next_fire_at: Option<i64>,
    restarts: u32,
    peak_rss: Option<u64>,
    last_exit: Option<ExitSummary>,
    last_error: Option<String>,
}

#[derive(Tabled)]
struct JobRow {
    name: String,
    state: String,
    pid: String,
    restarts: u32,
    memory: String,
    #[tabled(rename = "next fire")]
    next_fire: String,
    #[tabled(rename = "last exit")]
    last_exit: String,
}

async fn call_rpc(url: &str, method: &str, params: serde_json::Value) -> Result<serde_json::Value> {
    let request = JsonRpcRequest {
        jsonrpc: "2.0".to_string(),
        method: method.to_string(),
        params,
        id: 1,
    };

    let client = reqwest::Client::new();
    let response: JsonRpcResponse = client
        .post(url)
        .json(&request)
        .send()
        .await
        .context("Failed to connect to daemon")?
        .json()
        .await
        .context("Failed to parse response")?;

    if let Some(error) = response.error {
        return Err(RpcFailure {
            code: error.code,
            message: error.message,
        }
        .into());
    }
    response.result.context("RPC response missing result")
}

fn colored_phase(phase: &str) -> String {
    match phase {
        "RUNNING" => phase.green().to_string(),
        "SCHEDULED" => phase.cyan().to_string(),
        "TERMINATING" => phase.yellow().to_string(),
        "EXITED" => phase.red().to_string(),
        _ => phase.dimmed().to_string(),
    }
}

fn format_timestamp(millis: i64) -> String {
    match Local.timestamp_millis_opt(millis).single() {
        Some(ts) => ts.format("%Y-%m-%d %H:%M:%S").to_string(),
        None => millis.to_string(),
    }
}

fn format_memory(bytes: Option<u64>) -> String {
    match bytes {
        None => "-".to_string(),
        Some(b) if b >= 1 << 30 => format!("{:.1}G", b as f64 / (1u64 << 30) as f64),
        Some(b) if b >= 1 << 20 => format!("{:.1}M", b as f64 / (1u64 << 20) as f64),
        Some(b) if b >= 1 << 10 => format!("{:.1}K", b as f64 / (1u64 << 10) as f64),
        Some(b) => b.to_string(),
    }
}

fn format_exit(exit: &Option<ExitSummary>) -> String {
    match exit {
        None => "-".to_string(),
        Some(summary) => {
            let status = match summary.status {
                ExitStatus::Code(c) => format!("code {}", c),
                ExitStatus::Signal(s) => format!("signal {}", s),
            };
            format!("{} ({})", summary.reason, status)
        }
    }
}

fn row(snapshot: &Snapshot) -> JobRow {
    JobRow {
        name: snapshot.name.clone(),
        state: colored_phase(&snapshot.state.phase),
        pid: snapshot
            .state
            .pid
            .map(|p| p.to_string())
            .unwrap_or_else(|| "-".to_string()),
        restarts: snapshot.restarts,
        memory: format_memory(snapshot.peak_rss),
        next_fire: snapshot
            .next_fire_at
            .map(format_timestamp)
            .unwrap_or_else(|| "-".to_string()),
        last_exit: format_exit(&snapshot.last_exit),
    }
}

fn print_status(snapshot: &Snapshot) {
    println!("{}: {}", "job".bold(), snapshot.name);
    println!("{}: {}", "state".bold(), colored_phase(&snapshot.state.phase));
    if let Some(pid) = snapshot.state.pid {
        println!("{}: {}", "pid".bold(), pid);
    }
    if let Some(next) = snapshot.next_fire_at {
        println!("{}: {}", "next fire".bold(), format_timestamp(next));
    }
    println!("{}: {}", "restarts".bold(), snapshot.restarts);
    if snapshot.peak_rss.is_some() {
        println!("{}: {}", "peak rss".bold(), format_memory(snapshot.peak_rss));
    }
    if snapshot.last_exit.is_some() {
        println!("{}: {}", "last exit".bold(), format_exit(&snapshot.last_exit));
    }
    if let Some(err) = &snapshot.last_error {
        println!("{}: {}", "last error".bold(), err.red());
    }
}

/// Exit code for a finished one-shot run: 0 on COMPLETED, otherwise the
/// job's own code (128+signal for signal deaths).
fn exit_code_for(summary: &ExitSummary) -> i32 {
    if summary.reason == "COMPLETED" {
        return 0;
    }
    match summary.status {
        ExitStatus::Code(c) => c,
        ExitStatus::Signal(s) => 128 + s,
    }
}

async fn follow_file(path: &str, poll: Duration) -> Result<()> {
    // Tail from the current end; the daemon flushes every record, so
    // polling is enough.
    let mut file = tokio::fs::File::open(path)
        .await
        .with_context(|| format!("Failed to open {}", path))?;
    let mut offset = file.seek(std::io::SeekFrom::End(0)).await?;
    let mut pending = String::new();
    loop {
        tokio::time::sleep(poll).await;
        let len = tokio::fs::metadata(path).await?.len();
        if len < offset {
            // Truncated or rotated; start over from the beginning.
            offset = 0;
        }
        if len == offset {
            continue;
        }
        file.seek(std::io::SeekFrom::Start(offset)).await?;
        let mut chunk = String::new();
        offset += file.read_to_string(&mut chunk).await? as u64;
        pending.push_str(&chunk);
        while let Some(newline) = pending.find('\n') {
            println!("{}", &pending[..newline]);
            pending.drain(..=newline);
        }
    }
}

async fn run(cli: Cli) -> Result<i32> {
    match cli.command {
        Commands::Start { name, wait } => {
            let result = call_rpc(
                &cli.rpc_url,
                "job.start.v1",
                json!({ "name": name, "wait": wait }),
            )
            .await?;
            let pid = result["pid"].as_u64().unwrap_or_default();
            if wait {
                let summary: ExitSummary = serde_json::from_value(result["exit"].clone())
                    .context("Malformed exit summary")?;
                let code = exit_code_for(&summary);
                if code == 0 {
                    println!("{} {} completed", "ok:".green(), name);
                } else {
                    eprintln!(
                        "{} {} finished: {}",
                        "failed:".red(),
                        name,
                        format_exit(&Some(summary))
                    );
                }
                Ok(code)
            } else {
                println!("{} started {} (pid {})", "ok:".green(), name, pid);
                Ok(0)
            }
        }
        Commands::Stop { name } => {
            call_rpc(&cli.rpc_url, "job.stop.v1", json!({ "name": name })).await?;
            println!("{} stopped {}", "ok:".green(), name);
            Ok(0)
        }
        Commands::Restart { name } => {
            let result = call_rpc(&cli.rpc_url, "job.restart.v1", json!({ "name": name })).await?;
            println!(
                "{} restarted {} (pid {})",
                "ok:".green(),
                name,
                result["pid"].as_u64().unwrap_or_default()
            );
            Ok(0)
        }
        Commands::Status { name } => {
            let result = call_rpc(&cli.rpc_url, "job.status.v1", json!({ "name": name })).await?;
            let snapshot: Snapshot =
                serde_json::from_value(result).context("Malformed status response")?;
            print_status(&snapshot);
            Ok(0)
        }
        Commands::List => {
            let result = call_rpc(&cli.rpc_url, "job.list.v1", json!({})).await?;
            let jobs: Vec<Snapshot> = serde_json::from_value(result["jobs"].clone())
                .context("Malformed list response")?;
            if jobs.is_empty() {
                println!("no jobs registered");
            } else {
                let rows: Vec<JobRow> = jobs.iter().map(row).collect();
                println!("{}", Table::new(rows));
            }
            Ok(0)
        }
        Commands::Logs {
            name,
            lines,
            follow,
        } => {
            let result = call_rpc(
                &cli.rpc_url,
                "logs.tail.v1",
                json!({ "name": name, "lines": lines }),
            )
            .await?;
            for line in result["lines"].as_array().into_iter().flatten() {
                if let Some(line) = line.as_str() {
                    println!("{}", line);
                }
            }
            if follow {
                let path = result["log_path"]
                    .as_str()
                    .context("Malformed logs response")?;
                follow_file(path, Duration::from_millis(500)).await?;
            }
            Ok(0)
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("{} {:#}", "error:".red(), e);
            let code = match e.downcast_ref::<RpcFailure>() {
                Some(RpcFailure {
                    code: RPC_CONFIG_ERROR,
                    ..
                }) => EXIT_CONFIG_ERROR,
                Some(RpcFailure {
                    code: RPC_LAUNCH_FAILURE,
                    ..
                }) => EXIT_LAUNCH_FAILURE,
                Some(RpcFailure {
                    code: RPC_ALREADY_RUNNING,
                    ..
                }) => EXIT_ALREADY_RUNNING,
                _ => 1,
            };
            std::process::exit(code);
        }
    }
}
