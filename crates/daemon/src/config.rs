//! Daemon configuration
//!
//! A TOML file defines daemon settings and the job table; environment
//! variables layered on top with the `CRONVISOR` prefix win over the
//! file. A file that cannot be read or parsed at all is fatal; a
//! malformed job entry only skips that job at registration time.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

use cronvisor_core::domain::JobConfig;

pub const DEFAULT_CONFIG_PATH: &str = "cronvisor.toml";

fn default_rpc_host() -> String {
    "127.0.0.1".to_string()
}

fn default_rpc_port() -> u16 {
    9611
}

fn default_watchdog_interval_ms() -> u64 {
    1000
}

/// Format of the daemon's own log output
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DaemonSection {
    #[serde(default = "default_rpc_host")]
    pub rpc_host: String,
    #[serde(default = "default_rpc_port")]
    pub rpc_port: u16,
    #[serde(default = "default_watchdog_interval_ms")]
    pub watchdog_interval_ms: u64,
    #[serde(default)]
    pub log_format: LogFormat,
    /// When set, the daemon's own log also goes to this file
    pub log_file: Option<String>,
}

impl Default for DaemonSection {
    fn default() -> Self {
        Self {
            rpc_host: default_rpc_host(),
            rpc_port: default_rpc_port(),
            watchdog_interval_ms: default_watchdog_interval_ms(),
            log_format: LogFormat::default(),
            log_file: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DaemonConfig {
    #[serde(default)]
    pub daemon: DaemonSection,
    #[serde(default)]
    pub jobs: Vec<JobConfig>,
}

/// Load the config file with environment layering.
pub fn load(path: &str) -> Result<DaemonConfig> {
    let expanded = shellexpand::tilde(path);
    let settings = config::Config::builder()
        .add_source(config::File::from(Path::new(expanded.as_ref())))
        .add_source(config::Environment::with_prefix("CRONVISOR").separator("__"))
        .build()
        .with_context(|| format!("failed to read config {}", expanded))?;
    settings
        .try_deserialize()
        .with_context(|| format!("failed to parse config {}", expanded))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn minimal_file_gets_defaults() {
        let file = write_config("");
        let cfg = load(file.path().to_str().unwrap()).unwrap();
        assert_eq!(cfg.daemon.rpc_port, 9611);
        assert_eq!(cfg.daemon.watchdog_interval_ms, 1000);
        assert_eq!(cfg.daemon.log_format, LogFormat::Pretty);
        assert!(cfg.jobs.is_empty());
    }

    #[test]
    fn full_job_table_parses() {
        let file = write_config(
            r#"
[daemon]
rpc_port = 9700
log_format = "json"

[[jobs]]
name = "collector"
script = "main.py"
interpreter = "python3"
cron = "0 2 * * *"
max_memory = "500M"
autorestart = false
out_file = "logs/collector-out.log"
error_file = "logs/collector-error.log"
log_file = "logs/collector.log"

[jobs.env]
NODE_ENV = "production"

[[jobs]]
name = "oneshot"
script = "backfill.sh"
"#,
        );
        let cfg = load(file.path().to_str().unwrap()).unwrap();
        assert_eq!(cfg.daemon.rpc_port, 9700);
        assert_eq!(cfg.daemon.log_format, LogFormat::Json);
        assert_eq!(cfg.jobs.len(), 2);

        let spec = cfg.jobs[0].clone().validate().unwrap();
        assert_eq!(spec.name, "collector");
        assert_eq!(spec.env.len(), 1);
        assert!(spec.env.values().any(|v| v == "production"));
        assert!(spec.is_repeating());

        let oneshot = cfg.jobs[1].clone().validate().unwrap();
        assert!(!oneshot.is_repeating());
    }

    #[test]
    fn missing_file_is_fatal() {
        assert!(load("/nonexistent/cronvisor.toml").is_err());
    }

    #[test]
    fn malformed_job_fails_only_at_validation() {
        // The file parses; the bad cron surfaces per job.
        let file = write_config(
            r#"
[[jobs]]
name = "bad"
script = "x.sh"
cron = "* * *"

[[jobs]]
name = "good"
script = "y.sh"
"#,
        );
        let cfg = load(file.path().to_str().unwrap()).unwrap();
        assert!(cfg.jobs[0].clone().validate().is_err());
        assert!(cfg.jobs[1].clone().validate().is_ok());
    }
}
