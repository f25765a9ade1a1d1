// Job specification: raw config in, validated immutable spec out

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::domain::cron::CronSchedule;
use crate::domain::memory::MemoryLimit;
use crate::domain::ConfigError;

/// Grace period between SIGTERM and SIGKILL when no override is set (5s)
pub const DEFAULT_KILL_TIMEOUT_MS: u64 = 5000;

fn default_instances() -> u32 {
    1
}

fn default_kill_timeout_ms() -> u64 {
    DEFAULT_KILL_TIMEOUT_MS
}

/// Raw per-job configuration as it appears in the config file.
///
/// Everything is optional at this layer so one malformed entry reports a
/// proper `ConfigError` from [`JobConfig::validate`] instead of failing
/// the whole file; only required fields are checked there.
#[derive(Debug, Clone, Deserialize)]
pub struct JobConfig {
    pub name: Option<String>,
    pub script: Option<String>,
    pub interpreter: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    pub cwd: Option<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// 5-field cron expression; absent means one-shot mode
    #[serde(alias = "cron_expression")]
    pub cron: Option<String>,
    /// Human-readable size, e.g. "500M" (1024-based K/M/G)
    pub max_memory: Option<String>,
    #[serde(default)]
    pub autorestart: bool,
    pub max_restarts: Option<u32>,
    #[serde(default = "default_instances")]
    pub instances: u32,
    #[serde(default = "default_kill_timeout_ms")]
    pub kill_timeout_ms: u64,
    pub out_file: Option<String>,
    pub error_file: Option<String>,
    pub log_file: Option<String>,
}

impl Default for JobConfig {
    /// Matches the serde defaults, so a programmatic config starts from
    /// the same baseline as an empty file entry.
    fn default() -> Self {
        Self {
            name: None,
            script: None,
            interpreter: None,
            args: Vec::new(),
            cwd: None,
            env: HashMap::new(),
            cron: None,
            max_memory: None,
            autorestart: false,
            max_restarts: None,
            instances: default_instances(),
            kill_timeout_ms: default_kill_timeout_ms(),
            out_file: None,
            error_file: None,
            log_file: None,
        }
    }
}

impl JobConfig {
    /// Validate into an immutable [`JobSpec`].
    pub fn validate(self) -> Result<JobSpec, ConfigError> {
        let name = match self.name {
            Some(n) if !n.trim().is_empty() => n,
            _ => return Err(ConfigError::MissingField("name")),
        };
        let script = match self.script {
            Some(s) if !s.trim().is_empty() => PathBuf::from(s),
            _ => return Err(ConfigError::MissingField("script")),
        };
        if self.instances != 1 {
            return Err(ConfigError::InvalidInstances(self.instances));
        }
        if self.kill_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "kill_timeout_ms",
                reason: "must be positive".to_string(),
            });
        }

        let cron = self.cron.as_deref().map(CronSchedule::parse).transpose()?;
        let max_memory = self
            .max_memory
            .as_deref()
            .map(str::parse::<MemoryLimit>)
            .transpose()?;

        let out_file = self
            .out_file
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(format!("logs/{}-out.log", name)));
        let error_file = self
            .error_file
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(format!("logs/{}-error.log", name)));
        let log_file = self
            .log_file
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(format!("logs/{}.log", name)));

        Ok(JobSpec {
            name,
            script,
            interpreter: self.interpreter,
            args: self.args,
            cwd: self.cwd.map(PathBuf::from),
            env: self.env,
            cron,
            max_memory,
            autorestart: self.autorestart,
            max_restarts: self.max_restarts,
            kill_timeout: Duration::from_millis(self.kill_timeout_ms),
            out_file,
            error_file,
            log_file,
        })
    }
}

/// Validated job specification.
///
/// Immutable once built; the registry hands it out behind an `Arc`.
#[derive(Debug, Clone)]
pub struct JobSpec {
    pub name: String,
    pub script: PathBuf,
    /// When set, the command is `interpreter script args...` (PM2 style);
    /// otherwise the script is executed directly.
    pub interpreter: Option<String>,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: HashMap<String, String>,
    /// None means one-shot mode
    pub cron: Option<CronSchedule>,
    pub max_memory: Option<MemoryLimit>,
    pub autorestart: bool,
    /// Upper bound on same-cycle crash respawns; None is unbounded
    pub max_restarts: Option<u32>,
    /// Grace period for SIGTERM before SIGKILL
    pub kill_timeout: Duration,
    pub out_file: PathBuf,
    pub error_file: PathBuf,
    pub log_file: PathBuf,
}

impl JobSpec {
    pub fn is_repeating(&self) -> bool {
        self.cron.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal() -> JobConfig {
        JobConfig {
            name: Some("collector".to_string()),
            script: Some("main.py".to_string()),
            ..JobConfig::default()
        }
    }

    #[test]
    fn minimal_config_validates_with_defaults() {
        let spec = minimal().validate().unwrap();
        assert_eq!(spec.name, "collector");
        assert!(!spec.is_repeating());
        assert!(!spec.autorestart);
        assert_eq!(spec.kill_timeout, Duration::from_millis(5000));
        assert_eq!(spec.out_file, PathBuf::from("logs/collector-out.log"));
        assert_eq!(spec.error_file, PathBuf::from("logs/collector-error.log"));
        assert_eq!(spec.log_file, PathBuf::from("logs/collector.log"));
    }

    #[test]
    fn missing_name_is_config_error() {
        let cfg = JobConfig {
            script: Some("main.py".to_string()),
            ..JobConfig::default()
        };
        assert_eq!(cfg.validate().unwrap_err(), ConfigError::MissingField("name"));
    }

    #[test]
    fn missing_script_is_config_error() {
        let cfg = JobConfig {
            name: Some("x".to_string()),
            ..JobConfig::default()
        };
        assert_eq!(cfg.validate().unwrap_err(), ConfigError::MissingField("script"));
    }

    #[test]
    fn wrong_field_count_cron_is_config_error() {
        let mut cfg = minimal();
        cfg.cron = Some("* * *".to_string());
        assert!(matches!(
            cfg.validate().unwrap_err(),
            ConfigError::InvalidCronExpression { .. }
        ));
    }

    #[test]
    fn bad_memory_size_is_config_error() {
        let mut cfg = minimal();
        cfg.max_memory = Some("lots".to_string());
        assert!(matches!(
            cfg.validate().unwrap_err(),
            ConfigError::InvalidMemorySize(_)
        ));
    }

    #[test]
    fn more_than_one_instance_is_rejected() {
        let mut cfg = minimal();
        cfg.instances = 2;
        assert_eq!(cfg.validate().unwrap_err(), ConfigError::InvalidInstances(2));
    }

    #[test]
    fn full_config_round_trip() {
        let mut cfg = minimal();
        cfg.interpreter = Some("python3".to_string());
        cfg.cron = Some("0 2 * * *".to_string());
        cfg.max_memory = Some("500M".to_string());
        cfg.autorestart = true;
        cfg.max_restarts = Some(3);
        let spec = cfg.validate().unwrap();
        assert!(spec.is_repeating());
        assert_eq!(spec.cron.as_ref().unwrap().expr(), "0 2 * * *");
        assert_eq!(spec.max_memory.unwrap().bytes(), 524_288_000);
        assert_eq!(spec.max_restarts, Some(3));
    }
}
