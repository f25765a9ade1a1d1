// Domain Error Types

use thiserror::Error;

/// Errors raised by domain entities themselves
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    #[error("Invalid state transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },
}

/// Errors raised while validating a job's configuration.
///
/// A ConfigError is fatal only for the job being registered; the rest of
/// the registry stays operative.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Invalid cron expression {expr:?}: {reason}")]
    InvalidCronExpression { expr: String, reason: String },

    #[error("Invalid memory size {0:?}: expected digits with optional K/M/G suffix")]
    InvalidMemorySize(String),

    #[error("Invalid instances value {0}: exactly 1 instance is supported")]
    InvalidInstances(u32),

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

pub type Result<T> = std::result::Result<T, DomainError>;
