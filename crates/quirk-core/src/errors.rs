//! Error types for the execution core
//!
//! Every way a submission can fail to run as designed is captured by
//! [`ExecutionError`]. None of these are fatal to the service: the runner turns
//! each one into a `SystemFailure` outcome for the request that hit it, and the
//! next submission starts from clean state. Configuration problems are reported
//! separately through [`ConfigError`] because they surface at startup, not per
//! request.

use serde::{Serialize, Serializer};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExecutionError {
    #[error("Failed to prepare the program for execution: {0}")]
    Io(String),
    #[error("Failed to start the interpreter: {0}")]
    SpawnFailed(String),
    #[error("Execution timed out after {} ms", .deadline.as_millis())]
    TimedOut { deadline: Duration },
    #[error("Execution was aborted: {0}")]
    Killed(String),
    #[error("Server is busy, too many programs are running. Try again shortly.")]
    Overloaded,
    #[error("Program is too large ({size} bytes, limit is {limit} bytes)")]
    SourceTooLarge { size: usize, limit: usize },
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ExecutionError {
    /// Stable, machine-readable name of the failure kind.
    pub fn kind(&self) -> &'static str {
        match self {
            ExecutionError::Io(_) => "io",
            ExecutionError::SpawnFailed(_) => "spawn_failed",
            ExecutionError::TimedOut { .. } => "timed_out",
            ExecutionError::Killed(_) => "killed",
            ExecutionError::Overloaded => "overloaded",
            ExecutionError::SourceTooLarge { .. } => "source_too_large",
            ExecutionError::Internal(_) => "internal",
        }
    }
}

impl From<std::io::Error> for ExecutionError {
    fn from(err: std::io::Error) -> Self {
        ExecutionError::Io(err.to_string())
    }
}

impl From<tokio::task::JoinError> for ExecutionError {
    fn from(err: tokio::task::JoinError) -> Self {
        ExecutionError::Internal(err.to_string())
    }
}

impl Serialize for ExecutionError {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.kind())
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse YAML config: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid value for environment variable {name}: {value}")]
    InvalidEnv { name: String, value: String },
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
