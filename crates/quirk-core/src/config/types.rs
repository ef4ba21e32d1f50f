//! Configuration type definitions for the runner
//!
//! Every field has a default so an empty YAML document (or no file at all)
//! yields a working setup that invokes `python -m quirk.cli run <file>` from
//! the current directory with a five second deadline and four concurrent
//! interpreter processes.

use crate::errors::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct QuirkConfig {
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(flatten)]
    pub runner: RunnerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RunnerConfig {
    #[serde(default)]
    pub interpreter: InterpreterConfig,
    #[serde(default)]
    pub workspace: WorkspaceConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub admission: AdmissionConfig,
}

/// How the external interpreter is launched. The artifact path is always
/// appended after `args` as the final positional argument.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterpreterConfig {
    #[serde(default = "default_program")]
    pub program: String,
    #[serde(default = "default_args")]
    pub args: Vec<String>,
    /// Project root the interpreter runs from. Resolved to the current
    /// directory when the runner is built if left unset.
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
    #[serde(default)]
    pub env: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceConfig {
    /// Directory holding per-submission source artifacts.
    #[serde(default)]
    pub scratch_dir: Option<PathBuf>,
    #[serde(default = "default_file_prefix")]
    pub file_prefix: String,
    #[serde(default = "default_extension")]
    pub extension: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    #[serde(default = "default_deadline_ms")]
    pub deadline_ms: u64,
    #[serde(default = "default_max_source_bytes")]
    pub max_source_bytes: usize,
    #[serde(default = "default_max_output_bytes")]
    pub max_output_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdmissionConfig {
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    #[serde(default)]
    pub overload_policy: OverloadPolicy,
    #[serde(default = "default_max_queue_depth")]
    pub max_queue_depth: usize,
}

/// What happens to a submission when every execution slot is busy.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum OverloadPolicy {
    /// Wait in a bounded FIFO queue for a slot.
    #[default]
    Queue,
    /// Fail immediately with `Overloaded`.
    Reject,
}

impl std::str::FromStr for OverloadPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "queue" => Ok(OverloadPolicy::Queue),
            "reject" => Ok(OverloadPolicy::Reject),
            other => Err(format!("unknown overload policy '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    #[serde(default = "default_true")]
    pub enable_cors: bool,
    #[serde(default = "default_true")]
    pub enable_logging: bool,
    #[serde(default = "default_max_body_size")]
    pub max_body_size: usize,
}

impl Default for InterpreterConfig {
    fn default() -> Self {
        Self {
            program: default_program(),
            args: default_args(),
            working_dir: None,
            env: HashMap::new(),
        }
    }
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            scratch_dir: None,
            file_prefix: default_file_prefix(),
            extension: default_extension(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            deadline_ms: default_deadline_ms(),
            max_source_bytes: default_max_source_bytes(),
            max_output_bytes: default_max_output_bytes(),
        }
    }
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            overload_policy: OverloadPolicy::default(),
            max_queue_depth: default_max_queue_depth(),
        }
    }
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            enable_cors: true,
            enable_logging: true,
            max_body_size: default_max_body_size(),
        }
    }
}

impl RunnerConfig {
    pub fn with_interpreter(mut self, program: impl Into<String>, args: Vec<String>) -> Self {
        self.interpreter.program = program.into();
        self.interpreter.args = args;
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.interpreter.working_dir = Some(dir.into());
        self
    }

    pub fn with_scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.workspace.scratch_dir = Some(dir.into());
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.limits.deadline_ms = deadline.as_millis() as u64;
        self
    }

    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.admission.max_concurrent = max_concurrent;
        self
    }

    pub fn with_overload_policy(mut self, policy: OverloadPolicy, max_queue_depth: usize) -> Self {
        self.admission.overload_policy = policy;
        self.admission.max_queue_depth = max_queue_depth;
        self
    }

    pub fn with_max_source_bytes(mut self, limit: usize) -> Self {
        self.limits.max_source_bytes = limit;
        self
    }

    pub fn with_max_output_bytes(mut self, limit: usize) -> Self {
        self.limits.max_output_bytes = limit;
        self
    }

    pub fn deadline(&self) -> Duration {
        Duration::from_millis(self.limits.deadline_ms)
    }

    pub fn scratch_dir(&self) -> PathBuf {
        self.workspace
            .scratch_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("quirk-runs"))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.interpreter.program.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "interpreter.program must not be empty".to_string(),
            ));
        }
        if self.limits.deadline_ms == 0 {
            return Err(ConfigError::Invalid(
                "limits.deadline_ms must be greater than zero".to_string(),
            ));
        }
        if self.limits.max_source_bytes == 0 || self.limits.max_output_bytes == 0 {
            return Err(ConfigError::Invalid(
                "limits.max_source_bytes and limits.max_output_bytes must be greater than zero"
                    .to_string(),
            ));
        }
        if self.admission.max_concurrent == 0 {
            return Err(ConfigError::Invalid(
                "admission.max_concurrent must be greater than zero".to_string(),
            ));
        }
        if self.workspace.extension.contains(['/', '\\'])
            || self.workspace.file_prefix.contains(['/', '\\'])
        {
            return Err(ConfigError::Invalid(
                "workspace.file_prefix and workspace.extension must not contain path separators"
                    .to_string(),
            ));
        }
        Ok(())
    }
}

impl QuirkConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server.bind_addr.parse::<SocketAddr>().map_err(|e| {
            ConfigError::Invalid(format!(
                "server.bind_addr '{}' is not a socket address: {}",
                self.server.bind_addr, e
            ))
        })?;
        self.runner.validate()
    }
}

fn default_program() -> String {
    "python".to_string()
}

fn default_args() -> Vec<String> {
    vec!["-m".to_string(), "quirk.cli".to_string(), "run".to_string()]
}

fn default_file_prefix() -> String {
    "submission-".to_string()
}

fn default_extension() -> String {
    "qk".to_string()
}

fn default_deadline_ms() -> u64 {
    5000
}

fn default_max_source_bytes() -> usize {
    64 * 1024
}

fn default_max_output_bytes() -> usize {
    1024 * 1024
}

fn default_max_concurrent() -> usize {
    4
}

fn default_max_queue_depth() -> usize {
    16
}

fn default_bind_addr() -> String {
    "127.0.0.1:5000".to_string()
}

fn default_max_body_size() -> usize {
    1024 * 1024
}

fn default_true() -> bool {
    true
}
