//! Execution core for running untrusted Quirk programs.
//!
//! A submission's source is written to its own artifact in a scratch
//! directory, handed to the external interpreter as a child process under a
//! wall-clock deadline, and the merged output is classified into plain output,
//! an error positioned at a source line, or a system failure. An admission
//! controller bounds how many interpreters run at once.
//!
//! # Components
//!
//! - [`workspace`]: per-submission source artifacts with guaranteed cleanup
//! - [`process`]: interpreter spawning, output capture and deadline kills
//! - [`classifier`]: pure mapping from captured text to an outcome
//! - [`admission`]: concurrency bound with queue or reject overload policy
//! - [`runner`]: the [`CodeRunner`] context that wires everything together
//! - [`config`]: YAML and environment driven settings

pub mod admission;
pub mod classifier;
pub mod config;
pub mod errors;
pub mod outcome;
pub mod process;
pub mod runner;
pub mod workspace;

pub use admission::{AdmissionController, AdmissionStats};
pub use classifier::classify;
pub use config::{ConfigLoader, OverloadPolicy, QuirkConfig, RunnerConfig};
pub use errors::{ConfigError, ExecutionError};
pub use outcome::{ExecutionOutcome, ExecutionRequest, RunRequest, RunResponse};
pub use process::{ProcessOrchestrator, ProcessOutcomeTag};
pub use runner::{CodeExecutor, CodeRunner};
pub use workspace::{WorkspaceHandle, WorkspaceManager};
