//! The execution context tying admission, workspaces, process control and
//! classification together.
//!
//! A [`CodeRunner`] is built once from a [`RunnerConfig`] and cloned cheaply
//! into whatever serves requests. It holds every piece of shared state the
//! core needs, so tests can build a fresh one each time.

use crate::admission::{AdmissionController, AdmissionStats};
use crate::classifier::classify;
use crate::config::RunnerConfig;
use crate::errors::{ConfigError, ExecutionError};
use crate::outcome::{ExecutionOutcome, ExecutionRequest};
use crate::process::ProcessOrchestrator;
use crate::workspace::WorkspaceManager;
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Seam between a transport and whatever actually runs code.
#[async_trait]
pub trait CodeExecutor: Send + Sync {
    async fn execute_code(&self, code: &str) -> ExecutionOutcome;

    /// Current load, if the executor tracks it.
    fn admission_stats(&self) -> Option<AdmissionStats> {
        None
    }
}

#[derive(Clone)]
pub struct CodeRunner {
    inner: Arc<RunnerInner>,
}

struct RunnerInner {
    workspaces: WorkspaceManager,
    orchestrator: ProcessOrchestrator,
    admission: AdmissionController,
    deadline: Duration,
    max_source_bytes: usize,
}

impl CodeRunner {
    pub fn new(config: &RunnerConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let orchestrator = ProcessOrchestrator::from_config(config)?;
        let workspaces = WorkspaceManager::from_config(config);

        log::info!(
            "Runner ready: interpreter '{}' in {}, scratch dir {}, deadline {:?}, {} slots ({:?} policy)",
            orchestrator.program(),
            orchestrator.working_dir().display(),
            workspaces.scratch_dir().display(),
            config.deadline(),
            config.admission.max_concurrent,
            config.admission.overload_policy,
        );

        Ok(Self {
            inner: Arc::new(RunnerInner {
                workspaces,
                orchestrator,
                admission: AdmissionController::from_config(&config.admission),
                deadline: config.deadline(),
                max_source_bytes: config.limits.max_source_bytes,
            }),
        })
    }

    pub fn scratch_dir(&self) -> &Path {
        self.inner.workspaces.scratch_dir()
    }

    pub fn stats(&self) -> AdmissionStats {
        self.inner.admission.stats()
    }

    /// Run one submission to its final outcome.
    ///
    /// Never fails: every problem along the way becomes a `SystemFailure`
    /// for this request only.
    pub async fn submit(&self, request: ExecutionRequest) -> ExecutionOutcome {
        let submission_id = request.submission_id();
        let size = request.source().len();
        if size > self.inner.max_source_bytes {
            log::warn!(
                "Submission {} refused: {} bytes exceeds limit of {}",
                submission_id,
                size,
                self.inner.max_source_bytes
            );
            return ExecutionOutcome::failure(ExecutionError::SourceTooLarge {
                size,
                limit: self.inner.max_source_bytes,
            });
        }

        let permit = match self.inner.admission.admit().await {
            Ok(permit) => permit,
            Err(e) => return ExecutionOutcome::failure(e),
        };

        // The run owns its slot and is detached from the caller, so a dropped
        // connection cannot cut it short and a panic stays inside this request.
        let start = Instant::now();
        let runner = self.clone();
        let task = tokio::spawn(async move {
            let outcome = runner.execute_admitted(&request).await;
            drop(permit);
            outcome
        });

        let outcome = match task.await {
            Ok(outcome) => outcome,
            Err(e) => {
                log::error!("Submission {} aborted: {}", submission_id, e);
                ExecutionOutcome::failure(e.into())
            }
        };

        log::info!(
            "Submission {} finished as {} in {:?}",
            submission_id,
            outcome.label(),
            start.elapsed()
        );
        outcome
    }

    async fn execute_admitted(&self, request: &ExecutionRequest) -> ExecutionOutcome {
        let mut workspace = match self
            .inner
            .workspaces
            .acquire(request.submission_id(), request.source())
            .await
        {
            Ok(workspace) => workspace,
            Err(e) => {
                log::error!(
                    "Submission {}: workspace setup failed: {}",
                    request.submission_id(),
                    e
                );
                return ExecutionOutcome::failure(e);
            }
        };

        let run = self
            .inner
            .orchestrator
            .run(&workspace, self.inner.deadline)
            .await;
        self.inner.workspaces.release(&mut workspace).await;

        log::debug!(
            "Submission {}: {:?} after {:?}, {} bytes captured",
            request.submission_id(),
            run.tag,
            run.elapsed,
            run.captured.len()
        );
        classify(&run.captured, &run.tag)
    }
}

#[async_trait]
impl CodeExecutor for CodeRunner {
    async fn execute_code(&self, code: &str) -> ExecutionOutcome {
        self.submit(ExecutionRequest::new(code)).await
    }

    fn admission_stats(&self) -> Option<AdmissionStats> {
        Some(self.stats())
    }
}
