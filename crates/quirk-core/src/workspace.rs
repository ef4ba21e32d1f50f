//! Per-submission source artifacts
//!
//! Each submission gets its own file under the scratch directory, named after
//! its submission id and created with exclusive-create semantics, so two live
//! requests can never read or overwrite each other's source. The returned
//! [`WorkspaceHandle`] owns that file: releasing it deletes the file, and the
//! same release runs from `Drop`, so the artifact is removed on every exit
//! path including early returns, panics and cancelled futures.

use crate::config::RunnerConfig;
use crate::errors::ExecutionError;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct WorkspaceManager {
    scratch_dir: PathBuf,
    file_prefix: String,
    extension: String,
}

impl WorkspaceManager {
    pub fn new(scratch_dir: impl Into<PathBuf>) -> Self {
        Self {
            scratch_dir: scratch_dir.into(),
            file_prefix: "submission-".to_string(),
            extension: "qk".to_string(),
        }
    }

    pub fn from_config(config: &RunnerConfig) -> Self {
        Self {
            scratch_dir: config.scratch_dir(),
            file_prefix: config.workspace.file_prefix.clone(),
            extension: config.workspace.extension.clone(),
        }
    }

    pub fn scratch_dir(&self) -> &Path {
        &self.scratch_dir
    }

    /// Path the artifact for `submission_id` lives at.
    pub fn artifact_path(&self, submission_id: &Uuid) -> PathBuf {
        self.scratch_dir.join(format!(
            "{}{}.{}",
            self.file_prefix,
            submission_id.as_hyphenated(),
            self.extension
        ))
    }

    /// Write `source` to a fresh artifact owned by the returned handle.
    pub async fn acquire(
        &self,
        submission_id: Uuid,
        source: &str,
    ) -> Result<WorkspaceHandle, ExecutionError> {
        fs::create_dir_all(&self.scratch_dir).await.map_err(|e| {
            ExecutionError::Io(format!(
                "could not create scratch directory {}: {}",
                self.scratch_dir.display(),
                e
            ))
        })?;

        let path = self.artifact_path(&submission_id);
        let mut options = fs::OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        options.mode(0o600);

        let mut file = options.open(&path).await.map_err(|e| {
            if e.kind() == ErrorKind::AlreadyExists {
                ExecutionError::Io(format!("artifact {} is already in use", path.display()))
            } else {
                ExecutionError::Io(format!("could not create {}: {}", path.display(), e))
            }
        })?;

        // From here on the handle owns the file, so a failed write still
        // removes whatever was partially written.
        let handle = WorkspaceHandle {
            submission_id,
            path,
            released: false,
        };

        file.write_all(source.as_bytes()).await.map_err(|e| {
            ExecutionError::Io(format!("could not write {}: {}", handle.path.display(), e))
        })?;
        file.flush().await.map_err(|e| {
            ExecutionError::Io(format!("could not flush {}: {}", handle.path.display(), e))
        })?;

        log::debug!(
            "Workspace {} ready at {} ({} bytes)",
            submission_id,
            handle.path.display(),
            source.len()
        );
        Ok(handle)
    }

    /// Delete the artifact behind `handle`. Safe to call more than once.
    pub async fn release(&self, handle: &mut WorkspaceHandle) {
        if handle.released {
            return;
        }
        handle.released = true;

        let result = fs::remove_file(&handle.path).await;
        handle.report_removal(result);
    }
}

/// Exclusive owner of one submission's source artifact.
#[derive(Debug)]
pub struct WorkspaceHandle {
    submission_id: Uuid,
    path: PathBuf,
    released: bool,
}

impl WorkspaceHandle {
    pub fn submission_id(&self) -> Uuid {
        self.submission_id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Best-effort blocking removal; failures are logged and never returned.
    /// Prefer [`WorkspaceManager::release`] from async code.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        let result = std::fs::remove_file(&self.path);
        self.report_removal(result);
    }

    fn report_removal(&self, result: std::io::Result<()>) {
        match result {
            Ok(()) => log::debug!("Workspace {} released", self.submission_id),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                log::debug!(
                    "Workspace {} artifact already gone: {}",
                    self.submission_id,
                    self.path.display()
                );
            }
            Err(e) => log::warn!(
                "Failed to remove workspace artifact {}: {}",
                self.path.display(),
                e
            ),
        }
    }
}

impl Drop for WorkspaceHandle {
    fn drop(&mut self) {
        self.release();
    }
}
