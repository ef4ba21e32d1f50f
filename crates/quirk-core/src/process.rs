//! Interpreter process orchestration
//!
//! Runs the external interpreter against one workspace artifact, drains its
//! stdout and stderr into a single buffer in the order chunks arrive, and
//! enforces an absolute deadline measured from spawn. A run that misses the
//! deadline is killed and its partial output dropped.
//!
//! On unix the interpreter leads its own process group. Anything it forks is
//! killed with it at the deadline, and leftovers still holding the output
//! pipes are killed once the interpreter itself exits.

use crate::config::RunnerConfig;
use crate::errors::ConfigError;
use crate::workspace::WorkspaceHandle;
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::time::Instant;

const READ_CHUNK: usize = 8 * 1024;

/// Why an interpreter invocation ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcomeTag {
    /// The process exited on its own, with any exit code.
    Completed { exit_code: Option<i32> },
    /// The deadline passed and the process was killed.
    TimedOut { deadline: Duration },
    /// Waiting on the process failed and it was killed.
    Killed { reason: String },
    /// The process could not be started.
    SpawnFailed { reason: String },
}

impl ProcessOutcomeTag {
    pub fn completed() -> Self {
        ProcessOutcomeTag::Completed { exit_code: Some(0) }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, ProcessOutcomeTag::Completed { .. })
    }
}

/// Captured text and termination reason of one run.
#[derive(Debug, Clone)]
pub struct ProcessRun {
    pub captured: String,
    pub tag: ProcessOutcomeTag,
    pub elapsed: Duration,
}

/// One live interpreter invocation bound to a workspace.
struct ProcessHandle {
    child: Child,
    /// Pid of the interpreter, which is also its process group id.
    group: Option<u32>,
    started_at: Instant,
    deadline: Instant,
}

impl ProcessHandle {
    /// SIGKILL the whole process group and reap the interpreter.
    async fn terminate(&mut self) {
        kill_process_group(self.group);

        if let Ok(Some(_)) = self.child.try_wait() {
            return;
        }
        if let Err(e) = self.child.kill().await {
            log::warn!("Failed to kill interpreter process: {}", e);
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProcessOrchestrator {
    program: String,
    args: Vec<String>,
    working_dir: PathBuf,
    env: HashMap<String, String>,
    max_output_bytes: usize,
}

impl ProcessOrchestrator {
    pub fn new(program: impl Into<String>, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: working_dir.into(),
            env: HashMap::new(),
            max_output_bytes: 1024 * 1024,
        }
    }

    /// Build from config, pinning the working directory to an absolute path
    /// so later changes to the server's cwd do not affect runs.
    pub fn from_config(config: &RunnerConfig) -> Result<Self, ConfigError> {
        let cwd = std::env::current_dir().map_err(|e| {
            ConfigError::Invalid(format!("cannot determine current directory: {}", e))
        })?;
        let working_dir = match &config.interpreter.working_dir {
            Some(dir) if dir.is_absolute() => dir.clone(),
            Some(dir) => cwd.join(dir),
            None => cwd,
        };

        Ok(Self {
            program: config.interpreter.program.clone(),
            args: config.interpreter.args.clone(),
            working_dir,
            env: config.interpreter.env.clone(),
            max_output_bytes: config.limits.max_output_bytes,
        })
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn with_max_output_bytes(mut self, limit: usize) -> Self {
        self.max_output_bytes = limit;
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    fn command(&self, artifact: &Path) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .arg(artifact)
            .current_dir(&self.working_dir)
            .envs(&self.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);
        cmd
    }

    /// Run the interpreter on `workspace` and wait at most `deadline`.
    pub async fn run(&self, workspace: &WorkspaceHandle, deadline: Duration) -> ProcessRun {
        let submission_id = workspace.submission_id();
        let mut cmd = self.command(workspace.path());

        let started_at = Instant::now();
        let child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                let reason = describe_spawn_error(&self.program, &e);
                log::warn!("Submission {}: {}", submission_id, reason);
                return ProcessRun {
                    captured: String::new(),
                    tag: ProcessOutcomeTag::SpawnFailed { reason },
                    elapsed: started_at.elapsed(),
                };
            }
        };

        let group = child.id();
        let mut handle = ProcessHandle {
            child,
            group,
            started_at,
            deadline: started_at + deadline,
        };
        log::debug!(
            "Submission {}: spawned {} (pid {:?})",
            submission_id,
            self.program,
            handle.child.id()
        );

        let stdout = handle.child.stdout.take();
        let stderr = handle.child.stderr.take();
        let limit = self.max_output_bytes;
        let child = &mut handle.child;

        let result = tokio::time::timeout_at(handle.deadline, async move {
            let capture = capture_streams(stdout, stderr, limit);
            tokio::pin!(capture);

            tokio::select! {
                captured = &mut capture => {
                    let captured = captured?;
                    let status = child.wait().await?;
                    kill_process_group(group);
                    Ok::<(Vec<u8>, ExitStatus), io::Error>((captured, status))
                }
                status = child.wait() => {
                    let status = status?;
                    // Descendants may still hold the pipes open
                    kill_process_group(group);
                    let captured = capture.await?;
                    Ok::<(Vec<u8>, ExitStatus), io::Error>((captured, status))
                }
            }
        })
        .await;

        let (captured, tag) = match result {
            Ok(Ok((bytes, status))) => {
                log::debug!(
                    "Submission {}: interpreter exited with {}",
                    submission_id,
                    status
                );
                (
                    String::from_utf8_lossy(&bytes).trim().to_string(),
                    ProcessOutcomeTag::Completed {
                        exit_code: status.code(),
                    },
                )
            }
            Ok(Err(e)) => {
                log::error!(
                    "Submission {}: lost track of interpreter process: {}",
                    submission_id,
                    e
                );
                handle.terminate().await;
                (
                    String::new(),
                    ProcessOutcomeTag::Killed {
                        reason: e.to_string(),
                    },
                )
            }
            Err(_) => {
                log::warn!(
                    "Submission {}: deadline of {:?} exceeded, killing interpreter",
                    submission_id,
                    deadline
                );
                handle.terminate().await;
                (String::new(), ProcessOutcomeTag::TimedOut { deadline })
            }
        };

        ProcessRun {
            captured,
            tag,
            elapsed: handle.started_at.elapsed(),
        }
    }
}

#[cfg(unix)]
fn kill_process_group(group: Option<u32>) {
    use nix::errno::Errno;
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let Some(pgid) = group.and_then(|id| i32::try_from(id).ok()).filter(|id| *id > 0) else {
        return;
    };
    match killpg(Pid::from_raw(pgid), Signal::SIGKILL) {
        // ESRCH: every member is already gone
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(e) => log::warn!("Failed to kill process group {}: {}", pgid, e),
    }
}

#[cfg(not(unix))]
fn kill_process_group(_group: Option<u32>) {}

fn describe_spawn_error(program: &str, err: &io::Error) -> String {
    match err.kind() {
        io::ErrorKind::NotFound => format!("interpreter '{}' was not found", program),
        io::ErrorKind::PermissionDenied => {
            format!("permission denied when launching interpreter '{}'", program)
        }
        _ => format!("could not launch interpreter '{}': {}", program, err),
    }
}

/// Read both pipes until EOF, appending chunks in arrival order. Bytes past
/// `limit` are read and dropped so the child never blocks on a full pipe.
async fn capture_streams(
    mut stdout: Option<ChildStdout>,
    mut stderr: Option<ChildStderr>,
    limit: usize,
) -> io::Result<Vec<u8>> {
    let mut captured = Vec::new();
    let mut out_buf = vec![0u8; READ_CHUNK];
    let mut err_buf = vec![0u8; READ_CHUNK];
    let mut dropped = 0usize;

    while stdout.is_some() || stderr.is_some() {
        // Prefer stdout when both have data, matching stdout-then-stderr order
        let (n, from_stdout) = tokio::select! {
            biased;
            res = read_chunk(&mut stdout, &mut out_buf) => (res?, true),
            res = read_chunk(&mut stderr, &mut err_buf) => (res?, false),
        };

        if n == 0 {
            if from_stdout {
                stdout = None;
            } else {
                stderr = None;
            }
            continue;
        }

        let chunk = if from_stdout { &out_buf[..n] } else { &err_buf[..n] };
        let room = limit.saturating_sub(captured.len());
        if room >= chunk.len() {
            captured.extend_from_slice(chunk);
        } else {
            captured.extend_from_slice(&chunk[..room]);
            dropped += chunk.len() - room;
        }
    }

    if dropped > 0 {
        log::warn!(
            "Interpreter output exceeded {} bytes, {} bytes discarded",
            limit,
            dropped
        );
    }
    Ok(captured)
}

async fn read_chunk<R: AsyncRead + Unpin>(
    reader: &mut Option<R>,
    buf: &mut [u8],
) -> io::Result<usize> {
    match reader {
        Some(reader) => reader.read(buf).await,
        None => std::future::pending().await,
    }
}
