//! Request, outcome and wire response types

use crate::errors::ExecutionError;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One admitted submission. The id namespaces its workspace artifact.
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    submission_id: Uuid,
    source: String,
}

impl ExecutionRequest {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            submission_id: Uuid::new_v4(),
            source: source.into(),
        }
    }

    pub fn submission_id(&self) -> Uuid {
        self.submission_id
    }

    pub fn source(&self) -> &str {
        &self.source
    }
}

/// Final result of a submission, produced exactly once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExecutionOutcome {
    Output { text: String },
    PositionedError { message: String, line: u32 },
    SystemFailure { reason: ExecutionError },
}

impl ExecutionOutcome {
    pub fn failure(reason: ExecutionError) -> Self {
        ExecutionOutcome::SystemFailure { reason }
    }

    pub fn is_output(&self) -> bool {
        matches!(self, ExecutionOutcome::Output { .. })
    }

    /// Short label used in logs.
    pub fn label(&self) -> &'static str {
        match self {
            ExecutionOutcome::Output { .. } => "output",
            ExecutionOutcome::PositionedError { .. } => "positioned_error",
            ExecutionOutcome::SystemFailure { reason } => reason.kind(),
        }
    }

    pub fn into_response(self) -> RunResponse {
        match self {
            ExecutionOutcome::Output { text } => RunResponse::Output { output: text },
            ExecutionOutcome::PositionedError { message, line } => RunResponse::Error {
                error: true,
                message,
                line: Some(line),
                kind: None,
            },
            ExecutionOutcome::SystemFailure { reason } => RunResponse::Error {
                error: true,
                message: reason.to_string(),
                line: None,
                kind: Some(reason.kind().to_string()),
            },
        }
    }
}

/// Body of a run request. A missing `code` field is an empty program.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunRequest {
    #[serde(default)]
    pub code: String,
}

/// Body of a run response as the editor consumes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RunResponse {
    Output {
        output: String,
    },
    Error {
        error: bool,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        line: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        kind: Option<String>,
    },
}

impl From<ExecutionOutcome> for RunResponse {
    fn from(outcome: ExecutionOutcome) -> Self {
        outcome.into_response()
    }
}
