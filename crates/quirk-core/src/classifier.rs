//! Classification of captured interpreter text
//!
//! The interpreter has a single structured signal: a `(line N)` marker in its
//! error text. Anything else it prints, including error-shaped messages with no
//! marker, is ordinary output.

use crate::errors::ExecutionError;
use crate::outcome::ExecutionOutcome;
use crate::process::ProcessOutcomeTag;
use once_cell::sync::Lazy;
use regex::Regex;

static LINE_MARKER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\(line\s+(\d+)\)").expect("line marker pattern is valid")
});

/// Line number from the first `(line N)` marker whose number fits in a `u32`.
pub fn find_error_line(text: &str) -> Option<u32> {
    LINE_MARKER
        .captures_iter(text)
        .find_map(|caps| caps.get(1).and_then(|m| m.as_str().parse::<u32>().ok()))
}

/// Turn a process run into the outcome reported to the client.
pub fn classify(captured: &str, tag: &ProcessOutcomeTag) -> ExecutionOutcome {
    match tag {
        ProcessOutcomeTag::TimedOut { deadline } => {
            ExecutionOutcome::failure(ExecutionError::TimedOut {
                deadline: *deadline,
            })
        }
        ProcessOutcomeTag::SpawnFailed { reason } => {
            ExecutionOutcome::failure(ExecutionError::SpawnFailed(reason.clone()))
        }
        ProcessOutcomeTag::Killed { reason } => {
            ExecutionOutcome::failure(ExecutionError::Killed(reason.clone()))
        }
        ProcessOutcomeTag::Completed { .. } => match find_error_line(captured) {
            Some(line) => ExecutionOutcome::PositionedError {
                message: captured.to_string(),
                line,
            },
            None => ExecutionOutcome::Output {
                text: captured.to_string(),
            },
        },
    }
}
