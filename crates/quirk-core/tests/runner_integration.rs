#![cfg(unix)]

mod common;

use common::build_runner;
use futures_util::future::join_all;
use quirk_core::{
    CodeExecutor, ExecutionError, ExecutionOutcome, ExecutionRequest, OverloadPolicy, RunResponse,
};
use serde_json::json;
use std::time::{Duration, Instant};
use uuid::Uuid;

async fn wait_until_running(runner: &quirk_core::CodeRunner, expected: usize) {
    for _ in 0..400 {
        if runner.stats().running == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("runner never reached {} running submissions", expected);
}

#[tokio::test]
async fn test_well_behaved_program_returns_output() {
    let t = build_runner(|c| c);

    let outcome = t.runner.execute_code("print 1\nprint 2").await;

    assert_eq!(
        serde_json::to_value(outcome.into_response()).unwrap(),
        json!({ "output": "1\n2" })
    );
    assert_eq!(t.scratch_entries(), 0);
}

#[tokio::test]
async fn test_line_marker_becomes_positioned_error() {
    let t = build_runner(|c| c);

    let outcome = t
        .runner
        .execute_code("print ignored\nraise Undefined variable x (line 3)")
        .await;

    assert_eq!(
        outcome,
        ExecutionOutcome::PositionedError {
            message: "ignored\nUndefined variable x (line 3)".to_string(),
            line: 3
        }
    );
    assert_eq!(t.scratch_entries(), 0);
}

#[tokio::test]
async fn test_error_response_matches_editor_contract() {
    let t = build_runner(|c| c);

    let response: RunResponse = t
        .runner
        .execute_code("raise Undefined variable x (line 3)")
        .await
        .into();

    assert_eq!(
        serde_json::to_value(response).unwrap(),
        json!({ "error": true, "message": "Undefined variable x (line 3)", "line": 3 })
    );
}

#[tokio::test]
async fn test_error_without_marker_is_plain_output() {
    let t = build_runner(|c| c);

    let outcome = t.runner.execute_code("raise Internal Error: Unexpected failure.").await;

    assert_eq!(
        outcome,
        ExecutionOutcome::Output {
            text: "Internal Error: Unexpected failure.".to_string()
        }
    );
}

#[tokio::test]
async fn test_silent_program_returns_empty_output() {
    let t = build_runner(|c| c);
    let outcome = t.runner.execute_code("let x = 1").await;
    assert_eq!(outcome, ExecutionOutcome::Output { text: String::new() });
}

#[tokio::test]
async fn test_missing_interpreter_is_system_failure_without_line() {
    let t = build_runner(|c| c.with_interpreter("/nonexistent/bin/quirk", vec![]));

    let outcome = t.runner.execute_code("print 1").await;

    match &outcome {
        ExecutionOutcome::SystemFailure {
            reason: ExecutionError::SpawnFailed(reason),
        } => assert!(reason.contains("/nonexistent/bin/quirk")),
        other => panic!("expected spawn failure, got {:?}", other),
    }
    let value = serde_json::to_value(outcome.into_response()).unwrap();
    assert_eq!(value["error"], true);
    assert!(value.get("line").is_none());
    assert_eq!(t.scratch_entries(), 0);
}

#[tokio::test]
async fn test_deadline_is_enforced_and_partial_output_dropped() {
    let deadline = Duration::from_millis(400);
    let t = build_runner(|c| c.with_deadline(deadline));

    let start = Instant::now();
    let outcome = t.runner.execute_code("print partial\nsleep 10\nprint done").await;
    let elapsed = start.elapsed();

    assert_eq!(
        outcome,
        ExecutionOutcome::SystemFailure {
            reason: ExecutionError::TimedOut { deadline }
        }
    );
    assert!(
        elapsed < deadline + Duration::from_millis(1500),
        "deadline overshoot too large: {:?}",
        elapsed
    );
    assert_eq!(t.scratch_entries(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_submissions_stay_isolated() {
    let t = build_runner(|c| c);

    let payloads: Vec<String> = (0..60)
        .map(|i| format!("payload-{}-{}", i, Uuid::new_v4()))
        .collect();

    let outcomes = join_all(payloads.iter().map(|payload| {
        let runner = t.runner.clone();
        let code = format!("print {}\nprint {}", payload, payload.len());
        async move { runner.submit(ExecutionRequest::new(code)).await }
    }))
    .await;

    for (payload, outcome) in payloads.iter().zip(outcomes) {
        assert_eq!(
            outcome,
            ExecutionOutcome::Output {
                text: format!("{}\n{}", payload, payload.len())
            }
        );
    }
    assert_eq!(t.scratch_entries(), 0);
    assert_eq!(t.runner.stats().running, 0);
    assert_eq!(t.runner.stats().queued, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_reject_policy_reports_overload() {
    let t = build_runner(|c| {
        c.with_max_concurrent(1)
            .with_overload_policy(OverloadPolicy::Reject, 0)
    });

    let busy = {
        let runner = t.runner.clone();
        tokio::spawn(async move { runner.execute_code("sleep 1\nprint slow").await })
    };
    wait_until_running(&t.runner, 1).await;

    let rejected = t.runner.execute_code("print 1").await;
    assert_eq!(rejected, ExecutionOutcome::failure(ExecutionError::Overloaded));
    assert_eq!(
        serde_json::to_value(rejected.into_response()).unwrap()["kind"],
        "overloaded"
    );

    assert_eq!(
        busy.await.unwrap(),
        ExecutionOutcome::Output {
            text: "slow".to_string()
        }
    );
    // Capacity is back once the slow run finished
    assert!(t.runner.execute_code("print 2").await.is_output());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_full_queue_reports_overload() {
    let t = build_runner(|c| {
        c.with_max_concurrent(1)
            .with_overload_policy(OverloadPolicy::Queue, 1)
    });

    let running = {
        let runner = t.runner.clone();
        tokio::spawn(async move { runner.execute_code("sleep 1\nprint first").await })
    };
    wait_until_running(&t.runner, 1).await;

    let queued = {
        let runner = t.runner.clone();
        tokio::spawn(async move { runner.execute_code("print second").await })
    };
    for _ in 0..400 {
        if t.runner.stats().queued == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(t.runner.stats().queued, 1);

    let overflow = t.runner.execute_code("print third").await;
    assert_eq!(overflow, ExecutionOutcome::failure(ExecutionError::Overloaded));

    assert!(running.await.unwrap().is_output());
    assert_eq!(
        queued.await.unwrap(),
        ExecutionOutcome::Output {
            text: "second".to_string()
        }
    );
}

#[tokio::test]
async fn test_runner_keeps_serving_after_failures() {
    let t = build_runner(|c| c.with_deadline(Duration::from_millis(200)));

    for _ in 0..5 {
        let outcome = t.runner.execute_code("sleep 5").await;
        assert!(matches!(
            outcome,
            ExecutionOutcome::SystemFailure {
                reason: ExecutionError::TimedOut { .. }
            }
        ));
    }
    for _ in 0..5 {
        let outcome = t.runner.execute_code("raise boom (line 1)").await;
        assert!(matches!(outcome, ExecutionOutcome::PositionedError { line: 1, .. }));
    }

    assert_eq!(
        t.runner.execute_code("print still alive").await,
        ExecutionOutcome::Output {
            text: "still alive".to_string()
        }
    );
    assert_eq!(t.runner.stats().running, 0);
    assert_eq!(t.scratch_entries(), 0);
}

#[tokio::test]
async fn test_unwritable_scratch_dir_is_io_failure() {
    let t = build_runner(|c| c);
    let blocker = t.scratch.with_file_name("blocked");
    std::fs::write(&blocker, "not a directory").unwrap();

    let runner = quirk_core::CodeRunner::new(
        &quirk_core::RunnerConfig::default()
            .with_interpreter("/bin/true", vec![])
            .with_scratch_dir(blocker.join("runs")),
    )
    .unwrap();

    let outcome = runner.execute_code("print 1").await;
    assert!(matches!(
        outcome,
        ExecutionOutcome::SystemFailure {
            reason: ExecutionError::Io(_)
        }
    ));
}
