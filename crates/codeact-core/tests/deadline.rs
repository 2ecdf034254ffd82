//! Wall-clock deadlines around an evaluation.

use std::sync::Arc;
use std::time::Duration;

use codeact_core::{ErrorKind, EvaluatorConfig, Phase, Sandbox, SessionState, Value};

#[tokio::test]
async fn test_fast_snippet_finishes_within_deadline() {
    let sandbox = Arc::new(Sandbox::default());
    let result = sandbox
        .execute_with_deadline(
            "sum(range(10))".to_string(),
            Vec::new(),
            Vec::new(),
            Duration::from_secs(5),
        )
        .await;
    assert_eq!(result.value, Some(Value::Int(45)));
}

#[tokio::test]
async fn test_runaway_snippet_is_cancelled_at_deadline() {
    let config = EvaluatorConfig::default()
        .with_max_operations(u64::MAX)
        .with_max_while_iterations(u64::MAX);
    let sandbox = Arc::new(Sandbox::default().with_config(config));

    let result = sandbox
        .execute_with_deadline(
            "n = 0\nwhile True:\n    n += 1".to_string(),
            Vec::new(),
            Vec::new(),
            Duration::from_millis(100),
        )
        .await;

    assert_eq!(result.phase, Phase::Failed);
    let error = result.error.unwrap();
    assert_eq!(error.kind, ErrorKind::RuntimeFault);
    assert!(error.message.contains("did not finish within 100 ms"));
}

#[tokio::test]
async fn test_sleep_is_interrupted_by_cancellation() {
    let sandbox = Arc::new(Sandbox::default());
    let started = std::time::Instant::now();
    let result = sandbox
        .execute_with_deadline(
            "import time\ntime.sleep(30)".to_string(),
            Vec::new(),
            Vec::new(),
            Duration::from_millis(50),
        )
        .await;
    assert!(result.error.is_some());
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn test_deadline_respects_authorized_imports() {
    let sandbox = Arc::new(Sandbox::default());
    let result = sandbox
        .execute_with_deadline(
            "import json\njson.dumps(True)".to_string(),
            Vec::new(),
            vec!["json".to_string()],
            Duration::from_secs(5),
        )
        .await;
    assert_eq!(result.value, Some(Value::from("true")));
}

#[tokio::test]
async fn test_session_survives_deadline_expiry() {
    let sandbox = Arc::new(Sandbox::default());
    let mut session = SessionState::new();
    session.insert("kept", Value::Int(1));

    let (result, session) = Arc::clone(&sandbox)
        .execute_in_session_with_deadline(
            "kept = 2\nwhile True:\n    pass".to_string(),
            Vec::new(),
            Vec::new(),
            session,
            Duration::from_millis(50),
        )
        .await;
    assert!(result.error.is_some());
    assert_eq!(session.get("kept"), Some(&Value::Int(1)));

    let (result, session) = sandbox
        .execute_in_session_with_deadline(
            "kept += 10".to_string(),
            Vec::new(),
            Vec::new(),
            session,
            Duration::from_secs(5),
        )
        .await;
    assert!(result.is_success());
    assert_eq!(session.get("kept"), Some(&Value::Int(11)));
}
