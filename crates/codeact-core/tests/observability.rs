//! Tracing and metrics emitted around evaluations.

use std::sync::Arc;

use codeact_core::metrics::METRICS;
use codeact_core::obs::{
    emit_deadline_exceeded, emit_evaluation_finished, emit_evaluation_started,
    emit_policy_violation, emit_tool_invoked, snippet_digest, EvaluationSpan,
};
use codeact_core::{execute_snippet, ErrorKind, FnTool, Tool, ToolSpec, Value, ValueType};
use tracing_test::traced_test;

#[traced_test]
#[test]
fn test_emitters_run_inside_an_evaluation_span() {
    let _span = EvaluationSpan::enter("eval-1", &snippet_digest("1 + 1"));
    emit_evaluation_started("eval-1", 2, 1);
    emit_tool_invoked("search", true);
    emit_policy_violation("eval-1", ErrorKind::ImportBlocked, "Import of os is not allowed.");
    emit_evaluation_finished("eval-1", 3, 17, Some(ErrorKind::ImportBlocked));
    emit_deadline_exceeded("eval-1", 500);
}

#[traced_test]
#[test]
fn test_evaluation_updates_counters() {
    let evaluations = METRICS.evaluations();
    let failures = METRICS.failures();
    let violations = METRICS.policy_violations();
    let tool_calls = METRICS.tool_calls();

    let echo: Arc<dyn Tool> = Arc::new(FnTool::new(
        ToolSpec::new("echo", "Echo", ValueType::Any).with_input("v", ValueType::Any, "value"),
        |args| Ok(args["v"].clone()),
    ));
    assert!(execute_snippet("echo(1)", &[echo], &[]).is_success());
    assert!(!execute_snippet("import os", &[], &[]).is_success());

    // Counters are process-wide and other tests run concurrently.
    assert!(METRICS.evaluations() >= evaluations + 2);
    assert!(METRICS.failures() > failures);
    assert!(METRICS.policy_violations() > violations);
    assert!(METRICS.tool_calls() > tool_calls);
    METRICS.flush();
}

#[traced_test]
#[test]
fn test_snippet_text_is_not_needed_to_correlate() {
    let code = "secret = 'hunter2'\nsecret";
    let result = execute_snippet(code, &[], &[]);
    assert_eq!(result.value, Some(Value::from("hunter2")));
    assert_eq!(snippet_digest(code), snippet_digest(code));
    assert!(!snippet_digest(code).contains("hunter2"));
}
