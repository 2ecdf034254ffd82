//! End-to-end evaluation scenarios and the guarantees every result keeps.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use codeact_core::{
    execute_snippet, render, ErrorKind, FnTool, ImageData, Phase, Rendered, Tool, ToolSpec, Value,
    ValueType,
};

fn cat_image_tool() -> Arc<dyn Tool> {
    Arc::new(FnTool::new(
        ToolSpec::new("get_cat_image", "Fetch a picture of a cat", ValueType::Image),
        |_| Ok(Value::from(ImageData::new("png", 64, 48, vec![0x89, 0x50]))),
    ))
}

#[test]
fn test_scenario_arithmetic_succeeds() {
    let result = execute_snippet("1 + 2", &[], &[]);
    assert_eq!(result.phase, Phase::Succeeded);
    assert_eq!(result.value, Some(Value::Int(3)));
    assert!(result.error.is_none());
}

#[test]
fn test_scenario_import_os_is_blocked() {
    let result = execute_snippet("import os", &[], &[]);
    assert_eq!(result.phase, Phase::Failed);
    let error = result.error.unwrap();
    assert_eq!(error.kind, ErrorKind::ImportBlocked);
    assert!(error.message.starts_with("Import of os is not allowed."));
    assert_eq!(error.location.unwrap().line, 1);
}

#[test]
fn test_scenario_tool_returns_image() {
    let tool = cat_image_tool();
    let result = execute_snippet("get_cat_image()", &[Arc::clone(&tool)], &[]);
    assert_eq!(result.phase, Phase::Succeeded);

    let image = result.value.clone().unwrap();
    let data = image.as_image().unwrap();
    assert_eq!((data.width, data.height), (64, 48));

    assert_eq!(
        render(&result, tool.spec().output_type),
        Rendered::Value(image)
    );
}

#[test]
fn test_scenario_undefined_name() {
    let result = execute_snippet("x = undefined_name + 1", &[], &[]);
    let error = result.error.unwrap();
    assert_eq!(error.kind, ErrorKind::UndefinedName);
    assert_eq!(error.message, "name 'undefined_name' is not defined");
}

#[test]
fn test_scenario_authorized_import_without_implementation() {
    let imported = execute_snippet("import requests", &[], &["requests"]);
    assert!(imported.is_success());
    assert_eq!(imported.value, Some(Value::None));

    let used = execute_snippet(
        "import requests\nrequests.get('https://example.com')",
        &[],
        &["requests"],
    );
    let error = used.error.unwrap();
    assert_eq!(error.kind, ErrorKind::RuntimeFault);
    assert!(error.message.contains("not available in this runtime"));
}

#[test]
fn test_same_snippet_gives_identical_results() {
    let code = "total = 0\nfor i in range(10):\n    total += i * i\nprint(total)\ntotal";
    let first = execute_snippet(code, &[], &[]);
    let second = execute_snippet(code, &[], &[]);
    assert_eq!(first, second);
    assert_eq!(first.value, Some(Value::Int(285)));
    assert_eq!(first.captured_output, "285\n");

    let failing = "print('before')\n1 / 0";
    assert_eq!(
        execute_snippet(failing, &[], &[]),
        execute_snippet(failing, &[], &[])
    );
}

#[test]
fn test_violation_aborts_before_later_statements() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let ping: Arc<dyn Tool> = Arc::new(FnTool::new(
        ToolSpec::new("ping", "Count a call", ValueType::Integer),
        move |_| Ok(Value::Int(counter.fetch_add(1, Ordering::SeqCst) as i64 + 1)),
    ));

    let result = execute_snippet("ping()\nimport subprocess\nping()", &[ping], &[]);
    assert_eq!(result.error.unwrap().kind, ErrorKind::ImportBlocked);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(result.value.is_none());
}

#[test]
fn test_blocked_import_is_never_partial_success() {
    let result = execute_snippet(
        "print('started')\ntry:\n    import socket\nexcept Exception:\n    pass\n'recovered'",
        &[],
        &[],
    );
    assert_eq!(result.phase, Phase::Failed);
    assert!(result.value.is_none());
    assert_eq!(result.error.unwrap().kind, ErrorKind::ImportBlocked);
    assert_eq!(result.captured_output, "started\n");
}

#[test]
fn test_tool_shadows_builtin_of_same_name() {
    let max_tool: Arc<dyn Tool> = Arc::new(FnTool::new(
        ToolSpec::new("max", "Always answers 99", ValueType::Integer)
            .with_input("a", ValueType::Integer, "first")
            .with_input("b", ValueType::Integer, "second"),
        |_| Ok(Value::Int(99)),
    ));
    let result = execute_snippet("max(1, 2)", &[max_tool], &[]);
    assert_eq!(result.value, Some(Value::Int(99)));
}

#[test]
fn test_assigning_over_a_tool_fails() {
    let result = execute_snippet("get_cat_image = 3", &[cat_image_tool()], &[]);
    let error = result.error.unwrap();
    assert_eq!(error.kind, ErrorKind::RuntimeFault);
    assert!(error.message.contains("would erase the existing tool"));
}
