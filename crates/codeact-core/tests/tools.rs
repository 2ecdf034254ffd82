//! Tool bindings seen from inside a snippet.

use std::sync::Arc;

use codeact_core::{
    execute_snippet, render_observation, ErrorKind, FinalAnswerTool, FnTool, ModuleBinding,
    PythonInterpreterTool, Sandbox, ScriptedSource, Tool, ToolError, ToolSpec, UserInputTool,
    Value, ValueType,
};

fn weather_tool() -> Arc<dyn Tool> {
    Arc::new(FnTool::new(
        ToolSpec::new("get_weather", "Weather for a city", ValueType::Object)
            .with_input("city", ValueType::String, "City name")
            .with_nullable_input("celsius", ValueType::Boolean, "Use Celsius"),
        |args| {
            let city = args["city"].as_str().unwrap_or_default().to_string();
            let celsius = matches!(args.get("celsius"), Some(Value::Bool(true)));
            Ok(Value::Dict(vec![
                (Value::from("city"), Value::from(city)),
                (
                    Value::from("temp"),
                    Value::Int(if celsius { 21 } else { 70 }),
                ),
            ]))
        },
    ))
}

fn failing_tool() -> Arc<dyn Tool> {
    Arc::new(FnTool::new(
        ToolSpec::new("flaky", "Always fails", ValueType::String),
        |_| Err(ToolError::failed("flaky", "upstream returned 503")),
    ))
}

#[test]
fn test_tool_call_binds_positional_and_keyword_arguments() {
    let tools = [weather_tool()];
    let positional = execute_snippet("get_weather('Paris')['temp']", &tools, &[]);
    assert_eq!(positional.value, Some(Value::Int(70)));

    let keyword = execute_snippet(
        "w = get_weather(city='Oslo', celsius=True)\nf\"{w['city']}: {w['temp']}\"",
        &tools,
        &[],
    );
    assert_eq!(keyword.value, Some(Value::from("Oslo: 21")));
}

#[test]
fn test_bad_tool_arguments_are_runtime_faults() {
    let tools = [weather_tool()];
    for code in [
        "get_weather()",
        "get_weather(42)",
        "get_weather('Rome', country='IT')",
    ] {
        let error = execute_snippet(code, &tools, &[]).error.unwrap();
        assert_eq!(error.kind, ErrorKind::RuntimeFault, "{code}");
        assert!(error.message.starts_with("TypeError"), "{code}: {}", error.message);
    }
}

#[test]
fn test_tool_failure_becomes_catchable_runtime_fault() {
    let tools = [failing_tool()];
    let error = execute_snippet("flaky()", &tools, &[]).error.unwrap();
    assert_eq!(error.kind, ErrorKind::RuntimeFault);
    assert!(error.message.contains("upstream returned 503"));

    let handled = execute_snippet(
        "try:\n    flaky()\nexcept Exception as e:\n    msg = str(e)\nmsg",
        &tools,
        &[],
    );
    assert!(handled
        .value
        .unwrap()
        .as_str()
        .unwrap()
        .contains("upstream returned 503"));
}

#[test]
fn test_final_answer_ends_evaluation() {
    let tools: Vec<Arc<dyn Tool>> = vec![Arc::new(FinalAnswerTool::new())];
    let result = execute_snippet(
        "print('thinking')\nfinal_answer(6 * 7)\nprint('never printed')",
        &tools,
        &[],
    );
    assert!(result.is_final_answer);
    assert_eq!(result.value, Some(Value::Int(42)));
    assert_eq!(result.captured_output, "thinking\n");
}

#[test]
fn test_final_answer_is_not_swallowed_by_try() {
    let tools: Vec<Arc<dyn Tool>> = vec![Arc::new(FinalAnswerTool::new())];
    let result = execute_snippet(
        "try:\n    final_answer('x')\nexcept Exception:\n    pass\n'after'",
        &tools,
        &[],
    );
    assert!(result.is_final_answer);
    assert_eq!(result.value, Some(Value::from("x")));
}

#[test]
fn test_tool_attributes_are_readable() {
    let tools = [weather_tool()];
    let result = execute_snippet("get_weather.description", &tools, &[]);
    assert_eq!(result.value, Some(Value::from("Weather for a city")));
}

#[test]
fn test_user_input_tool_uses_its_source() {
    let tools: Vec<Arc<dyn Tool>> =
        vec![Arc::new(UserInputTool::new(ScriptedSource::new(["Lisbon"])))];
    let result = execute_snippet("user_input('Which city?').upper()", &tools, &[]);
    assert_eq!(result.value, Some(Value::from("LISBON")));
}

#[test]
fn test_python_interpreter_tool_nests_an_evaluation() {
    let tools: Vec<Arc<dyn Tool>> = vec![Arc::new(PythonInterpreterTool::new(
        Sandbox::default(),
        vec!["json".to_string()],
    ))];
    let result = execute_snippet(
        "python_interpreter(code=\"import json\\nprint(json.dumps([1]))\\n2 + 2\")",
        &tools,
        &[],
    );
    assert_eq!(
        result.value,
        Some(Value::from("Stdout:\n[1]\n\nOutput: 4"))
    );
}

#[test]
fn test_authorized_module_backed_by_binding() {
    let get: Arc<dyn Tool> = Arc::new(FnTool::new(
        ToolSpec::new("get", "HTTP GET", ValueType::String).with_input(
            "url",
            ValueType::String,
            "URL",
        ),
        |args| Ok(Value::from(format!("200 OK from {}", args["url"]))),
    ));
    let sandbox = Sandbox::default().with_module(
        ModuleBinding::new("requests")
            .with_tool(get)
            .with_value("codes_ok", Value::Int(200)),
    );

    let result = sandbox.execute(
        "import requests\nrequests.get('https://example.com')",
        &[],
        &["requests"],
    );
    assert_eq!(result.value, Some(Value::from("200 OK from https://example.com")));

    let from_import = sandbox.execute(
        "from requests import get\nget(url='https://a.test')",
        &[],
        &["requests"],
    );
    assert!(from_import.is_success());

    let constant = sandbox.execute("import requests\nrequests.codes_ok", &[], &["requests"]);
    assert_eq!(constant.value, Some(Value::Int(200)));

    let blocked = sandbox.execute("import requests", &[], &[]);
    assert_eq!(blocked.error.unwrap().kind, ErrorKind::ImportBlocked);
}

#[test]
fn test_observation_combines_output_and_value() {
    let tools = [weather_tool()];
    let result = execute_snippet(
        "w = get_weather('Paris')\nprint(w['city'])\nw['temp']",
        &tools,
        &[],
    );
    assert_eq!(
        render_observation(&result),
        "Print outputs:\nParis\n\nLast output from code snippet:\n70"
    );
}
