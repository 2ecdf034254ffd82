//! Variables carried across evaluations through an explicit session.

use std::sync::Arc;

use codeact_core::{
    execute_snippet, execute_snippet_in_session, ErrorKind, FinalAnswerTool, SessionState, Tool,
    Value,
};
use tempfile::tempdir;

#[test]
fn test_session_carries_variables_between_snippets() {
    let mut session = SessionState::new();
    let first = execute_snippet_in_session("total = 40\nnames = ['a']", &[], &[], &mut session);
    assert!(first.is_success());
    assert_eq!(session.get("total"), Some(&Value::Int(40)));

    let second = execute_snippet_in_session(
        "names.append('b')\ntotal + len(names)",
        &[],
        &[],
        &mut session,
    );
    assert_eq!(second.value, Some(Value::Int(42)));
    assert_eq!(
        session.get("names"),
        Some(&Value::List(vec![Value::from("a"), Value::from("b")]))
    );
}

#[test]
fn test_without_session_nothing_leaks() {
    assert!(execute_snippet("leaked = 1", &[], &[]).is_success());
    let result = execute_snippet("leaked", &[], &[]);
    assert_eq!(result.error.unwrap().kind, ErrorKind::UndefinedName);
}

#[test]
fn test_failed_snippet_leaves_session_untouched() {
    let mut session = SessionState::new();
    session.insert("count", Value::Int(1));

    let result = execute_snippet_in_session("count = 2\nimport os", &[], &[], &mut session);
    assert_eq!(result.error.unwrap().kind, ErrorKind::ImportBlocked);
    assert_eq!(session.get("count"), Some(&Value::Int(1)));
}

#[test]
fn test_functions_and_modules_are_not_persisted() {
    let mut session = SessionState::new();
    let result = execute_snippet_in_session(
        "import math\ndef square(x):\n    return x * x\nside = square(3)",
        &[],
        &[],
        &mut session,
    );
    assert!(result.is_success());
    assert_eq!(session.get("side"), Some(&Value::Int(9)));
    assert!(session.get("square").is_none());
    assert!(session.get("math").is_none());
}

#[test]
fn test_session_never_shadows_tools() {
    let tools: Vec<Arc<dyn Tool>> = vec![Arc::new(FinalAnswerTool::new())];
    let mut session = SessionState::new();
    session.insert("final_answer", Value::Int(0));

    let result = execute_snippet_in_session("final_answer('done')", &tools, &[], &mut session);
    assert!(result.is_final_answer);
    assert_eq!(result.value, Some(Value::from("done")));
}

#[test]
fn test_session_persists_to_disk() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("session.json");

    let mut session = SessionState::load(&path).unwrap();
    execute_snippet_in_session("history = [1, 2.5, 'three', None]", &[], &[], &mut session);
    session.save(&path).unwrap();

    let mut restored = SessionState::load(&path).unwrap();
    let result = execute_snippet_in_session("len(history)", &[], &[], &mut restored);
    assert_eq!(result.value, Some(Value::Int(4)));
}

#[test]
fn test_deleted_and_unportable_names_leave_the_session() {
    let mut session = SessionState::new();
    assert!(execute_snippet_in_session("x = 1\ny = 2", &[], &[], &mut session).is_success());

    let second = execute_snippet_in_session("del y\nx = lambda: 1", &[], &[], &mut session);
    assert!(second.is_success());
    assert!(session.get("x").is_none());
    assert!(session.get("y").is_none());

    let third = execute_snippet_in_session("(x, y)", &[], &[], &mut session);
    assert_eq!(third.error.unwrap().kind, ErrorKind::UndefinedName);
}

#[test]
fn test_deeply_nested_global_is_not_persisted() {
    let mut session = SessionState::new();
    let code = "\
a = []
for i in range(20000):
    a = [a]
d = {}
for i in range(30):
    d = {'k': d}
shallow = [[1]]
1";
    let result = execute_snippet_in_session(code, &[], &[], &mut session);
    assert_eq!(result.value, Some(Value::Int(1)));
    assert!(session.get("a").is_none());
    assert_eq!(
        session.get("shallow"),
        Some(&Value::List(vec![Value::List(vec![Value::Int(1)])]))
    );

    assert!(session.get("d").is_some());

    let json = session.to_json().unwrap();
    assert_eq!(SessionState::from_json(&json).unwrap(), session);
}
