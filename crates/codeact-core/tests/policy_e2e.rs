//! End-to-end capability policy enforcement.

use codeact_core::{
    execute_snippet, CapabilityPolicy, ErrorKind, EvaluationResult, NodeKind, Sandbox,
};

fn kind_of(result: EvaluationResult) -> ErrorKind {
    result.error.expect("snippet should fail").kind
}

// -------------------------------------------------------------------------
// Names
// -------------------------------------------------------------------------

#[test]
fn test_denied_builtins_are_name_blocked() {
    for code in [
        "eval('1 + 1')",
        "exec('x = 1')",
        "open('/etc/passwd')",
        "compile('1', 'f', 'eval')",
        "globals()",
        "__import__('os')",
    ] {
        assert_eq!(
            kind_of(execute_snippet(code, &[], &[])),
            ErrorKind::NameBlocked,
            "{code} should be blocked"
        );
    }
}

#[test]
fn test_reflective_names_cannot_be_bound() {
    assert_eq!(
        kind_of(execute_snippet("__builtins__ = {}", &[], &[])),
        ErrorKind::NameBlocked
    );
}

#[test]
fn test_name_violation_is_not_catchable() {
    let result = execute_snippet(
        "try:\n    eval('2')\nexcept Exception:\n    caught = True\ncaught",
        &[],
        &[],
    );
    assert_eq!(kind_of(result), ErrorKind::NameBlocked);
}

#[test]
fn test_builtin_removed_from_policy_is_blocked() {
    let sandbox = Sandbox::new(CapabilityPolicy::standard().without_builtin("sorted"));
    let result = sandbox.execute("sorted([3, 1, 2])", &[], &[]);
    assert_eq!(kind_of(result), ErrorKind::NameBlocked);

    let allowed = Sandbox::default().execute("sorted([3, 1, 2])", &[], &[]);
    assert!(allowed.is_success());
}

// -------------------------------------------------------------------------
// Attributes
// -------------------------------------------------------------------------

#[test]
fn test_dunder_attributes_are_blocked() {
    for code in [
        "'abc'.__class__",
        "(1).__class__.__bases__",
        "[].__dict__",
        "f = lambda: 1\nf.__globals__",
    ] {
        assert_eq!(
            kind_of(execute_snippet(code, &[], &[])),
            ErrorKind::AttributeBlocked,
            "{code} should be blocked"
        );
    }
}

#[test]
fn test_ordinary_methods_are_allowed() {
    let result = execute_snippet("'a,b'.split(',') + ['C'.lower()]", &[], &[]);
    assert_eq!(result.value.unwrap().repr(), "['a', 'b', 'c']");
}

#[test]
fn test_private_module_members_are_blocked() {
    let result = execute_snippet("import random\nrandom._inst", &[], &[]);
    assert_eq!(kind_of(result), ErrorKind::AttributeBlocked);
}

// -------------------------------------------------------------------------
// Imports
// -------------------------------------------------------------------------

#[test]
fn test_base_modules_import_without_authorization() {
    let result = execute_snippet("import math\nmath.floor(2.7)", &[], &[]);
    assert_eq!(result.value.unwrap().as_i64(), Some(2));
}

#[test]
fn test_unlisted_modules_are_import_blocked() {
    for code in [
        "import subprocess",
        "from os import path",
        "import os.path",
        "from . import sibling",
    ] {
        assert_eq!(
            kind_of(execute_snippet(code, &[], &[])),
            ErrorKind::ImportBlocked,
            "{code} should be blocked"
        );
    }
}

#[test]
fn test_import_message_lists_authorized_modules() {
    let error = execute_snippet("import numpy", &[], &["pandas"]).error.unwrap();
    assert!(error.message.contains("'math'"));
    assert!(error.message.contains("'pandas'"));
}

#[test]
fn test_package_authorization_covers_submodules() {
    assert!(execute_snippet("import numpy.linalg", &[], &["numpy"]).is_success());
    assert!(execute_snippet("import numpy.linalg", &[], &["numpy.*"]).is_success());
    assert!(execute_snippet("import anything_at_all", &[], &["*"]).is_success());
}

#[test]
fn test_json_requires_explicit_authorization() {
    assert_eq!(
        kind_of(execute_snippet("import json", &[], &[])),
        ErrorKind::ImportBlocked
    );
    let result = execute_snippet("import json\njson.dumps({'a': 1})", &[], &["json"]);
    assert_eq!(result.value.unwrap().as_str(), Some("{\"a\": 1}"));
}

// -------------------------------------------------------------------------
// Syntax nodes
// -------------------------------------------------------------------------

#[test]
fn test_disallowed_node_kind_is_blocked() {
    let sandbox = Sandbox::new(CapabilityPolicy::standard().without_node(NodeKind::While));
    let result = sandbox.execute("n = 0\nwhile n < 3:\n    n += 1\nn", &[], &[]);
    assert_eq!(kind_of(result), ErrorKind::NodeBlocked);

    let for_loop = sandbox.execute("n = 0\nfor _ in range(3):\n    n += 1\nn", &[], &[]);
    assert!(for_loop.is_success());
}

#[test]
fn test_unsupported_statements_are_node_blocked() {
    for (code, message) in [
        ("class A:\n    pass", "Class definitions are not supported."),
        ("with x as y:\n    pass", "The 'with' statement is not supported."),
        ("global g\ng = 1", "'global' and 'nonlocal' declarations are not supported."),
        ("def f():\n    yield 1\nf()", "'yield' is not supported."),
        ("@staticmethod\ndef f():\n    pass", "Decorators are not supported."),
    ] {
        let error = execute_snippet(code, &[], &[])
            .error
            .unwrap_or_else(|| panic!("{code} should be blocked"));
        assert_eq!(error.kind, ErrorKind::NodeBlocked, "{code} should be blocked");
        assert_eq!(error.message, message);
    }
}

#[test]
fn test_policy_is_shareable_across_threads() {
    let sandbox = std::sync::Arc::new(Sandbox::default());
    let handles: Vec<_> = (0..4)
        .map(|i| {
            let sandbox = std::sync::Arc::clone(&sandbox);
            std::thread::spawn(move || sandbox.execute(&format!("{i} * 10"), &[], &[]))
        })
        .collect();
    for (i, handle) in handles.into_iter().enumerate() {
        let result = handle.join().unwrap();
        assert_eq!(result.value.unwrap().as_i64(), Some(i as i64 * 10));
    }
}
