//! Language semantics of the restricted evaluator.

use codeact_core::{execute_snippet, ErrorKind, EvaluationError, EvaluatorConfig, Sandbox, Value};

fn eval(code: &str) -> Value {
    let result = execute_snippet(code, &[], &[]);
    match result.into_outcome() {
        Ok(value) => value,
        Err(error) => panic!("{code:?} failed: {error}"),
    }
}

fn repr(code: &str) -> String {
    eval(code).repr()
}

fn fault(code: &str) -> EvaluationError {
    execute_snippet(code, &[], &[])
        .error
        .unwrap_or_else(|| panic!("{code:?} should fail"))
}

// -------------------------------------------------------------------------
// Numbers
// -------------------------------------------------------------------------

#[test]
fn test_division_and_modulo_follow_python() {
    assert_eq!(repr("10 / 4"), "2.5");
    assert_eq!(repr("7 // -2"), "-4");
    assert_eq!(repr("-7 % 3"), "2");
    assert_eq!(repr("2 ** -1"), "0.5");
    assert_eq!(repr("2 ** 10"), "1024");
    assert_eq!(repr("True + True"), "2");
    assert_eq!(repr("1 == 1.0"), "True");
}

#[test]
fn test_float_repr_is_shortest_round_trip() {
    assert_eq!(repr("0.1 + 0.2"), "0.30000000000000004");
    assert_eq!(repr("1e16"), "1e+16");
    assert_eq!(repr("2.0"), "2.0");
}

#[test]
fn test_arithmetic_faults() {
    let error = fault("1 / 0");
    assert_eq!(error.kind, ErrorKind::RuntimeFault);
    assert!(error.message.starts_with("ZeroDivisionError"));

    assert!(fault("2 ** 64").message.starts_with("OverflowError"));
    assert!(fault("1 < 'a'").message.starts_with("TypeError"));
}

// -------------------------------------------------------------------------
// Strings and containers
// -------------------------------------------------------------------------

#[test]
fn test_string_operations() {
    assert_eq!(repr("f'{3 * 7} is {\"odd\"}'"), "'21 is odd'");
    assert_eq!(repr("f'{3.14159:.2f}'"), "'3.14'");
    assert_eq!(repr("'-'.join(['a', 'b', 'c'])"), "'a-b-c'");
    assert_eq!(repr("'Hello'[::-1]"), "'olleH'");
    assert_eq!(repr("'{} + {}'.format(1, 2)"), "'1 + 2'");
}

#[test]
fn test_containers_and_comprehensions() {
    assert_eq!(repr("[x * x for x in range(5) if x % 2 == 0]"), "[0, 4, 16]");
    assert_eq!(repr("{k: len(k) for k in ['a', 'bb']}"), "{'a': 1, 'bb': 2}");
    assert_eq!(repr("sorted({3, 1, 2})"), "[1, 2, 3]");
    assert_eq!(repr("d = {'a': 1}\nd['b'] = 2\nlist(d.items())"), "[('a', 1), ('b', 2)]");
    assert_eq!(repr("a, *rest = [1, 2, 3]\nrest"), "[2, 3]");
    assert_eq!(repr("bool([]) or bool({})"), "False");
}

#[test]
fn test_for_loop_sees_list_growing() {
    let code = "\
l = [1, 2, 3]
for x in l:
    l.append(x)
    if len(l) > 10:
        break
l";
    assert_eq!(repr(code), "[1, 2, 3, 1, 2, 3, 1, 2, 3, 1, 2]");
}

#[test]
fn test_for_loop_sees_list_shrinking() {
    assert_eq!(repr("l = [1, 2, 3, 4]\nfor x in l:\n    l.remove(x)\nl"), "[2, 4]");
}

#[test]
fn test_resizing_a_dict_during_iteration_is_an_error() {
    let error = fault("d = {'a': 1}\nfor k in d:\n    d['b'] = 2");
    assert_eq!(error.kind, ErrorKind::RuntimeFault);
    assert_eq!(error.message, "RuntimeError: dictionary changed size during iteration");

    let error = fault("s = {1}\nfor x in s:\n    s.add(2)");
    assert_eq!(error.message, "RuntimeError: Set changed size during iteration");

    assert_eq!(repr("d = {'a': 1}\nfor k in d:\n    d[k] = 2\nd"), "{'a': 2}");
}

#[test]
fn test_builtins() {
    assert_eq!(repr("sum(range(101))"), "5050");
    assert_eq!(repr("max([3, 9, 2], key=lambda v: -v)"), "2");
    assert_eq!(repr("list(zip('ab', [1, 2]))"), "[('a', 1), ('b', 2)]");
    assert_eq!(repr("list(enumerate('xy', 1))"), "[(1, 'x'), (2, 'y')]");
    assert_eq!(repr("round(3.14159, 2)"), "3.14");
    assert_eq!(repr("int('ff', 16)"), "255");
}

// -------------------------------------------------------------------------
// Functions and control flow
// -------------------------------------------------------------------------

#[test]
fn test_functions_and_closures() {
    let code = "\
def make_adder(n):
    def add(x):
        return x + n
    return add

add3 = make_adder(3)
add3(4)";
    assert_eq!(eval(code), Value::Int(7));

    let recursive = "\
def fib(n):
    return n if n < 2 else fib(n - 1) + fib(n - 2)
fib(15)";
    assert_eq!(eval(recursive), Value::Int(610));

    let signature = "def f(a, b=2, *args, c=3, **kw):\n    return (a, b, args, c, kw)\nf(1, c=4, z=5)";
    assert_eq!(repr(signature), "(1, 2, (), 4, {'z': 5})");
}

#[test]
fn test_exceptions_can_be_caught() {
    let code = "\
try:
    {}['missing']
except KeyError as e:
    caught = 'key'
finally:
    done = True
(caught, done)";
    assert_eq!(repr(code), "('key', True)");

    let undefined = "try:\n    nope\nexcept NameError:\n    r = 'handled'\nr";
    assert_eq!(repr(undefined), "'handled'");

    let raised = fault("raise ValueError('bad input')");
    assert_eq!(raised.message, "ValueError: bad input");
}

#[test]
fn test_last_expression_is_the_result() {
    assert_eq!(eval("x = 5"), Value::None);
    assert_eq!(eval("x = 5\nx\ny = 1"), Value::None);
    assert_eq!(eval("x = 5\nx + 1"), Value::Int(6));
}

#[test]
fn test_print_is_captured() {
    let result = execute_snippet("print('a', 1, sep='-')\nprint('b', end='')", &[], &[]);
    assert_eq!(result.captured_output, "a-1\nb");
}

#[test]
fn test_output_survives_a_fault() {
    let result = execute_snippet("print('first')\nundefined", &[], &[]);
    assert_eq!(result.captured_output, "first\n");
    assert_eq!(result.error.unwrap().kind, ErrorKind::UndefinedName);
}

#[test]
fn test_error_location_points_at_offending_line() {
    let error = fault("x = 1\ny = x + 'a'\n");
    let location = error.location.unwrap();
    assert_eq!(location.line, 2);
    assert_eq!(location.source_line, "y = x + 'a'");
}

#[test]
fn test_syntax_error_is_reported() {
    let error = fault("for x in:\n    pass");
    assert_eq!(error.kind, ErrorKind::SyntaxInvalid);
    assert_eq!(error.location.unwrap().line, 1);
}

// -------------------------------------------------------------------------
// Limits
// -------------------------------------------------------------------------

#[test]
fn test_operation_budget_stops_runaway_loops() {
    let sandbox =
        Sandbox::default().with_config(EvaluatorConfig::default().with_max_operations(10_000));
    let error = sandbox
        .execute("n = 0\nfor i in range(10**9):\n    n += i", &[], &[])
        .error
        .unwrap();
    assert_eq!(error.kind, ErrorKind::RuntimeFault);
    assert!(error.message.contains("max number of operations"));
}

#[test]
fn test_while_iterations_are_capped() {
    let sandbox =
        Sandbox::default().with_config(EvaluatorConfig::default().with_max_while_iterations(100));
    let error = sandbox.execute("while True:\n    pass", &[], &[]).error.unwrap();
    assert!(error.message.contains("iterations in While loop exceeded"));
}

#[test]
fn test_budget_exhaustion_is_not_catchable() {
    let sandbox =
        Sandbox::default().with_config(EvaluatorConfig::default().with_max_while_iterations(100));
    let code = "try:\n    while True:\n        pass\nexcept Exception:\n    r = 1\nr";
    assert!(sandbox.execute(code, &[], &[]).error.is_some());
}

#[test]
fn test_recursion_depth_is_limited() {
    let error = fault("def f(n):\n    return f(n + 1)\nf(0)");
    assert!(error.message.starts_with("RecursionError"));
}

const NEST_20K: &str = "a = []\nfor i in range(20000):\n    a = [a]\n";

#[test]
fn test_deeply_nested_data_is_released_cleanly() {
    assert_eq!(eval(&format!("{NEST_20K}1")), Value::Int(1));
    assert_eq!(eval(&format!("{NEST_20K}a = None\n2")), Value::Int(2));
}

#[test]
fn test_deeply_nested_result_is_a_recursion_error() {
    let error = fault(&format!("{NEST_20K}a"));
    assert_eq!(error.kind, ErrorKind::RuntimeFault);
    assert!(error.message.starts_with("RecursionError"), "{}", error.message);
}

#[test]
fn test_repr_of_deep_nesting_is_a_recursion_error() {
    let error = fault("a = []\nfor i in range(100000):\n    a = [a]\nstr(a)");
    assert_eq!(
        error.message,
        "RecursionError: maximum recursion depth exceeded while getting the repr of an object"
    );

    let caught = format!("{NEST_20K}try:\n    r = f'{{a}}'\nexcept RecursionError:\n    r = 'caught'\nr");
    assert_eq!(repr(&caught), "'caught'");
    assert_eq!(repr("a = []\nfor i in range(3):\n    a = [a]\nrepr(a)"), "'[[[[]]]]'");
}

#[test]
fn test_deep_comparison_and_hashing_are_recursion_errors() {
    let compare = format!("{NEST_20K}b = []\nfor i in range(20000):\n    b = [b]\na == b");
    assert!(fault(&compare).message.starts_with("RecursionError"));

    let hash = "t = ()\nfor i in range(5000):\n    t = (t,)\n{t: 1}";
    assert!(fault(hash).message.starts_with("RecursionError"));
}

#[test]
fn test_distinct_self_referential_lists_do_not_compare() {
    let code = "a = []\na.append(a)\nb = []\nb.append(b)\n";
    assert_eq!(repr(&format!("{code}a == a")), "True");
    assert!(fault(&format!("{code}a == b")).message.starts_with("RecursionError"));
    assert_eq!(
        repr(&format!("{code}try:\n    a == b\nexcept RecursionError:\n    r = 'caught'\nr")),
        "'caught'"
    );
}

#[test]
fn test_long_unary_chain_is_a_recursion_error() {
    let code = format!("{}1", "-".repeat(100_000));
    let error = fault(&code);
    assert_eq!(error.kind, ErrorKind::RuntimeFault);
    assert!(error.message.starts_with("RecursionError"), "{}", error.message);

    assert_eq!(eval(&format!("{}1", "-".repeat(100))), Value::Int(1));
}

// -------------------------------------------------------------------------
// Native modules
// -------------------------------------------------------------------------

#[test]
fn test_math_and_statistics() {
    assert_eq!(repr("import math\nmath.sqrt(16)"), "4.0");
    assert_eq!(repr("from math import pi\nround(pi, 3)"), "3.142");
    assert_eq!(repr("import statistics\nstatistics.mean([1, 2, 3, 4])"), "2.5");
    assert_eq!(repr("import statistics as st\nst.median([5, 1, 3])"), "3");
}

#[test]
fn test_seeded_random_is_reproducible() {
    let code = "import random\nrandom.seed(42)\n[random.randint(1, 100) for _ in range(5)]";
    assert_eq!(eval(code), eval(code));
}

#[test]
fn test_regular_expressions() {
    assert_eq!(repr("import re\nre.findall(r'\\d+', 'a1b22c333')"), "['1', '22', '333']");
    assert_eq!(repr("import re\nre.sub(r'(\\w+)@', r'\\1 at ', 'me@host')"), "'me at host'");
    assert_eq!(
        repr("import re\nm = re.match(r'(\\w+)-(\\d+)', 'item-42')\nm.group(2)"),
        "'42'"
    );
}

#[test]
fn test_collections_and_itertools() {
    assert_eq!(
        repr("from collections import Counter\nCounter('abca').most_common(1)"),
        "[('a', 2)]"
    );
    assert_eq!(
        repr("import itertools\nlist(itertools.combinations([1, 2, 3], 2))"),
        "[(1, 2), (1, 3), (2, 3)]"
    );
}

#[test]
fn test_json_round_trip_when_authorized() {
    let result = execute_snippet(
        "import json\ndata = json.loads('{\"a\": [1, 2.5, null]}')\ndata['a']",
        &[],
        &["json"],
    );
    assert_eq!(result.value.unwrap().repr(), "[1, 2.5, None]");
}
