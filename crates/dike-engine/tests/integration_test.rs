//! End-to-end query evaluation tests.

use dike_engine::{EngineError, Interpreter};

fn eval(modules: &[&str], data: Option<&str>, input: Option<&str>, query: &str) -> String {
    let mut interpreter = Interpreter::new();
    for (index, module) in modules.iter().enumerate() {
        interpreter
            .add_module(&format!("module{index}.rego"), module)
            .expect("module loads");
    }
    if let Some(data) = data {
        interpreter.add_data_json(data).expect("data loads");
    }
    if let Some(input) = input {
        interpreter.add_input_json(input).expect("input loads");
    }
    interpreter.query(query).expect("query evaluates")
}

#[test]
fn test_hello() {
    let result = eval(
        &["package p\nmsg = \"hello\""],
        None,
        None,
        "data.p.msg",
    );
    assert_eq!(result, "\"hello\"\n");
}

#[test]
fn test_arithmetic_and_comparison() {
    let result = eval(
        &["package p\nok { x := 2 + 3; x > 4 }"],
        None,
        None,
        "data.p.ok",
    );
    assert_eq!(result, "true\n");
}

#[test]
fn test_default_rule_dominance() {
    let module = r#"package p
default allow = false
allow { input.user == "root" }
"#;
    let denied = eval(&[module], None, Some(r#"{"user": "alice"}"#), "data.p.allow");
    assert_eq!(denied, "false\n");
    let allowed = eval(&[module], None, Some(r#"{"user": "root"}"#), "data.p.allow");
    assert_eq!(allowed, "true\n");
}

#[test]
fn test_set_comprehension_with_capture() {
    let module = r#"package p
evens := {n | n := input.ns[_]; n % 2 == 0}
"#;
    let result = eval(
        &[module],
        None,
        Some(r#"{"ns": [1, 2, 3, 4]}"#),
        "data.p.evens",
    );
    assert_eq!(result, "[2,4]\n");
}

#[test]
fn test_every_all_positive() {
    let module = r#"package p
ok { every x in input.xs { x > 0 } }
"#;
    let all_positive = eval(&[module], None, Some(r#"{"xs": [1, 2, 3]}"#), "data.p.ok");
    assert_eq!(all_positive, "true\n");
}

#[test]
fn test_every_with_negative_fails() {
    let module = r#"package p
default ok = false
ok { every x in input.xs { x > 0 } }
"#;
    let mixed = eval(&[module], None, Some(r#"{"xs": [1, -1, 3]}"#), "data.p.ok");
    assert_eq!(mixed, "false\n");
}

#[test]
fn test_recursion_detected() {
    let result = eval(&["package p\na = b\nb = a"], None, None, "data.p.a");
    assert!(result.contains("Recursion"), "got: {result}");
}

#[test]
fn test_rule_referencing_sibling() {
    let module = r#"package p
threshold = 4
ok { input.n > threshold }
"#;
    let result = eval(&[module], None, Some(r#"{"n": 10}"#), "data.p.ok");
    assert_eq!(result, "true\n");
}

#[test]
fn test_data_document_access() {
    let result = eval(
        &["package p\nok { data.roles.admin == \"all\" }"],
        Some(r#"{"roles": {"admin": "all"}}"#),
        None,
        "data.p.ok",
    );
    assert_eq!(result, "true\n");
}

#[test]
fn test_query_binding() {
    let result = eval(&["package p\nmsg = 41"], None, None, "x = data.p.msg");
    assert_eq!(result, "{\"bindings\":{\"x\":41}}\n");
}

#[test]
fn test_function_rule() {
    let module = r#"package p
double(x) = y { y := x * 2 }
result = v { v := double(21) }
"#;
    let result = eval(&[module], None, None, "data.p.result");
    assert_eq!(result, "42\n");
}

#[test]
fn test_builtin_count() {
    let module = r#"package p
n = c { c := count(input.xs) }
"#;
    let result = eval(&[module], None, Some(r#"{"xs": [10, 20, 30]}"#), "data.p.n");
    assert_eq!(result, "3\n");
}

#[test]
fn test_partial_set_rule() {
    let module = r#"package p
s contains 1 { true }
s contains 2 { input.more }
"#;
    let with_more = eval(&[module], None, Some(r#"{"more": true}"#), "data.p.s");
    assert_eq!(with_more, "[1,2]\n");
}

#[test]
fn test_else_chain() {
    let module = r#"package p
v = 1 { input.a } else = 2 { input.b } else = 3 { true }
"#;
    let first = eval(&[module], None, Some(r#"{"a": true}"#), "data.p.v");
    assert_eq!(first, "1\n");
    let second = eval(&[module], None, Some(r#"{"b": true}"#), "data.p.v");
    assert_eq!(second, "2\n");
    let third = eval(&[module], None, Some(r#"{"c": true}"#), "data.p.v");
    assert_eq!(third, "3\n");
}

#[test]
fn test_with_override() {
    let module = r#"package p
allow { input.user == "root" }
check { allow with input as {"user": "root"} }
"#;
    let result = eval(&[module], None, Some(r#"{"user": "alice"}"#), "data.p.check");
    assert_eq!(result, "true\n");
}

#[test]
fn test_negation() {
    let module = r#"package p
default deny = false
deny { not input.allowed }
"#;
    let denied = eval(&[module], None, Some(r#"{"allowed": false}"#), "data.p.deny");
    assert_eq!(denied, "true\n");
    let allowed = eval(&[module], None, Some(r#"{"allowed": true}"#), "data.p.deny");
    assert_eq!(allowed, "false\n");
}

#[test]
fn test_deterministic_output_across_module_order() {
    let a = "package a\nx = 1";
    let b = "package b\ny = 2";
    let first = eval(&[a, b], None, None, "data.a.x");
    let second = eval(&[b, a], None, None, "data.a.x");
    assert_eq!(first, second);
}

#[test]
fn test_divide_by_zero_is_error() {
    let module = "package p\nbad = v { v := 1 / 0 }";
    let result = eval(&[module], None, None, "data.p.bad");
    assert!(result.contains("divide by zero"), "got: {result}");
}

#[test]
fn test_undefined_query_result() {
    let module = "package p\nok { input.missing == 1 }\nother = 2";
    let result = eval(&[module], None, Some(r#"{"missing": 1}"#), "data.p.ok");
    assert_eq!(result, "true\n");
}

#[test]
fn test_multiple_modules_merge() {
    let first = "package p\nx = 1";
    let second = "package q\ny = v { v := data.p.x + 1 }";
    let result = eval(&[first, second], None, None, "data.q.y");
    assert_eq!(result, "2\n");
}

#[test]
fn test_partial_object_rule() {
    let module = r#"package p
o["a"] = 1 { true }
o["b"] = 2 { input.more }
"#;
    let result = eval(&[module], None, Some(r#"{"more": true}"#), "data.p.o");
    assert_eq!(result, "{\"a\":1,\"b\":2}\n");
}

#[test]
fn test_array_comprehension() {
    let module = r#"package p
doubled := [n * 2 | n := input.ns[_]]
"#;
    let result = eval(&[module], None, Some(r#"{"ns": [1, 2, 3]}"#), "data.p.doubled");
    assert_eq!(result, "[2,4,6]\n");
}

#[test]
fn test_object_comprehension() {
    let module = r#"package p
index := {k: v | some k; v := input.xs[k]}
"#;
    let result = eval(&[module], None, Some(r#"{"xs": ["a", "b"]}"#), "data.p.index");
    assert_eq!(result, "{\"0\":\"a\",\"1\":\"b\"}\n");
}

#[test]
fn test_set_operators() {
    let module = r#"package p
u = v { v := {1, 2} | {2, 3} }
i = v { v := {1, 2} & {2, 3} }
"#;
    let union = eval(&[module], None, None, "data.p.u");
    assert_eq!(union, "[1,2,3]\n");
    let intersection = eval(&[module], None, None, "data.p.i");
    assert_eq!(intersection, "[2]\n");
}

#[test]
fn test_input_already_set_error() {
    let mut interpreter = Interpreter::new();
    interpreter.add_input_json("{}").unwrap();
    assert!(matches!(
        interpreter.add_input_json("{}"),
        Err(EngineError::InputAlreadySet)
    ));
}

#[test]
fn test_json_round_trip_through_query() {
    let module = "package p\necho = input";
    let result = eval(
        &[module],
        None,
        Some(r#"{"b": [1, 2.5, null], "a": {"x": true}}"#),
        "data.p.echo",
    );
    assert_eq!(result, "{\"a\":{\"x\":true},\"b\":[1,2.5,null]}\n");
}

#[test]
fn test_debug_dumps_written() {
    let dir = tempfile::tempdir().unwrap();
    let mut interpreter = Interpreter::new();
    interpreter
        .add_module("p.rego", "package p\nmsg = 1")
        .unwrap();
    interpreter.debug_path(dir.path()).debug_enabled(true);
    interpreter.query("data.p.msg").unwrap();
    let entries: Vec<String> = std::fs::read_dir(dir.path())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
        .collect();
    assert!(entries.iter().any(|name| name == "00_parse.trieste"));
    assert!(entries.iter().any(|name| name.ends_with("_query.trieste")));
}
