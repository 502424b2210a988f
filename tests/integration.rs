//! Integration tests for the aspectweave pipeline.
//!
//! These tests write translation unit documents and aspect configurations
//! to a temp directory and run the whole pipeline: loading, registry,
//! plan resolution, code generation, text weaving and output.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use serde_json::{Value, json};

use aspectweave::cli::Args;
use aspectweave::config::load_config;
use aspectweave::weave::{weave_files, write_outputs};

fn write_file(dir: &Path, name: &str, content: &str) -> PathBuf {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(&path, content).unwrap();
    path
}

/// Tokens separated by single spaces; `macro_tokens` marks indices
/// belonging to expansion 0.
fn tokens(source: &str, macro_tokens: &[usize]) -> Value {
    let tokens: Vec<Value> = source
        .split(' ')
        .enumerate()
        .map(|(i, text)| {
            let ws = if i == 0 { "" } else { " " };
            if macro_tokens.contains(&i) {
                json!({ "text": text, "ws": ws, "expansion": 0 })
            } else {
                json!({ "text": text, "ws": ws })
            }
        })
        .collect();
    Value::Array(tokens)
}

// class Point { int x ; } ; int main ( ) { draw ( ) ; return 0 ; }
// 0     1     2 3   4 5 6 7 8   9    10 11 12 13 14 15 16 17 18 19 20
const SHAPES: &str = "class Point { int x ; } ; int main ( ) { draw ( ) ; return 0 ; }";

fn shapes_unit() -> String {
    json!({
        "path": "src/shapes.cc",
        "tokens": tokens(SHAPES, &[]),
        "entities": [
            { "kind": "namespace", "name": "" },
            { "kind": "class", "name": "Point", "parent": 0, "span": { "first": 2, "last": 6 } },
            { "kind": "variable", "name": "x", "parent": 1,
              "variable": { "type": "int", "kind": "member" } },
            { "kind": "function", "name": "main", "parent": 0,
              "function": { "kind": "non_member", "result": "int" } },
            { "kind": "function", "name": "draw", "parent": 0,
              "function": { "kind": "non_member", "result": "void" } },
            { "kind": "aspect", "name": "Trace", "parent": 0 },
            { "kind": "aspect", "name": "Log", "parent": 0 }
        ],
        "join_points": [
            { "kind": "execution", "target": 3, "parent": 3, "span": { "first": 12, "last": 20 } },
            { "kind": "call", "target": 4, "parent": 3, "span": { "first": 13, "last": 16 } }
        ]
    })
    .to_string()
}

const SHAPES_CONFIG: &str = r#"
aspects:
  - name: Trace
    advice:
      - { kind: before, pointcut: 'execution("% main()")', body: "trace_enter();" }
      - { kind: around, pointcut: 'call("% draw()")', body: "begin(); proceed(); end();" }
    introductions:
      - pointcut: '"Point"'
        slice: "int calls;"
        members: [{ kind: variable, name: calls, type: int }]
  - name: Log
    advice:
      - { kind: after, pointcut: 'execution("% main()")', body: "log_exit();" }
    order: [{ aspects: ['"Log"', '"Trace"'] }]
"#;

const SHAPES_WOVEN: &str = "class Point { int x ; int calls;\n} ; int main ( ) { trace_enter(); \
begin(); draw ( ) ; end(); return 0 ; log_exit(); }";

// int main ( ) { puts ( "hi" ) ; }   with `puts ( "hi" )` expanded from LOG("hi")
fn macro_unit() -> String {
    json!({
        "path": "log.cc",
        "tokens": tokens("int main ( ) { puts ( \"hi\" ) ; }", &[5, 6, 7, 8]),
        "expansions": [{ "name": "LOG", "call": "LOG(\"hi\")" }],
        "entities": [
            { "kind": "namespace", "name": "" },
            { "kind": "function", "name": "main", "parent": 0,
              "function": { "kind": "non_member", "result": "int" } },
            { "kind": "function", "name": "puts", "parent": 0,
              "function": { "kind": "non_member", "result": "int", "params": ["const char *"] } },
            { "kind": "aspect", "name": "Trace", "parent": 0 }
        ],
        "join_points": [
            { "kind": "call", "target": 2, "parent": 1, "span": { "first": 5, "last": 7 } }
        ]
    })
    .to_string()
}

const MACRO_CONFIG: &str = r#"
aspects:
  - name: Trace
    advice:
      - { kind: before, pointcut: 'call("% puts(...)")', body: "b();" }
      - { kind: after, pointcut: 'call("% puts(...)")', body: "a();" }
"#;

fn args(units: Vec<PathBuf>, config: &Path, output_dir: Option<PathBuf>) -> Args {
    Args {
        units,
        config: Some(config.to_path_buf()),
        format: "text".to_string(),
        output_dir,
        macro_aware: false,
        no_data_joinpoints: false,
        builtin_operators: false,
        plans: false,
        debug: false,
    }
}

fn aspectweave(dir: &Path, extra: &[&str]) -> std::process::Output {
    Command::new(env!("CARGO_BIN_EXE_aspectweave"))
        .current_dir(dir)
        .args(extra)
        .output()
        .unwrap()
}

// ---------- Library pipeline ----------

#[test]
fn weaves_advice_introductions_and_order() {
    let dir = tempfile::tempdir().unwrap();
    let unit = write_file(dir.path(), "shapes.json", &shapes_unit());
    let config_path = write_file(dir.path(), "weave.yml", SHAPES_CONFIG);
    let config = load_config(Some(config_path.as_path())).unwrap();

    let outcomes = weave_files(&[unit], &config).unwrap();
    assert_eq!(outcomes.len(), 1);
    let outcome = &outcomes[0];
    assert!(outcome.diagnostics.is_empty(), "{:?}", outcome.diagnostics);
    assert_eq!(outcome.text.as_deref(), Some(SHAPES_WOVEN));

    let plans: Vec<(&str, Vec<&str>)> = outcome
        .plans
        .iter()
        .map(|p| {
            (
                p.join_point.as_str(),
                p.sequence.iter().map(String::as_str).collect(),
            )
        })
        .collect();
    assert_eq!(
        plans,
        vec![
            ("introduction(Point)", vec!["Trace introduction #0"]),
            (
                "execution(int main())",
                vec!["before Trace#0", "original", "after Log#0"]
            ),
            ("call(void draw()) in main", vec!["around Trace#1", "original"]),
        ]
    );

    let out = dir.path().join("out");
    assert_eq!(write_outputs(&out, &outcomes).unwrap(), 1);
    let written = fs::read_to_string(out.join("src/shapes.cc")).unwrap();
    assert_eq!(written, SHAPES_WOVEN);
}

#[test]
fn units_are_woven_independently() {
    let dir = tempfile::tempdir().unwrap();
    let shapes = write_file(dir.path(), "shapes.json", &shapes_unit());
    let log = write_file(dir.path(), "log.json", &macro_unit());
    let config_path = write_file(dir.path(), "weave.yml", SHAPES_CONFIG);
    let config = load_config(Some(config_path.as_path())).unwrap();

    let outcomes = weave_files(&[shapes, log], &config).unwrap();
    assert_eq!(outcomes[0].path, "src/shapes.cc");
    assert_eq!(outcomes[1].path, "log.cc");
    // no advice applies to log.cc, so it comes out as written
    assert_eq!(
        outcomes[1].text.as_deref(),
        Some("int main ( ) { LOG(\"hi\") ; }")
    );
}

#[test]
fn run_writes_woven_sources() {
    let dir = tempfile::tempdir().unwrap();
    let unit = write_file(dir.path(), "shapes.json", &shapes_unit());
    let config_path = write_file(dir.path(), "weave.yml", SHAPES_CONFIG);
    let out = dir.path().join("woven");

    let code = aspectweave::run(args(vec![unit], &config_path, Some(out.clone()))).unwrap();
    assert_eq!(code, 0);
    assert_eq!(
        fs::read_to_string(out.join("src/shapes.cc")).unwrap(),
        SHAPES_WOVEN
    );
}

#[test]
fn run_without_config_file_weaves_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let unit = write_file(dir.path(), "shapes.json", &shapes_unit());
    let out = dir.path().join("woven");
    let code = aspectweave::run(args(
        vec![unit],
        &dir.path().join("missing.yml"),
        Some(out.clone()),
    ))
    .unwrap();
    assert_eq!(code, 0);
    assert_eq!(fs::read_to_string(out.join("src/shapes.cc")).unwrap(), SHAPES);
}

// ---------- Command line ----------

#[test]
fn cli_order_cycle_is_fatal_and_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    write_file(dir.path(), "shapes.json", &shapes_unit());
    write_file(dir.path(), "log.json", &macro_unit());
    let cyclic = SHAPES_CONFIG.replace(
        "    introductions:",
        "    order: [{ aspects: ['\"Trace\"', '\"Log\"'] }]\n    introductions:",
    );
    write_file(dir.path(), ".aspectweave.yml", &cyclic);

    let output = aspectweave(dir.path(), &["-o", "out", "shapes.json", "log.json"]);
    assert_eq!(output.status.code(), Some(2));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("F: weaving plan: order directives not resolvable"));
    assert!(!dir.path().join("out").exists());
}

#[test]
fn cli_pointcut_error_exits_one() {
    let dir = tempfile::tempdir().unwrap();
    write_file(dir.path(), "shapes.json", &shapes_unit());
    write_file(
        dir.path(),
        "broken.yml",
        "aspects:\n  - name: Trace\n    advice: [{ kind: before, pointcut: 'execution(\"% main()\" ||' }]\n",
    );
    let output = aspectweave(dir.path(), &["-c", "broken.yml", "-o", "out", "shapes.json"]);
    assert_eq!(output.status.code(), Some(1));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("src/shapes.cc:0:"));
    assert!(stdout.contains("E: Trace before advice #0"));
    assert!(stdout.contains("1 unit, 0 woven, 1 diagnostic"));
    assert!(!dir.path().join("out/src/shapes.cc").exists());
}

#[test]
fn cli_malformed_unit_exits_three() {
    let dir = tempfile::tempdir().unwrap();
    write_file(dir.path(), "bad.json", "{ \"path\": 1 }");
    let output = aspectweave(dir.path(), &["bad.json"]);
    assert_eq!(output.status.code(), Some(3));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("error: failed to parse translation unit"));
    assert!(stderr.contains("bad.json"));
}

#[test]
fn cli_macro_hygiene_needs_opt_in() {
    let dir = tempfile::tempdir().unwrap();
    write_file(dir.path(), "log.json", &macro_unit());
    write_file(dir.path(), ".aspectweave.yml", MACRO_CONFIG);

    let output = aspectweave(dir.path(), &["-o", "out", "log.json"]);
    assert_eq!(output.status.code(), Some(1));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("inside the expansion of macro LOG"));
    assert!(!dir.path().join("out/log.cc").exists());

    let output = aspectweave(dir.path(), &["--macro-aware", "-o", "out", "log.json"]);
    assert_eq!(output.status.code(), Some(0));
    let woven = fs::read_to_string(dir.path().join("out/log.cc")).unwrap();
    assert_eq!(woven, "int main ( ) { b(); LOG(\"hi\") a(); ; }");
}

#[test]
fn cli_json_output_with_plans() {
    let dir = tempfile::tempdir().unwrap();
    write_file(dir.path(), "shapes.json", &shapes_unit());
    write_file(dir.path(), ".aspectweave.yml", SHAPES_CONFIG);

    let output = aspectweave(dir.path(), &["-f", "json", "--plans", "shapes.json"]);
    assert_eq!(output.status.code(), Some(0));
    let v: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(v["metadata"]["woven_count"], 1);
    assert_eq!(v["units"][0]["path"], "src/shapes.cc");
    assert_eq!(v["units"][0]["plans"][2]["join_point"], "call(void draw()) in main");
}
