#![allow(clippy::single_match_else, clippy::uninlined_format_args)]

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use jsonschema::JSONSchema;
use rusqlite::{Connection, OptionalExtension};
use serde_json::{json, Value};
use ulid::Ulid;

const SCENARIO_SPAN: &str = r#"{"trace_id":"trace-1","span_id":"span-1","name":"test-span","start_time":1000,"end_time":1100,"provider":"openai","model_name":"gpt-4"}"#;

fn repo_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("../..")
        .canonicalize()
        .unwrap_or_else(|err| panic!("failed to canonicalize repo root: {err}"))
}

fn temp_path(name: &str, extension: &str) -> PathBuf {
    std::env::temp_dir().join(format!("vectra-obs-cli-{name}-{}.{extension}", Ulid::new()))
}

fn write_config(name: &str, db_path: &Path, enabled: bool, track_traces: bool) -> PathBuf {
    let path = temp_path(name, "json");
    let body = json!({
        "enabled": enabled,
        "sqlite_path": db_path,
        "project_id": "test-project",
        "track_traces": track_traces,
        "track_metrics": false,
        "track_logs": false,
        "session_tracking": false
    });
    if let Err(err) = fs::write(&path, body.to_string()) {
        panic!("failed to write config {}: {err}", path.display());
    }
    path
}

fn obs_output(config_path: &Path, args: &[&str]) -> Output {
    let mut command = Command::new(env!("CARGO_BIN_EXE_vectra-obs"));
    command.arg("--config").arg(config_path);
    for arg in args {
        command.arg(arg);
    }

    match command.output() {
        Ok(output) => output,
        Err(err) => panic!("failed to run vectra-obs command {:?}: {err}", args),
    }
}

fn stdout_json(output: &Output) -> Value {
    match serde_json::from_slice::<Value>(&output.stdout) {
        Ok(value) => value,
        Err(err) => panic!(
            "failed to parse stdout as JSON: {err}\nstdout={}\nstderr={}",
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        ),
    }
}

fn read_json(path: &Path) -> Value {
    let body = fs::read_to_string(path)
        .unwrap_or_else(|err| panic!("failed to read {}: {err}", path.display()));
    serde_json::from_str(&body)
        .unwrap_or_else(|err| panic!("failed to parse {}: {err}", path.display()))
}

fn assert_schema(schema_name: &str, value: &Value) {
    let schema_path = repo_root()
        .join("contracts/v1/schemas")
        .join(schema_name);
    let schema = read_json(&schema_path);
    let compiled = JSONSchema::compile(&schema)
        .unwrap_or_else(|err| panic!("failed to compile {}: {err}", schema_path.display()));
    if let Some(errors) = compiled
        .validate(value)
        .err()
        .map(|iter| iter.map(|err| err.to_string()).collect::<Vec<_>>())
    {
        panic!(
            "schema validation failed for {}:\n{}",
            schema_path.display(),
            errors.join("\n")
        );
    }
}

fn cleanup(paths: &[&Path]) {
    for path in paths {
        for suffix in ["", "-wal", "-shm"] {
            let mut raw = path.as_os_str().to_os_string();
            raw.push(suffix);
            let _ = fs::remove_file(PathBuf::from(raw));
        }
    }
}

#[test]
fn help_contract_lists_expected_subcommands() {
    let output = match Command::new(env!("CARGO_BIN_EXE_vectra-obs"))
        .arg("--help")
        .output()
    {
        Ok(value) => value,
        Err(err) => panic!("failed to run help command: {err}"),
    };

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    for required in ["trace", "metric", "log", "session"] {
        assert!(
            stdout.contains(required),
            "expected help output to contain subcommand {required}; output={stdout}"
        );
    }
}

#[test]
fn logged_trace_is_persisted_and_readable_by_sqlite_clients() {
    let db_path = temp_path("scenario", "db");
    let config_path = write_config("scenario", &db_path, true, true);

    let output = obs_output(&config_path, &["trace", "log", "--json", SCENARIO_SPAN]);
    assert!(
        output.status.success(),
        "stderr={}",
        String::from_utf8_lossy(&output.stderr)
    );
    let report = stdout_json(&output);
    assert_schema("write-report.schema.json", &report);
    assert_eq!(report["outcome"], json!("persisted"));

    let conn = match Connection::open(&db_path) {
        Ok(value) => value,
        Err(err) => panic!("failed to open store: {err}"),
    };
    let row = conn.query_row(
        "SELECT provider, model_name, project_id FROM traces WHERE trace_id = 'trace-1'",
        [],
        |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        },
    );
    match row {
        Ok((provider, model_name, project_id)) => {
            assert_eq!(provider, "openai");
            assert_eq!(model_name, "gpt-4");
            assert_eq!(project_id, "test-project");
        }
        Err(err) => panic!("expected persisted trace row: {err}"),
    }
    drop(conn);

    let output = obs_output(
        &config_path,
        &["trace", "show", "--trace-id", "trace-1", "--span-id", "span-1"],
    );
    assert!(output.status.success());
    let span = stdout_json(&output);
    assert_schema("trace-span.schema.json", &span);
    assert_eq!(span["start_time"], json!(1000));
    assert_eq!(span["end_time"], json!(1100));

    cleanup(&[&db_path, &config_path]);
}

#[test]
fn untracked_trace_leaves_no_rows() {
    let db_path = temp_path("gated", "db");
    let config_path = write_config("gated", &db_path, true, false);

    let output = obs_output(&config_path, &["trace", "log", "--json", SCENARIO_SPAN]);
    assert!(output.status.success());
    let report = stdout_json(&output);
    assert_schema("write-report.schema.json", &report);
    assert_eq!(report["outcome"], json!("skipped_kind_not_tracked"));

    let conn = match Connection::open(&db_path) {
        Ok(value) => value,
        Err(err) => panic!("failed to open store: {err}"),
    };
    let traces_table = conn
        .query_row(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name = 'traces'",
            [],
            |row| row.get::<_, String>(0),
        )
        .optional();
    match traces_table {
        Ok(found) => assert!(found.is_none()),
        Err(err) => panic!("failed to query sqlite_master: {err}"),
    }
    drop(conn);

    cleanup(&[&db_path, &config_path]);
}

#[test]
fn disabled_config_creates_no_store() {
    let db_path = temp_path("disabled", "db");
    let config_path = write_config("disabled", &db_path, false, true);

    for _ in 0..2 {
        let output = obs_output(&config_path, &["trace", "log", "--json", SCENARIO_SPAN]);
        assert!(output.status.success());
        let report = stdout_json(&output);
        assert_eq!(report["outcome"], json!("skipped_logger_disabled"));
    }
    assert!(!db_path.exists());

    cleanup(&[&config_path]);
}

#[test]
fn error_shape_for_missing_span_is_stable() {
    let db_path = temp_path("missing", "db");
    let config_path = write_config("missing", &db_path, true, true);

    let output = obs_output(
        &config_path,
        &["trace", "show", "--trace-id", "trace-x", "--span-id", "span-x"],
    );
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("trace span not found for trace-x/span-x"),
        "stderr={stderr}"
    );

    cleanup(&[&db_path, &config_path]);
}

#[test]
fn invalid_record_exits_non_zero_with_validation_message() {
    let db_path = temp_path("invalid", "db");
    let config_path = write_config("invalid", &db_path, true, true);

    let output = obs_output(
        &config_path,
        &[
            "trace",
            "log",
            "--json",
            r#"{"trace_id":"trace-1","span_id":"span-1","name":"x","start_time":10,"end_time":5,"provider":"p","model_name":"m"}"#,
        ],
    );
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("validation error"), "stderr={stderr}");

    cleanup(&[&db_path, &config_path]);
}
