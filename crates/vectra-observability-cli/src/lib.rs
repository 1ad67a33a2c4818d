//! Command surface for the Vectra observability store.
//!
//! Hosts can embed the same behavior the `vectra-obs` binary exposes through:
//! - [`run_cli`] for full parsed CLI execution.
//! - [`run_with_config`] for one command against an explicit configuration.
//! - [`run_command`] for one command against an already opened [`SqliteLogger`].

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde_json::{json, Value};
use vectra_observability_core::{
    EventKind, LogRecord, MetricRecord, ObservabilityConfig, SessionRecord, TraceRecord,
};
use vectra_observability_store_sqlite::{SqliteLogger, WriteOutcome};

const DEFAULT_DB_PATH: &str = "./vectra_observability.sqlite3";
const DEFAULT_PROJECT_ID: &str = "default";

#[derive(Debug, Parser)]
#[command(name = "vectra-obs")]
#[command(about = "Vectra observability trace store CLI")]
pub struct Cli {
    /// JSON configuration file; flags below override its values.
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long)]
    db: Option<PathBuf>,

    #[arg(long)]
    project_id: Option<String>,

    #[arg(long, value_enum, default_value_t = LogLevelArg::Warn)]
    log_level: LogLevelArg,

    #[command(subcommand)]
    command: Command,
}

impl Cli {
    #[must_use]
    pub fn log_level(&self) -> tracing::Level {
        match self.log_level {
            LogLevelArg::Trace => tracing::Level::TRACE,
            LogLevelArg::Debug => tracing::Level::DEBUG,
            LogLevelArg::Info => tracing::Level::INFO,
            LogLevelArg::Warn => tracing::Level::WARN,
            LogLevelArg::Error => tracing::Level::ERROR,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogLevelArg {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    Trace {
        #[command(subcommand)]
        command: TraceCommand,
    },
    Metric {
        #[command(subcommand)]
        command: MetricCommand,
    },
    Log {
        #[command(subcommand)]
        command: LogCommand,
    },
    Session {
        #[command(subcommand)]
        command: SessionCommand,
    },
}

#[derive(Debug, Subcommand)]
pub enum TraceCommand {
    Log(RecordArgs),
    Show(SpanKeyArgs),
    List(TraceIdArgs),
}

#[derive(Debug, Subcommand)]
pub enum MetricCommand {
    Log(RecordArgs),
    Show(MetricIdArgs),
}

#[derive(Debug, Subcommand)]
pub enum LogCommand {
    Write(RecordArgs),
    Show(LogIdArgs),
}

#[derive(Debug, Subcommand)]
pub enum SessionCommand {
    Log(RecordArgs),
    List(SessionIdArgs),
}

#[derive(Debug, Args)]
pub struct RecordArgs {
    /// Record as a JSON object.
    #[arg(long)]
    json: String,
}

#[derive(Debug, Args)]
pub struct SpanKeyArgs {
    #[arg(long)]
    trace_id: String,
    #[arg(long)]
    span_id: String,
}

#[derive(Debug, Args)]
pub struct TraceIdArgs {
    #[arg(long)]
    trace_id: String,
}

#[derive(Debug, Args)]
pub struct MetricIdArgs {
    #[arg(long)]
    metric_id: String,
}

#[derive(Debug, Args)]
pub struct LogIdArgs {
    #[arg(long)]
    log_id: String,
}

#[derive(Debug, Args)]
pub struct SessionIdArgs {
    #[arg(long)]
    session_id: String,
}

/// Executes a parsed CLI invocation and prints its JSON result.
///
/// # Errors
/// Returns an error when configuration loading, store open, or the
/// requested command fails.
pub fn run_cli(cli: Cli) -> Result<()> {
    let config = resolve_config(
        cli.config.as_deref(),
        cli.db.as_deref(),
        cli.project_id.as_deref(),
    )?;
    let output = run_with_config(&config, cli.command)?;
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

/// Opens a logger for `config` and executes one command against it.
///
/// # Errors
/// Returns an error when the store cannot be opened or the command fails.
pub fn run_with_config(config: &ObservabilityConfig, command: Command) -> Result<Value> {
    let logger = SqliteLogger::open(config).context("failed to open observability store")?;
    run_command(command, &logger)
}

/// Executes one command against an existing logger and returns its JSON
/// result.
///
/// # Errors
/// Returns an error when record decoding, validation, persistence, or a
/// lookup fails, or when a looked-up record does not exist.
pub fn run_command(command: Command, logger: &SqliteLogger) -> Result<Value> {
    match command {
        Command::Trace { command } => run_trace(command, logger),
        Command::Metric { command } => run_metric(command, logger),
        Command::Log { command } => run_log(command, logger),
        Command::Session { command } => run_session(command, logger),
    }
}

fn run_trace(command: TraceCommand, logger: &SqliteLogger) -> Result<Value> {
    match command {
        TraceCommand::Log(args) => {
            let record = TraceRecord::from_json(&parse_record_json(&args.json)?)?;
            let outcome = logger.log_trace(&record)?;
            Ok(write_report(
                EventKind::Trace,
                outcome,
                json!({"trace_id": record.trace_id, "span_id": record.span_id}),
            ))
        }
        TraceCommand::Show(args) => {
            let Some(span) = logger.get_span(&args.trace_id, &args.span_id)? else {
                return Err(anyhow!(
                    "trace span not found for {}/{}",
                    args.trace_id,
                    args.span_id
                ));
            };
            Ok(serde_json::to_value(span)?)
        }
        TraceCommand::List(args) => Ok(serde_json::to_value(logger.list_spans(&args.trace_id)?)?),
    }
}

fn run_metric(command: MetricCommand, logger: &SqliteLogger) -> Result<Value> {
    match command {
        MetricCommand::Log(args) => {
            let record = MetricRecord::from_json(&parse_record_json(&args.json)?)?;
            let outcome = logger.log_metric(&record)?;
            Ok(write_report(
                EventKind::Metric,
                outcome,
                json!({"metric_id": record.metric_id}),
            ))
        }
        MetricCommand::Show(args) => {
            let Some(metric) = logger.get_metric(&args.metric_id)? else {
                return Err(anyhow!("metric not found for {}", args.metric_id));
            };
            Ok(serde_json::to_value(metric)?)
        }
    }
}

fn run_log(command: LogCommand, logger: &SqliteLogger) -> Result<Value> {
    match command {
        LogCommand::Write(args) => {
            let record = LogRecord::from_json(&parse_record_json(&args.json)?)?;
            let outcome = logger.log_log(&record)?;
            Ok(write_report(
                EventKind::Log,
                outcome,
                json!({"log_id": record.log_id}),
            ))
        }
        LogCommand::Show(args) => {
            let Some(log) = logger.get_log(&args.log_id)? else {
                return Err(anyhow!("log not found for {}", args.log_id));
            };
            Ok(serde_json::to_value(log)?)
        }
    }
}

fn run_session(command: SessionCommand, logger: &SqliteLogger) -> Result<Value> {
    match command {
        SessionCommand::Log(args) => {
            let record = SessionRecord::from_json(&parse_record_json(&args.json)?)?;
            let outcome = logger.log_session(&record)?;
            Ok(write_report(
                EventKind::Session,
                outcome,
                json!({"session_id": record.session_id}),
            ))
        }
        SessionCommand::List(args) => Ok(serde_json::to_value(
            logger.list_session_events(&args.session_id)?,
        )?),
    }
}

fn write_report(kind: EventKind, outcome: WriteOutcome, ids: Value) -> Value {
    let mut report = json!({
        "kind": kind.as_str(),
        "outcome": outcome.as_str(),
    });
    if let (Some(target), Value::Object(ids)) = (report.as_object_mut(), ids) {
        target.extend(ids);
    }
    report
}

fn parse_record_json(raw: &str) -> Result<Value> {
    serde_json::from_str(raw).context("--json must be a valid JSON object")
}

/// Builds the effective configuration: file values first, then flag
/// overrides. Without a file every event kind is tracked.
///
/// # Errors
/// Returns an error when the configuration file cannot be read or decoded.
pub fn resolve_config(
    config_path: Option<&Path>,
    db: Option<&Path>,
    project_id: Option<&str>,
) -> Result<ObservabilityConfig> {
    let mut config = match config_path {
        Some(path) => {
            let body = fs::read_to_string(path)
                .with_context(|| format!("failed to read config file {}", path.display()))?;
            let value: Value = serde_json::from_str(&body)
                .with_context(|| format!("config file {} is not valid JSON", path.display()))?;
            ObservabilityConfig::from_json(&value)?
        }
        None => ObservabilityConfig::new(DEFAULT_DB_PATH, DEFAULT_PROJECT_ID),
    };

    if let Some(db) = db {
        config.storage_path = db.to_path_buf();
    }
    if let Some(project_id) = project_id {
        config.project_id = project_id.to_string();
    }

    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use vectra_observability_core::ObservabilityError;

    fn must<T>(result: Result<T>) -> T {
        match result {
            Ok(value) => value,
            Err(err) => panic!("test failure: {err:#}"),
        }
    }

    fn memory_logger() -> SqliteLogger {
        match SqliteLogger::open(&ObservabilityConfig::new(":memory:", "cli-test")) {
            Ok(logger) => logger,
            Err(err) => panic!("failed to open logger: {err}"),
        }
    }

    fn parse(args: &[&str]) -> Cli {
        match Cli::try_parse_from(args) {
            Ok(cli) => cli,
            Err(err) => panic!("failed to parse {args:?}: {err}"),
        }
    }

    #[test]
    fn trace_log_then_show_returns_the_span() {
        let logger = memory_logger();
        let cli = parse(&[
            "vectra-obs",
            "trace",
            "log",
            "--json",
            r#"{"trace_id":"trace-1","span_id":"span-1","name":"test-span","start_time":1000,"end_time":1100,"provider":"openai","model_name":"gpt-4"}"#,
        ]);
        let report = must(run_command(cli.command, &logger));
        assert_eq!(report["outcome"], json!("persisted"));
        assert_eq!(report["kind"], json!("trace"));
        assert_eq!(report["span_id"], json!("span-1"));

        let cli = parse(&[
            "vectra-obs",
            "trace",
            "show",
            "--trace-id",
            "trace-1",
            "--span-id",
            "span-1",
        ]);
        let span = must(run_command(cli.command, &logger));
        assert_eq!(span["provider"], json!("openai"));
        assert_eq!(span["model_name"], json!("gpt-4"));
        assert_eq!(span["project_id"], json!("cli-test"));
    }

    #[test]
    fn missing_span_is_reported() {
        let logger = memory_logger();
        let cli = parse(&[
            "vectra-obs",
            "trace",
            "show",
            "--trace-id",
            "nope",
            "--span-id",
            "nope",
        ]);
        let err = match run_command(cli.command, &logger) {
            Ok(value) => panic!("expected error, got {value}"),
            Err(err) => err,
        };
        assert!(err.to_string().contains("trace span not found"));
    }

    #[test]
    fn malformed_record_surfaces_validation_error() {
        let logger = memory_logger();
        let cli = parse(&[
            "vectra-obs",
            "trace",
            "log",
            "--json",
            r#"{"span_id":"span-1","name":"x","start_time":1,"end_time":2,"provider":"p","model_name":"m"}"#,
        ]);
        let err = match run_command(cli.command, &logger) {
            Ok(value) => panic!("expected error, got {value}"),
            Err(err) => err,
        };
        assert!(matches!(
            err.downcast_ref::<ObservabilityError>(),
            Some(ObservabilityError::Validation(_))
        ));
    }

    #[test]
    fn session_events_accumulate() {
        let logger = memory_logger();
        for time in [100, 200] {
            let payload = format!(
                r#"{{"session_id":"session-1","last_activity_time":{time},"metadata":{{"last_query":"q{time}"}}}}"#
            );
            let cli = parse(&["vectra-obs", "session", "log", "--json", &payload]);
            must(run_command(cli.command, &logger));
        }

        let cli = parse(&["vectra-obs", "session", "list", "--session-id", "session-1"]);
        let events = must(run_command(cli.command, &logger));
        let Some(events) = events.as_array() else {
            panic!("expected array, got {events}");
        };
        assert_eq!(events.len(), 2);
        assert_eq!(events[1]["metadata"]["last_query"], json!("q200"));
    }

    #[test]
    fn config_file_values_are_overridden_by_flags() {
        let path = std::env::temp_dir().join(format!(
            "vectra-obs-config-{}.json",
            vectra_observability_core::generate_id()
        ));
        let body = json!({
            "enabled": true,
            "sqlite_path": "from-file.db",
            "project_id": "file-project",
            "track_traces": true
        });
        if let Err(err) = fs::write(&path, body.to_string()) {
            panic!("failed to write config: {err}");
        }

        let config = must(resolve_config(
            Some(&path),
            Some(Path::new("override.db")),
            None,
        ));
        assert_eq!(config.storage_path, PathBuf::from("override.db"));
        assert_eq!(config.project_id, "file-project");
        assert!(config.track_traces);
        assert!(!config.track_metrics);

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn default_config_tracks_everything() {
        let config = must(resolve_config(None, None, Some("p")));
        assert_eq!(config.tracked_kinds(), EventKind::ALL.to_vec());
        assert_eq!(config.project_id, "p");
    }

    #[test]
    fn log_level_flag_maps_to_tracing_level() {
        let cli = parse(&[
            "vectra-obs",
            "--log-level",
            "debug",
            "trace",
            "list",
            "--trace-id",
            "t",
        ]);
        assert_eq!(cli.log_level(), tracing::Level::DEBUG);
    }
}
