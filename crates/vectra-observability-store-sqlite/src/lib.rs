#![forbid(unsafe_code)]

//! `SQLite`-backed persistence for observability events.
//!
//! [`SqliteLogger`] owns a single connection guarded by a mutex. Every
//! `log_*` call is gated by the configuration, validated, and written in its
//! own committed transaction before it returns.

use std::path::Path;

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Transaction, TransactionBehavior};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};
use vectra_observability_core::{
    format_rfc3339, now_utc, EventKind, LogLevel, LogRecord, MetricRecord, ObservabilityConfig,
    ObservabilityError, SessionRecord, TraceRecord,
};

pub type Result<T, E = ObservabilityError> = std::result::Result<T, E>;

const SCHEMA_VERSION: i64 = 1;

const SCHEMA_MIGRATIONS: &str = r"
CREATE TABLE IF NOT EXISTS schema_migrations (
  kind TEXT NOT NULL,
  version INTEGER NOT NULL,
  applied_at TEXT NOT NULL,
  PRIMARY KEY (kind, version)
);
";

const TRACES_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS traces (
  trace_id TEXT NOT NULL,
  span_id TEXT NOT NULL,
  name TEXT NOT NULL,
  start_time INTEGER NOT NULL,
  end_time INTEGER NOT NULL,
  provider TEXT NOT NULL,
  model_name TEXT NOT NULL,
  project_id TEXT NOT NULL DEFAULT '',
  parent_span_id TEXT,
  input TEXT,
  output TEXT,
  attributes TEXT NOT NULL DEFAULT '{}',
  error TEXT,
  recorded_at TEXT,
  CHECK (end_time >= start_time)
);
";

// Columns added after the first traces layout shipped.
const TRACE_COLUMN_UPGRADES: [(&str, &str); 7] = [
    ("project_id", "TEXT NOT NULL DEFAULT ''"),
    ("parent_span_id", "TEXT"),
    ("input", "TEXT"),
    ("output", "TEXT"),
    ("attributes", "TEXT NOT NULL DEFAULT '{}'"),
    ("error", "TEXT"),
    ("recorded_at", "TEXT"),
];

const TRACES_UNIQUE_SPAN_INDEX: &str =
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_traces_trace_span ON traces(trace_id, span_id);";

// Legacy stores may already hold repeated spans; they get a plain lookup index
// and rely on the insert guard in `log_trace`.
const TRACES_SPAN_LOOKUP_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_traces_trace_span_lookup ON traces(trace_id, span_id);";

const TRACES_INDEXES: &str = r"
CREATE INDEX IF NOT EXISTS idx_traces_project_start ON traces(project_id, start_time);

CREATE TRIGGER IF NOT EXISTS trg_traces_no_update
BEFORE UPDATE ON traces
BEGIN
  SELECT RAISE(FAIL, 'traces is append-only');
END;
CREATE TRIGGER IF NOT EXISTS trg_traces_no_delete
BEFORE DELETE ON traces
BEGIN
  SELECT RAISE(FAIL, 'traces is append-only');
END;
";

const METRICS_SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS metrics (
  metric_id TEXT PRIMARY KEY,
  project_id TEXT NOT NULL DEFAULT '',
  timestamp INTEGER NOT NULL,
  name TEXT NOT NULL,
  value REAL NOT NULL,
  trace_id TEXT,
  span_id TEXT,
  attributes TEXT NOT NULL DEFAULT '{}',
  recorded_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_metrics_name_timestamp ON metrics(name, timestamp);
CREATE INDEX IF NOT EXISTS idx_metrics_trace ON metrics(trace_id, span_id);

CREATE TRIGGER IF NOT EXISTS trg_metrics_no_update
BEFORE UPDATE ON metrics
BEGIN
  SELECT RAISE(FAIL, 'metrics is append-only');
END;
CREATE TRIGGER IF NOT EXISTS trg_metrics_no_delete
BEFORE DELETE ON metrics
BEGIN
  SELECT RAISE(FAIL, 'metrics is append-only');
END;
";

const LOGS_SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS logs (
  log_id TEXT PRIMARY KEY,
  project_id TEXT NOT NULL DEFAULT '',
  timestamp INTEGER NOT NULL,
  level TEXT NOT NULL CHECK (level IN ('trace','debug','info','warn','error')),
  message TEXT NOT NULL,
  trace_id TEXT,
  span_id TEXT,
  attributes TEXT NOT NULL DEFAULT '{}',
  recorded_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_logs_trace ON logs(trace_id, timestamp);

CREATE TRIGGER IF NOT EXISTS trg_logs_no_update
BEFORE UPDATE ON logs
BEGIN
  SELECT RAISE(FAIL, 'logs is append-only');
END;
CREATE TRIGGER IF NOT EXISTS trg_logs_no_delete
BEFORE DELETE ON logs
BEGIN
  SELECT RAISE(FAIL, 'logs is append-only');
END;
";

const SESSIONS_SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS sessions (
  event_seq INTEGER PRIMARY KEY AUTOINCREMENT,
  session_id TEXT NOT NULL,
  project_id TEXT NOT NULL DEFAULT '',
  last_activity_time INTEGER NOT NULL,
  metadata TEXT NOT NULL DEFAULT '{}',
  recorded_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_sessions_session_seq ON sessions(session_id, event_seq);

CREATE TRIGGER IF NOT EXISTS trg_sessions_no_update
BEFORE UPDATE ON sessions
BEGIN
  SELECT RAISE(FAIL, 'sessions is append-only');
END;
CREATE TRIGGER IF NOT EXISTS trg_sessions_no_delete
BEFORE DELETE ON sessions
BEGIN
  SELECT RAISE(FAIL, 'sessions is append-only');
END;
";

// Legacy traces columns are nullable; reads fall back to empty values.
const TRACE_COLUMNS: &str = "trace_id, span_id, parent_span_id,
    COALESCE(name, ''), COALESCE(start_time, 0), COALESCE(end_time, start_time, 0),
    COALESCE(provider, ''), COALESCE(model_name, ''), input, output,
    COALESCE(attributes, '{}'), error, COALESCE(project_id, ''), recorded_at";
const METRIC_COLUMNS: &str =
    "metric_id, timestamp, name, value, trace_id, span_id, attributes, project_id, recorded_at";
const LOG_COLUMNS: &str =
    "log_id, timestamp, level, message, trace_id, span_id, attributes, project_id, recorded_at";
const SESSION_COLUMNS: &str = "session_id, last_activity_time, metadata, project_id, recorded_at";

/// Why a `log_*` call returned without touching storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    LoggerDisabled,
    KindNotTracked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Persisted,
    Skipped(SkipReason),
}

impl WriteOutcome {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Persisted => "persisted",
            Self::Skipped(SkipReason::LoggerDisabled) => "skipped_logger_disabled",
            Self::Skipped(SkipReason::KindNotTracked) => "skipped_kind_not_tracked",
        }
    }

    #[must_use]
    pub fn is_persisted(self) -> bool {
        matches!(self, Self::Persisted)
    }
}

/// A persisted record together with the columns the logger stamps on it.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Stored<T> {
    pub project_id: String,
    pub recorded_at: Option<String>,
    #[serde(flatten)]
    pub record: T,
}

pub struct SqliteLogger {
    config: ObservabilityConfig,
    conn: Option<Mutex<Connection>>,
}

impl SqliteLogger {
    /// Opens the store described by `config` and bootstraps the tables of
    /// every tracked kind. A disabled configuration opens nothing.
    ///
    /// # Errors
    /// Returns [`ObservabilityError::Configuration`] when the configuration is
    /// invalid or the store cannot be opened, configured, or migrated.
    pub fn open(config: &ObservabilityConfig) -> Result<Self> {
        if !config.enabled {
            info!("observability logger disabled; no storage will be opened");
            return Ok(Self {
                config: config.clone(),
                conn: None,
            });
        }

        config.validate()?;
        let path = config.storage_path.as_path();
        ensure_parent_dir(path)?;

        let mut conn = Connection::open(path).map_err(|err| {
            ObservabilityError::Configuration(format!(
                "failed to open sqlite database at {}: {err}",
                path.display()
            ))
        })?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = FULL;
             PRAGMA busy_timeout = 5000;",
        )
        .map_err(|err| {
            ObservabilityError::Configuration(format!("failed to configure sqlite pragmas: {err}"))
        })?;

        let kinds = config.tracked_kinds();
        migrate(&mut conn, &kinds)?;

        info!(
            path = %path.display(),
            project_id = %config.project_id,
            kinds = ?kinds,
            "observability store ready"
        );

        Ok(Self {
            config: config.clone(),
            conn: Some(Mutex::new(conn)),
        })
    }

    #[must_use]
    pub fn config(&self) -> &ObservabilityConfig {
        &self.config
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.conn.is_some()
    }

    /// Appends one span when traces are tracked.
    ///
    /// # Errors
    /// Returns [`ObservabilityError::Validation`] for an invalid record and
    /// [`ObservabilityError::Persistence`] when the span is already recorded
    /// or the write cannot be committed.
    pub fn log_trace(&self, record: &TraceRecord) -> Result<WriteOutcome> {
        let conn = match self.gate(EventKind::Trace) {
            Ok(conn) => conn,
            Err(reason) => return Ok(skipped(EventKind::Trace, reason)),
        };
        record.validate()?;

        let input = optional_json_text(record.input.as_ref())?;
        let output = optional_json_text(record.output.as_ref())?;
        let error = optional_json_text(record.error.as_ref())?;
        let attributes = json_text(&record.attributes)?;

        append(conn, EventKind::Trace, |tx, recorded_at| {
            tx.execute(
                "INSERT INTO traces(
                    trace_id, span_id, parent_span_id, name, start_time, end_time,
                    provider, model_name, input, output, attributes, error,
                    project_id, recorded_at
                 )
                 SELECT ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14
                 WHERE NOT EXISTS (
                    SELECT 1 FROM traces WHERE trace_id = ?1 AND span_id = ?2
                 )",
                params![
                    record.trace_id,
                    record.span_id,
                    record.parent_span_id,
                    record.name,
                    record.start_time,
                    record.end_time,
                    record.provider,
                    record.model_name,
                    input,
                    output,
                    attributes,
                    error,
                    self.config.project_id,
                    recorded_at,
                ],
            )
        })?;

        debug!(
            trace_id = %record.trace_id,
            span_id = %record.span_id,
            provider = %record.provider,
            model_name = %record.model_name,
            "trace span persisted"
        );
        Ok(WriteOutcome::Persisted)
    }

    /// # Errors
    /// Returns [`ObservabilityError::Validation`] for an invalid record and
    /// [`ObservabilityError::Persistence`] when the write cannot be committed.
    pub fn log_metric(&self, record: &MetricRecord) -> Result<WriteOutcome> {
        let conn = match self.gate(EventKind::Metric) {
            Ok(conn) => conn,
            Err(reason) => return Ok(skipped(EventKind::Metric, reason)),
        };
        record.validate()?;
        let attributes = json_text(&record.attributes)?;

        append(conn, EventKind::Metric, |tx, recorded_at| {
            tx.execute(
                "INSERT INTO metrics(
                    metric_id, timestamp, name, value, trace_id, span_id,
                    attributes, project_id, recorded_at
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    record.metric_id,
                    record.timestamp,
                    record.name,
                    record.value,
                    record.trace_id,
                    record.span_id,
                    attributes,
                    self.config.project_id,
                    recorded_at,
                ],
            )
        })?;

        debug!(metric_id = %record.metric_id, name = %record.name, "metric persisted");
        Ok(WriteOutcome::Persisted)
    }

    /// # Errors
    /// Returns [`ObservabilityError::Validation`] for an invalid record and
    /// [`ObservabilityError::Persistence`] when the write cannot be committed.
    pub fn log_log(&self, record: &LogRecord) -> Result<WriteOutcome> {
        let conn = match self.gate(EventKind::Log) {
            Ok(conn) => conn,
            Err(reason) => return Ok(skipped(EventKind::Log, reason)),
        };
        record.validate()?;
        let attributes = json_text(&record.attributes)?;

        append(conn, EventKind::Log, |tx, recorded_at| {
            tx.execute(
                "INSERT INTO logs(
                    log_id, timestamp, level, message, trace_id, span_id,
                    attributes, project_id, recorded_at
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    record.log_id,
                    record.timestamp,
                    record.level.as_str(),
                    record.message,
                    record.trace_id,
                    record.span_id,
                    attributes,
                    self.config.project_id,
                    recorded_at,
                ],
            )
        })?;

        debug!(log_id = %record.log_id, level = record.level.as_str(), "log persisted");
        Ok(WriteOutcome::Persisted)
    }

    /// Appends one session activity event. Earlier events are never updated.
    ///
    /// # Errors
    /// Returns [`ObservabilityError::Validation`] for an invalid record and
    /// [`ObservabilityError::Persistence`] when the write cannot be committed.
    pub fn log_session(&self, record: &SessionRecord) -> Result<WriteOutcome> {
        let conn = match self.gate(EventKind::Session) {
            Ok(conn) => conn,
            Err(reason) => return Ok(skipped(EventKind::Session, reason)),
        };
        record.validate()?;
        let metadata = json_text(&record.metadata)?;

        append(conn, EventKind::Session, |tx, recorded_at| {
            tx.execute(
                "INSERT INTO sessions(
                    session_id, last_activity_time, metadata, project_id, recorded_at
                 ) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    record.session_id,
                    record.last_activity_time,
                    metadata,
                    self.config.project_id,
                    recorded_at,
                ],
            )
        })?;

        debug!(session_id = %record.session_id, "session event persisted");
        Ok(WriteOutcome::Persisted)
    }

    /// # Errors
    /// Returns [`ObservabilityError::Persistence`] when the row cannot be read.
    pub fn get_span(&self, trace_id: &str, span_id: &str) -> Result<Option<Stored<TraceRecord>>> {
        let Ok(conn) = self.gate(EventKind::Trace) else {
            return Ok(None);
        };
        let conn = conn.lock();
        conn.query_row(
            &format!("SELECT {TRACE_COLUMNS} FROM traces WHERE trace_id = ?1 AND span_id = ?2"),
            params![trace_id, span_id],
            parse_trace_row,
        )
        .optional()
        .map_err(|err| read_error(EventKind::Trace, &err))
    }

    /// Spans of one trace ordered by start time, then insertion order.
    ///
    /// # Errors
    /// Returns [`ObservabilityError::Persistence`] when any row cannot be read.
    pub fn list_spans(&self, trace_id: &str) -> Result<Vec<Stored<TraceRecord>>> {
        let Ok(conn) = self.gate(EventKind::Trace) else {
            return Ok(Vec::new());
        };
        let conn = conn.lock();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {TRACE_COLUMNS} FROM traces
                 WHERE trace_id = ?1
                 ORDER BY start_time ASC, rowid ASC"
            ))
            .map_err(|err| read_error(EventKind::Trace, &err))?;
        let rows = stmt
            .query_map(params![trace_id], parse_trace_row)
            .map_err(|err| read_error(EventKind::Trace, &err))?;
        collect_rows(EventKind::Trace, rows)
    }

    /// # Errors
    /// Returns [`ObservabilityError::Persistence`] when the row cannot be read.
    pub fn get_metric(&self, metric_id: &str) -> Result<Option<Stored<MetricRecord>>> {
        let Ok(conn) = self.gate(EventKind::Metric) else {
            return Ok(None);
        };
        let conn = conn.lock();
        conn.query_row(
            &format!("SELECT {METRIC_COLUMNS} FROM metrics WHERE metric_id = ?1"),
            params![metric_id],
            parse_metric_row,
        )
        .optional()
        .map_err(|err| read_error(EventKind::Metric, &err))
    }

    /// # Errors
    /// Returns [`ObservabilityError::Persistence`] when the row cannot be read.
    pub fn get_log(&self, log_id: &str) -> Result<Option<Stored<LogRecord>>> {
        let Ok(conn) = self.gate(EventKind::Log) else {
            return Ok(None);
        };
        let conn = conn.lock();
        conn.query_row(
            &format!("SELECT {LOG_COLUMNS} FROM logs WHERE log_id = ?1"),
            params![log_id],
            parse_log_row,
        )
        .optional()
        .map_err(|err| read_error(EventKind::Log, &err))
    }

    /// Activity events of one session in insertion order.
    ///
    /// # Errors
    /// Returns [`ObservabilityError::Persistence`] when any row cannot be read.
    pub fn list_session_events(&self, session_id: &str) -> Result<Vec<Stored<SessionRecord>>> {
        let Ok(conn) = self.gate(EventKind::Session) else {
            return Ok(Vec::new());
        };
        let conn = conn.lock();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {SESSION_COLUMNS} FROM sessions
                 WHERE session_id = ?1
                 ORDER BY event_seq ASC"
            ))
            .map_err(|err| read_error(EventKind::Session, &err))?;
        let rows = stmt
            .query_map(params![session_id], parse_session_row)
            .map_err(|err| read_error(EventKind::Session, &err))?;
        collect_rows(EventKind::Session, rows)
    }

    fn gate(&self, kind: EventKind) -> std::result::Result<&Mutex<Connection>, SkipReason> {
        let Some(conn) = &self.conn else {
            return Err(SkipReason::LoggerDisabled);
        };
        if !self.config.tracks(kind) {
            return Err(SkipReason::KindNotTracked);
        }
        Ok(conn)
    }
}

fn skipped(kind: EventKind, reason: SkipReason) -> WriteOutcome {
    debug!(kind = kind.as_str(), reason = ?reason, "event not persisted");
    WriteOutcome::Skipped(reason)
}

/// Runs one insert in its own immediate transaction and commits it.
fn append<F>(conn: &Mutex<Connection>, kind: EventKind, insert: F) -> Result<()>
where
    F: FnOnce(&Transaction<'_>, &str) -> rusqlite::Result<usize>,
{
    let recorded_at = format_rfc3339(now_utc())?;
    let mut guard = conn.lock();

    let tx = guard
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .map_err(|err| write_error(kind, "failed to start transaction", &err))?;
    let inserted = insert(&tx, &recorded_at)
        .map_err(|err| write_error(kind, "failed to append row", &err))?;
    if inserted == 0 {
        warn!(kind = kind.as_str(), "duplicate event rejected");
        return Err(ObservabilityError::Persistence(format!(
            "{} event already recorded; identifiers must be unique",
            kind.as_str()
        )));
    }
    if inserted != 1 {
        return Err(ObservabilityError::Persistence(format!(
            "expected to append 1 {} row, appended {inserted}",
            kind.as_str()
        )));
    }
    tx.commit()
        .map_err(|err| write_error(kind, "failed to commit transaction", &err))
}

fn migrate(conn: &mut Connection, kinds: &[EventKind]) -> Result<()> {
    let tx = conn
        .transaction()
        .map_err(|err| bootstrap_error("failed to start schema transaction", &err))?;

    tx.execute_batch(SCHEMA_MIGRATIONS)
        .map_err(|err| bootstrap_error("failed to ensure schema_migrations exists", &err))?;

    let applied_at = format_rfc3339(now_utc())?;
    for kind in kinds {
        match kind {
            EventKind::Trace => {
                tx.execute_batch(TRACES_TABLE)
                    .map_err(|err| bootstrap_error("failed to apply traces schema", &err))?;
                for (column, sql_type) in TRACE_COLUMN_UPGRADES {
                    ensure_column(&tx, "traces", column, sql_type)?;
                }
                ensure_span_index(&tx)?;
                tx.execute_batch(TRACES_INDEXES)
                    .map_err(|err| bootstrap_error("failed to apply traces indexes", &err))?;
            }
            EventKind::Metric => tx
                .execute_batch(METRICS_SCHEMA)
                .map_err(|err| bootstrap_error("failed to apply metrics schema", &err))?,
            EventKind::Log => tx
                .execute_batch(LOGS_SCHEMA)
                .map_err(|err| bootstrap_error("failed to apply logs schema", &err))?,
            EventKind::Session => tx
                .execute_batch(SESSIONS_SCHEMA)
                .map_err(|err| bootstrap_error("failed to apply sessions schema", &err))?,
        }

        tx.execute(
            "INSERT OR IGNORE INTO schema_migrations(kind, version, applied_at) VALUES (?1, ?2, ?3)",
            params![kind.as_str(), SCHEMA_VERSION, applied_at],
        )
        .map_err(|err| bootstrap_error("failed to record schema migration", &err))?;
    }

    tx.commit()
        .map_err(|err| bootstrap_error("failed to commit schema transaction", &err))
}

fn ensure_span_index(conn: &Connection) -> Result<()> {
    let has_duplicates: bool = conn
        .query_row(
            "SELECT EXISTS(
                SELECT 1 FROM traces GROUP BY trace_id, span_id HAVING COUNT(*) > 1
             )",
            [],
            |row| row.get(0),
        )
        .map_err(|err| bootstrap_error("failed to inspect existing trace spans", &err))?;

    let index_sql = if has_duplicates {
        warn!("traces already holds repeated spans; keeping a non-unique span index");
        TRACES_SPAN_LOOKUP_INDEX
    } else {
        TRACES_UNIQUE_SPAN_INDEX
    };
    conn.execute_batch(index_sql)
        .map_err(|err| bootstrap_error("failed to apply traces span index", &err))
}

fn ensure_parent_dir(path: &Path) -> Result<()> {
    let Some(parent) = path.parent() else {
        return Ok(());
    };
    if parent.as_os_str().is_empty() || parent.is_dir() {
        return Ok(());
    }

    std::fs::create_dir_all(parent).map_err(|err| {
        ObservabilityError::Configuration(format!(
            "failed to create storage directory {}: {err}",
            parent.display()
        ))
    })
}

fn ensure_column(conn: &Connection, table: &str, column: &str, sql_type: &str) -> Result<()> {
    if table_has_column(conn, table, column)? {
        return Ok(());
    }

    info!(table, column, "upgrading legacy table with missing column");
    conn.execute(
        &format!("ALTER TABLE {table} ADD COLUMN {column} {sql_type}"),
        [],
    )
    .map_err(|err| bootstrap_error(&format!("failed to add column {table}.{column}"), &err))?;
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> Result<bool> {
    let inspect_error = |err: rusqlite::Error| {
        bootstrap_error(&format!("failed to inspect table_info for {table}"), &err)
    };

    let mut stmt = conn
        .prepare(&format!("PRAGMA table_info({table})"))
        .map_err(inspect_error)?;
    let mut rows = stmt.query([]).map_err(inspect_error)?;

    while let Some(row) = rows.next().map_err(inspect_error)? {
        let name: String = row.get(1).map_err(inspect_error)?;
        if name == column {
            return Ok(true);
        }
    }

    Ok(false)
}

fn parse_trace_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Stored<TraceRecord>> {
    Ok(Stored {
        record: TraceRecord {
            trace_id: row.get(0)?,
            span_id: row.get(1)?,
            parent_span_id: row.get(2)?,
            name: row.get(3)?,
            start_time: row.get(4)?,
            end_time: row.get(5)?,
            provider: row.get(6)?,
            model_name: row.get(7)?,
            input: parse_optional_json_column(8, row.get(8)?)?,
            output: parse_optional_json_column(9, row.get(9)?)?,
            attributes: parse_json_column(10, &row.get::<_, String>(10)?)?,
            error: parse_optional_json_column(11, row.get(11)?)?,
        },
        project_id: row.get(12)?,
        recorded_at: row.get(13)?,
    })
}

fn parse_metric_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Stored<MetricRecord>> {
    Ok(Stored {
        record: MetricRecord {
            metric_id: row.get(0)?,
            timestamp: row.get(1)?,
            name: row.get(2)?,
            value: row.get(3)?,
            trace_id: row.get(4)?,
            span_id: row.get(5)?,
            attributes: parse_json_column(6, &row.get::<_, String>(6)?)?,
        },
        project_id: row.get(7)?,
        recorded_at: row.get(8)?,
    })
}

fn parse_log_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Stored<LogRecord>> {
    let level_raw: String = row.get(2)?;
    let level = LogLevel::parse(&level_raw).ok_or_else(|| {
        conversion_error(
            2,
            ObservabilityError::Persistence(format!("invalid stored log level: {level_raw}")),
        )
    })?;

    Ok(Stored {
        record: LogRecord {
            log_id: row.get(0)?,
            timestamp: row.get(1)?,
            level,
            message: row.get(3)?,
            trace_id: row.get(4)?,
            span_id: row.get(5)?,
            attributes: parse_json_column(6, &row.get::<_, String>(6)?)?,
        },
        project_id: row.get(7)?,
        recorded_at: row.get(8)?,
    })
}

fn parse_session_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Stored<SessionRecord>> {
    Ok(Stored {
        record: SessionRecord {
            session_id: row.get(0)?,
            last_activity_time: row.get(1)?,
            metadata: parse_json_column(2, &row.get::<_, String>(2)?)?,
        },
        project_id: row.get(3)?,
        recorded_at: row.get(4)?,
    })
}

fn parse_json_column(index: usize, raw: &str) -> rusqlite::Result<Value> {
    serde_json::from_str(raw).map_err(|err| {
        rusqlite::Error::FromSqlConversionFailure(index, rusqlite::types::Type::Text, Box::new(err))
    })
}

fn parse_optional_json_column(index: usize, raw: Option<String>) -> rusqlite::Result<Option<Value>> {
    raw.map(|value| parse_json_column(index, &value)).transpose()
}

fn conversion_error(index: usize, err: ObservabilityError) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(index, rusqlite::types::Type::Text, Box::new(err))
}

fn json_text(value: &Value) -> Result<String> {
    serde_json::to_string(value).map_err(|err| {
        ObservabilityError::Validation(format!("failed to serialize JSON payload: {err}"))
    })
}

fn optional_json_text(value: Option<&Value>) -> Result<Option<String>> {
    value.map(json_text).transpose()
}

fn collect_rows<T>(
    kind: EventKind,
    rows: rusqlite::MappedRows<'_, impl FnMut(&rusqlite::Row<'_>) -> rusqlite::Result<T>>,
) -> Result<Vec<T>> {
    let mut values = Vec::new();
    for row in rows {
        values.push(row.map_err(|err| read_error(kind, &err))?);
    }
    Ok(values)
}

fn write_error(kind: EventKind, context: &str, err: &rusqlite::Error) -> ObservabilityError {
    warn!(kind = kind.as_str(), error = %err, "{context}");
    ObservabilityError::Persistence(format!("{context} for {} event: {err}", kind.as_str()))
}

fn read_error(kind: EventKind, err: &rusqlite::Error) -> ObservabilityError {
    ObservabilityError::Persistence(format!(
        "failed to read {} rows: {err}",
        kind.as_str()
    ))
}

fn bootstrap_error(context: &str, err: &rusqlite::Error) -> ObservabilityError {
    ObservabilityError::Configuration(format!("{context}: {err}"))
}
