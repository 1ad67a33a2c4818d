//! Record types, configuration and validation rules shared by the Vectra
//! observability logger and its command surface.
//!
//! Nothing in this crate performs I/O. Persistence lives in
//! `vectra-observability-store-sqlite`.

use std::path::PathBuf;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::{OffsetDateTime, UtcOffset};
use ulid::Ulid;

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum ObservabilityError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("configuration error: {0}")]
    Configuration(String),
}

/// The four event kinds the logger can persist, one table each.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Trace,
    Metric,
    Log,
    Session,
}

impl EventKind {
    pub const ALL: [Self; 4] = [Self::Trace, Self::Metric, Self::Log, Self::Session];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Metric => "metric",
            Self::Log => "log",
            Self::Session => "session",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "trace" => Some(Self::Trace),
            "metric" => Some(Self::Metric),
            "log" => Some(Self::Log),
            "session" => Some(Self::Session),
            _ => None,
        }
    }

    #[must_use]
    pub fn table_name(self) -> &'static str {
        match self {
            Self::Trace => "traces",
            Self::Metric => "metrics",
            Self::Log => "logs",
            Self::Session => "sessions",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ObservabilityConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default, alias = "sqlite_path")]
    pub storage_path: PathBuf,
    #[serde(default)]
    pub project_id: String,
    #[serde(default)]
    pub track_traces: bool,
    #[serde(default)]
    pub track_metrics: bool,
    #[serde(default)]
    pub track_logs: bool,
    #[serde(default)]
    pub session_tracking: bool,
}

fn default_enabled() -> bool {
    true
}

impl ObservabilityConfig {
    /// Enabled configuration that tracks every event kind.
    #[must_use]
    pub fn new(storage_path: impl Into<PathBuf>, project_id: impl Into<String>) -> Self {
        Self {
            enabled: true,
            storage_path: storage_path.into(),
            project_id: project_id.into(),
            track_traces: true,
            track_metrics: true,
            track_logs: true,
            session_tracking: true,
        }
    }

    /// Configuration for a logger that never touches storage.
    #[must_use]
    pub fn disabled(storage_path: impl Into<PathBuf>) -> Self {
        Self {
            enabled: false,
            storage_path: storage_path.into(),
            project_id: String::new(),
            track_traces: false,
            track_metrics: false,
            track_logs: false,
            session_tracking: false,
        }
    }

    /// Whether writes of `kind` reach storage. Always false when the
    /// master switch is off.
    #[must_use]
    pub fn tracks(&self, kind: EventKind) -> bool {
        if !self.enabled {
            return false;
        }

        match kind {
            EventKind::Trace => self.track_traces,
            EventKind::Metric => self.track_metrics,
            EventKind::Log => self.track_logs,
            EventKind::Session => self.session_tracking,
        }
    }

    #[must_use]
    pub fn tracked_kinds(&self) -> Vec<EventKind> {
        EventKind::ALL
            .into_iter()
            .filter(|kind| self.tracks(*kind))
            .collect()
    }

    /// # Errors
    /// Returns [`ObservabilityError::Configuration`] when an enabled
    /// configuration has no storage path.
    pub fn validate(&self) -> Result<(), ObservabilityError> {
        if !self.enabled {
            return Ok(());
        }

        if self.storage_path.as_os_str().is_empty() {
            return Err(ObservabilityError::Configuration(
                "storage_path MUST be provided when enabled=true".to_string(),
            ));
        }

        Ok(())
    }

    /// Decodes and validates a configuration from JSON.
    ///
    /// # Errors
    /// Returns [`ObservabilityError::Configuration`] when decoding fails or
    /// the decoded configuration is invalid.
    pub fn from_json(value: &Value) -> Result<Self, ObservabilityError> {
        let config: Self = serde_json::from_value(value.clone()).map_err(|err| {
            ObservabilityError::Configuration(format!("invalid configuration JSON payload: {err}"))
        })?;
        config.validate()?;
        Ok(config)
    }
}

/// One completed span of work, usually a single model invocation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TraceRecord {
    pub trace_id: String,
    pub span_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_span_id: Option<String>,
    pub name: String,
    pub start_time: i64,
    pub end_time: i64,
    pub provider: String,
    pub model_name: String,
    #[serde(default)]
    pub input: Option<Value>,
    #[serde(default)]
    pub output: Option<Value>,
    #[serde(default = "empty_object")]
    pub attributes: Value,
    #[serde(default)]
    pub error: Option<Value>,
}

impl TraceRecord {
    /// Span with only the fields every trace row carries.
    #[must_use]
    pub fn new(
        trace_id: impl Into<String>,
        span_id: impl Into<String>,
        name: impl Into<String>,
        start_time: i64,
        end_time: i64,
        provider: impl Into<String>,
        model_name: impl Into<String>,
    ) -> Self {
        Self {
            trace_id: trace_id.into(),
            span_id: span_id.into(),
            parent_span_id: None,
            name: name.into(),
            start_time,
            end_time,
            provider: provider.into(),
            model_name: model_name.into(),
            input: None,
            output: None,
            attributes: empty_object(),
            error: None,
        }
    }

    #[must_use]
    pub fn duration_ms(&self) -> i64 {
        self.end_time.saturating_sub(self.start_time)
    }

    /// # Errors
    /// Returns [`ObservabilityError::Validation`] when identifiers are
    /// missing, the span ends before it starts, or attributes are not an
    /// object.
    pub fn validate(&self) -> Result<(), ObservabilityError> {
        require_non_empty("trace_id", &self.trace_id)?;
        require_non_empty("span_id", &self.span_id)?;

        if let Some(parent) = &self.parent_span_id {
            require_non_empty("parent_span_id", parent)?;
        }

        if self.end_time < self.start_time {
            return Err(ObservabilityError::Validation(format!(
                "end_time MUST be >= start_time (start_time={}, end_time={})",
                self.start_time, self.end_time
            )));
        }

        require_object("attributes", &self.attributes)
    }

    /// # Errors
    /// Returns [`ObservabilityError::Validation`] when a required field is
    /// missing from `value` or the decoded record is invalid.
    pub fn from_json(value: &Value) -> Result<Self, ObservabilityError> {
        let record: Self = decode_record(EventKind::Trace, value)?;
        record.validate()?;
        Ok(record)
    }
}

/// A numeric measurement such as latency or prompt size.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricRecord {
    #[serde(default = "generate_id")]
    pub metric_id: String,
    #[serde(default = "now_epoch_millis")]
    pub timestamp: i64,
    pub name: String,
    pub value: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub span_id: Option<String>,
    #[serde(default = "empty_object")]
    pub attributes: Value,
}

impl MetricRecord {
    #[must_use]
    pub fn new(name: impl Into<String>, value: f64, timestamp: i64) -> Self {
        Self {
            metric_id: generate_id(),
            timestamp,
            name: name.into(),
            value,
            trace_id: None,
            span_id: None,
            attributes: empty_object(),
        }
    }

    /// # Errors
    /// Returns [`ObservabilityError::Validation`] for missing identifiers,
    /// a non-finite value, or non-object attributes.
    pub fn validate(&self) -> Result<(), ObservabilityError> {
        require_non_empty("metric_id", &self.metric_id)?;
        require_non_empty("name", &self.name)?;

        if !self.value.is_finite() {
            return Err(ObservabilityError::Validation(format!(
                "metric value MUST be finite, got {}",
                self.value
            )));
        }

        require_optional_non_empty("trace_id", self.trace_id.as_deref())?;
        require_optional_non_empty("span_id", self.span_id.as_deref())?;
        require_object("attributes", &self.attributes)
    }

    /// # Errors
    /// Returns [`ObservabilityError::Validation`] when decoding or
    /// validation fails.
    pub fn from_json(value: &Value) -> Result<Self, ObservabilityError> {
        let record: Self = decode_record(EventKind::Metric, value)?;
        record.validate()?;
        Ok(record)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "trace" => Some(Self::Trace),
            "debug" => Some(Self::Debug),
            "info" => Some(Self::Info),
            "warn" => Some(Self::Warn),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LogRecord {
    #[serde(default = "generate_id")]
    pub log_id: String,
    #[serde(default = "now_epoch_millis")]
    pub timestamp: i64,
    pub level: LogLevel,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub span_id: Option<String>,
    #[serde(default = "empty_object")]
    pub attributes: Value,
}

impl LogRecord {
    #[must_use]
    pub fn new(level: LogLevel, message: impl Into<String>, timestamp: i64) -> Self {
        Self {
            log_id: generate_id(),
            timestamp,
            level,
            message: message.into(),
            trace_id: None,
            span_id: None,
            attributes: empty_object(),
        }
    }

    /// # Errors
    /// Returns [`ObservabilityError::Validation`] for a missing identifier
    /// or non-object attributes.
    pub fn validate(&self) -> Result<(), ObservabilityError> {
        require_non_empty("log_id", &self.log_id)?;
        require_optional_non_empty("trace_id", self.trace_id.as_deref())?;
        require_optional_non_empty("span_id", self.span_id.as_deref())?;
        require_object("attributes", &self.attributes)
    }

    /// # Errors
    /// Returns [`ObservabilityError::Validation`] when decoding or
    /// validation fails.
    pub fn from_json(value: &Value) -> Result<Self, ObservabilityError> {
        let record: Self = decode_record(EventKind::Log, value)?;
        record.validate()?;
        Ok(record)
    }
}

/// A single activity event for a conversational session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionRecord {
    pub session_id: String,
    #[serde(default = "now_epoch_millis")]
    pub last_activity_time: i64,
    #[serde(default = "empty_object")]
    pub metadata: Value,
}

impl SessionRecord {
    #[must_use]
    pub fn new(session_id: impl Into<String>, last_activity_time: i64) -> Self {
        Self {
            session_id: session_id.into(),
            last_activity_time,
            metadata: empty_object(),
        }
    }

    /// # Errors
    /// Returns [`ObservabilityError::Validation`] for a missing session id
    /// or non-object metadata.
    pub fn validate(&self) -> Result<(), ObservabilityError> {
        require_non_empty("session_id", &self.session_id)?;
        require_object("metadata", &self.metadata)
    }

    /// # Errors
    /// Returns [`ObservabilityError::Validation`] when decoding or
    /// validation fails.
    pub fn from_json(value: &Value) -> Result<Self, ObservabilityError> {
        let record: Self = decode_record(EventKind::Session, value)?;
        record.validate()?;
        Ok(record)
    }
}

fn decode_record<T: DeserializeOwned>(
    kind: EventKind,
    value: &Value,
) -> Result<T, ObservabilityError> {
    serde_json::from_value(value.clone()).map_err(|err| {
        ObservabilityError::Validation(format!("invalid {} record: {err}", kind.as_str()))
    })
}

fn require_non_empty(field: &str, value: &str) -> Result<(), ObservabilityError> {
    if value.trim().is_empty() {
        return Err(ObservabilityError::Validation(format!(
            "{field} MUST be provided"
        )));
    }
    Ok(())
}

fn require_optional_non_empty(field: &str, value: Option<&str>) -> Result<(), ObservabilityError> {
    match value {
        Some(inner) => require_non_empty(field, inner),
        None => Ok(()),
    }
}

fn require_object(field: &str, value: &Value) -> Result<(), ObservabilityError> {
    if !value.is_object() {
        return Err(ObservabilityError::Validation(format!(
            "{field} MUST be a JSON object"
        )));
    }
    Ok(())
}

#[must_use]
pub fn empty_object() -> Value {
    Value::Object(Map::default())
}

#[must_use]
pub fn generate_id() -> String {
    Ulid::new().to_string()
}

/// Formats a timestamp as RFC3339 after normalizing to UTC.
///
/// # Errors
/// Returns [`ObservabilityError::Persistence`] when formatting fails.
pub fn format_rfc3339(value: OffsetDateTime) -> Result<String, ObservabilityError> {
    value
        .to_offset(UtcOffset::UTC)
        .format(&time::format_description::well_known::Rfc3339)
        .map_err(|err| {
            ObservabilityError::Persistence(format!("failed to format RFC3339 timestamp: {err}"))
        })
}

#[must_use]
pub fn now_utc() -> OffsetDateTime {
    OffsetDateTime::now_utc().to_offset(UtcOffset::UTC)
}

#[must_use]
pub fn now_epoch_millis() -> i64 {
    let millis = now_utc().unix_timestamp_nanos() / 1_000_000;
    i64::try_from(millis).unwrap_or(i64::MAX)
}
