//! Log entry metadata and the shapes handed to a production transport.
//!
//! Field names follow the Cloud Logging `LogEntry` resource, see
//! <https://cloud.google.com/logging/docs/reference/v2/rest/v2/LogEntry>.

use indexmap::IndexMap;
use serde::Serialize;
use serde_json::{Map, Value};
use time::OffsetDateTime;

use crate::{request::HttpRequest, severity::LogSeverity, timestamp::Timestamp, TraceContext};

/// Labels of a log entry, in insertion order.
pub type Labels = IndexMap<String, String>;

/// Metadata of a log entry.
///
/// Every field is optional; the logger fills in the timestamp, the labels and, for request
/// loggers, the trace fields.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    /// Time of the event. Defaults to the time of the write.
    #[serde(skip)]
    pub timestamp: Option<OffsetDateTime>,

    /// Severity of the entry. A missing severity is reported and replaced with
    /// [`LogSeverity::Default`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub severity: Option<LogSeverity>,

    /// A unique identifier for the entry.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub insert_id: Option<String>,

    /// The HTTP request the entry is about.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_request: Option<HttpRequest>,

    /// Labels merged over the logger's labels.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<Labels>,

    /// Trace resource name, `projects/<project id>/traces/<trace id>`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace: Option<String>,

    /// Span id, 16 hexadecimal digits.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub span_id: Option<String>,

    /// Whether the trace was sampled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_sampled: Option<bool>,

    /// The operation the entry is part of.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation: Option<LogEntryOperation>,

    /// The source code location that produced the entry.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_location: Option<LogEntrySourceLocation>,

    /// A text payload. Merged into the data, never part of the envelope.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text_payload: Option<String>,

    /// A JSON payload. Merged into the data, never part of the envelope.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub json_payload: Option<Value>,

    /// A protocol buffer payload. Merged into the data, never part of the envelope.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proto_payload: Option<Value>,
}

impl LogEntry {
    /// An entry with the given severity.
    pub fn with_severity(severity: LogSeverity) -> Self {
        Self {
            severity: Some(severity),
            ..Self::default()
        }
    }

    /// Applies a trace context, leaving trace fields the entry already sets untouched.
    pub fn fill_trace(&mut self, context: &TraceContext) {
        self.trace.get_or_insert_with(|| context.trace.clone());
        self.span_id.get_or_insert_with(|| context.span_id.clone());
        self.trace_sampled.get_or_insert(context.trace_sampled);
    }
}

/// Information about an operation a log entry is part of.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntryOperation {
    /// An arbitrary operation identifier.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// An arbitrary producer identifier.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub producer: Option<String>,

    /// Whether this is the first entry of the operation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first: Option<bool>,

    /// Whether this is the last entry of the operation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last: Option<bool>,
}

/// Source code location information.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntrySourceLocation {
    /// Source file name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,

    /// Line within the source file, 1-based.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<String>,

    /// Human-readable name of the function or method.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub function: Option<String>,
}

impl From<&std::panic::Location<'_>> for LogEntrySourceLocation {
    fn from(location: &std::panic::Location<'_>) -> Self {
        Self {
            file: Some(location.file().to_string()),
            line: Some(location.line().to_string()),
            function: None,
        }
    }
}

/// The envelope handed to a production transport.
///
/// The `log_name` label is removed from the labels and carried as `log_name`; payload fields
/// of the entry are moved into the [`TransportData`].
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportLogEntry {
    /// The envelope metadata.
    #[serde(flatten)]
    pub entry: LogEntry,

    /// Time of the event.
    pub timestamp: Timestamp,

    /// Name of the log the entry belongs to.
    pub log_name: String,
}

/// The data handed to a production transport.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum TransportData {
    /// A bare message, when the entry has no structured data.
    Text(String),

    /// Structured data, including `message` when there is one.
    Structured(Map<String, Value>),
}

impl TransportData {
    /// The message, if there is one.
    pub fn message(&self) -> Option<&str> {
        match self {
            Self::Text(message) => Some(message),
            Self::Structured(data) => data.get(crate::keys::MESSAGE)?.as_str(),
        }
    }
}
