//! `structured_logger` turns application log calls, HTTP request metadata, distributed-trace
//! context and error reports into structured log entries understood by Google Cloud Logging.
//!
//! It offers:
//! - A [`StructuredLogger`] with one method per [`LogSeverity`], child loggers with extra labels,
//!   timers, assertions and error reporting.
//! - Request-scoped loggers ([`StructuredLogger::for_request`]) that attach the trace context of
//!   the request to every entry and its HTTP context to every error report.
//! - A [`Logging`] facade built from a validated [`LoggingConfig`], with helpers for
//!   request-handling middleware and a process-wide panic hook ([`Logging::attach_to_process`]).
//!
//! In development, entries are rendered as one human-readable line each. In production, each
//! entry is a single JSON line using the special fields of the logging agent
//! (<https://cloud.google.com/logging/docs/structured-logging#special-payload-fields>), or a call
//! to a [`Transport`] when one is configured.
//!
//! Logging never fails: invalid input is coerced and reported through [`tracing`] diagnostics.

mod assembler;
mod duration;
mod entry;
mod error_report;
mod logger;
mod logging;
mod normalize;
mod output;
mod request;
mod serialize;
mod severity;
mod timestamp;
mod trace_context;
mod value;

pub use self::{
    duration::{format_duration, format_std_duration},
    entry::{
        Labels, LogEntry, LogEntryOperation, LogEntrySourceLocation, TransportData,
        TransportLogEntry,
    },
    error_report::{ErrorContext, ErrorReport, ServiceContext},
    logger::StructuredLogger,
    logging::{Logging, LoggingConfig, ProcessHook},
    normalize::normalize,
    output::{ConsoleSink, RenderMode, StdConsole, Transport},
    request::{
        ErrorHttpContext, ExtractUser, HttpRequest, RequestInfo, RequestParts, ResponseInfo,
    },
    serialize::{to_json, CIRCULAR},
    severity::{ConsoleMethod, LogSeverity},
    timestamp::Timestamp,
    trace_context::{
        extract as extract_trace_context, TraceContext, CLOUD_TRACE_CONTEXT_HEADER,
        TRACEPARENT_HEADER,
    },
    value::{ErrorValue, IterableValue, LogValue, Object, RegExpValue, SharedValue, ValueHooks},
};

mod keys {
    use std::sync::LazyLock;

    use rustc_hash::FxHashMap;

    pub(crate) const MESSAGE: &str = "message";
    pub(crate) const MESSAGE_DATA: &str = "messageData";
    pub(crate) const TIMESTAMP: &str = "timestamp";
    pub(crate) const SEVERITY: &str = "severity";
    pub(crate) const EVENT_TIME: &str = "eventTime";
    pub(crate) const LOG_NAME: &str = "log_name";
    pub(crate) const TYPE: &str = "type";

    /// How entry fields are named in a production record: `Some` renames the field, `None`
    /// keeps it out of the envelope. Fields missing from the table keep their name.
    ///
    /// See <https://cloud.google.com/logging/docs/agent/configuration#special-fields>.
    pub(crate) static LOG_ENTRY_MAPPING: LazyLock<FxHashMap<&'static str, Option<&'static str>>> =
        LazyLock::new(|| {
            [
                (TIMESTAMP, None),
                ("textPayload", None),
                ("jsonPayload", None),
                ("protoPayload", None),
                (MESSAGE, None),
                ("insertId", Some("logging.googleapis.com/insertId")),
                ("labels", Some("logging.googleapis.com/labels")),
                ("operation", Some("logging.googleapis.com/operation")),
                ("sourceLocation", Some("logging.googleapis.com/sourceLocation")),
                ("spanId", Some("logging.googleapis.com/spanId")),
                ("trace", Some("logging.googleapis.com/trace")),
                ("traceSampled", Some("logging.googleapis.com/trace_sampled")),
            ]
            .into_iter()
            .collect()
        });

    /// The name of an entry field in a production record, or `None` if the field is kept out of
    /// the envelope.
    pub(crate) fn record_key(field: &str) -> Option<&str> {
        match LOG_ENTRY_MAPPING.get(field) {
            Some(mapped) => *mapped,
            None => Some(field),
        }
    }
}

/// Errors that can occur while configuring the logger or parsing its inputs.
///
/// Logging itself never fails.
#[derive(Debug, thiserror::Error)]
pub enum LoggerError {
    /// Represents an error in configuration.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Represents an error during JSON serialization.
    #[error("JSON serialization error: {0}")]
    JsonSerialization(#[from] serde_json::Error),

    /// A severity name outside the known set.
    #[error("Unknown LogSeverity '{0}'")]
    UnknownSeverity(String),
}

/// Builds the argument list of a logging call, converting each argument into a [`LogValue`].
///
/// ```
/// use structured_logger::{log_args, LogValue};
///
/// let args = log_args!["took", 12, "ms"];
/// assert_eq!(args, vec![LogValue::from("took"), LogValue::from(12), LogValue::from("ms")]);
/// ```
#[macro_export]
macro_rules! log_args {
    () => {
        ::std::vec::Vec::<$crate::LogValue>::new()
    };
    ($($arg:expr),+ $(,)?) => {
        ::std::vec![$($crate::LogValue::from($arg)),+]
    };
}

#[cfg(test)]
mod tests {
    use super::keys;

    #[test]
    fn maps_special_fields() {
        assert_eq!(
            keys::record_key("trace"),
            Some("logging.googleapis.com/trace")
        );
        assert_eq!(
            keys::record_key("traceSampled"),
            Some("logging.googleapis.com/trace_sampled")
        );
        assert_eq!(keys::record_key("severity"), Some("severity"));
        assert_eq!(keys::record_key("httpRequest"), Some("httpRequest"));
        assert_eq!(keys::record_key("textPayload"), None);
        assert_eq!(keys::record_key("message"), None);
    }
}
