//! Error reports in the format understood by Cloud Error Reporting.
//!
//! See <https://cloud.google.com/error-reporting/docs/formatting-error-messages>.

use std::{backtrace::Backtrace, sync::LazyLock};

use regex::Regex;
use serde::Serialize;
use time::OffsetDateTime;

use crate::{
    keys,
    request::ErrorHttpContext,
    timestamp,
    value::{LogValue, Object},
};

/// Frames of the backtrace machinery and of the reporting functions themselves, with their
/// `at <file>:<line>:<column>` continuation line.
static OWN_FRAMES: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(concat!(
        r"(?m)^ *\d+: (?:",
        r"std::backtrace(?:_rs)?::",
        r"|structured_logger::error_report::",
        r"|structured_logger::logger::StructuredLogger::(?:report(?:_error)?|trace)\b",
        r"|structured_logger::logging::",
        r")[^\n]*\n(?: +at [^\n]*\n)?",
    ))
    .ok()
});

const USER_PROPERTY: &str = "user";
const STACK_PROPERTY: &str = "stack";
const CAUSE_PROPERTY: &str = "cause";

/// Identifies the service an error was reported by.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ServiceContext {
    /// Name of the service.
    pub service: String,

    /// Version of the service.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// Where an error happened.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorContext {
    /// The request being handled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_request: Option<ErrorHttpContext>,

    /// The user affected by the error.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
}

/// A reported error event.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorReport {
    /// Time the error was reported, RFC 3339.
    pub event_time: String,

    /// The reporting service.
    pub service_context: ServiceContext,

    /// The error message, including a stack trace.
    pub message: String,

    /// Request and user context, omitted when empty.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<ErrorContext>,

    /// Custom properties of the reported error.
    #[serde(skip)]
    pub error: Option<Object>,
}

impl ErrorReport {
    /// Converts the report into a log payload.
    pub fn into_payload(self) -> LogValue {
        let mut payload = match serde_json::to_value(&self) {
            Ok(serde_json::Value::Object(fields)) => LogValue::object(fields),
            _ => LogValue::object([(keys::MESSAGE, self.message.clone())]),
        };
        if let (LogValue::Object(fields), Some(error)) = (&mut payload, self.error) {
            fields.insert("error".to_string(), LogValue::Object(error));
        }
        payload
    }
}

/// Builds an [`ErrorReport`] from any value.
#[derive(Clone, Debug, Default)]
pub(crate) struct ErrorReportBuilder {
    pub(crate) service_context: ServiceContext,
    pub(crate) http_request: Option<ErrorHttpContext>,
    pub(crate) user: Option<String>,
}

impl ErrorReportBuilder {
    /// Builds the report. Never fails, whatever the value.
    pub(crate) fn build(self, thrown: &LogValue) -> ErrorReport {
        let thrown = match thrown {
            LogValue::Shared(shared) => shared.get(),
            other => other.clone(),
        };

        let user = self
            .user
            .or_else(|| thrown.property(USER_PROPERTY)?.as_str().map(str::to_string))
            .filter(|user| !user.is_empty());
        let context = (self.http_request.is_some() || user.is_some()).then(|| ErrorContext {
            http_request: self.http_request,
            user,
        });

        ErrorReport {
            event_time: timestamp::to_rfc3339(OffsetDateTime::now_utc()),
            service_context: self.service_context,
            message: message_of(&thrown),
            context,
            error: carried_properties(&thrown),
        }
    }
}

/// The stack of the value when it has one, else its message followed by the current backtrace.
fn message_of(thrown: &LogValue) -> String {
    if let Some(LogValue::String(stack)) = thrown.property(STACK_PROPERTY) {
        if !stack.is_empty() {
            return stack;
        }
    }

    let mut message = match thrown {
        LogValue::String(message) => message.clone(),
        LogValue::Error(error) => error.to_string(),
        other => match other.property(keys::MESSAGE) {
            Some(LogValue::String(message)) => message,
            _ => other.inspect(),
        },
    };
    message.push('\n');
    message.push_str(&capture_stack());
    message
}

/// Captures the current backtrace, without the frames of the reporting functions.
pub(crate) fn capture_stack() -> String {
    let backtrace = Backtrace::force_capture().to_string();
    match OWN_FRAMES.as_ref() {
        Some(own_frames) => own_frames.replace_all(&backtrace, "").into_owned(),
        None => backtrace,
    }
}

/// The properties of the value other than `message` and `stack`, with `cause` last.
fn carried_properties(thrown: &LogValue) -> Option<Object> {
    let mut properties = match thrown {
        LogValue::Error(error) => error.props.clone(),
        LogValue::Object(object) => object.clone(),
        LogValue::Array(items) => items
            .iter()
            .enumerate()
            .map(|(index, item)| (index.to_string(), item.clone()))
            .collect(),
        _ => return None,
    };
    properties.shift_remove(keys::MESSAGE);
    properties.shift_remove(STACK_PROPERTY);
    if let Some(cause) = properties.shift_remove(CAUSE_PROPERTY) {
        properties.insert(CAUSE_PROPERTY.to_string(), cause);
    }
    Some(properties)
}
