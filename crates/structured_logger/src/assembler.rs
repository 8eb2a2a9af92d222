//! Turns entry metadata and a payload into a rendered line or a transport call.

use std::{fmt, sync::Arc};

use colored::Colorize;
use serde_json::{Map, Value};
use time::OffsetDateTime;

use crate::{
    entry::{Labels, LogEntry, TransportData, TransportLogEntry},
    keys,
    output::{ConsoleSink, RenderMode, Transport},
    serialize,
    severity::LogSeverity,
    timestamp::{self, Timestamp},
    trace_context,
    value::{LogValue, Object},
};

/// Renders entries for every logger derived from one [`crate::Logging`] instance.
pub(crate) struct Assembler {
    pub(crate) log_name: String,
    pub(crate) mode: RenderMode,
    pub(crate) colors: bool,
    pub(crate) console: Arc<dyn ConsoleSink>,
    pub(crate) transport: Option<Arc<dyn Transport>>,
}

impl fmt::Debug for Assembler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Assembler")
            .field("log_name", &self.log_name)
            .field("mode", &self.mode)
            .field("colors", &self.colors)
            .field("transport", &self.transport.is_some())
            .finish_non_exhaustive()
    }
}

/// A payload split into its message and its structured data.
struct Split {
    message: Option<String>,
    data: Object,
}

impl Assembler {
    /// Writes one entry.
    pub(crate) fn write(&self, base_labels: &Labels, mut entry: LogEntry, payload: LogValue) {
        let mut labels = base_labels.clone();
        if let Some(extra) = entry.labels.take() {
            labels.extend(extra);
        }

        let timestamp = payload
            .property(keys::EVENT_TIME)
            .and_then(|event_time| parse_event_time(&event_time))
            .or(entry.timestamp.take())
            .unwrap_or_else(OffsetDateTime::now_utc);

        let severity = *entry.severity.get_or_insert_with(|| {
            tracing::warn!(
                "Unknown LogSeverity 'undefined', falling back to LogSeverity.{}",
                LogSeverity::Default
            );
            LogSeverity::Default
        });

        let split = split_payload(payload);

        match (self.mode, &self.transport) {
            (RenderMode::Development, _) => {
                let line = self.development_line(timestamp, entry.trace.as_deref(), split);
                self.console.write_line(severity.console_method(), &line);
            }
            (RenderMode::Production, None) => {
                entry.labels = Some(labels);
                if let Some(line) = production_line(timestamp, &entry, split) {
                    self.console.write_line(severity.console_method(), &line);
                }
            }
            (RenderMode::Production, Some(transport)) => {
                labels.shift_remove(keys::LOG_NAME);
                entry.labels = Some(labels);
                let (entry, data) = self.transport_call(timestamp, entry, split);
                transport.send(entry, data);
            }
        }
    }

    fn development_line(
        &self,
        timestamp: OffsetDateTime,
        trace: Option<&str>,
        split: Split,
    ) -> String {
        let mut prefix = timestamp::to_iso_millis(timestamp);
        if let Some(trace) = trace {
            prefix.push_str(" / ");
            prefix.push_str(trace_context::short_trace_id(trace));
        }
        let prefix = format!("[{prefix}]");

        let mut parts = vec![if self.colors {
            prefix.dimmed().to_string()
        } else {
            prefix
        }];
        if let Some(message) = split.message.filter(|message| !message.is_empty()) {
            parts.push(message);
        }
        let data = serialize::object_to_json(&split.data);
        if !data.is_empty() {
            let data = Value::Object(data).to_string();
            parts.push(if self.colors {
                data.cyan().to_string()
            } else {
                data
            });
        }

        parts.join(" ")
    }

    fn transport_call(
        &self,
        timestamp: OffsetDateTime,
        mut entry: LogEntry,
        split: Split,
    ) -> (TransportLogEntry, TransportData) {
        let mut data = serialize::object_to_json(&split.data);
        data.extend(take_payload_fields(&mut entry));

        let data = match split.message.filter(|message| !message.is_empty()) {
            Some(message) if data.is_empty() => TransportData::Text(message),
            Some(message) => {
                data.insert(keys::MESSAGE.to_string(), Value::String(message));
                TransportData::Structured(data)
            }
            None => TransportData::Structured(data),
        };

        let entry = TransportLogEntry {
            entry,
            timestamp: Timestamp::from(timestamp),
            log_name: self.log_name.clone(),
        };
        (entry, data)
    }
}

/// Builds the JSON line of an entry written to the console in production.
///
/// See <https://cloud.google.com/run/docs/logging#container-logs>.
fn production_line(timestamp: OffsetDateTime, entry: &LogEntry, split: Split) -> Option<String> {
    let mut record = Map::new();
    if let Some(message) = split.message {
        record.insert(keys::MESSAGE.to_string(), Value::String(message));
    }
    record.insert(
        keys::TIMESTAMP.to_string(),
        serde_json::to_value(Timestamp::from(timestamp)).unwrap_or_default(),
    );

    match serde_json::to_value(entry) {
        Ok(Value::Object(metadata)) => {
            for (field, value) in metadata {
                if let Some(key) = keys::record_key(&field) {
                    record.insert(key.to_string(), value);
                }
            }
        }
        Ok(_) => {}
        Err(error) => tracing::debug!(?error, "Failed to serialize log entry metadata"),
    }

    let data = serialize::object_to_json(&split.data);
    if split.data.keys().any(|key| record.contains_key(key)) {
        record.insert(keys::MESSAGE_DATA.to_string(), Value::Object(data));
    } else {
        record.extend(data);
    }

    match serde_json::to_string(&record) {
        Ok(line) => Some(line),
        Err(error) => {
            tracing::debug!(?error, "Failed to serialize log record");
            None
        }
    }
}

/// Removes the fields that never belong in a transport envelope from the entry.
fn take_payload_fields(entry: &mut LogEntry) -> Map<String, Value> {
    let payloads = LogEntry {
        text_payload: entry.text_payload.take(),
        json_payload: entry.json_payload.take(),
        proto_payload: entry.proto_payload.take(),
        ..LogEntry::default()
    };
    match serde_json::to_value(payloads) {
        Ok(Value::Object(fields)) => fields
            .into_iter()
            .filter(|(field, _)| keys::record_key(field).is_none())
            .collect(),
        _ => Map::new(),
    }
}

fn split_payload(payload: LogValue) -> Split {
    match payload {
        LogValue::Object(mut data) => {
            let message = data
                .shift_remove(keys::MESSAGE)
                .and_then(message_string)
                .or_else(|| {
                    // Nothing left to log: fall back to the inspected object.
                    serialize::object_to_json(&data)
                        .is_empty()
                        .then(|| LogValue::Object(data.clone()).inspect())
                });
            Split { message, data }
        }
        LogValue::Error(error) => Split {
            message: Some(error.message),
            data: error.props,
        },
        LogValue::Array(items) => Split {
            message: items.is_empty().then(|| "[]".to_string()),
            data: items
                .into_iter()
                .enumerate()
                .map(|(index, item)| (index.to_string(), item))
                .collect(),
        },
        LogValue::String(message) => Split {
            message: Some(message),
            data: Object::new(),
        },
        LogValue::Shared(shared) => split_payload(shared.get()),
        other => Split {
            message: Some(other.inspect()),
            data: Object::new(),
        },
    }
}

fn message_string(message: LogValue) -> Option<String> {
    match message {
        LogValue::Undefined | LogValue::Null => None,
        LogValue::String(message) => Some(message),
        other => Some(other.stringify()),
    }
}

fn parse_event_time(value: &LogValue) -> Option<OffsetDateTime> {
    match value {
        LogValue::String(value) => timestamp::parse_rfc3339(value),
        LogValue::Date(date) => Some(*date),
        LogValue::Int(millis) => timestamp::from_unix_millis(i128::from(*millis)),
        LogValue::UInt(millis) => timestamp::from_unix_millis(i128::from(*millis)),
        LogValue::Float(millis) => timestamp::from_unix_millis_f64(*millis),
        LogValue::BigInt(nanos) => timestamp::from_unix_nanos(*nanos),
        LogValue::Shared(shared) => parse_event_time(&shared.get()),
        _ => None,
    }
}
