//! The logger handed to application code.

use std::{collections::HashMap, fmt, sync::Arc, time::Instant};

use crate::{
    assembler::Assembler,
    duration::format_std_duration,
    entry::{Labels, LogEntry, LogEntrySourceLocation},
    error_report::{self, ErrorReportBuilder, ServiceContext},
    keys,
    normalize::normalize,
    request::{ErrorHttpContext, ExtractUser, RequestInfo},
    severity::LogSeverity,
    trace_context::{self, TraceContext},
    value::LogValue,
};

const REQUEST_LOGGER_TYPE: &str = "request";
const ASSERTION_FAILED: &str = "Assertion failed";
const TRACE: &str = "Trace";

/// State shared by every logger derived from one [`crate::Logging`] instance.
#[derive(Debug)]
pub(crate) struct LoggerCore {
    pub(crate) project_id: String,
    pub(crate) service_context: ServiceContext,
    pub(crate) assembler: Assembler,
}

/// The request a request-scoped logger was created for.
struct RequestScope {
    request: Arc<dyn RequestInfo>,
    trace: Option<TraceContext>,
    extract_user: Option<ExtractUser>,
}

/// A logger writing structured entries.
///
/// Every logging method accepts the arguments of the call as a list of [`LogValue`]s, usually
/// built with [`log_args!`](crate::log_args), and merges them with
/// [`normalize`](crate::normalize). Logging never fails and never panics.
///
/// Loggers created with [`StructuredLogger::for_request`] attach the trace context of the request
/// to every entry, and its HTTP context to every error report.
#[derive(Clone)]
pub struct StructuredLogger {
    core: Arc<LoggerCore>,
    labels: Labels,
    request: Option<Arc<RequestScope>>,
    timers: HashMap<String, Instant>,
}

impl fmt::Debug for StructuredLogger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StructuredLogger")
            .field("labels", &self.labels)
            .field("trace", &self.trace_context())
            .field("timers", &self.timers.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

macro_rules! severity_methods {
    ($($(#[$doc:meta])* $name:ident => $severity:ident),+ $(,)?) => {
        $(
            $(#[$doc])*
            pub fn $name(&self, args: Vec<LogValue>) {
                self.write_formatted(LogSeverity::$severity, args);
            }
        )+
    };
}

impl StructuredLogger {
    pub(crate) fn new(core: Arc<LoggerCore>, labels: Labels) -> Self {
        Self {
            core,
            labels,
            request: None,
            timers: HashMap::new(),
        }
    }

    /// Creates a logger that adds the label `type` to every entry. Request-scoped loggers keep
    /// their request and trace context.
    pub fn child(&self, logger_type: &str) -> Self {
        let mut labels = self.labels.clone();
        labels.insert(keys::TYPE.to_string(), logger_type.to_string());
        Self {
            core: Arc::clone(&self.core),
            labels,
            request: self.request.clone(),
            timers: HashMap::new(),
        }
    }

    /// Creates a logger for one request, labelled with `type: request`.
    ///
    /// The trace context is read from the request headers once, here.
    pub fn for_request(
        &self,
        request: Arc<dyn RequestInfo>,
        extract_user: Option<ExtractUser>,
    ) -> Self {
        let trace = trace_context::extract(&self.core.project_id, |name| request.header(name));
        let mut logger = self.child(REQUEST_LOGGER_TYPE);
        logger.request = Some(Arc::new(RequestScope {
            request,
            trace,
            extract_user,
        }));
        logger
    }

    /// The labels added to every entry.
    pub fn labels(&self) -> &Labels {
        &self.labels
    }

    /// The trace context of the request this logger was created for.
    pub fn trace_context(&self) -> Option<&TraceContext> {
        self.request.as_ref()?.trace.as_ref()
    }

    /// The request this logger was created for.
    pub fn request(&self) -> Option<&dyn RequestInfo> {
        self.request.as_deref().map(|scope| &*scope.request)
    }

    severity_methods! {
        /// Logs with [`LogSeverity::Default`].
        log => Default,
        /// Logs with [`LogSeverity::Debug`].
        debug => Debug,
        /// Logs with [`LogSeverity::Info`].
        info => Info,
        /// Logs with [`LogSeverity::Notice`].
        notice => Notice,
        /// Logs with [`LogSeverity::Warning`].
        warn => Warning,
        /// Logs with [`LogSeverity::Error`].
        error => Error,
        /// Logs with [`LogSeverity::Critical`].
        critical => Critical,
        /// Logs with [`LogSeverity::Alert`].
        alert => Alert,
        /// Logs with [`LogSeverity::Emergency`].
        emergency => Emergency,
    }

    /// Writes a payload with explicit entry metadata. A missing severity falls back to
    /// [`LogSeverity::Default`] with a warning.
    pub fn write(&self, entry: LogEntry, payload: impl Into<LogValue>) {
        self.write_entry(entry, payload.into());
    }

    /// Reports an error, with a stack trace, to Cloud Error Reporting.
    ///
    /// Any value can be reported. The severity is `severity` if given, else the `severity`
    /// property of the value when it names a known severity, else [`LogSeverity::Error`].
    pub fn report_error(&self, thrown: &LogValue, severity: Option<LogSeverity>) {
        self.report(thrown, severity, None);
    }

    pub(crate) fn report(
        &self,
        thrown: &LogValue,
        severity: Option<LogSeverity>,
        source_location: Option<LogEntrySourceLocation>,
    ) {
        let severity = severity
            .or_else(|| thrown.property(keys::SEVERITY)?.as_str()?.parse().ok())
            .unwrap_or(LogSeverity::Error);

        let builder = match &self.request {
            Some(scope) => ErrorReportBuilder {
                service_context: self.core.service_context.clone(),
                http_request: Some(ErrorHttpContext::from_request(&*scope.request)),
                user: scope
                    .extract_user
                    .as_ref()
                    .and_then(|extract_user| extract_user(&*scope.request)),
            },
            None => ErrorReportBuilder {
                service_context: self.core.service_context.clone(),
                ..ErrorReportBuilder::default()
            },
        };
        let report = builder.build(thrown);

        let entry = LogEntry {
            source_location,
            ..LogEntry::with_severity(severity)
        };
        self.write_entry(entry, report.into_payload());
    }

    /// Logs a warning when `condition` is false.
    pub fn assert(&self, condition: bool, args: Vec<LogValue>) {
        if condition {
            return;
        }
        let mut args = args;
        if let Some(LogValue::String(first)) = args.first_mut() {
            *first = format!("{ASSERTION_FAILED}: {first}");
        } else {
            args.insert(0, LogValue::from(ASSERTION_FAILED));
        }
        self.write_formatted(LogSeverity::Warning, args);
    }

    /// Logs the arguments at [`LogSeverity::Debug`], followed by the current stack trace.
    pub fn trace(&self, args: Vec<LogValue>) {
        let stack = error_report::capture_stack();
        let mut args = args;
        if args.is_empty() {
            args.push(LogValue::String(format!("{TRACE}\n{stack}")));
        } else {
            args.push(LogValue::String(format!("\n{stack}")));
        }
        self.write_formatted(LogSeverity::Debug, args);
    }

    /// Starts a timer. Returns `false`, keeping the original start, when a timer with that label
    /// is already running.
    pub fn time(&mut self, label: &str) -> bool {
        if self.timers.contains_key(label) {
            tracing::warn!("Label '{label}' already exists for logger.time()");
            return false;
        }
        self.timers.insert(label.to_string(), Instant::now());
        true
    }

    /// Stops a timer and logs its elapsed time. Returns `false` when no such timer is running.
    pub fn time_end(&mut self, label: &str) -> bool {
        let Some(start) = self.timers.remove(label) else {
            tracing::warn!("No such label '{label}' for logger.time_end()");
            return false;
        };
        self.log_elapsed(label, start, Vec::new());
        true
    }

    /// Logs the elapsed time of a running timer, followed by the arguments. Returns `false` when
    /// no such timer is running.
    pub fn time_log(&self, label: &str, args: Vec<LogValue>) -> bool {
        let Some(start) = self.timers.get(label).copied() else {
            tracing::warn!("No such label '{label}' for logger.time_log()");
            return false;
        };
        self.log_elapsed(label, start, args);
        true
    }

    fn log_elapsed(&self, label: &str, start: Instant, args: Vec<LogValue>) {
        let elapsed = format_std_duration(start.elapsed());
        let mut formatted = vec![LogValue::String(format!("{label}: {elapsed}"))];
        formatted.extend(args);
        self.write_formatted(LogSeverity::Default, formatted);
    }

    fn write_formatted(&self, severity: LogSeverity, args: Vec<LogValue>) {
        self.write_entry(LogEntry::with_severity(severity), normalize(args));
    }

    fn write_entry(&self, mut entry: LogEntry, payload: LogValue) {
        if let Some(trace) = self.trace_context() {
            entry.fill_trace(trace);
        }
        self.core.assembler.write(&self.labels, entry, payload);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use pretty_assertions::assert_eq;
    use regex::Regex;
    use serde_json::{json, Value};

    use super::*;
    use crate::{
        log_args,
        output::{ConsoleSink, RenderMode},
        request::RequestParts,
        severity::ConsoleMethod,
        value::ErrorValue,
    };

    #[derive(Debug, Default)]
    struct CapturingConsole(Mutex<Vec<(ConsoleMethod, Value)>>);

    impl ConsoleSink for CapturingConsole {
        fn write_line(&self, method: ConsoleMethod, line: &str) {
            if let (Ok(mut lines), Ok(record)) = (self.0.lock(), serde_json::from_str(line)) {
                lines.push((method, record));
            }
        }
    }

    impl CapturingConsole {
        fn take(&self) -> Vec<(ConsoleMethod, Value)> {
            self.0
                .lock()
                .map(|mut lines| std::mem::take(&mut *lines))
                .unwrap_or_default()
        }

        fn last(&self) -> Value {
            self.take().pop().map(|(_, record)| record).unwrap_or_default()
        }
    }

    fn logger() -> (StructuredLogger, Arc<CapturingConsole>) {
        let console = Arc::new(CapturingConsole::default());
        let core = LoggerCore {
            project_id: "test-project".to_string(),
            service_context: ServiceContext {
                service: "test-service".to_string(),
                version: None,
            },
            assembler: Assembler {
                log_name: "test".to_string(),
                mode: RenderMode::Production,
                colors: false,
                console: Arc::clone(&console) as Arc<dyn ConsoleSink>,
                transport: None,
            },
        };
        let labels = [("log_name".to_string(), "test".to_string())]
            .into_iter()
            .collect();
        (StructuredLogger::new(Arc::new(core), labels), console)
    }

    fn traced_request() -> Arc<dyn RequestInfo> {
        Arc::new(
            RequestParts::new("GET", "/path")
                .with_header(
                    "x-cloud-trace-context",
                    "59973d340da5c40f77349df948ef7531/288377245651",
                )
                .with_header("user-agent", "agent"),
        )
    }

    #[test]
    fn routes_each_severity_to_its_console_method() {
        let (logger, console) = logger();

        logger.log(log_args!["x"]);
        logger.debug(log_args!["x"]);
        logger.info(log_args!["x"]);
        logger.notice(log_args!["x"]);
        logger.warn(log_args!["x"]);
        logger.error(log_args!["x"]);
        logger.critical(log_args!["x"]);
        logger.alert(log_args!["x"]);
        logger.emergency(log_args!["x"]);

        let written: Vec<(ConsoleMethod, String)> = console
            .take()
            .into_iter()
            .map(|(method, record)| {
                (method, record["severity"].as_str().unwrap_or_default().to_string())
            })
            .collect();
        let expected: Vec<(ConsoleMethod, String)> = LogSeverity::ALL
            .into_iter()
            .map(|severity| (severity.console_method(), severity.to_string()))
            .collect();
        assert_eq!(written, expected);
    }

    #[test]
    fn child_adds_type_label_without_touching_parent() {
        let (logger, console) = logger();
        let child = logger.child("worker");

        child.info(log_args!["from child"]);
        logger.info(log_args!["from parent"]);

        let records = console.take();
        assert_eq!(
            records[0].1["logging.googleapis.com/labels"],
            json!({ "log_name": "test", "type": "worker" })
        );
        assert_eq!(
            records[1].1["logging.googleapis.com/labels"],
            json!({ "log_name": "test" })
        );
    }

    #[test]
    fn request_logger_injects_frozen_trace() {
        let (logger, console) = logger();
        let request_logger = logger.for_request(traced_request(), None);
        let child = request_logger.child("db");

        child.info(log_args!["query"]);

        let record = console.last();
        assert_eq!(
            record["logging.googleapis.com/trace"],
            json!("projects/test-project/traces/59973d340da5c40f77349df948ef7531")
        );
        assert_eq!(record["logging.googleapis.com/spanId"], json!("00000043249f8fd3"));
        assert_eq!(record["logging.googleapis.com/trace_sampled"], json!(true));
        assert_eq!(
            record["logging.googleapis.com/labels"],
            json!({ "log_name": "test", "type": "db" })
        );
        assert_eq!(child.trace_context(), request_logger.trace_context());
    }

    #[test]
    fn explicit_trace_fields_win() {
        let (logger, console) = logger();
        let request_logger = logger.for_request(traced_request(), None);

        request_logger.write(
            LogEntry {
                span_id: Some("00000000000000aa".to_string()),
                ..LogEntry::with_severity(LogSeverity::Info)
            },
            "custom span",
        );

        let record = console.last();
        assert_eq!(record["logging.googleapis.com/spanId"], json!("00000000000000aa"));
        assert_eq!(
            record["logging.googleapis.com/trace"],
            json!("projects/test-project/traces/59973d340da5c40f77349df948ef7531")
        );
    }

    #[test]
    fn reports_errors_with_resolved_severity() {
        let (logger, console) = logger();

        logger.report_error(&ErrorValue::new("a").into(), None);
        logger.report_error(&ErrorValue::new("b").into(), Some(LogSeverity::Emergency));
        logger.report_error(&ErrorValue::new("c").with_prop("severity", "ALERT").into(), None);
        logger.report_error(&ErrorValue::new("d").with_prop("severity", "FATAL").into(), None);

        let severities: Vec<Value> = console
            .take()
            .into_iter()
            .map(|(_, record)| record["severity"].clone())
            .collect();
        assert_eq!(
            severities,
            vec![json!("ERROR"), json!("EMERGENCY"), json!("ALERT"), json!("ERROR")]
        );
    }

    #[test]
    fn reports_any_value() {
        let (logger, console) = logger();

        for thrown in [
            LogValue::Null,
            LogValue::Undefined,
            LogValue::from(false),
            LogValue::array(Vec::<LogValue>::new()),
            LogValue::object([("message", "Object")]),
        ] {
            logger.report_error(&thrown, None);
        }

        let records = console.take();
        assert_eq!(records.len(), 5);
        for (method, record) in records {
            assert_eq!(method, ConsoleMethod::Error);
            assert_eq!(
                record["serviceContext"],
                json!({ "service": "test-service" })
            );
            assert!(record["message"].is_string());
            assert!(record.get("context").is_none());
        }
    }

    #[test]
    fn report_carries_error_properties() {
        let (logger, console) = logger();
        let error = ErrorValue::new("")
            .with_stack("Error\n    at somewhere")
            .with_prop("property", "Hello");

        logger.report_error(&error.into(), None);

        let record = console.last();
        assert_eq!(record["message"], json!("Error\n    at somewhere"));
        assert_eq!(record["error"], json!({ "property": "Hello" }));
    }

    #[test]
    fn request_reports_include_http_context_and_user() {
        let (logger, console) = logger();
        let extract_user: ExtractUser = Arc::new(|request: &dyn RequestInfo| {
            request
                .header("user-agent")
                .map(|agent| format!("user of {agent}"))
        });
        let request_logger = logger.for_request(traced_request(), Some(extract_user));

        request_logger.report_error(&LogValue::from("failure"), None);

        let record = console.last();
        assert_eq!(
            record["context"],
            json!({
                "httpRequest": { "method": "GET", "url": "/path", "userAgent": "agent" },
                "user": "user of agent",
            })
        );
        assert_eq!(record["logging.googleapis.com/spanId"], json!("00000043249f8fd3"));
    }

    #[test]
    fn asserts_only_on_false() {
        let (logger, console) = logger();

        logger.assert(true, log_args!["never"]);
        logger.assert(false, log_args![]);
        logger.assert(false, log_args!["Hello, world!"]);
        logger.assert(false, log_args![LogValue::object([("a", 1)])]);

        let records: Vec<(ConsoleMethod, Value)> = console.take();
        assert!(records.iter().all(|(method, _)| *method == ConsoleMethod::Warn));
        let messages: Vec<Value> = records
            .into_iter()
            .map(|(_, record)| record["message"].clone())
            .collect();
        assert_eq!(
            messages,
            vec![
                json!("Assertion failed"),
                json!("Assertion failed: Hello, world!"),
                json!("Assertion failed"),
            ]
        );
    }

    #[test]
    fn traces_with_stack() {
        let (logger, console) = logger();

        logger.trace(log_args![]);
        logger.trace(log_args!["Hello, world!"]);

        let records = console.take();
        let first = records[0].1["message"].as_str().unwrap_or_default();
        let second = records[1].1["message"].as_str().unwrap_or_default();
        assert_eq!(records[0].0, ConsoleMethod::Debug);
        assert!(first.starts_with("Trace\n"));
        assert!(second.starts_with("Hello, world! \n"));
        assert!(!second.contains("Backtrace::force_capture"));
    }

    #[test]
    fn times_labels() {
        let (mut logger, console) = logger();

        assert!(logger.time("LABEL"));
        assert!(!logger.time("LABEL"));
        assert!(console.take().is_empty());

        assert!(logger.time_log(
            "LABEL",
            log_args!["hello", "world", 1, false, LogValue::Null]
        ));
        assert!(logger.time_end("LABEL"));
        assert!(!logger.time_end("LABEL"));
        assert!(!logger.time_log("LABEL", log_args![]));

        let records = console.take();
        assert_eq!(records.len(), 2);
        let duration = r"(\d{1,3}ns|\d+\.\d{3}(ms|µs|s))";
        let logged = Regex::new(&format!(r"^LABEL: {duration} hello world 1 false null$")).unwrap();
        let ended = Regex::new(&format!(r"^LABEL: {duration}$")).unwrap();
        assert!(logged.is_match(records[0].1["message"].as_str().unwrap_or_default()));
        assert!(ended.is_match(records[1].1["message"].as_str().unwrap_or_default()));
        assert_eq!(records[1].1["severity"], json!("DEFAULT"));
    }
}
