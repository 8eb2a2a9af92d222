//! The entry point of the crate: configuration, request helpers and the panic hook.

use std::{
    any::Any,
    fmt,
    panic::{self, PanicHookInfo},
    sync::Arc,
    thread,
};

use crate::{
    assembler::Assembler,
    entry::{Labels, LogEntrySourceLocation},
    error_report::ServiceContext,
    keys,
    logger::{LoggerCore, StructuredLogger},
    output::{ConsoleSink, RenderMode, StdConsole, Transport},
    request::{ExtractUser, RequestInfo},
    severity::LogSeverity,
    value::{ErrorValue, LogValue},
    LoggerError,
};

const STATUS_CODE_PROPERTIES: [&str; 2] = ["statusCode", "status"];
const FIRST_SERVER_ERROR_STATUS: f64 = 500.0;

const PANIC_ERROR_NAME: &str = "Panic";
const UNCAUGHT_EXCEPTION_TYPE: &str = "uncaughtExceptionType";
const PANIC_EXCEPTION_TYPE: &str = "panic";

/// Configuration of a [`Logging`] instance.
#[derive(Clone)]
pub struct LoggingConfig {
    /// The Google Cloud project ID, used to build trace names.
    pub project_id: String,

    /// Name of the log, added to every entry as the `log_name` label.
    pub log_name: String,

    /// Identifies the service in error reports.
    pub service_context: ServiceContext,

    /// Finds the user affected by an error from the request being handled.
    pub request_user_extractor: Option<ExtractUser>,

    /// Labels added to every entry. Must not contain `log_name`.
    pub extra_labels: Labels,

    /// Receives entries in production instead of the console.
    pub production_transport: Option<Arc<dyn Transport>>,

    /// How entries are rendered.
    pub mode: RenderMode,

    /// Where rendered lines are written.
    pub console: Arc<dyn ConsoleSink>,

    /// Whether development lines are colored.
    pub colors: bool,
}

impl LoggingConfig {
    /// Creates a configuration writing to [`StdConsole`], with the render mode read from
    /// [`RenderMode::ENV_VAR`].
    pub fn new(
        project_id: impl Into<String>,
        log_name: impl Into<String>,
        service_context: ServiceContext,
    ) -> Self {
        Self {
            project_id: project_id.into(),
            log_name: log_name.into(),
            service_context,
            request_user_extractor: None,
            extra_labels: Labels::new(),
            production_transport: None,
            mode: RenderMode::from_env(),
            console: Arc::new(StdConsole),
            colors: true,
        }
    }

    fn validate(&self) -> Result<(), LoggerError> {
        for (field, value) in [
            ("project_id", &self.project_id),
            ("log_name", &self.log_name),
            ("service_context.service", &self.service_context.service),
        ] {
            if value.trim().is_empty() {
                return Err(LoggerError::Configuration(format!(
                    "`{field}` must not be empty"
                )));
            }
        }

        if self.extra_labels.contains_key(keys::LOG_NAME) {
            return Err(LoggerError::Configuration(format!(
                "A reserved label `{}` was included in `extra_labels`",
                keys::LOG_NAME
            )));
        }

        Ok(())
    }
}

impl fmt::Debug for LoggingConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoggingConfig")
            .field("project_id", &self.project_id)
            .field("log_name", &self.log_name)
            .field("service_context", &self.service_context)
            .field("request_user_extractor", &self.request_user_extractor.is_some())
            .field("extra_labels", &self.extra_labels)
            .field("production_transport", &self.production_transport.is_some())
            .field("mode", &self.mode)
            .field("colors", &self.colors)
            .finish_non_exhaustive()
    }
}

/// Structured logging for one service.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
///
/// use structured_logger::{
///     log_args, Logging, LoggingConfig, LogValue, RenderMode, RequestParts, ServiceContext,
/// };
///
/// let mut config = LoggingConfig::new(
///     "my-project",
///     "my-service",
///     ServiceContext {
///         service: "my-service".to_string(),
///         version: Some("1.0.0".to_string()),
///     },
/// );
/// config.mode = RenderMode::Production;
///
/// let logging = Logging::new(config)?;
/// logging.logger().info(log_args!["started", LogValue::object([("port", 8080)])]);
///
/// let request = Arc::new(RequestParts::new("GET", "/items"));
/// let log = logging.request_logger(request);
/// log.warn(log_args!["slow upstream"]);
/// # Ok::<(), structured_logger::LoggerError>(())
/// ```
pub struct Logging {
    logger: StructuredLogger,
    extract_user: Option<ExtractUser>,
}

impl fmt::Debug for Logging {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logging")
            .field("logger", &self.logger)
            .field("extract_user", &self.extract_user.is_some())
            .finish()
    }
}

impl Logging {
    /// Creates the logging facade.
    ///
    /// # Errors
    ///
    /// Returns [`LoggerError::Configuration`] if an ID is empty, or if `extra_labels` contains
    /// `log_name`.
    pub fn new(config: LoggingConfig) -> Result<Self, LoggerError> {
        config.validate()?;

        let mut labels = Labels::new();
        labels.insert(keys::LOG_NAME.to_string(), config.log_name.clone());
        labels.extend(config.extra_labels);

        let core = LoggerCore {
            project_id: config.project_id,
            service_context: config.service_context,
            assembler: Assembler {
                log_name: config.log_name,
                mode: config.mode,
                colors: config.colors,
                console: config.console,
                transport: config.production_transport,
            },
        };

        Ok(Self {
            logger: StructuredLogger::new(Arc::new(core), labels),
            extract_user: config.request_user_extractor,
        })
    }

    /// The logger for work that is not tied to a request.
    pub fn logger(&self) -> &StructuredLogger {
        &self.logger
    }

    /// Creates the logger for a request, using the configured user extractor for error reports.
    pub fn request_logger(&self, request: Arc<dyn RequestInfo>) -> StructuredLogger {
        self.logger.for_request(request, self.extract_user.clone())
    }

    /// Reports an error raised while handling a request.
    ///
    /// Client errors, whose `statusCode` or `status` property is below 500, are reported as
    /// [`LogSeverity::Warning`]. Call this once the response is complete, so that the report
    /// carries the final status.
    pub fn report_request_error(&self, error: &LogValue, request: Arc<dyn RequestInfo>) {
        let severity = is_client_error(error).then_some(LogSeverity::Warning);
        self.request_logger(request).report_error(error, severity);
    }

    /// Reports every panic of the process through `logging_to`, before running the panic hook
    /// that was installed previously.
    ///
    /// The hook stays installed until [`ProcessHook::detach`] is called. Dropping the returned
    /// handle leaves it installed.
    pub fn attach_to_process(&self, logging_to: StructuredLogger) -> ProcessHook {
        let previous: Arc<PanicHook> = Arc::from(panic::take_hook());
        let chained = Arc::clone(&previous);

        panic::set_hook(Box::new(move |info| {
            let location = info.location();
            logging_to.report(
                &LogValue::from(panic_error(info)),
                None,
                location.map(LogEntrySourceLocation::from),
            );
            chained(info);
        }));

        ProcessHook {
            previous: Some(previous),
        }
    }
}

type PanicHook = dyn Fn(&PanicHookInfo<'_>) + Sync + Send + 'static;

/// The panic hook installed by [`Logging::attach_to_process`].
#[must_use = "the hook can only be detached through this handle"]
pub struct ProcessHook {
    previous: Option<Arc<PanicHook>>,
}

impl fmt::Debug for ProcessHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessHook")
            .field("attached", &self.is_attached())
            .finish()
    }
}

impl ProcessHook {
    /// Restores the panic hook that was installed before this one. Returns `false` if the hook
    /// was already detached.
    ///
    /// Hooks installed after this one are replaced as well.
    pub fn detach(&mut self) -> bool {
        let Some(previous) = self.previous.take() else {
            return false;
        };
        panic::set_hook(Box::new(move |info| previous(info)));
        true
    }

    /// Whether the hook is still installed.
    pub fn is_attached(&self) -> bool {
        self.previous.is_some()
    }
}

fn panic_error(info: &PanicHookInfo<'_>) -> ErrorValue {
    let mut error = ErrorValue::new(panic_message(info.payload()))
        .with_name(PANIC_ERROR_NAME)
        .with_prop(UNCAUGHT_EXCEPTION_TYPE, PANIC_EXCEPTION_TYPE);
    if let Some(location) = info.location() {
        error = error.with_prop("location", location.to_string());
    }
    if let Some(name) = thread::current().name() {
        error = error.with_prop("thread", name);
    }
    error
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "Box<dyn Any>".to_string()
    }
}

fn is_client_error(error: &LogValue) -> bool {
    let status = STATUS_CODE_PROPERTIES
        .into_iter()
        .filter_map(|property| status_code(&error.property(property)?))
        .find(|status| *status != 0.0);
    status.is_some_and(|status| status < FIRST_SERVER_ERROR_STATUS)
}

#[allow(clippy::as_conversions)] // Status codes are small integers.
fn status_code(value: &LogValue) -> Option<f64> {
    match value {
        LogValue::Int(status) => Some(*status as f64),
        LogValue::UInt(status) => Some(*status as f64),
        LogValue::Float(status) if status.is_finite() => Some(*status),
        LogValue::String(status) => status.trim().parse().ok(),
        _ => None,
    }
}
