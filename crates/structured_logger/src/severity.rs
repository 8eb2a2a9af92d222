//! Log severities and the console stream each of them is written to.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::LoggerError;

/// Severity of a log entry.
///
/// See <https://cloud.google.com/logging/docs/reference/v2/rest/v2/LogEntry#logseverity>.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LogSeverity {
    /// The log entry has no assigned severity level.
    #[default]
    Default,

    /// Debug or trace information.
    Debug,

    /// Routine information, such as ongoing status or performance.
    Info,

    /// Normal but significant events, such as start up, shut down, or a configuration change.
    Notice,

    /// Warning events might cause problems.
    Warning,

    /// Error events are likely to cause problems.
    Error,

    /// Critical events cause more severe problems or outages.
    Critical,

    /// A person must take an action immediately.
    Alert,

    /// One or more systems are unusable.
    Emergency,
}

impl LogSeverity {
    /// Every severity, in increasing order of importance.
    pub const ALL: [Self; 9] = [
        Self::Default,
        Self::Debug,
        Self::Info,
        Self::Notice,
        Self::Warning,
        Self::Error,
        Self::Critical,
        Self::Alert,
        Self::Emergency,
    ];

    /// The wire name of the severity, e.g. `WARNING`.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Default => "DEFAULT",
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Notice => "NOTICE",
            Self::Warning => "WARNING",
            Self::Error => "ERROR",
            Self::Critical => "CRITICAL",
            Self::Alert => "ALERT",
            Self::Emergency => "EMERGENCY",
        }
    }

    /// The console stream entries of this severity are written to.
    pub const fn console_method(self) -> ConsoleMethod {
        match self {
            Self::Default => ConsoleMethod::Log,
            Self::Debug => ConsoleMethod::Debug,
            Self::Info | Self::Notice => ConsoleMethod::Info,
            Self::Warning => ConsoleMethod::Warn,
            Self::Error | Self::Critical | Self::Alert | Self::Emergency => ConsoleMethod::Error,
        }
    }
}

impl fmt::Display for LogSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogSeverity {
    type Err = LoggerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|severity| severity.as_str() == s)
            .ok_or_else(|| LoggerError::UnknownSeverity(s.to_string()))
    }
}

/// The console method a line is written through.
///
/// [`ConsoleMethod::Log`], [`ConsoleMethod::Info`] and [`ConsoleMethod::Debug`] go to standard
/// output, [`ConsoleMethod::Warn`] and [`ConsoleMethod::Error`] to standard error.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ConsoleMethod {
    /// `console.log`
    Log,

    /// `console.debug`
    Debug,

    /// `console.info`
    Info,

    /// `console.warn`
    Warn,

    /// `console.error`
    Error,
}

impl ConsoleMethod {
    /// Whether lines for this method belong on standard error.
    pub const fn is_stderr(self) -> bool {
        matches!(self, Self::Warn | Self::Error)
    }
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    #[test_case(LogSeverity::Default, ConsoleMethod::Log)]
    #[test_case(LogSeverity::Debug, ConsoleMethod::Debug)]
    #[test_case(LogSeverity::Info, ConsoleMethod::Info)]
    #[test_case(LogSeverity::Notice, ConsoleMethod::Info)]
    #[test_case(LogSeverity::Warning, ConsoleMethod::Warn)]
    #[test_case(LogSeverity::Error, ConsoleMethod::Error)]
    #[test_case(LogSeverity::Critical, ConsoleMethod::Error)]
    #[test_case(LogSeverity::Alert, ConsoleMethod::Error)]
    #[test_case(LogSeverity::Emergency, ConsoleMethod::Error)]
    fn maps_to_console_method(severity: LogSeverity, method: ConsoleMethod) {
        assert_eq!(severity.console_method(), method);
    }

    #[test]
    fn round_trips_names() {
        for severity in LogSeverity::ALL {
            assert_eq!(severity.as_str().parse::<LogSeverity>().ok(), Some(severity));
            assert_eq!(
                serde_json::to_value(severity).ok(),
                Some(serde_json::Value::from(severity.as_str()))
            );
        }
    }

    #[test]
    fn rejects_unknown_names() {
        assert!(matches!(
            "FATAL".parse::<LogSeverity>(),
            Err(LoggerError::UnknownSeverity(name)) if name == "FATAL"
        ));
        assert!("warning".parse::<LogSeverity>().is_err());
    }
}
