//! Where rendered entries go: the console, or a transport in production.

use std::io::{self, Write};

use crate::{
    entry::{TransportData, TransportLogEntry},
    severity::ConsoleMethod,
};

/// A console that rendered lines are written to.
pub trait ConsoleSink: Send + Sync {
    /// Writes one line, without its trailing newline, through the given console method.
    fn write_line(&self, method: ConsoleMethod, line: &str);
}

/// Writes to the process's standard output and standard error.
///
/// [`ConsoleMethod::Warn`] and [`ConsoleMethod::Error`] go to standard error, everything else to
/// standard output.
#[derive(Clone, Copy, Debug, Default)]
pub struct StdConsole;

impl StdConsole {
    /// Writes the line and its newline with a single `write_all` call, so that lines written from
    /// several threads do not interleave.
    fn flush(method: ConsoleMethod, line: &str) -> Result<(), io::Error> {
        let mut buffer = Vec::with_capacity(line.len().saturating_add(1));
        buffer.extend_from_slice(line.as_bytes());
        buffer.push(b'\n');

        if method.is_stderr() {
            io::stderr().lock().write_all(&buffer)
        } else {
            io::stdout().lock().write_all(&buffer)
        }
    }
}

impl ConsoleSink for StdConsole {
    fn write_line(&self, method: ConsoleMethod, line: &str) {
        if let Err(error) = Self::flush(method, line) {
            tracing::debug!(?error, ?method, "Failed to write log line to console");
        }
    }
}

/// Receives production entries in place of the console.
///
/// Implemented for any `Fn(TransportLogEntry, TransportData)`.
pub trait Transport: Send + Sync {
    /// Handles one entry. Called synchronously, once per log call.
    fn send(&self, entry: TransportLogEntry, data: TransportData);
}

impl<F> Transport for F
where
    F: Fn(TransportLogEntry, TransportData) + Send + Sync,
{
    fn send(&self, entry: TransportLogEntry, data: TransportData) {
        self(entry, data);
    }
}

/// How entries are rendered.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RenderMode {
    /// One human-readable line per entry.
    #[default]
    Development,

    /// One JSON object per line, or a call to the transport when one is configured.
    Production,
}

impl RenderMode {
    /// Environment variable selecting the render mode.
    pub const ENV_VAR: &'static str = "APP_ENV";

    /// Reads the render mode from [`RenderMode::ENV_VAR`]: `production` selects
    /// [`RenderMode::Production`], anything else [`RenderMode::Development`].
    pub fn from_env() -> Self {
        Self::from_env_value(std::env::var(Self::ENV_VAR).ok().as_deref())
    }

    fn from_env_value(value: Option<&str>) -> Self {
        match value {
            Some(value) if value.trim().eq_ignore_ascii_case("production") => Self::Production,
            _ => Self::Development,
        }
    }
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    #[test_case(Some("production"), RenderMode::Production)]
    #[test_case(Some("PRODUCTION"), RenderMode::Production)]
    #[test_case(Some("development"), RenderMode::Development)]
    #[test_case(Some(""), RenderMode::Development)]
    #[test_case(None, RenderMode::Development)]
    fn reads_render_mode(value: Option<&str>, expected: RenderMode) {
        assert_eq!(RenderMode::from_env_value(value), expected);
    }
}
