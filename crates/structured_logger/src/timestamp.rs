//! Conversions between [`OffsetDateTime`] and the representations used on the wire.

use serde::Serialize;
use time::{
    format_description::{well_known::Rfc3339, BorrowedFormatItem},
    macros::format_description,
    OffsetDateTime, UtcOffset,
};

const ISO_MILLIS: &[BorrowedFormatItem<'static>] = format_description!(
    "[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:3]Z"
);

const NS_MILLISECOND: i128 = 1_000_000;

/// A point in time split into whole seconds and nanoseconds, as understood by the logging agent.
///
/// See <https://cloud.google.com/logging/docs/agent/configuration#timestamp-processing>.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct Timestamp {
    /// Whole seconds since the Unix epoch.
    pub seconds: i64,

    /// Nanoseconds past `seconds`, always in `0..1_000_000_000`.
    pub nanos: u32,
}

impl From<OffsetDateTime> for Timestamp {
    fn from(value: OffsetDateTime) -> Self {
        Self {
            seconds: value.unix_timestamp(),
            nanos: value.nanosecond(),
        }
    }
}

/// Renders a timestamp in UTC as ISO-8601 with millisecond precision, e.g.
/// `2024-12-02T12:23:11.843Z`. Sub-millisecond digits are truncated.
pub fn to_iso_millis(value: OffsetDateTime) -> String {
    let utc = value.to_offset(UtcOffset::UTC);
    utc.format(ISO_MILLIS).unwrap_or_else(|_| utc.to_string())
}

/// Renders a timestamp in UTC as RFC 3339 with full nanosecond precision.
pub fn to_rfc3339(value: OffsetDateTime) -> String {
    let utc = value.to_offset(UtcOffset::UTC);
    utc.format(&Rfc3339).unwrap_or_else(|_| to_iso_millis(utc))
}

/// Parses an RFC 3339 timestamp, returning `None` for anything that is not one.
pub fn parse_rfc3339(value: &str) -> Option<OffsetDateTime> {
    OffsetDateTime::parse(value, &Rfc3339).ok()
}

/// Interprets a number as milliseconds since the Unix epoch.
pub fn from_unix_millis(milliseconds: i128) -> Option<OffsetDateTime> {
    from_unix_nanos(milliseconds.checked_mul(NS_MILLISECOND)?)
}

/// Interprets a number as nanoseconds since the Unix epoch.
pub fn from_unix_nanos(nanoseconds: i128) -> Option<OffsetDateTime> {
    OffsetDateTime::from_unix_timestamp_nanos(nanoseconds).ok()
}

/// Interprets a fractional number of milliseconds since the Unix epoch, truncated to the
/// nanosecond.
#[allow(clippy::as_conversions)] // saturating float to integer casts
pub fn from_unix_millis_f64(milliseconds: f64) -> Option<OffsetDateTime> {
    if !milliseconds.is_finite() {
        return None;
    }
    let whole = milliseconds.trunc();
    let fraction_nanos = ((milliseconds - whole) * 1_000_000.0).trunc() as i128;
    from_unix_millis(whole as i128)?
        .checked_add(time::Duration::nanoseconds(fraction_nanos as i64))
}
