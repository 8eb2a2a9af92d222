//! Human-readable rendering of elapsed time, as used by the logger's timer methods.

use std::time::Duration;

const NS_MICROSECOND: u128 = 1_000;
const NS_MILLISECOND: u128 = 1_000 * NS_MICROSECOND;
const NS_SECOND: u128 = 1_000 * NS_MILLISECOND;

const MS_SECOND: u128 = 1_000;
const MS_MINUTE: u128 = 60 * MS_SECOND;
const MS_HOUR: u128 = 60 * MS_MINUTE;

/// Formats a nanosecond count with a precision that depends on its magnitude.
///
/// | Range         | Output                       |
/// |---------------|------------------------------|
/// | `< 1µs`       | `999ns`                      |
/// | `< 1ms`       | `999.999µs`                  |
/// | `< 1s`        | `999.999ms`                  |
/// | `< 60s`       | `59.999s`                    |
/// | `< 1h`        | `59:59.999 (m:ss.SSS)`       |
/// | otherwise     | `1:00:00.000 (h:mm:ss.SSS)`  |
///
/// From one millisecond upwards the value is rounded half-up to the displayed precision before
/// the unit is picked, so a value that rounds to a full second is shown as `1.000s` rather than
/// `1000.000ms`, and one that rounds to a full minute as `1:00.000` rather than `60.000s`.
///
/// # Examples
///
/// ```
/// use structured_logger::format_duration;
///
/// assert_eq!(format_duration(999), "999ns");
/// assert_eq!(format_duration(1_000), "1.000µs");
/// assert_eq!(format_duration(1_000_500), "1.001ms");
/// assert_eq!(format_duration(59_999_500_000), "1:00.000 (m:ss.SSS)");
/// ```
pub fn format_duration(nanoseconds: u128) -> String {
    if nanoseconds < NS_MICROSECOND {
        return format!("{nanoseconds}ns");
    }

    if nanoseconds < NS_MILLISECOND {
        return format!(
            "{}.{:03}µs",
            nanoseconds / NS_MICROSECOND,
            nanoseconds % NS_MICROSECOND
        );
    }

    let microseconds = round_half_up(nanoseconds, NS_MICROSECOND);
    if microseconds < NS_SECOND / NS_MICROSECOND {
        return format!("{}.{:03}ms", microseconds / 1_000, microseconds % 1_000);
    }

    let milliseconds = round_half_up(nanoseconds, NS_MILLISECOND);
    let millis_part = milliseconds % MS_SECOND;

    if milliseconds < MS_MINUTE {
        format!("{}.{millis_part:03}s", milliseconds / MS_SECOND)
    } else if milliseconds < MS_HOUR {
        format!(
            "{}:{:02}.{millis_part:03} (m:ss.SSS)",
            milliseconds / MS_MINUTE,
            (milliseconds % MS_MINUTE) / MS_SECOND
        )
    } else {
        format!(
            "{}:{:02}:{:02}.{millis_part:03} (h:mm:ss.SSS)",
            milliseconds / MS_HOUR,
            (milliseconds % MS_HOUR) / MS_MINUTE,
            (milliseconds % MS_MINUTE) / MS_SECOND
        )
    }
}

/// Formats a [`Duration`] with [`format_duration`].
pub fn format_std_duration(duration: Duration) -> String {
    format_duration(duration.as_nanos())
}

fn round_half_up(value: u128, unit: u128) -> u128 {
    value.saturating_add(unit / 2) / unit
}
