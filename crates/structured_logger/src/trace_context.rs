//! Extraction of distributed-trace context from request headers.
//!
//! Two formats are understood:
//!
//! - W3C `traceparent`: `00-<32 hex trace id>-<16 hex span id>-<2 hex flags>`
//! - Legacy `x-cloud-trace-context`: `<hex trace id>/<decimal span id>[;o=<0|1>]`
//!
//! When both headers are present and valid, `traceparent` wins. Malformed headers are ignored.

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

/// Name of the W3C trace context header.
pub const TRACEPARENT_HEADER: &str = "traceparent";

/// Name of the legacy trace context header.
pub const CLOUD_TRACE_CONTEXT_HEADER: &str = "x-cloud-trace-context";

const SUPPORTED_TRACEPARENT_VERSION: &str = "00";

static TRACEPARENT: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"^([0-9a-fA-F]{2})-([0-9a-fA-F]{32})-([0-9a-fA-F]{16})-([0-9a-fA-F]{2})$").ok()
});

static CLOUD_TRACE_CONTEXT: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^([0-9a-fA-F]+)/([0-9]+)(?:;o=(.*))?$").ok());

/// Trace fields attached to every entry logged for a request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceContext {
    /// `projects/<project id>/traces/<trace id>`.
    pub trace: String,

    /// Span id as 16 lowercase hexadecimal digits.
    pub span_id: String,

    /// Whether the trace was sampled.
    pub trace_sampled: bool,
}

impl TraceContext {
    /// The bare trace id, without the `projects/<project id>/traces/` prefix.
    pub fn trace_id(&self) -> &str {
        short_trace_id(&self.trace)
    }
}

/// Strips everything up to the last `/` from a trace resource name.
pub fn short_trace_id(trace: &str) -> &str {
    trace.rsplit('/').next().unwrap_or(trace)
}

struct ParsedHeader<'a> {
    trace_id: &'a str,
    span_id: u64,
    sampled: bool,
}

/// Extracts the trace context of a request.
///
/// `lookup` returns the value of a header given its lowercase name.
pub fn extract<F>(project_id: &str, lookup: F) -> Option<TraceContext>
where
    F: Fn(&str) -> Option<String>,
{
    let traceparent = lookup(TRACEPARENT_HEADER);
    let cloud_trace_context = lookup(CLOUD_TRACE_CONTEXT_HEADER);

    let parsed = traceparent
        .as_deref()
        .and_then(parse_traceparent)
        .or_else(|| cloud_trace_context.as_deref().and_then(parse_cloud_trace_context))?;

    Some(TraceContext {
        trace: format!(
            "projects/{project_id}/traces/{}",
            parsed.trace_id.to_ascii_lowercase()
        ),
        span_id: format!("{:016x}", parsed.span_id),
        trace_sampled: parsed.sampled,
    })
}

fn parse_traceparent(header: &str) -> Option<ParsedHeader<'_>> {
    let captures = TRACEPARENT.as_ref()?.captures(header.trim())?;
    let version = captures.get(1)?.as_str();
    if version != SUPPORTED_TRACEPARENT_VERSION {
        return None;
    }
    let trace_id = captures.get(2)?.as_str();
    let span_id = u64::from_str_radix(captures.get(3)?.as_str(), 16).ok()?;
    let flags = u8::from_str_radix(captures.get(4)?.as_str(), 16).ok()?;

    validate(ParsedHeader {
        trace_id,
        span_id,
        sampled: flags & 1 == 1,
    })
}

fn parse_cloud_trace_context(header: &str) -> Option<ParsedHeader<'_>> {
    let captures = CLOUD_TRACE_CONTEXT.as_ref()?.captures(header)?;
    let trace_id = captures.get(1)?.as_str();
    // Span ids larger than 64 bits are rejected.
    let span_id = captures.get(2)?.as_str().parse::<u64>().ok()?;
    let options = captures.get(3).map(|options| options.as_str());

    validate(ParsedHeader {
        trace_id,
        span_id,
        sampled: options != Some("0"),
    })
}

/// Rejects all-zero ids. Trace ids are already known to be hex, of any length.
fn validate(parsed: ParsedHeader<'_>) -> Option<ParsedHeader<'_>> {
    let trace_is_set = parsed.trace_id.bytes().any(|digit| digit != b'0');
    (trace_is_set && parsed.span_id != 0).then_some(parsed)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use pretty_assertions::assert_eq;
    use test_case::test_case;

    use super::*;

    const PROJECT: &str = "test-project";
    const TRACE_ID: &str = "59973d340da5c40f77349df948ef7531";

    fn headers(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    fn span_of(pairs: &[(&str, &str)]) -> Option<String> {
        extract(PROJECT, headers(pairs)).map(|context| context.span_id)
    }

    #[test]
    fn parses_cloud_trace_context() {
        let context = extract(
            PROJECT,
            headers(&[(CLOUD_TRACE_CONTEXT_HEADER, &format!("{TRACE_ID}/288377245651"))]),
        );

        assert_eq!(
            context,
            Some(TraceContext {
                trace: format!("projects/{PROJECT}/traces/{TRACE_ID}"),
                span_id: "00000043249f8fd3".to_string(),
                trace_sampled: true,
            })
        );
    }

    #[test_case("15", "000000000000000f")]
    #[test_case("9007199254740991", "001fffffffffffff")]
    #[test_case("17710341711684079263", "f5c7c5f40fb68e9f")]
    #[test_case("18446744073709551615", "ffffffffffffffff")]
    fn renders_decimal_span_ids_as_hex(span: &str, expected: &str) {
        let header = format!("{TRACE_ID}/{span}");
        assert_eq!(
            span_of(&[(CLOUD_TRACE_CONTEXT_HEADER, &header)]).as_deref(),
            Some(expected)
        );

        let traceparent = format!("00-{TRACE_ID}-{expected}-01");
        assert_eq!(
            span_of(&[(TRACEPARENT_HEADER, &traceparent)]).as_deref(),
            Some(expected)
        );
    }

    #[test_case(";o=1", true)]
    #[test_case(";o=0", false)]
    #[test_case("", true)]
    fn reads_legacy_sampling_option(options: &str, sampled: bool) {
        let header = format!("{TRACE_ID}/1{options}");
        let context = extract(PROJECT, headers(&[(CLOUD_TRACE_CONTEXT_HEADER, &header)]));
        assert_eq!(context.map(|context| context.trace_sampled), Some(sampled));
    }

    #[test_case("01", true)]
    #[test_case("00", false)]
    #[test_case("03", true)]
    #[test_case("02", false)]
    fn reads_traceparent_flags(flags: &str, sampled: bool) {
        let header = format!("00-{TRACE_ID}-00f067aa0ba902b7-{flags}");
        let context = extract(PROJECT, headers(&[(TRACEPARENT_HEADER, &header)]));
        assert_eq!(context.map(|context| context.trace_sampled), Some(sampled));
    }

    #[test]
    fn prefers_traceparent() {
        let context = extract(
            PROJECT,
            headers(&[
                (
                    TRACEPARENT_HEADER,
                    "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-00",
                ),
                (CLOUD_TRACE_CONTEXT_HEADER, &format!("{TRACE_ID}/1;o=1")),
            ]),
        );

        assert_eq!(
            context,
            Some(TraceContext {
                trace: format!("projects/{PROJECT}/traces/4bf92f3577b34da6a3ce929d0e0e4736"),
                span_id: "00f067aa0ba902b7".to_string(),
                trace_sampled: false,
            })
        );
    }

    #[test]
    fn falls_back_to_legacy_when_traceparent_is_invalid() {
        let span = span_of(&[
            (TRACEPARENT_HEADER, "01-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01"),
            (CLOUD_TRACE_CONTEXT_HEADER, &format!("{TRACE_ID}/15")),
        ]);
        assert_eq!(span.as_deref(), Some("000000000000000f"));
    }

    #[test]
    fn lowercases_ids() {
        let context = extract(
            PROJECT,
            headers(&[(
                TRACEPARENT_HEADER,
                "00-4BF92F3577B34DA6A3CE929D0E0E4736-00F067AA0BA902B7-01",
            )]),
        );
        assert_eq!(
            context.as_ref().map(TraceContext::trace_id),
            Some("4bf92f3577b34da6a3ce929d0e0e4736")
        );
        assert_eq!(
            context.map(|context| context.span_id).as_deref(),
            Some("00f067aa0ba902b7")
        );
    }

    #[test]
    fn accepts_legacy_trace_ids_of_any_length() {
        let context = extract(
            PROJECT,
            headers(&[(
                CLOUD_TRACE_CONTEXT_HEADER,
                "59973D340DA5C40F77349DF948EF75310A1B2C3D/1;o=1",
            )]),
        );
        assert_eq!(
            context.as_ref().map(TraceContext::trace_id),
            Some("59973d340da5c40f77349df948ef75310a1b2c3d")
        );

        let short = extract(PROJECT, headers(&[(CLOUD_TRACE_CONTEXT_HEADER, "abc/1")]));
        assert_eq!(short.as_ref().map(TraceContext::trace_id), Some("abc"));
    }

    #[test_case(&[] ; "no headers")]
    #[test_case(&[(CLOUD_TRACE_CONTEXT_HEADER, "00000000000000000000000000000000/1")] ; "zero legacy trace")]
    #[test_case(&[(CLOUD_TRACE_CONTEXT_HEADER, "0000000000000000000000000000000000000000/1")] ; "long zero legacy trace")]
    #[test_case(&[(CLOUD_TRACE_CONTEXT_HEADER, "59973d340da5c40f77349df948ef7531/0")] ; "zero legacy span")]
    #[test_case(&[(CLOUD_TRACE_CONTEXT_HEADER, "59973d340da5c40f77349df948ef7531/18446744073709551616")] ; "legacy span overflow")]
    #[test_case(&[(CLOUD_TRACE_CONTEXT_HEADER, "59973d340da5c40f77349df948ef7531")] ; "legacy span missing")]
    #[test_case(&[(CLOUD_TRACE_CONTEXT_HEADER, "not-hex/1")] ; "legacy trace not hex")]
    #[test_case(&[(CLOUD_TRACE_CONTEXT_HEADER, "59973d340da5c40f77349df948ef7531/12abc")] ; "legacy trailing garbage")]
    #[test_case(&[(TRACEPARENT_HEADER, "00-00000000000000000000000000000000-00f067aa0ba902b7-01")] ; "zero traceparent trace")]
    #[test_case(&[(TRACEPARENT_HEADER, "00-4bf92f3577b34da6a3ce929d0e0e4736-0000000000000000-01")] ; "zero traceparent span")]
    #[test_case(&[(TRACEPARENT_HEADER, "00-4bf92f3577b34da6a3ce929d0e0e473-00f067aa0ba902b7-01")] ; "short traceparent trace")]
    #[test_case(&[(TRACEPARENT_HEADER, "ff-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01")] ; "unsupported version")]
    fn rejects_invalid_headers(pairs: &[(&str, &str)]) {
        assert_eq!(extract(PROJECT, headers(pairs)), None);
    }
}
