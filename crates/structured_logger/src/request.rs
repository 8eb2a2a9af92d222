//! The request capability consumed by request-scoped loggers, and the HTTP descriptors derived
//! from it.

use std::{sync::Arc, time::Duration};

use indexmap::IndexMap;
use serde::Serialize;

/// Extracts the user of a request for error reports. Empty values are ignored.
pub type ExtractUser = Arc<dyn Fn(&dyn RequestInfo) -> Option<String> + Send + Sync>;

/// The response attached to a request, if one has been produced.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ResponseInfo {
    /// Response status code.
    pub status: u16,

    /// Value of the response `content-length` header.
    pub content_length: Option<u64>,
}

/// What a logger needs to know about an inbound request.
pub trait RequestInfo: Send + Sync {
    /// The request method, e.g. `GET`.
    fn method(&self) -> &str;

    /// The request URL as received, before any rewriting.
    fn url(&self) -> String;

    /// Returns a header value given its lowercase name.
    fn header(&self, name: &str) -> Option<String>;

    /// The protocol, e.g. `HTTP/1.1`.
    fn protocol(&self) -> Option<String> {
        None
    }

    /// The IP address of the peer the request was received from.
    fn direct_ip(&self) -> Option<String> {
        None
    }

    /// The response, when one is attached to the request.
    fn response(&self) -> Option<ResponseInfo> {
        None
    }

    /// The client IP: the direct peer, else the first `x-forwarded-for` entry.
    fn remote_ip(&self) -> Option<String> {
        self.direct_ip()
            .filter(|ip| !ip.is_empty())
            .or_else(|| {
                self.header("x-forwarded-for")?
                    .split(',')
                    .map(str::trim)
                    .find(|ip| !ip.is_empty())
                    .map(str::to_string)
            })
    }
}

/// An owned snapshot of a request, for frameworks without a dedicated adapter.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RequestParts {
    /// The request method.
    pub method: String,

    /// The request URL.
    pub url: String,

    /// Headers, keyed by lowercase name.
    pub headers: IndexMap<String, String>,

    /// The protocol, e.g. `HTTP/1.1`.
    pub protocol: Option<String>,

    /// The peer IP address.
    pub remote_addr: Option<String>,

    /// The attached response.
    pub response: Option<ResponseInfo>,
}

impl RequestParts {
    /// Creates a snapshot with no headers.
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            url: url.into(),
            ..Self::default()
        }
    }

    /// Adds a header. Names are stored lowercase.
    #[must_use]
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    /// Sets the protocol.
    #[must_use]
    pub fn with_protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocol = Some(protocol.into());
        self
    }

    /// Sets the peer IP address.
    #[must_use]
    pub fn with_remote_addr(mut self, remote_addr: impl Into<String>) -> Self {
        self.remote_addr = Some(remote_addr.into());
        self
    }

    /// Attaches a response.
    #[must_use]
    pub fn with_response(mut self, response: ResponseInfo) -> Self {
        self.response = Some(response);
        self
    }
}

impl RequestInfo for RequestParts {
    fn method(&self) -> &str {
        &self.method
    }

    fn url(&self) -> String {
        self.url.clone()
    }

    fn header(&self, name: &str) -> Option<String> {
        self.headers.get(&name.to_ascii_lowercase()).cloned()
    }

    fn protocol(&self) -> Option<String> {
        self.protocol.clone()
    }

    fn direct_ip(&self) -> Option<String> {
        self.remote_addr.clone()
    }

    fn response(&self) -> Option<ResponseInfo> {
        self.response
    }
}

/// Reads the peer address from a [`std::net::SocketAddr`] extension and the response from a
/// [`ResponseInfo`] extension, as inserted by the server integration.
#[cfg(feature = "http")]
impl<B> RequestInfo for http::Request<B>
where
    B: Send + Sync,
{
    fn method(&self) -> &str {
        http::Request::method(self).as_str()
    }

    fn url(&self) -> String {
        self.uri().to_string()
    }

    fn header(&self, name: &str) -> Option<String> {
        self.headers()
            .get(name)?
            .to_str()
            .ok()
            .map(str::to_string)
    }

    fn protocol(&self) -> Option<String> {
        Some(format!("{:?}", self.version()))
    }

    fn direct_ip(&self) -> Option<String> {
        self.extensions()
            .get::<std::net::SocketAddr>()
            .map(|addr| addr.ip().to_string())
    }

    fn response(&self) -> Option<ResponseInfo> {
        self.extensions().get::<ResponseInfo>().copied()
    }
}

fn referrer(request: &dyn RequestInfo) -> Option<String> {
    request
        .header("referer")
        .or_else(|| request.header("referrer"))
}

/// The HTTP context of an error report.
///
/// See <https://cloud.google.com/error-reporting/reference/rest/v1beta1/ErrorContext#httprequestcontext>.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorHttpContext {
    /// The request method.
    pub method: String,

    /// The request URL.
    pub url: String,

    /// The `user-agent` header.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,

    /// The `referer` header.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub referrer: Option<String>,

    /// The client IP.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_ip: Option<String>,

    /// Status of the attached response.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_status_code: Option<u16>,
}

impl ErrorHttpContext {
    /// Captures the context of a request.
    pub fn from_request(request: &dyn RequestInfo) -> Self {
        Self {
            method: request.method().to_string(),
            url: request.url(),
            user_agent: request.header("user-agent"),
            referrer: referrer(request),
            remote_ip: request.remote_ip(),
            response_status_code: request.response().map(|response| response.status),
        }
    }
}

/// The `httpRequest` field of a log entry, for access-log style entries.
///
/// See <https://cloud.google.com/logging/docs/reference/v2/rest/v2/LogEntry#httprequest>.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpRequest {
    /// The request method.
    pub request_method: String,

    /// The request URL.
    pub request_url: String,

    /// Size of the request in bytes, from `content-length`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_size: Option<u64>,

    /// Response status code.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,

    /// Size of the response in bytes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_size: Option<u64>,

    /// The `user-agent` header.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,

    /// The client IP.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_ip: Option<String>,

    /// The `referer` header.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub referer: Option<String>,

    /// Time between receiving the request and sending the response, e.g. `0.250s`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency: Option<String>,

    /// The protocol, e.g. `HTTP/1.1`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
}

impl HttpRequest {
    /// Describes a request and its attached response.
    pub fn from_request(request: &dyn RequestInfo) -> Self {
        let response = request.response();
        Self {
            request_method: request.method().to_string(),
            request_url: request.url(),
            request_size: request
                .header("content-length")
                .and_then(|size| size.trim().parse().ok()),
            status: response.map(|response| response.status),
            response_size: response.and_then(|response| response.content_length),
            user_agent: request.header("user-agent"),
            remote_ip: request.remote_ip(),
            referer: referrer(request),
            latency: None,
            protocol: request.protocol(),
        }
    }

    /// Sets the latency.
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(format!(
            "{}.{:09}s",
            latency.as_secs(),
            latency.subsec_nanos()
        ));
        self
    }
}
