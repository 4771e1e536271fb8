//! Framework independent access-log state machine.
//!
//! Every adapter drives the same three steps:
//!
//! 1. [`AccessLog::begin`] marks the start time, resolves the request id, derives
//!    the request logger and, unless the path is excluded, writes the
//!    `incoming request` trace record.
//! 2. The adapter attaches [`Transaction::logger`] to the request and runs the
//!    downstream handler.
//! 3. [`Transaction::complete`] (or [`Transaction::responded`] followed by
//!    [`Completion::finish`] once the body is written) writes the
//!    `request completed` info record.

use std::{borrow::Cow, time::Instant};

use regex::Regex;

use crate::error::Result;
use crate::level::Severity;
use crate::logger::Logger;
use crate::record::{
    AccessFields, Host, Http, HttpRequest, HttpResponse, ResponseBody, Url, UserAgent,
};
use crate::request_id::{self, HeaderSource, REQUEST_ID_HEADER, REQUEST_ID_KEY};

pub const USER_AGENT_HEADER: &str = "user-agent";
pub const FORWARDED_HOST_HEADER: &str = "x-forwarded-host";
pub const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";
pub const CONTENT_LENGTH_HEADER: &str = "content-length";

pub const INCOMING_REQUEST_MSG: &str = "incoming request";
pub const REQUEST_COMPLETED_MSG: &str = "request completed";

const NANOS_PER_MILLI: f64 = 1_000_000.0;

/// What the state machine needs to know about an inbound request.
pub trait RequestView: HeaderSource {
    fn method(&self) -> &str;

    /// Path including the query string, e.g. `/search?q=rust`.
    fn uri(&self) -> Cow<'_, str>;

    /// Raw `Host` value, port included.
    fn host(&self) -> Option<Cow<'_, str>>;

    /// Request id known to the framework, used when the request carries no id header.
    fn request_id_hint(&self) -> Option<String> {
        None
    }
}

impl<B> HeaderSource for http::Request<B> {
    fn header(&self, name: &str) -> Option<Cow<'_, str>> {
        self.headers().header(name)
    }
}

impl<B> RequestView for http::Request<B> {
    fn method(&self) -> &str {
        self.method().as_str()
    }

    fn uri(&self) -> Cow<'_, str> {
        let uri = self.uri();
        Cow::Borrowed(uri.path_and_query().map_or(uri.path(), |pq| pq.as_str()))
    }

    fn host(&self) -> Option<Cow<'_, str>> {
        self.headers()
            .header(http::header::HOST.as_str())
            .or_else(|| self.uri().host().map(Cow::Borrowed))
    }
}

/// Access-log configuration shared by all adapters.
#[derive(Debug, Clone)]
pub struct AccessLog {
    logger: Logger,
    exclude: Vec<String>,
    exclude_regex: Vec<Regex>,
    request_id_header: String,
}

impl AccessLog {
    pub fn new(logger: Logger) -> Self {
        AccessLog {
            logger,
            exclude: Vec::new(),
            exclude_regex: Vec::new(),
            request_id_header: REQUEST_ID_HEADER.to_string(),
        }
    }

    /// Do not log requests whose path starts with `prefix`.
    pub fn exclude<T: Into<String>>(mut self, prefix: T) -> Self {
        self.exclude.push(prefix.into());
        self
    }

    /// Do not log requests whose path matches `pattern`.
    pub fn exclude_regex(mut self, pattern: &str) -> Result<Self> {
        self.exclude_regex.push(Regex::new(pattern)?);
        Ok(self)
    }

    /// Header carrying the inbound request id. Defaults to `x-request-id`.
    pub fn request_id_header<T: Into<String>>(mut self, header: T) -> Self {
        self.request_id_header = header.into();
        self
    }

    pub fn logger(&self) -> &Logger {
        &self.logger
    }

    pub fn is_excluded(&self, uri: &str) -> bool {
        self.exclude.iter().any(|prefix| uri.starts_with(prefix.as_str()))
            || self.exclude_regex.iter().any(|re| re.is_match(uri))
    }

    /// Starts the transaction for `req` and writes the incoming record.
    pub fn begin<R: RequestView + ?Sized>(&self, req: &R) -> Transaction {
        let start = Instant::now();

        let uri = req.uri();
        let excluded = self.is_excluded(&uri);

        let provided = req
            .header(&self.request_id_header)
            .filter(|id| !id.is_empty())
            .map(Cow::into_owned)
            .or_else(|| req.request_id_hint());
        // excluded requests stay silent, id generation included
        let id_logger = if excluded {
            self.logger.with_level(Severity::Disabled)
        } else {
            self.logger.clone()
        };
        let request_id =
            request_id::resolve_with(&id_logger, provided.as_deref(), request_id::generate);

        let request = RequestInfo {
            method: req.method().to_string(),
            user_agent: header_string(req, USER_AGENT_HEADER),
            path: uri.into_owned(),
            hostname: remove_port(&req.host().unwrap_or_default()).to_string(),
            forwarded_host: header_string(req, FORWARDED_HOST_HEADER),
            ip: header_string(req, FORWARDED_FOR_HEADER),
        };

        let transaction = Transaction {
            logger: self.logger.with(REQUEST_ID_KEY, &request_id),
            request_id,
            start,
            excluded,
            request,
        };
        if !excluded {
            transaction.log_incoming();
        }
        transaction
    }
}

#[derive(Debug, Clone)]
struct RequestInfo {
    method: String,
    user_agent: String,
    path: String,
    hostname: String,
    forwarded_host: String,
    ip: String,
}

impl RequestInfo {
    fn fields(&self, response: Option<HttpResponse>, response_time: Option<f64>) -> AccessFields {
        AccessFields {
            http: Http {
                request: Some(HttpRequest {
                    method: self.method.clone(),
                    user_agent: UserAgent {
                        original: self.user_agent.clone(),
                    },
                }),
                response,
            },
            url: Url {
                path: self.path.clone(),
            },
            host: Host {
                hostname: self.hostname.clone(),
                forwarded_host: self.forwarded_host.clone(),
                ip: self.ip.clone(),
            },
            response_time,
        }
    }
}

/// One request on its way through the middleware.
#[derive(Debug)]
pub struct Transaction {
    logger: Logger,
    request_id: String,
    start: Instant,
    excluded: bool,
    request: RequestInfo,
}

impl Transaction {
    /// The request logger, carrying `reqId`.
    pub fn logger(&self) -> &Logger {
        &self.logger
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn is_excluded(&self) -> bool {
        self.excluded
    }

    fn log_incoming(&self) {
        self.logger
            .trace()
            .fields(&self.request.fields(None, None))
            .msg(INCOMING_REQUEST_MSG);
    }

    /// The handler produced a response whose body has not been written yet.
    pub fn responded(self, summary: ResponseSummary) -> Completion {
        Completion {
            transaction: self,
            summary,
        }
    }

    /// Writes the completed record.
    pub fn complete(self, summary: ResponseSummary) {
        if self.excluded {
            return;
        }

        let response_time = self.start.elapsed().as_nanos() as f64 / NANOS_PER_MILLI;
        let response = HttpResponse {
            status_code: summary.status,
            body: ResponseBody {
                bytes: summary.bytes(),
            },
        };

        self.logger
            .info()
            .fields(&self.request.fields(Some(response), Some(response_time)))
            .msg(REQUEST_COMPLETED_MSG);
    }
}

/// A transaction waiting for its response body to be written.
#[derive(Debug)]
pub struct Completion {
    transaction: Transaction,
    summary: ResponseSummary,
}

impl Completion {
    pub fn logger(&self) -> &Logger {
        self.transaction.logger()
    }

    /// Writes the completed record with `written` body bytes.
    pub fn finish(self, written: u64) {
        self.transaction.complete(self.summary.written(written));
    }
}

/// Response metadata the completed record is built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseSummary {
    pub status: u16,
    pub content_length: Option<u64>,
    pub written: u64,
}

impl ResponseSummary {
    pub fn new(status: u16) -> Self {
        ResponseSummary {
            status,
            content_length: None,
            written: 0,
        }
    }

    /// Raw `Content-Length` header value. Unparsable values are ignored.
    pub fn content_length(mut self, value: Option<&str>) -> Self {
        self.content_length = value.and_then(|v| v.trim().parse().ok());
        self
    }

    pub fn written(mut self, written: u64) -> Self {
        self.written = written;
        self
    }

    /// `Content-Length` when present, bytes written otherwise.
    pub fn bytes(&self) -> u64 {
        self.content_length.unwrap_or(self.written)
    }
}

fn header_string<R: RequestView + ?Sized>(req: &R, name: &str) -> String {
    req.header(name).map(Cow::into_owned).unwrap_or_default()
}

/// Drops everything from the first `:` on.
pub fn remove_port(host: &str) -> &str {
    host.split_once(':').map_or(host, |(name, _)| name)
}

#[cfg(test)]
mod tests {
    use http::{HeaderValue, Request};

    use super::*;
    use crate::testing::{Buffer, logger};

    fn request(uri: &str) -> Request<()> {
        Request::builder()
            .method("GET")
            .uri(uri)
            .header("x-request-id", "req-id")
            .header("user-agent", "goHttp")
            .header("x-forwarded-host", "client-host")
            .header("x-forwarded-for", "10.0.0.7")
            .body(())
            .unwrap()
    }

    #[test]
    fn test_remove_port() {
        assert_eq!(remove_port("my-host:3000"), "my-host");
        assert_eq!(remove_port("my-host"), "my-host");
        assert_eq!(remove_port(""), "");
    }

    #[test]
    fn test_summary_bytes() {
        let summary = ResponseSummary::new(200).written(21);
        assert_eq!(summary.bytes(), 21);
        assert_eq!(summary.content_length(Some("10")).bytes(), 10);
        assert_eq!(summary.content_length(Some("ten")).bytes(), 21);
        assert_eq!(ResponseSummary::new(204).bytes(), 0);
    }

    #[test]
    fn test_request_view() {
        let req = request("http://my-host:3000/my-req?page=2");
        assert_eq!(RequestView::method(&req), "GET");
        assert_eq!(RequestView::uri(&req), "/my-req?page=2");
        assert_eq!(RequestView::host(&req).as_deref(), Some("my-host"));

        let req = Request::builder()
            .uri("/")
            .header("host", "example.org:8080")
            .body(())
            .unwrap();
        assert_eq!(RequestView::host(&req).as_deref(), Some("example.org:8080"));
    }

    #[test]
    fn test_trace_writes_both_records() {
        let buffer = Buffer::default();
        let access = AccessLog::new(logger("trace", &buffer));

        let txn = access.begin(&request("http://my-host:3000/my-req"));
        assert_eq!(txn.request_id(), "req-id");
        txn.complete(ResponseSummary::new(418).written(21));

        let records = buffer.records();
        assert_eq!(records.len(), 2);

        let incoming = &records[0];
        assert_eq!(incoming.level, "10");
        assert_eq!(incoming.msg, INCOMING_REQUEST_MSG);
        assert_eq!(incoming.req_id, "req-id");
        let http = incoming.http.as_ref().unwrap();
        assert_eq!(http.request.as_ref().unwrap().method, "GET");
        assert_eq!(http.request.as_ref().unwrap().user_agent.original, "goHttp");
        assert!(http.response.is_none());
        assert_eq!(incoming.url.as_ref().unwrap().path, "/my-req");
        let host = incoming.host.as_ref().unwrap();
        assert_eq!(host.hostname, "my-host");
        assert_eq!(host.forwarded_host, "client-host");
        assert_eq!(host.ip, "10.0.0.7");
        assert!(incoming.response_time.is_none());

        let completed = &records[1];
        assert_eq!(completed.level, "30");
        assert_eq!(completed.msg, REQUEST_COMPLETED_MSG);
        assert_eq!(completed.req_id, "req-id");
        let response = completed.http.as_ref().unwrap().response.as_ref().unwrap();
        assert_eq!(response.status_code, 418);
        assert_eq!(response.body.bytes, 21);
        assert_eq!(completed.host, incoming.host);
        assert!(completed.response_time.unwrap() > 0.0);
    }

    #[test]
    fn test_info_writes_completed_only() {
        for level in ["debug", "info"] {
            let buffer = Buffer::default();
            let access = AccessLog::new(logger(level, &buffer));

            access
                .begin(&request("/my-req"))
                .complete(ResponseSummary::new(200));

            let records = buffer.records();
            assert_eq!(records.len(), 1, "level {level}");
            assert_eq!(records[0].msg, REQUEST_COMPLETED_MSG);
        }
    }

    #[test]
    fn test_warn_writes_nothing() {
        let buffer = Buffer::default();
        let access = AccessLog::new(logger("warn", &buffer));

        access
            .begin(&request("/my-req"))
            .complete(ResponseSummary::new(200));
        assert!(buffer.contents().is_empty());
    }

    #[test]
    fn test_excluded_prefix_is_silent() {
        let buffer = Buffer::default();
        let access = AccessLog::new(logger("trace", &buffer)).exclude("/-/");

        let req = Request::builder().uri("/-/healthz").body(()).unwrap();
        let txn = access.begin(&req);
        assert!(txn.is_excluded());
        assert!(!txn.request_id().is_empty());
        txn.complete(ResponseSummary::new(200));

        assert!(buffer.contents().is_empty());
        assert!(!access.is_excluded("/healthz"));
    }

    #[test]
    fn test_excluded_regex() {
        let buffer = Buffer::default();
        let access = AccessLog::new(logger("trace", &buffer))
            .exclude_regex(r"^/assets/.*\.css$")
            .unwrap();

        assert!(access.is_excluded("/assets/site.css"));
        assert!(!access.is_excluded("/assets/site.js"));
        assert!(AccessLog::new(Logger::default()).exclude_regex("(").is_err());
    }

    #[test]
    fn test_custom_request_id_header() {
        let buffer = Buffer::default();
        let access = AccessLog::new(logger("info", &buffer)).request_id_header("x-correlation-id");

        let req = Request::builder()
            .uri("/")
            .header("X-Correlation-Id", "corr-1")
            .body(())
            .unwrap();
        let txn = access.begin(&req);
        assert_eq!(txn.request_id(), "corr-1");
    }

    #[test]
    fn test_non_ascii_headers_are_kept() {
        let buffer = Buffer::default();
        let access = AccessLog::new(logger("trace", &buffer));

        let req = Request::builder()
            .uri("/")
            .header("x-request-id", HeaderValue::from_bytes("id-ü".as_bytes()).unwrap())
            .header("user-agent", HeaderValue::from_bytes("Müller/1.0".as_bytes()).unwrap())
            .header("x-forwarded-host", HeaderValue::from_bytes(b"caf\xe9.example").unwrap())
            .body(())
            .unwrap();
        let txn = access.begin(&req);
        assert_eq!(txn.request_id(), "id-ü");
        txn.complete(ResponseSummary::new(200));

        let records = buffer.records();
        assert_eq!(records.len(), 2);
        for record in &records {
            assert_eq!(record.req_id, "id-ü");
            let request = record.http.as_ref().unwrap().request.as_ref().unwrap();
            assert_eq!(request.user_agent.original, "Müller/1.0");
            let host = record.host.as_ref().unwrap();
            assert_eq!(host.forwarded_host, "caf\u{fffd}.example");
        }
    }

    #[test]
    fn test_generated_id_shared_by_both_records() {
        let buffer = Buffer::default();
        let access = AccessLog::new(logger("trace", &buffer));

        let first = access.begin(&Request::builder().uri("/a").body(()).unwrap());
        let first_id = first.request_id().to_string();
        first.complete(ResponseSummary::new(200));

        let second = access.begin(&Request::builder().uri("/b").body(()).unwrap());
        let second_id = second.request_id().to_string();
        second.complete(ResponseSummary::new(200));

        assert_ne!(first_id, second_id);

        let records = buffer.records();
        let access_records: Vec<_> = records
            .iter()
            .filter(|r| r.msg == INCOMING_REQUEST_MSG || r.msg == REQUEST_COMPLETED_MSG)
            .collect();
        assert_eq!(access_records.len(), 4);
        assert_eq!(access_records[0].req_id, first_id);
        assert_eq!(access_records[1].req_id, first_id);
        assert_eq!(access_records[2].req_id, second_id);
        assert_eq!(access_records[3].req_id, second_id);
    }

    #[test]
    fn test_completion_finish() {
        let buffer = Buffer::default();
        let access = AccessLog::new(logger("info", &buffer));

        let completion = access
            .begin(&request("/my-req"))
            .responded(ResponseSummary::new(201));
        assert_eq!(completion.logger().level(), Severity::Info);
        completion.finish(5);

        let records = buffer.records();
        let response = records[0].http.as_ref().unwrap().response.as_ref().unwrap();
        assert_eq!(response.status_code, 201);
        assert_eq!(response.body.bytes, 5);
    }
}
