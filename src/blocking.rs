//! Access logging for synchronous handlers built on the `http` crate types.
//!
//! ```rust
//! use std::io::Write;
//!
//! use http::{Request, StatusCode};
//! use pinolog::blocking::RequestLogger;
//! use pinolog::capture::{ResponseRecorder, ResponseWriter};
//! use pinolog::Logger;
//!
//! let access = RequestLogger::new(Logger::default()).exclude("/-/");
//!
//! let req = Request::get("/hello").body(()).unwrap();
//! let mut res = ResponseRecorder::new();
//! access.handle(req, &mut res, |req, w| {
//!     let logger = pinolog::retrieve(req.extensions());
//!     logger.debug().msg("saying hello");
//!     w.write_status(StatusCode::OK);
//!     w.write_all(b"hello").unwrap();
//! });
//! ```

use http::Request;

use crate::access::{AccessLog, CONTENT_LENGTH_HEADER, ResponseSummary};
use crate::capture::{CaptureWriter, ResponseWriter};
use crate::context;
use crate::error::Result;
use crate::logger::Logger;
use crate::request_id::HeaderSource;

/// A synchronous request handler.
pub trait Handler<B> {
    fn serve(&self, req: Request<B>, w: &mut dyn ResponseWriter);
}

impl<B, F> Handler<B> for F
where
    F: Fn(Request<B>, &mut dyn ResponseWriter),
{
    fn serve(&self, req: Request<B>, w: &mut dyn ResponseWriter) {
        self(req, w)
    }
}

/// Access-log middleware for [`Handler`]s.
#[derive(Debug, Clone)]
pub struct RequestLogger {
    access: AccessLog,
}

impl RequestLogger {
    pub fn new(logger: Logger) -> Self {
        RequestLogger {
            access: AccessLog::new(logger),
        }
    }

    /// Middleware skipping every path starting with one of `prefixes`.
    pub fn with_excluded<I, T>(logger: Logger, prefixes: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        prefixes
            .into_iter()
            .fold(Self::new(logger), |access, prefix| access.exclude(prefix))
    }

    pub fn exclude<T: Into<String>>(self, prefix: T) -> Self {
        RequestLogger {
            access: self.access.exclude(prefix),
        }
    }

    pub fn exclude_regex(self, pattern: &str) -> Result<Self> {
        Ok(RequestLogger {
            access: self.access.exclude_regex(pattern)?,
        })
    }

    pub fn request_id_header<T: Into<String>>(self, header: T) -> Self {
        RequestLogger {
            access: self.access.request_id_header(header),
        }
    }

    /// Runs `next` for `req`, logging around it.
    ///
    /// The request logger is attached to the request extensions before `next`
    /// runs.
    pub fn handle<B, F>(&self, mut req: Request<B>, w: &mut dyn ResponseWriter, next: F)
    where
        F: FnOnce(Request<B>, &mut dyn ResponseWriter),
    {
        let transaction = self.access.begin(&req);
        context::attach(req.extensions_mut(), Some(transaction.logger().clone()));

        let mut capture = CaptureWriter::new(w);
        next(req, &mut capture);

        let summary = ResponseSummary::new(capture.status_code())
            .content_length(capture.headers().header(CONTENT_LENGTH_HEADER).as_deref())
            .written(capture.length());
        transaction.complete(summary);
    }

    /// Wraps `handler` into a logged [`Handler`].
    pub fn wrap<H>(self, handler: H) -> Logged<H> {
        Logged {
            access: self,
            handler,
        }
    }
}

/// A [`Handler`] wrapped by [`RequestLogger::wrap`].
#[derive(Debug, Clone)]
pub struct Logged<H> {
    access: RequestLogger,
    handler: H,
}

impl<B, H: Handler<B>> Handler<B> for Logged<H> {
    fn serve(&self, req: Request<B>, w: &mut dyn ResponseWriter) {
        self.access
            .handle(req, w, |req, w| self.handler.serve(req, w));
    }
}
