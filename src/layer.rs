//! Access logging as a [`tower::Layer`], usable with axum, hyper and tonic.
//!
//! ```rust
//! use axum::{Router, routing::get};
//! use pinolog::{AccessLogLayer, Logger};
//!
//! let app: Router = Router::new()
//!     .route("/", get(|| async { "Hello world!" }))
//!     .layer(AccessLogLayer::new(Logger::default()).exclude("/-/"));
//! ```

use std::{
    future::Future,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use bytes::Buf;
use futures_core::ready;
use http::{Request, Response, StatusCode};
use http_body::{Body, Frame, SizeHint};
use pin_project_lite::pin_project;
use tower::{Layer, Service};

use crate::access::{AccessLog, CONTENT_LENGTH_HEADER, Completion, ResponseSummary, Transaction};
use crate::context::{self, default_logger};
use crate::error::Result;
use crate::logger::Logger;
use crate::request_id::HeaderSource;

/// Layer writing pino access records for every request.
#[derive(Debug, Clone)]
pub struct AccessLogLayer {
    access: Arc<AccessLog>,
}

impl AccessLogLayer {
    pub fn new(logger: Logger) -> Self {
        AccessLogLayer {
            access: Arc::new(AccessLog::new(logger)),
        }
    }

    /// Layer skipping every path starting with one of `prefixes`.
    pub fn with_excluded<I, T>(logger: Logger, prefixes: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        prefixes
            .into_iter()
            .fold(Self::new(logger), |layer, prefix| layer.exclude(prefix))
    }

    pub fn exclude<T: Into<String>>(self, prefix: T) -> Self {
        AccessLogLayer {
            access: Arc::new(Arc::unwrap_or_clone(self.access).exclude(prefix)),
        }
    }

    pub fn exclude_regex(self, pattern: &str) -> Result<Self> {
        Ok(AccessLogLayer {
            access: Arc::new(Arc::unwrap_or_clone(self.access).exclude_regex(pattern)?),
        })
    }

    pub fn request_id_header<T: Into<String>>(self, header: T) -> Self {
        AccessLogLayer {
            access: Arc::new(Arc::unwrap_or_clone(self.access).request_id_header(header)),
        }
    }
}

impl Default for AccessLogLayer {
    fn default() -> Self {
        AccessLogLayer::new(default_logger().clone())
    }
}

impl<S> Layer<S> for AccessLogLayer {
    type Service = AccessLogService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AccessLogService {
            inner,
            access: Arc::clone(&self.access),
        }
    }
}

/// Service produced by [`AccessLogLayer`].
#[derive(Debug, Clone)]
pub struct AccessLogService<S> {
    inner: S,
    access: Arc<AccessLog>,
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for AccessLogService<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>>,
    ResBody: Body,
{
    type Response = Response<CountingBody<ResBody>>;
    type Error = S::Error;
    type Future = ResponseFuture<S::Future>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<ReqBody>) -> Self::Future {
        let transaction = self.access.begin(&req);
        context::attach(req.extensions_mut(), Some(transaction.logger().clone()));

        ResponseFuture {
            inner: self.inner.call(req),
            transaction: Some(transaction),
        }
    }
}

pin_project! {
    /// Response future of [`AccessLogService`].
    pub struct ResponseFuture<F> {
        #[pin]
        inner: F,
        transaction: Option<Transaction>,
    }
}

impl<F, B, E> Future for ResponseFuture<F>
where
    F: Future<Output = Result<Response<B>, E>>,
{
    type Output = Result<Response<CountingBody<B>>, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();

        let res = match ready!(this.inner.poll(cx)) {
            Ok(res) => res,
            Err(err) => {
                // the error never becomes a response here, log it as one
                if let Some(transaction) = this.transaction.take() {
                    transaction.complete(ResponseSummary::new(
                        StatusCode::INTERNAL_SERVER_ERROR.as_u16(),
                    ));
                }
                return Poll::Ready(Err(err));
            }
        };

        let completion = this.transaction.take().map(|transaction| {
            let summary = ResponseSummary::new(res.status().as_u16())
                .content_length(res.headers().header(CONTENT_LENGTH_HEADER).as_deref());
            transaction.responded(summary)
        });

        Poll::Ready(Ok(res.map(|body| CountingBody {
            body,
            size: 0,
            completion,
        })))
    }
}

pin_project! {
    /// Response body counting the data bytes sent. The completed record is
    /// written when the body is dropped.
    pub struct CountingBody<B> {
        #[pin]
        body: B,
        size: u64,
        completion: Option<Completion>,
    }

    impl<B> PinnedDrop for CountingBody<B> {
        fn drop(this: Pin<&mut Self>) {
            let this = this.project();
            if let Some(completion) = this.completion.take() {
                completion.finish(*this.size);
            }
        }
    }
}

impl<B: Body> Body for CountingBody<B> {
    type Data = B::Data;
    type Error = B::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<std::result::Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.project();

        let frame = ready!(this.body.poll_frame(cx));
        if let Some(data) = frame
            .as_ref()
            .and_then(|frame| frame.as_ref().ok())
            .and_then(Frame::data_ref)
        {
            *this.size += data.remaining() as u64;
        }
        Poll::Ready(frame)
    }

    #[inline]
    fn is_end_stream(&self) -> bool {
        self.body.is_end_stream()
    }

    #[inline]
    fn size_hint(&self) -> SizeHint {
        self.body.size_hint()
    }
}

#[cfg(test)]
mod tests {
    use std::convert::Infallible;

    use bytes::Bytes;
    use http_body_util::{BodyExt, Full};
    use tower::{ServiceExt, service_fn};

    use super::*;
    use crate::access::{INCOMING_REQUEST_MSG, REQUEST_COMPLETED_MSG};
    use crate::testing::{Buffer, logger};

    const BODY: &[u8] = b"I'm a teapot, short and stout";

    async fn teapot(_req: Request<()>) -> std::result::Result<Response<Full<Bytes>>, Infallible> {
        Ok(Response::builder()
            .status(StatusCode::IM_A_TEAPOT)
            .body(Full::new(Bytes::from_static(BODY)))
            .unwrap())
    }

    fn request(uri: &str) -> Request<()> {
        Request::get(uri)
            .header("host", "my-host:3000")
            .header("x-request-id", "req-id")
            .header("user-agent", "goHttp")
            .body(())
            .unwrap()
    }

    #[tokio::test]
    async fn test_trace_logs_request_and_response() {
        let buffer = Buffer::default();
        let svc = AccessLogLayer::new(logger("trace", &buffer)).layer(service_fn(teapot));

        let res = svc.oneshot(request("/my-req")).await.unwrap();
        assert_eq!(res.status(), StatusCode::IM_A_TEAPOT);
        assert_eq!(buffer.records().len(), 1, "completed waits for the body");

        let body = res.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], BODY);

        let records = buffer.records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].msg, INCOMING_REQUEST_MSG);
        assert_eq!(records[0].host.as_ref().unwrap().hostname, "my-host");

        let completed = &records[1];
        assert_eq!(completed.msg, REQUEST_COMPLETED_MSG);
        assert_eq!(completed.req_id, "req-id");
        let response = completed.http.as_ref().unwrap().response.as_ref().unwrap();
        assert_eq!(response.status_code, 418);
        assert_eq!(response.body.bytes, BODY.len() as u64);
    }

    #[tokio::test]
    async fn test_excluded_regex() {
        let buffer = Buffer::default();
        let svc = AccessLogLayer::new(logger("trace", &buffer))
            .exclude_regex(r"^/-/(healthz|readyz)$")
            .unwrap()
            .layer(service_fn(teapot));

        let res = svc.oneshot(request("/-/healthz")).await.unwrap();
        res.into_body().collect().await.unwrap();
        assert!(buffer.contents().is_empty());
    }

    #[tokio::test]
    async fn test_inner_error_completes_with_500() {
        let buffer = Buffer::default();
        let svc = AccessLogLayer::new(logger("info", &buffer)).layer(service_fn(
            |_req: Request<()>| async { Err::<Response<Full<Bytes>>, _>("boom") },
        ));

        assert!(svc.oneshot(request("/my-req")).await.is_err());

        let records = buffer.records();
        assert_eq!(records.len(), 1);
        let response = records[0].http.as_ref().unwrap().response.as_ref().unwrap();
        assert_eq!(response.status_code, 500);
        assert_eq!(response.body.bytes, 0);
    }

    #[tokio::test]
    async fn test_handler_retrieves_request_logger() {
        let buffer = Buffer::default();
        let svc = AccessLogLayer::new(logger("debug", &buffer)).layer(service_fn(
            |req: Request<()>| async move {
                crate::retrieve(req.extensions())
                    .debug()
                    .msg("inside handler");
                Ok::<_, Infallible>(Response::new(Full::new(Bytes::new())))
            },
        ));

        let res = svc.oneshot(request("/my-req")).await.unwrap();
        res.into_body().collect().await.unwrap();

        let records = buffer.records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].msg, "inside handler");
        assert_eq!(records[0].req_id, "req-id");
        assert_eq!(records[1].msg, REQUEST_COMPLETED_MSG);
    }

    #[tokio::test]
    async fn test_axum_router() {
        let buffer = Buffer::default();
        let app = axum::Router::new()
            .route("/my-req", axum::routing::get(|| async { "hello" }))
            .layer(AccessLogLayer::new(logger("info", &buffer)));

        let req = Request::get("/my-req")
            .header("x-request-id", "req-id")
            .body(axum::body::Body::empty())
            .unwrap();
        let res = app.oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        res.into_body().collect().await.unwrap();

        let records = buffer.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].req_id, "req-id");
        let response = records[0].http.as_ref().unwrap().response.as_ref().unwrap();
        assert_eq!(response.status_code, 200);
        assert_eq!(response.body.bytes, 5);
    }
}
