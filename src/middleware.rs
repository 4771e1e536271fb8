use std::{
    borrow::Cow,
    future::Future,
    marker::PhantomData,
    pin::Pin,
    rc::Rc,
    task::{Context, Poll},
};

use bytes::Bytes;
use futures_core::ready;
use pin_project_lite::pin_project;

use actix_service::{Service, Transform};
use actix_utils::future::{Ready, ready};
use actix_web::body::{BodySize, MessageBody};
use actix_web::dev::{Payload, ServiceRequest, ServiceResponse};
use actix_web::http::header::HOST;
use actix_web::{Error, FromRequest, HttpMessage, HttpRequest};

use crate::access::{
    AccessLog, CONTENT_LENGTH_HEADER, Completion, RequestView, ResponseSummary, Transaction,
};
use crate::context::{self, default_logger};
use crate::logger::{ERROR_KEY, Logger};
use crate::request_id::HeaderSource;

/// Middleware writing pino access records for every request.
///
/// Each request gets a child logger carrying its `reqId`. Handlers receive it
/// by taking a [`Logger`] argument.
///
/// # Examples
/// ```rust
/// use actix_web::{App, HttpResponse, web};
/// use pinolog::{Logger, PinoLogger};
///
/// async fn index(logger: Logger) -> HttpResponse {
///     logger.info().msg("hello from the handler");
///     HttpResponse::Ok().finish()
/// }
///
/// let app = App::new()
///     .wrap(PinoLogger::new(Logger::default()).exclude("/-/"))
///     .route("/", web::get().to(index));
/// ```
#[derive(Debug, Clone)]
pub struct PinoLogger(Rc<AccessLog>);

impl PinoLogger {
    /// Create `PinoLogger` middleware writing to `logger`.
    pub fn new(logger: Logger) -> PinoLogger {
        PinoLogger(Rc::new(AccessLog::new(logger)))
    }

    /// Middleware skipping every path starting with one of `prefixes`.
    pub fn with_excluded<I, T>(logger: Logger, prefixes: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        prefixes
            .into_iter()
            .fold(Self::new(logger), |mw, prefix| mw.exclude(prefix))
    }

    /// Ignore and do not log access info for paths starting with `prefix`.
    pub fn exclude<T: Into<String>>(self, prefix: T) -> Self {
        PinoLogger(Rc::new(Rc::unwrap_or_clone(self.0).exclude(prefix)))
    }

    /// Ignore and do not log access info for paths that match `pattern`.
    pub fn exclude_regex(self, pattern: &str) -> crate::Result<Self> {
        Ok(PinoLogger(Rc::new(
            Rc::unwrap_or_clone(self.0).exclude_regex(pattern)?,
        )))
    }

    /// Read the inbound request id from `header` instead of `x-request-id`.
    pub fn request_id_header<T: Into<String>>(self, header: T) -> Self {
        PinoLogger(Rc::new(Rc::unwrap_or_clone(self.0).request_id_header(header)))
    }
}

impl Default for PinoLogger {
    /// Middleware writing to the [default logger](crate::default_logger).
    fn default() -> Self {
        PinoLogger::new(default_logger().clone())
    }
}

impl<S, B> Transform<S, ServiceRequest> for PinoLogger
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    B: MessageBody,
{
    type Response = ServiceResponse<StreamLog<B>>;
    type Error = Error;
    type Transform = PinoLoggerMiddleware<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(PinoLoggerMiddleware {
            service,
            access: Rc::clone(&self.0),
        }))
    }
}

pin_project! {
    /// Response body counting the bytes sent. The completed record is written
    /// when the body is dropped.
    pub struct StreamLog<B> {
        #[pin]
        body: B,
        size: u64,
        completion: Option<Completion>,
    }

    impl<B> PinnedDrop for StreamLog<B> {
        fn drop(this: Pin<&mut Self>) {
            let this = this.project();
            if let Some(completion) = this.completion.take() {
                completion.finish(*this.size);
            }
        }
    }
}

impl<B: MessageBody> MessageBody for StreamLog<B> {
    type Error = B::Error;

    #[inline]
    fn size(&self) -> BodySize {
        self.body.size()
    }

    fn poll_next(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Bytes, Self::Error>>> {
        let this = self.project();

        match ready!(this.body.poll_next(cx)) {
            Some(Ok(chunk)) => {
                *this.size += chunk.len() as u64;
                Poll::Ready(Some(Ok(chunk)))
            }
            Some(Err(err)) => Poll::Ready(Some(Err(err))),
            None => Poll::Ready(None),
        }
    }
}

/// Logger middleware service.
pub struct PinoLoggerMiddleware<S> {
    access: Rc<AccessLog>,
    service: S,
}

impl<S, B> Service<ServiceRequest> for PinoLoggerMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    B: MessageBody,
{
    type Response = ServiceResponse<StreamLog<B>>;
    type Error = Error;
    type Future = PinoLoggerResponse<S, B>;

    actix_service::forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let transaction = self.access.begin(&req);
        context::attach(
            &mut *req.extensions_mut(),
            Some(transaction.logger().clone()),
        );

        PinoLoggerResponse {
            fut: self.service.call(req),
            transaction: Some(transaction),
            _phantom: PhantomData,
        }
    }
}

pin_project! {
    pub struct PinoLoggerResponse<S, B>
    where
        B: MessageBody,
        S: Service<ServiceRequest>,
    {
        #[pin]
        fut: S::Future,
        transaction: Option<Transaction>,
        _phantom: PhantomData<B>,
    }
}

impl<S, B> Future for PinoLoggerResponse<S, B>
where
    B: MessageBody,
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
{
    type Output = Result<ServiceResponse<StreamLog<B>>, Error>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();

        let res = match ready!(this.fut.poll(cx)) {
            Ok(res) => res,
            Err(err) => {
                if let Some(transaction) = this.transaction.take() {
                    let status = err.as_response_error().status_code().as_u16();
                    transaction.complete(ResponseSummary::new(status));
                }
                return Poll::Ready(Err(err));
            }
        };

        let completion = this.transaction.take().map(|transaction| {
            if let Some(error) = res.response().error() {
                transaction
                    .logger()
                    .debug()
                    .field(ERROR_KEY, error.to_string())
                    .msg("error in response");
            }

            let summary = ResponseSummary::new(res.status().as_u16())
                .content_length(res.headers().header(CONTENT_LENGTH_HEADER).as_deref());
            transaction.responded(summary)
        });

        Poll::Ready(Ok(res.map_body(move |_, body| StreamLog {
            body,
            size: 0,
            completion,
        })))
    }
}

impl HeaderSource for ServiceRequest {
    fn header(&self, name: &str) -> Option<Cow<'_, str>> {
        self.headers().header(name)
    }
}

impl RequestView for ServiceRequest {
    fn method(&self) -> &str {
        self.method().as_str()
    }

    fn uri(&self) -> Cow<'_, str> {
        let uri = self.uri();
        Cow::Borrowed(uri.path_and_query().map_or(uri.path(), |pq| pq.as_str()))
    }

    fn host(&self) -> Option<Cow<'_, str>> {
        self.headers()
            .header(HOST.as_str())
            .or_else(|| self.uri().host().map(Cow::Borrowed))
    }

    #[cfg(feature = "tracing-request-id")]
    fn request_id_hint(&self) -> Option<String> {
        self.extensions()
            .get::<tracing_actix_web::RequestId>()
            .map(|id| id.to_string())
    }
}

/// Extracts the request logger attached by [`PinoLogger`], or the default logger.
impl FromRequest for Logger {
    type Error = Error;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        ready(Ok(context::retrieve(&*req.extensions())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::test::{TestRequest, call_service, init_service, read_body};
    use actix_web::{App, HttpResponse, error, web};

    use crate::access::{INCOMING_REQUEST_MSG, REQUEST_COMPLETED_MSG};
    use crate::level::Severity;
    use crate::testing::{Buffer, logger};

    const BODY: &str = "I'm a teapot, short and stout";

    async fn teapot() -> HttpResponse {
        HttpResponse::ImATeapot().body(BODY)
    }

    async fn chatty(logger: Logger) -> HttpResponse {
        logger.debug().msg("inside handler");
        HttpResponse::Ok().body("ok")
    }

    async fn failing() -> Result<HttpResponse, Error> {
        Err(error::ErrorBadRequest("bad input"))
    }

    #[test]
    fn test_builder() {
        let mw = PinoLogger::new(Logger::default())
            .exclude("/health")
            .exclude_regex("^/api/v1/.*")
            .unwrap();
        assert!(mw.0.is_excluded("/health/live"));
        assert!(mw.0.is_excluded("/api/v1/users"));
        assert!(!mw.0.is_excluded("/api/v2/users"));

        assert!(PinoLogger::default().exclude_regex("[").is_err());
        assert_eq!(PinoLogger::default().0.logger().level(), Severity::Info);
    }

    #[actix_web::test]
    async fn test_trace_logs_request_and_response() {
        let buffer = Buffer::default();
        let app = init_service(
            App::new()
                .wrap(PinoLogger::new(logger("trace", &buffer)))
                .route("/my-req", web::get().to(teapot)),
        )
        .await;

        let req = TestRequest::get()
            .uri("/my-req?page=2")
            .insert_header(("host", "my-host:3000"))
            .insert_header(("x-request-id", "req-id"))
            .insert_header(("user-agent", "goHttp"))
            .insert_header(("x-forwarded-host", "client-host"))
            .insert_header(("x-forwarded-for", "192.0.2.1"))
            .to_request();
        let res = call_service(&app, req).await;
        assert_eq!(res.status().as_u16(), 418);
        assert_eq!(read_body(res).await, BODY);

        let records = buffer.records();
        assert_eq!(records.len(), 2);

        let incoming = &records[0];
        assert_eq!(incoming.msg, INCOMING_REQUEST_MSG);
        assert_eq!(incoming.level, "10");
        assert_eq!(incoming.req_id, "req-id");
        assert_eq!(incoming.url.as_ref().unwrap().path, "/my-req?page=2");
        let host = incoming.host.as_ref().unwrap();
        assert_eq!(host.hostname, "my-host");
        assert_eq!(host.forwarded_host, "client-host");
        assert_eq!(host.ip, "192.0.2.1");

        let completed = &records[1];
        assert_eq!(completed.msg, REQUEST_COMPLETED_MSG);
        assert_eq!(completed.level, "30");
        assert_eq!(completed.req_id, "req-id");
        let response = completed.http.as_ref().unwrap().response.as_ref().unwrap();
        assert_eq!(response.status_code, 418);
        assert_eq!(response.body.bytes, BODY.len() as u64);
        let request = completed.http.as_ref().unwrap().request.as_ref().unwrap();
        assert_eq!(request.method, "GET");
        assert_eq!(request.user_agent.original, "goHttp");
    }

    #[actix_web::test]
    async fn test_excluded_path_is_silent() {
        let buffer = Buffer::default();
        let app = init_service(
            App::new()
                .wrap(PinoLogger::with_excluded(logger("trace", &buffer), ["/-/"]))
                .route("/-/healthz", web::get().to(teapot)),
        )
        .await;

        let req = TestRequest::get().uri("/-/healthz").to_request();
        let res = call_service(&app, req).await;
        assert_eq!(res.status().as_u16(), 418);
        read_body(res).await;

        assert!(buffer.contents().is_empty());
    }

    #[actix_web::test]
    async fn test_handler_extracts_request_logger() {
        let buffer = Buffer::default();
        let app = init_service(
            App::new()
                .wrap(PinoLogger::new(logger("debug", &buffer)))
                .route("/", web::get().to(chatty)),
        )
        .await;

        let req = TestRequest::get().uri("/").to_request();
        read_body(call_service(&app, req).await).await;

        let records = buffer.records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].msg, "inside handler");
        assert!(!records[0].req_id.is_empty());
        assert_eq!(records[0].req_id, records[1].req_id);
        assert_eq!(records[1].msg, REQUEST_COMPLETED_MSG);
    }

    #[actix_web::test]
    async fn test_extractor_without_middleware() {
        let req = TestRequest::default().to_http_request();
        let logger = Logger::extract(&req).await.unwrap();
        assert_eq!(logger.level(), Severity::Info);
    }

    #[actix_web::test]
    async fn test_error_response() {
        let buffer = Buffer::default();
        let app = init_service(
            App::new()
                .wrap(PinoLogger::new(logger("debug", &buffer)))
                .route("/fail", web::post().to(failing)),
        )
        .await;

        let req = TestRequest::post()
            .uri("/fail")
            .insert_header(("x-request-id", "req-id"))
            .to_request();
        let res = call_service(&app, req).await;
        assert_eq!(res.status().as_u16(), 400);
        read_body(res).await;

        let records = buffer.records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].msg, "error in response");
        assert_eq!(records[0].level, "20");
        assert!(records[0].error.is_some());

        let response = records[1].http.as_ref().unwrap().response.as_ref().unwrap();
        assert_eq!(response.status_code, 400);
        assert_eq!(records[1].req_id, "req-id");
    }

    #[actix_web::test]
    async fn test_custom_request_id_header() {
        let buffer = Buffer::default();
        let app = init_service(
            App::new()
                .wrap(
                    PinoLogger::new(logger("info", &buffer)).request_id_header("x-correlation-id"),
                )
                .route("/", web::get().to(teapot)),
        )
        .await;

        let req = TestRequest::get()
            .uri("/")
            .insert_header(("x-correlation-id", "corr-1"))
            .to_request();
        read_body(call_service(&app, req).await).await;

        let records = buffer.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].req_id, "corr-1");
    }
}
