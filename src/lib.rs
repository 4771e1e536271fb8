//! Pino-compatible structured logging with request-scoped loggers and HTTP
//! access-log middlewares.
//!
//! Every record is one JSON line in the format of the Node.js `pino` logger:
//! the level as a numeric string (`"10"` trace to `"70"` panic), a unix
//! timestamp, `pid`, `hostname`, the fields of the logger and of the record,
//! and `msg`.
//!
//! # Examples:
//! ## A standalone logger
//! ```rust
//! use pinolog::{Logger, LoggerOptions, TimestampUnit};
//!
//! let logger = Logger::new(
//!     LoggerOptions::new()
//!         .level("debug")
//!         .timestamp_unit(TimestampUnit::Milliseconds),
//! )
//! .unwrap();
//!
//! let worker = logger.with("worker", 3);
//! worker.debug().field("jobs", 12).msg("queue drained");
//! // {"level":"20","time":1700000000000,"pid":4242,"hostname":"box","worker":3,"jobs":12,"msg":"queue drained"}
//! ```
//!
//! ## Access logs with actix-web
//! ```rust
//! use actix_web::{App, HttpResponse, HttpServer, web};
//! use pinolog::{Logger, LoggerOptions, PinoLogger};
//!
//! async fn index(logger: Logger) -> HttpResponse {
//!     logger.info().msg("handling index");
//!     HttpResponse::Ok().body("Hello world!")
//! }
//!
//! #[actix_web::main] // or #[tokio::main]
//! async fn main() -> std::io::Result<()> {
//!     let logger = Logger::new(LoggerOptions::from_env()).unwrap();
//!
//!     HttpServer::new(move || {
//!         App::new()
//!             .wrap(PinoLogger::with_excluded(logger.clone(), ["/-/"]))
//!             .route("/", web::get().to(index))
//!     })
//!     .bind("127.0.0.1:8080")?;
//!     Ok(())
//! }
//! ```
//!
//! ## `tracing-request-id` feature reuses the Request ID set by `TracingLogger`
//! when the request carries no `x-request-id` header.
//! ```bash
//! cargo add pinolog --features tracing-request-id
//! ```
//!
//! # Access records
//!
//! At trace level an `incoming request` record is written before the handler
//! runs. At trace, debug and info level a `request completed` record follows
//! once the response body is sent:
//!
//! ```json
//! {"level":"30","time":1700000000,"pid":4242,"hostname":"box","reqId":"16c9c1f2-c001-40d3-bbfe-48857367e7b5",
//!  "http":{"request":{"method":"GET","userAgent":{"original":"curl/8.5.0"}},
//!          "response":{"statusCode":200,"body":{"bytes":12}}},
//!  "url":{"path":"/"},"host":{"hostname":"localhost"},
//!  "responseTime":0.42,"msg":"request completed"}
//! ```
//!
//! The request id comes from the `x-request-id` header (configurable) or is a
//! freshly generated UUID. Every record written through the request logger
//! carries it as `reqId`.
//!
//! # Configuration
//!
//! [`LoggerOptions::from_env`] reads:
//!
//! - `LOG_LEVEL` - `trace`, `debug`, `info` (default), `warn`, `error`, `fatal` or `panic`
//! - `LOG_TIMESTAMP_UNIT` - `s` (default) or `ms`
//!
//! # Feature Flags
//!
//! - `actix` (default) - [`PinoLogger`] middleware and the [`Logger`] extractor
//! - `log` (default) - [`rust_log`] bridge for the standard `log` crate
//! - `tower` - [`AccessLogLayer`] for axum, hyper and other tower stacks
//! - `tracing-request-id` - reuse `tracing-actix-web`'s request ID
//! - `uuid_v7` - Use UUIDv7 instead of UUIDv4 for generated request IDs

pub mod access;
pub mod blocking;
pub mod capture;
pub mod context;
mod error;
pub mod level;
#[cfg(feature = "tower")]
pub mod layer;
mod logger;
#[cfg(feature = "actix")]
pub mod middleware;
pub mod record;
pub mod request_id;
mod wrapper;

pub use crate::blocking::RequestLogger;
pub use crate::context::{attach, default_logger, retrieve};
pub use crate::error::{Error, Result};
pub use crate::level::{Severity, parse_level, to_external_level};
#[cfg(feature = "tower")]
pub use crate::layer::AccessLogLayer;
pub use crate::logger::{
    ERROR_KEY, Entry, HOSTNAME_KEY, LEVEL_ENV, LEVEL_KEY, Logger, LoggerOptions, MESSAGE_KEY,
    PID_KEY, TIME_KEY, TIMESTAMP_UNIT_ENV, TimestampUnit,
};
#[cfg(feature = "actix")]
pub use crate::middleware::PinoLogger;
#[cfg(feature = "log")]
pub use crate::wrapper::rust_log;
