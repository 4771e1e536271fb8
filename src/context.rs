//! Request-scoped logger storage.
//!
//! A middleware [`attach`]es the request's child logger to the request extensions,
//! and handlers [`retrieve`] it later. Retrieval never fails: when nothing was
//! attached, the process-wide [`default_logger`] is handed out instead.

use std::sync::LazyLock;

use crate::logger::Logger;

static DEFAULT_LOGGER: LazyLock<Logger> = LazyLock::new(Logger::default);

/// The fallback logger: info level, timestamps in seconds, standard output.
pub fn default_logger() -> &'static Logger {
    &DEFAULT_LOGGER
}

/// The value stored in a request context. It may explicitly hold no logger.
#[derive(Debug, Clone, Default)]
pub struct LoggerSlot(Option<Logger>);

impl LoggerSlot {
    pub fn new(logger: Option<Logger>) -> Self {
        LoggerSlot(logger)
    }

    pub fn get(&self) -> Option<&Logger> {
        self.0.as_ref()
    }
}

/// Anything that can hold a [`LoggerSlot`] for the lifetime of a request.
pub trait LoggerCarrier {
    fn logger_slot(&self) -> Option<&LoggerSlot>;

    fn set_logger_slot(&mut self, slot: LoggerSlot);
}

impl LoggerCarrier for http::Extensions {
    fn logger_slot(&self) -> Option<&LoggerSlot> {
        self.get::<LoggerSlot>()
    }

    fn set_logger_slot(&mut self, slot: LoggerSlot) {
        self.insert(slot);
    }
}

#[cfg(feature = "actix")]
impl LoggerCarrier for actix_http::Extensions {
    fn logger_slot(&self) -> Option<&LoggerSlot> {
        self.get::<LoggerSlot>()
    }

    fn set_logger_slot(&mut self, slot: LoggerSlot) {
        self.insert(slot);
    }
}

/// Stores `logger` in `ctx`, replacing any logger attached before.
pub fn attach<C: LoggerCarrier + ?Sized>(ctx: &mut C, logger: Option<Logger>) {
    ctx.set_logger_slot(LoggerSlot::new(logger));
}

/// Returns the logger attached to `ctx`, or the default logger.
pub fn retrieve<C: LoggerCarrier + ?Sized>(ctx: &C) -> Logger {
    ctx.logger_slot()
        .and_then(LoggerSlot::get)
        .cloned()
        .unwrap_or_else(|| default_logger().clone())
}
