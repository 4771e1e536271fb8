use std::borrow::Cow;

use uuid::Uuid;

use crate::error::Result;
use crate::logger::Logger;

/// Header the middlewares read the request id from, unless configured otherwise.
pub const REQUEST_ID_HEADER: &str = "x-request-id";
/// Record field carrying the request id.
pub const REQUEST_ID_KEY: &str = "reqId";

/// Case-insensitive header lookup.
///
/// Values are decoded as UTF-8, invalid sequences become `U+FFFD`.
pub trait HeaderSource {
    fn header(&self, name: &str) -> Option<Cow<'_, str>>;
}

impl HeaderSource for http::HeaderMap {
    fn header(&self, name: &str) -> Option<Cow<'_, str>> {
        self.get(name)
            .map(|value| String::from_utf8_lossy(value.as_bytes()))
    }
}

#[cfg(feature = "actix")]
impl HeaderSource for actix_web::http::header::HeaderMap {
    fn header(&self, name: &str) -> Option<Cow<'_, str>> {
        self.get(name)
            .map(|value| String::from_utf8_lossy(value.as_bytes()))
    }
}

/// Generates a new request id.
///
/// UUIDv4 drawn from the operating system random source, or UUIDv7 with the
/// `uuid_v7` feature.
pub fn generate() -> Result<Uuid> {
    #[cfg(feature = "uuid_v7")]
    {
        Ok(Uuid::now_v7())
    }
    #[cfg(not(feature = "uuid_v7"))]
    {
        let mut bytes = [0u8; 16];
        getrandom::getrandom(&mut bytes)?;
        Ok(uuid::Builder::from_random_bytes(bytes).into_uuid())
    }
}

/// Returns the non-empty `header` value of `headers`, or a freshly generated id.
///
/// A failing random source is logged on `logger` and the nil UUID is used, so a
/// request is never rejected because of its id.
pub fn resolve<H: HeaderSource + ?Sized>(logger: &Logger, headers: &H, header: &str) -> String {
    resolve_with(logger, headers.header(header).as_deref(), generate)
}

pub(crate) fn resolve_with<F>(logger: &Logger, provided: Option<&str>, generator: F) -> String
where
    F: FnOnce() -> Result<Uuid>,
{
    if let Some(id) = provided.filter(|id| !id.is_empty()) {
        return id.to_string();
    }

    let id = match generator() {
        Ok(id) => id,
        Err(err) => {
            logger
                .error()
                .stack(&err)
                .msg("error generating request id");
            Uuid::nil()
        }
    };

    // e.g. 16c9c1f2-c001-40d3-bbfe-48857367e7b5
    let id = id.hyphenated().to_string();
    logger
        .trace()
        .field(REQUEST_ID_KEY, &id)
        .msg("generated request id");

    id
}
