//! Response writers for the [`blocking`](crate::blocking) adapter.

use std::io::{self, Write};

use http::{HeaderMap, StatusCode};

/// Outbound side of a synchronous handler.
///
/// The body is written through [`io::Write`]. A body written before any
/// [`write_status`](ResponseWriter::write_status) call implies `200 OK`.
pub trait ResponseWriter: Write {
    fn headers(&self) -> &HeaderMap;

    fn headers_mut(&mut self) -> &mut HeaderMap;

    fn write_status(&mut self, status: StatusCode);
}

/// Decorator recording the status and the number of body bytes written.
pub struct CaptureWriter<'w> {
    inner: &'w mut dyn ResponseWriter,
    status: Option<StatusCode>,
    written: u64,
}

impl<'w> CaptureWriter<'w> {
    pub fn new(inner: &'w mut dyn ResponseWriter) -> Self {
        CaptureWriter {
            inner,
            status: None,
            written: 0,
        }
    }

    /// First status set by the handler, `200` if it never set one.
    pub fn status_code(&self) -> u16 {
        self.status.unwrap_or(StatusCode::OK).as_u16()
    }

    /// Body bytes written so far.
    pub fn length(&self) -> u64 {
        self.written
    }
}

impl Write for CaptureWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        // the body went out first, the status on the wire is 200
        self.status.get_or_insert(StatusCode::OK);
        let n = self.inner.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl ResponseWriter for CaptureWriter<'_> {
    fn headers(&self) -> &HeaderMap {
        self.inner.headers()
    }

    fn headers_mut(&mut self) -> &mut HeaderMap {
        self.inner.headers_mut()
    }

    fn write_status(&mut self, status: StatusCode) {
        if self.status.is_none() {
            self.status = Some(status);
        }
        self.inner.write_status(status);
    }
}

/// In-memory response. Later status calls are ignored, like on the wire.
#[derive(Debug, Default)]
pub struct ResponseRecorder {
    status: Option<StatusCode>,
    headers: HeaderMap,
    body: Vec<u8>,
}

impl ResponseRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self) -> StatusCode {
        self.status.unwrap_or(StatusCode::OK)
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }
}

impl Write for ResponseRecorder {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.status.get_or_insert(StatusCode::OK);
        self.body.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl ResponseWriter for ResponseRecorder {
    fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    fn write_status(&mut self, status: StatusCode) {
        self.status.get_or_insert(status);
    }
}
