//! Outgoing response accumulation.
//!
//! The application writes the status line, headers and body through
//! [`ResponseBuffer`]; the connection flushes whatever has accumulated when the
//! socket is writable. The buffer tracks how far the response has progressed
//! in a single [`ResponsePhase`], so an out-of-order write is rejected instead
//! of corrupting the wire format. A rejected write also poisons the buffer: the
//! connection owning it is closed as soon as control returns to the server.
//!
//! No framing is added beyond what the application writes: there is no
//! implicit Content-Length and no chunked encoding.

use std::io;
use std::io::Write;

use bytes::{BufMut, BytesMut};
use http::StatusCode;

use crate::protocol::ProtocolError;

/// Initial buffer size reserved for the status line and headers
const INIT_HEADER_SIZE: usize = 1024;

/// How far the response has been written, in wire order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ResponsePhase {
    /// Nothing written yet.
    Pending,
    /// Status line written, headers may follow.
    StatusWritten,
    /// Blank line written, only body bytes may follow.
    HeadersTerminated,
    /// The application released the connection; nothing may follow.
    Complete,
}

#[derive(Debug)]
pub struct ResponseBuffer {
    buf: BytesMut,
    /// Bytes of `buf` already handed to the socket
    flushed: usize,
    phase: ResponsePhase,
    keep_alive: bool,
    violation: Option<ProtocolError>,
}

impl Default for ResponseBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl ResponseBuffer {
    pub fn new() -> Self {
        Self { buf: BytesMut::new(), flushed: 0, phase: ResponsePhase::Pending, keep_alive: false, violation: None }
    }

    /// Starts a fresh response, keeping the allocation.
    pub fn reset(&mut self) {
        self.buf.clear();
        self.flushed = 0;
        self.phase = ResponsePhase::Pending;
        self.keep_alive = false;
        self.violation = None;
    }

    /// Starts a fresh response and gives the allocation back.
    pub fn release_memory(&mut self) {
        *self = Self::new();
    }

    pub fn phase(&self) -> ResponsePhase {
        self.phase
    }

    /// Whether the application negotiated a persistent connection.
    pub fn keep_alive(&self) -> bool {
        self.keep_alive
    }

    /// The first ordering violation, if any.
    pub fn violation(&self) -> Option<ProtocolError> {
        self.violation
    }

    pub fn is_complete(&self) -> bool {
        self.phase == ResponsePhase::Complete
    }

    /// Writes `HTTP/1.1 <code> <reason>\r\n`. Allowed once, before anything else.
    ///
    /// # Errors
    ///
    /// Returns `ProtocolError::StatusAlreadyWritten` on a second call.
    pub fn write_status(&mut self, code: u16, reason: &str) -> Result<(), ProtocolError> {
        if self.phase != ResponsePhase::Pending {
            return Err(self.poison(ProtocolError::StatusAlreadyWritten));
        }

        self.buf.reserve(INIT_HEADER_SIZE);
        // writing into BytesMut never fails
        let _ = write!(FastWrite(&mut self.buf), "HTTP/1.1 {code} {reason}\r\n");
        self.phase = ResponsePhase::StatusWritten;
        Ok(())
    }

    /// Writes the status line using the canonical reason phrase of `status`.
    ///
    /// # Errors
    ///
    /// Same as [`ResponseBuffer::write_status`].
    pub fn write_status_code(&mut self, status: StatusCode) -> Result<(), ProtocolError> {
        self.write_status(status.as_u16(), status.canonical_reason().unwrap_or(""))
    }

    /// Writes `<name>: <value>\r\n`. Allowed after the status line and before
    /// any body byte.
    ///
    /// A `Connection: Keep-Alive` header marks the connection for reuse once
    /// the response is flushed; no other header influences the connection.
    ///
    /// # Errors
    ///
    /// Returns `ProtocolError` if the status line is missing or the headers
    /// were already terminated.
    pub fn write_header(&mut self, name: &str, value: &str) -> Result<(), ProtocolError> {
        match self.phase {
            ResponsePhase::Pending => return Err(self.poison(ProtocolError::StatusNotWritten)),
            ResponsePhase::StatusWritten => {}
            ResponsePhase::HeadersTerminated => return Err(self.poison(ProtocolError::HeadersTerminated)),
            ResponsePhase::Complete => return Err(self.poison(ProtocolError::ResponseComplete)),
        }

        if name.eq_ignore_ascii_case(http::header::CONNECTION.as_str()) && value.trim().eq_ignore_ascii_case("keep-alive") {
            self.keep_alive = true;
        }

        self.buf.put_slice(name.as_bytes());
        self.buf.put_slice(b": ");
        self.buf.put_slice(value.as_bytes());
        self.buf.put_slice(b"\r\n");
        Ok(())
    }

    /// Writes the blank line that ends the headers. Repeated calls are no-ops.
    ///
    /// # Errors
    ///
    /// Returns `ProtocolError` if the status line is missing or the response
    /// is already complete.
    pub fn end_headers(&mut self) -> Result<(), ProtocolError> {
        match self.phase {
            ResponsePhase::Pending => Err(self.poison(ProtocolError::StatusNotWritten)),
            ResponsePhase::StatusWritten => {
                self.buf.put_slice(b"\r\n");
                self.phase = ResponsePhase::HeadersTerminated;
                Ok(())
            }
            ResponsePhase::HeadersTerminated => Ok(()),
            ResponsePhase::Complete => Err(self.poison(ProtocolError::ResponseComplete)),
        }
    }

    /// Appends body bytes, terminating the headers first if needed.
    ///
    /// # Errors
    ///
    /// Returns `ProtocolError` if the status line is missing or the response
    /// is already complete.
    pub fn write_body(&mut self, data: &[u8]) -> Result<(), ProtocolError> {
        self.end_headers()?;
        self.buf.put_slice(data);
        Ok(())
    }

    /// Marks the response complete, terminating the headers if needed.
    ///
    /// Calling it again after success changes nothing.
    ///
    /// # Errors
    ///
    /// Returns `ProtocolError::StatusNotWritten` if no status line was written.
    pub fn finish(&mut self) -> Result<(), ProtocolError> {
        if self.phase == ResponsePhase::Complete {
            return Ok(());
        }
        self.end_headers()?;
        self.phase = ResponsePhase::Complete;
        Ok(())
    }

    /// Bytes written by the application but not yet flushed.
    pub fn unflushed(&self) -> &[u8] {
        &self.buf[self.flushed..]
    }

    pub fn has_unflushed(&self) -> bool {
        self.flushed < self.buf.len()
    }

    pub fn flushed(&self) -> usize {
        self.flushed
    }

    /// Records that `n` more bytes reached the socket.
    pub fn advance(&mut self, n: usize) {
        debug_assert!(self.flushed + n <= self.buf.len());
        self.flushed = (self.flushed + n).min(self.buf.len());
        // a response streamed in pieces only holds what is still unsent
        if self.flushed == self.buf.len() {
            self.buf.clear();
            self.flushed = 0;
        }
    }

    /// Everything written since the buffer was last fully flushed.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    fn poison(&mut self, error: ProtocolError) -> ProtocolError {
        if self.violation.is_none() {
            self.violation = Some(error);
        }
        error
    }
}

/// Fast writer implementation for writing to BytesMut.
///
/// Lets `write!` format straight into the buffer without an intermediate
/// `String`.
struct FastWrite<'a>(&'a mut BytesMut);

impl Write for FastWrite<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.put_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
