use std::io;
use std::io::Read;

use http::StatusCode;

use crate::codec::ResponseBuffer;
use crate::connection::stream::Stream;
use crate::protocol::{ConnectionId, PeerAddr, ProtocolError, Request};

/// How far the application got through the request body.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct BodyCursor {
    /// Body bytes handed out through `read_body`
    pub(crate) read: u64,
    /// `read_body` took bytes off the socket since the server last settled
    pub(crate) socket_activity: bool,
}

/// A dispatched request together with the response being written for it.
///
/// Handed to [`Handler::call`](crate::handler::Handler::call). Every view of
/// the request borrows the connection's read buffer, so none of them can
/// outlive the callback. Copy what must be kept with
/// [`Entry::to_owned_entry`](crate::protocol::Entry::to_owned_entry).
///
/// Response writes must follow the wire order: status line, headers, body. A
/// write out of that order returns a [`ProtocolError`] and the connection is
/// closed once the callback returns. Nothing is sent before the headers are
/// terminated, and the connection is only finished by [`Exchange::release`];
/// a handler that returns without releasing keeps the connection dispatched
/// until it resumes through [`Server::responder`](crate::Server::responder).
#[derive(Debug)]
pub struct Exchange<'a> {
    id: ConnectionId,
    peer: Option<PeerAddr>,
    request: Request<'a>,
    response: &'a mut ResponseBuffer,
    stream: Option<&'a mut Stream>,
    body: &'a mut BodyCursor,
    abort: &'a mut bool,
}

impl<'a> Exchange<'a> {
    pub(crate) fn new(
        id: ConnectionId,
        peer: Option<PeerAddr>,
        request: Request<'a>,
        response: &'a mut ResponseBuffer,
        stream: Option<&'a mut Stream>,
        body: &'a mut BodyCursor,
        abort: &'a mut bool,
    ) -> Self {
        Self { id, peer, request, response, stream, body, abort }
    }

    /// Identifies the connection for a deferred response.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer_addr(&self) -> Option<PeerAddr> {
        self.peer
    }

    pub fn request(&self) -> Request<'a> {
        self.request
    }

    /// The response written so far.
    pub fn response(&self) -> &ResponseBuffer {
        self.response
    }

    /// Writes `HTTP/1.1 <code> <reason>\r\n`.
    ///
    /// # Errors
    ///
    /// Returns `ProtocolError::StatusAlreadyWritten` if a status line was
    /// already written.
    pub fn write_status(&mut self, code: u16, reason: &str) -> Result<(), ProtocolError> {
        self.response.write_status(code, reason)
    }

    /// Writes the status line with the canonical reason phrase of `status`.
    ///
    /// # Errors
    ///
    /// Same as [`Exchange::write_status`].
    pub fn write_status_code(&mut self, status: StatusCode) -> Result<(), ProtocolError> {
        self.response.write_status_code(status)
    }

    /// Writes one header line. `Connection: Keep-Alive` keeps the socket open
    /// for another request after this response.
    ///
    /// # Errors
    ///
    /// Returns a `ProtocolError` before the status line or after the headers
    /// were terminated.
    pub fn write_header(&mut self, name: &str, value: &str) -> Result<(), ProtocolError> {
        self.response.write_header(name, value)
    }

    /// Terminates the headers; flushing starts once the handler returns.
    ///
    /// # Errors
    ///
    /// Returns a `ProtocolError` before the status line or after release.
    pub fn end_headers(&mut self) -> Result<(), ProtocolError> {
        self.response.end_headers()
    }

    /// Appends body bytes, terminating the headers first if needed.
    ///
    /// # Errors
    ///
    /// Returns a `ProtocolError` before the status line or after release.
    pub fn write_body(&mut self, data: &[u8]) -> Result<(), ProtocolError> {
        self.response.write_body(data)
    }

    /// Declares the response complete. The connection is closed, or reused
    /// with keep-alive, once everything is flushed. Releasing twice is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `ProtocolError::StatusNotWritten` if no status line was
    /// written; the connection is then closed.
    pub fn release(&mut self) -> Result<(), ProtocolError> {
        self.response.finish()
    }

    /// Drops the connection without sending anything more.
    pub fn close(&mut self) {
        *self.abort = true;
    }

    /// Reads request body bytes: first what was buffered with the head, then
    /// straight from the socket. Returns `Ok(0)` once `Content-Length` bytes
    /// were handed out.
    ///
    /// The socket is non-blocking, so reading past the buffered part may fail
    /// with `WouldBlock`. [`Handler::body_readable`](crate::handler::Handler::body_readable)
    /// is called once more bytes arrive. Every byte taken off the socket
    /// restarts the idle timer when control returns to the server.
    ///
    /// # Errors
    ///
    /// Returns the socket error, or `UnexpectedEof` if the peer closed before
    /// the whole body arrived.
    pub fn read_body(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let remaining = self.request.content_length().saturating_sub(self.body.read);
        if remaining == 0 || buf.is_empty() {
            return Ok(0);
        }
        let want = usize::try_from(remaining).map_or(buf.len(), |remaining| remaining.min(buf.len()));

        let head = self.request.body_head();
        let offset = usize::try_from(self.body.read).unwrap_or(usize::MAX);
        let n = if offset < head.len() {
            let n = want.min(head.len() - offset);
            buf[..n].copy_from_slice(&head[offset..offset + n]);
            n
        } else {
            let Some(stream) = self.stream.as_deref_mut() else {
                return Err(io::ErrorKind::NotConnected.into());
            };
            match stream.read(&mut buf[..want])? {
                0 => return Err(io::ErrorKind::UnexpectedEof.into()),
                n => {
                    self.body.socket_activity = true;
                    n
                }
            }
        };

        self.body.read += n as u64;
        Ok(n)
    }
}
