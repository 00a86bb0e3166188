use http::StatusCode;

use crate::connection::Exchange;
use crate::protocol::{ConnectionId, ProtocolError};
use crate::server::engine::Core;

/// Resumes the response of a request the handler returned from without
/// releasing.
///
/// Obtained through [`Server::responder`](crate::Server::responder). Writes
/// take effect when the responder is dropped: a released response starts
/// flushing then, and a protocol violation closes the connection.
#[derive(Debug)]
pub struct Responder<'a> {
    core: &'a mut Core,
    id: ConnectionId,
}

impl<'a> Responder<'a> {
    pub(crate) fn new(core: &'a mut Core, id: ConnectionId) -> Self {
        Self { core, id }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Runs `f` on the exchange of the deferred request.
    ///
    /// The request is still readable: the read buffer is left alone until the
    /// response is released.
    pub fn with_exchange<R>(&mut self, f: impl FnOnce(&mut Exchange<'_>) -> R) -> R {
        f(&mut self.core.pool.slot_mut(self.id.slot).exchange())
    }

    /// See [`Exchange::write_status`].
    ///
    /// # Errors
    ///
    /// Returns `ProtocolError::StatusAlreadyWritten` on a second status line.
    pub fn write_status(&mut self, code: u16, reason: &str) -> Result<(), ProtocolError> {
        self.with_exchange(|exchange| exchange.write_status(code, reason))
    }

    /// See [`Exchange::write_status_code`].
    ///
    /// # Errors
    ///
    /// Returns `ProtocolError::StatusAlreadyWritten` on a second status line.
    pub fn write_status_code(&mut self, status: StatusCode) -> Result<(), ProtocolError> {
        self.with_exchange(|exchange| exchange.write_status_code(status))
    }

    /// See [`Exchange::write_header`].
    ///
    /// # Errors
    ///
    /// Returns a `ProtocolError` when written out of order.
    pub fn write_header(&mut self, name: &str, value: &str) -> Result<(), ProtocolError> {
        self.with_exchange(|exchange| exchange.write_header(name, value))
    }

    /// See [`Exchange::end_headers`].
    ///
    /// # Errors
    ///
    /// Returns a `ProtocolError` when written out of order.
    pub fn end_headers(&mut self) -> Result<(), ProtocolError> {
        self.with_exchange(|exchange| exchange.end_headers())
    }

    /// See [`Exchange::write_body`].
    ///
    /// # Errors
    ///
    /// Returns a `ProtocolError` when written out of order.
    pub fn write_body(&mut self, data: &[u8]) -> Result<(), ProtocolError> {
        self.with_exchange(|exchange| exchange.write_body(data))
    }

    /// See [`Exchange::release`].
    ///
    /// # Errors
    ///
    /// Returns `ProtocolError::StatusNotWritten` without a status line.
    pub fn release(&mut self) -> Result<(), ProtocolError> {
        self.with_exchange(|exchange| exchange.release())
    }

    /// See [`Exchange::close`].
    pub fn close(&mut self) {
        self.with_exchange(|exchange| exchange.close());
    }
}

impl Drop for Responder<'_> {
    fn drop(&mut self) {
        self.core.settle(self.id.slot);
    }
}
