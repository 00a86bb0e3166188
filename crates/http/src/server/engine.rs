use std::io;

use tracing::{debug, trace, warn};

use crate::connection::{ConnState, ReadOutcome, WriteOutcome};
use crate::handler::Handler;
use crate::protocol::{AcceptError, ConnectionError};
use crate::reactor::{Reactor, Readiness};
use crate::server::listener::Listener;
use crate::server::pool::Pool;

/// Reactor and pool, the part of the server deferred responders work on.
#[derive(Debug)]
pub(crate) struct Core {
    pub(crate) reactor: Reactor,
    pub(crate) pool: Pool,
    /// The last accept stopped because the pool was full
    pub(crate) accept_backlogged: bool,
}

impl Core {
    pub(crate) fn new(reactor: Reactor, pool: Pool) -> Self {
        Self { reactor, pool, accept_backlogged: false }
    }

    /// Accepts until the backlog is empty or the pool is full.
    pub(crate) fn accept_all(&mut self, listener: &Listener) {
        loop {
            match self.accept_one(listener) {
                Ok(slot) => {
                    self.accept_backlogged = false;
                    trace!(slot, "accepted connection");
                }
                Err(e @ AcceptError::PoolExhausted { .. }) => {
                    if !self.accept_backlogged {
                        warn!("too many peers, leaving new connections in the backlog, cause {}", e);
                    }
                    self.accept_backlogged = true;
                    return;
                }
                Err(AcceptError::Io { source }) => match source.kind() {
                    io::ErrorKind::WouldBlock => {
                        self.accept_backlogged = false;
                        return;
                    }
                    io::ErrorKind::Interrupted | io::ErrorKind::ConnectionAborted => {}
                    _ => {
                        warn!("failed to accept, cause {}", source);
                        return;
                    }
                },
            }
        }
    }

    fn accept_one(&mut self, listener: &Listener) -> Result<usize, AcceptError> {
        let Some(slot) = self.pool.claim() else {
            return Err(AcceptError::PoolExhausted { capacity: self.pool.capacity() });
        };

        let (stream, peer) = match listener.accept() {
            Ok(accepted) => accepted,
            Err(e) => {
                self.pool.unclaim(slot);
                return Err(e.into());
            }
        };

        self.pool.open(slot, &mut self.reactor, stream, peer)?;
        Ok(slot)
    }

    pub(crate) fn on_connection_event<H: Handler>(&mut self, handler: &mut H, slot: usize, readiness: Readiness) {
        let Some(connection) = self.pool.get_mut(slot) else {
            return;
        };
        // events still queued for a connection closed earlier in this batch
        if connection.is_free() {
            return;
        }

        if readiness.error {
            let cause = connection.socket_error();
            self.close(slot, Some(cause));
            return;
        }

        if readiness.readable {
            match connection.state() {
                ConnState::Reading => match connection.on_readable(&mut self.reactor) {
                    Ok(ReadOutcome::Pending) => {}
                    Ok(ReadOutcome::Dispatch) => self.dispatch(handler, slot),
                    Err(e) => {
                        self.close(slot, Some(e));
                        return;
                    }
                },
                ConnState::Dispatched if connection.awaits_body() => self.body_readable(handler, slot),
                ConnState::Free | ConnState::Dispatched | ConnState::Flushing => {}
            }
        }

        let Some(connection) = self.pool.get_mut(slot) else {
            return;
        };
        if readiness.writable && connection.wants_write() {
            match connection.on_writable(&mut self.reactor) {
                Ok(WriteOutcome::Pending) => {}
                Ok(WriteOutcome::Finished) => self.finish(slot),
                Err(e) => self.close(slot, Some(e)),
            }
        }
    }

    fn dispatch<H: Handler>(&mut self, handler: &mut H, slot: usize) {
        let Some(connection) = self.pool.get_mut(slot) else {
            return;
        };
        trace!(slot, "dispatch request");
        handler.call(&mut connection.exchange());
        self.settle(slot);
    }

    fn body_readable<H: Handler>(&mut self, handler: &mut H, slot: usize) {
        let Some(connection) = self.pool.get_mut(slot) else {
            return;
        };
        trace!(slot, "request body readable");
        handler.body_readable(&mut connection.exchange());
        self.settle(slot);
    }

    /// Applies what the application did to the response of `slot`.
    pub(crate) fn settle(&mut self, slot: usize) {
        let Some(connection) = self.pool.get_mut(slot) else {
            return;
        };
        match connection.settle(&mut self.reactor) {
            Ok(WriteOutcome::Pending) => {}
            Ok(WriteOutcome::Finished) => self.finish(slot),
            Err(e) => self.close(slot, Some(e)),
        }
    }

    /// The response of `slot` is flushed: reuse the socket or close it.
    fn finish(&mut self, slot: usize) {
        let Some(connection) = self.pool.get_mut(slot) else {
            return;
        };
        if !connection.keep_alive() {
            self.close(slot, None);
            return;
        }
        // unread body bytes would be parsed as the next request
        if !connection.body_received() {
            debug!(slot, "request body left unread, closing instead of keeping alive");
            self.close(slot, None);
            return;
        }

        match connection.init(&mut self.reactor) {
            Ok(()) => trace!(slot, "connection kept alive"),
            Err(e) => self.close(slot, Some(ConnectionError::read(e))),
        }
    }

    pub(crate) fn close(&mut self, slot: usize, cause: Option<ConnectionError>) {
        self.pool.close(slot, &mut self.reactor, cause.as_ref());
    }
}
