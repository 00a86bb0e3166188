use std::io;
use std::io::{Read, Write};

use mio::Token;
use tracing::{debug, trace};

use crate::codec::{ParseStatus, ParserBridge, ResponseBuffer, ResponsePhase};
use crate::connection::exchange::{BodyCursor, Exchange};
use crate::connection::stream::Stream;
use crate::protocol::{ConnectionError, ConnectionId, ParseError, PeerAddr, Request};
use crate::reactor::{IoWatch, Reactor};

/// Lifecycle of a pool slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ConnState {
    /// Not bound to a socket.
    Free,
    /// Receiving the request head and the buffered part of the body.
    Reading,
    /// The request was handed to the application, which owns the response.
    Dispatched,
    /// The application released the response; flushing what is left.
    Flushing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReadOutcome {
    /// More bytes are needed, wait for the next readable event.
    Pending,
    /// The request is ready for the application.
    Dispatch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WriteOutcome {
    /// Nothing to do until the next event or application call.
    Pending,
    /// The response is complete and fully flushed.
    Finished,
}

/// One pool slot: a client socket together with its read buffer, parser and
/// response buffer.
///
/// Slots are allocated once and reused. The read buffer is allocated on the
/// first connection a slot serves and kept afterwards; the response buffer
/// gives its memory back whenever the slot is freed.
#[derive(Debug)]
pub(crate) struct HttpConnection {
    slot: usize,
    /// Bumped on every open and close, so stale [`ConnectionId`]s never match
    generation: u32,
    state: ConnState,
    stream: Option<Stream>,
    peer: Option<PeerAddr>,
    watch: IoWatch,
    buffer_size: usize,
    read_buf: Option<Box<[u8]>>,
    read_len: usize,
    parser: ParserBridge,
    body: BodyCursor,
    response: ResponseBuffer,
    /// The application asked for the connection to be dropped
    abort: bool,
}

impl HttpConnection {
    pub(crate) fn new(slot: usize, buffer_size: usize, max_entries: usize) -> Self {
        Self {
            slot,
            generation: 0,
            state: ConnState::Free,
            stream: None,
            peer: None,
            watch: IoWatch::NONE,
            buffer_size,
            read_buf: None,
            read_len: 0,
            parser: ParserBridge::new(max_entries),
            body: BodyCursor::default(),
            response: ResponseBuffer::new(),
            abort: false,
        }
    }

    pub(crate) fn id(&self) -> ConnectionId {
        ConnectionId { slot: self.slot, generation: self.generation }
    }

    pub(crate) fn state(&self) -> ConnState {
        self.state
    }

    pub(crate) fn is_free(&self) -> bool {
        self.state == ConnState::Free
    }

    pub(crate) fn peer_addr(&self) -> Option<PeerAddr> {
        self.peer
    }

    pub(crate) fn wants_write(&self) -> bool {
        self.watch.writable
    }

    pub(crate) fn keep_alive(&self) -> bool {
        self.response.keep_alive()
    }

    /// Dispatched with body bytes still due on the socket.
    pub(crate) fn awaits_body(&self) -> bool {
        self.state == ConnState::Dispatched && self.watch.readable
    }

    /// Whether the whole request body was taken off the socket, by the read
    /// path or by the application.
    pub(crate) fn body_received(&self) -> bool {
        let content_length = self.parser.content_length();
        let total = (self.parser.header_len() as u64).saturating_add(content_length);
        total <= self.read_len as u64 || self.body.read >= content_length
    }

    /// Binds a freshly accepted socket to this slot and starts reading.
    pub(crate) fn open(&mut self, reactor: &mut Reactor, stream: Stream, peer: PeerAddr) -> io::Result<()> {
        debug_assert!(self.is_free(), "slot {} opened twice", self.slot);
        self.stream = Some(stream);
        self.peer = Some(peer);
        self.init(reactor)
    }

    /// Prepares the slot for the next request on the same socket.
    ///
    /// Called once after accept and again after every kept-alive response.
    pub(crate) fn init(&mut self, reactor: &mut Reactor) -> io::Result<()> {
        self.generation = self.generation.wrapping_add(1);
        self.state = ConnState::Reading;
        self.read_len = 0;
        self.body = BodyCursor::default();
        self.abort = false;
        self.parser.reset();
        self.response.reset();
        if self.read_buf.is_none() {
            self.read_buf = Some(vec![0; self.buffer_size].into_boxed_slice());
        }

        self.set_watch(reactor, IoWatch::NONE.with_readable(true))?;
        reactor.restart_idle(self.slot);
        Ok(())
    }

    /// Reads until the socket would block or a request is complete.
    pub(crate) fn on_readable(&mut self, reactor: &mut Reactor) -> Result<ReadOutcome, ConnectionError> {
        debug_assert_eq!(self.state, ConnState::Reading);
        loop {
            let (Some(buf), Some(stream)) = (self.read_buf.as_deref_mut(), self.stream.as_mut()) else {
                return Ok(ReadOutcome::Pending);
            };

            if self.read_len == buf.len() {
                return Err(ParseError::too_large_header(self.read_len, buf.len()).into());
            }

            match stream.read(&mut buf[self.read_len..]) {
                Ok(0) => return Err(ConnectionError::ReadClosed),
                Ok(n) => {
                    self.read_len += n;
                    reactor.restart_idle(self.slot);
                    trace!(slot = self.slot, read = n, buffered = self.read_len, "read from socket");
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(ReadOutcome::Pending),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(ConnectionError::read(e)),
            }

            let capacity = buf.len() as u64;
            let ParseStatus::Complete { header_len, content_length } = self.parser.execute(&buf[..self.read_len])? else {
                continue;
            };

            let total = (header_len as u64).saturating_add(content_length);
            let read = self.read_len as u64;
            if read > total {
                let extra = usize::try_from(read - total).unwrap_or(usize::MAX);
                return Err(ParseError::trailing_bytes(extra).into());
            }

            // a body larger than the buffer is read by the application itself,
            // the read watch stays to tell it when more arrives
            if read == total || total > capacity {
                if read == total {
                    self.set_watch(reactor, self.watch.with_readable(false)).map_err(ConnectionError::read)?;
                }
                self.state = ConnState::Dispatched;
                return Ok(ReadOutcome::Dispatch);
            }
        }
    }

    /// Writes buffered response bytes until the socket would block or the
    /// buffer is drained.
    pub(crate) fn on_writable(&mut self, reactor: &mut Reactor) -> Result<WriteOutcome, ConnectionError> {
        debug_assert!(self.response.phase() >= ResponsePhase::HeadersTerminated);
        let Some(stream) = self.stream.as_mut() else {
            return Ok(WriteOutcome::Pending);
        };

        while self.response.has_unflushed() {
            match stream.write(self.response.unflushed()) {
                Ok(0) => return Err(ConnectionError::WriteZero),
                Ok(n) => {
                    self.response.advance(n);
                    reactor.restart_idle(self.slot);
                    trace!(slot = self.slot, written = n, "wrote to socket");
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(WriteOutcome::Pending),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(ConnectionError::write(e)),
            }
        }

        self.set_watch(reactor, self.watch.with_writable(false)).map_err(ConnectionError::write)?;
        Ok(if self.state == ConnState::Flushing { WriteOutcome::Finished } else { WriteOutcome::Pending })
    }

    /// Reconciles the slot with what the application did to the response.
    ///
    /// Runs whenever control comes back from the application: after the
    /// handler returns and after every deferred response call.
    pub(crate) fn settle(&mut self, reactor: &mut Reactor) -> Result<WriteOutcome, ConnectionError> {
        if std::mem::take(&mut self.body.socket_activity) {
            reactor.restart_idle(self.slot);
        }
        if let Some(violation) = self.response.violation() {
            return Err(violation.into());
        }
        if self.abort {
            return Err(ConnectionError::Aborted);
        }

        if self.state == ConnState::Dispatched && self.response.is_complete() {
            self.state = ConnState::Flushing;
        }

        let body_done = match self.state {
            ConnState::Dispatched => self.body_received(),
            ConnState::Flushing => true,
            ConnState::Free | ConnState::Reading => false,
        };
        if self.watch.readable && body_done {
            self.set_watch(reactor, self.watch.with_readable(false)).map_err(ConnectionError::read)?;
        }

        // the status line alone stays buffered until the headers are terminated
        if self.response.has_unflushed() && self.response.phase() >= ResponsePhase::HeadersTerminated {
            self.set_watch(reactor, self.watch.with_writable(true)).map_err(ConnectionError::write)?;
            return Ok(WriteOutcome::Pending);
        }

        Ok(if self.state == ConnState::Flushing { WriteOutcome::Finished } else { WriteOutcome::Pending })
    }

    /// The pending socket error after an error readiness event.
    pub(crate) fn socket_error(&self) -> ConnectionError {
        match &self.stream {
            Some(stream) => ConnectionError::read(stream.socket_error()),
            None => ConnectionError::ReadClosed,
        }
    }

    /// Tears the connection down and returns the slot to the free state.
    ///
    /// Closing a free slot does nothing.
    pub(crate) fn close(&mut self, reactor: &mut Reactor) {
        if self.is_free() {
            return;
        }

        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = reactor.update_io(&mut stream, Token(self.slot), &mut self.watch, IoWatch::NONE) {
                debug!(slot = self.slot, "failed to deregister socket, cause {}", e);
            }
            // dropping the stream closes the socket
        }
        self.watch = IoWatch::NONE;
        reactor.stop_idle(self.slot);

        self.generation = self.generation.wrapping_add(1);
        self.state = ConnState::Free;
        self.peer = None;
        self.read_len = 0;
        self.body = BodyCursor::default();
        self.abort = false;
        self.parser.reset();
        self.response.release_memory();
    }

    /// The application's view of the dispatched request.
    pub(crate) fn exchange(&mut self) -> Exchange<'_> {
        let id = self.id();
        let filled: &[u8] = match &self.read_buf {
            Some(buf) => &buf[..self.read_len],
            None => &[],
        };
        let request = Request::new(filled, self.parser.entries(), self.parser.header_len(), self.parser.content_length());
        Exchange::new(id, self.peer, request, &mut self.response, self.stream.as_mut(), &mut self.body, &mut self.abort)
    }

    fn set_watch(&mut self, reactor: &Reactor, next: IoWatch) -> io::Result<()> {
        let Some(stream) = self.stream.as_mut() else {
            return Ok(());
        };
        reactor.update_io(stream, Token(self.slot), &mut self.watch, next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ProtocolError;
    use std::os::unix::net::UnixStream as StdUnixStream;
    use std::time::Duration;

    fn open_pair(buffer_size: usize, max_entries: usize) -> (Reactor, HttpConnection, StdUnixStream) {
        let mut reactor = Reactor::new(1, 16, Duration::from_secs(30)).unwrap();
        let (ours, theirs) = StdUnixStream::pair().unwrap();
        ours.set_nonblocking(true).unwrap();

        let mut connection = HttpConnection::new(0, buffer_size, max_entries);
        connection.open(&mut reactor, Stream::Unix(mio::net::UnixStream::from_std(ours)), PeerAddr::Unix).unwrap();
        (reactor, connection, theirs)
    }

    #[test]
    fn dispatch_after_complete_head() {
        let (mut reactor, mut connection, mut peer) = open_pair(1024, 16);
        assert_eq!(connection.state(), ConnState::Reading);
        assert!(reactor.is_idle_armed(0));

        peer.write_all(b"GET /x?y=1 HTTP/1.1\r\nHost: a\r\n\r\n").unwrap();
        assert_eq!(connection.on_readable(&mut reactor).unwrap(), ReadOutcome::Dispatch);
        assert_eq!(connection.state(), ConnState::Dispatched);

        let exchange = connection.exchange();
        let request = exchange.request();
        assert_eq!(request.path(), Some("/x"));
        assert_eq!(request.query(), Some("y=1"));
        assert_eq!(request.header("host"), Some(&b"a"[..]));
        assert_eq!(exchange.peer_addr(), Some(PeerAddr::Unix));
    }

    #[test]
    fn partial_head_waits_for_more() {
        let (mut reactor, mut connection, mut peer) = open_pair(1024, 16);

        peer.write_all(b"GET / HT").unwrap();
        assert_eq!(connection.on_readable(&mut reactor).unwrap(), ReadOutcome::Pending);
        assert_eq!(connection.state(), ConnState::Reading);

        peer.write_all(b"TP/1.1\r\n\r\n").unwrap();
        assert_eq!(connection.on_readable(&mut reactor).unwrap(), ReadOutcome::Dispatch);
    }

    #[test]
    fn body_is_buffered_before_dispatch() {
        let (mut reactor, mut connection, mut peer) = open_pair(1024, 16);

        peer.write_all(b"POST / HTTP/1.1\r\nContent-Length: 4\r\n\r\nab").unwrap();
        assert_eq!(connection.on_readable(&mut reactor).unwrap(), ReadOutcome::Pending);

        peer.write_all(b"cd").unwrap();
        assert_eq!(connection.on_readable(&mut reactor).unwrap(), ReadOutcome::Dispatch);
        assert_eq!(connection.exchange().request().body_head(), b"abcd");
    }

    #[test]
    fn oversized_body_is_read_by_the_application() {
        let (mut reactor, mut connection, mut peer) = open_pair(128, 16);

        peer.write_all(b"POST / HTTP/1.1\r\nContent-Length: 1000\r\n\r\n0123456789").unwrap();
        assert_eq!(connection.on_readable(&mut reactor).unwrap(), ReadOutcome::Dispatch);
        peer.write_all(b"abcdefghijklmnopqrst").unwrap();

        let mut exchange = connection.exchange();
        assert_eq!(exchange.request().body_head(), b"0123456789");

        let mut body = [0u8; 64];
        assert_eq!(exchange.read_body(&mut body).unwrap(), 10);
        assert_eq!(&body[..10], b"0123456789");
        assert_eq!(exchange.read_body(&mut body).unwrap(), 20);
        assert_eq!(&body[..20], b"abcdefghijklmnopqrst");
    }

    #[test]
    fn read_watch_stays_until_the_body_is_read() {
        let (mut reactor, mut connection, mut peer) = open_pair(64, 16);

        peer.write_all(b"POST / HTTP/1.1\r\nContent-Length: 30\r\n\r\n").unwrap();
        assert_eq!(connection.on_readable(&mut reactor).unwrap(), ReadOutcome::Dispatch);
        assert!(connection.awaits_body());
        assert!(!connection.body_received());

        peer.write_all(&[b'x'; 30]).unwrap();
        let mut body = [0u8; 64];
        assert_eq!(connection.exchange().read_body(&mut body).unwrap(), 30);
        assert!(connection.body_received());

        assert_eq!(connection.settle(&mut reactor).unwrap(), WriteOutcome::Pending);
        assert!(!connection.awaits_body());
    }

    #[test]
    fn body_read_from_the_socket_restarts_the_idle_timer() {
        let (mut reactor, mut connection, mut peer) = open_pair(64, 16);

        peer.write_all(b"POST / HTTP/1.1\r\nContent-Length: 30\r\n\r\n").unwrap();
        connection.on_readable(&mut reactor).unwrap();
        reactor.stop_idle(0);

        connection.settle(&mut reactor).unwrap();
        assert!(!reactor.is_idle_armed(0));

        peer.write_all(&[b'x'; 10]).unwrap();
        let mut body = [0u8; 64];
        assert_eq!(connection.exchange().read_body(&mut body).unwrap(), 10);
        connection.settle(&mut reactor).unwrap();
        assert!(reactor.is_idle_armed(0));
        assert!(connection.awaits_body());
    }

    #[test]
    fn body_held_in_the_buffer_counts_as_received() {
        let (mut reactor, mut connection, mut peer) = open_pair(1024, 16);

        peer.write_all(b"POST / HTTP/1.1\r\nContent-Length: 3\r\n\r\nabc").unwrap();
        assert_eq!(connection.on_readable(&mut reactor).unwrap(), ReadOutcome::Dispatch);
        assert!(!connection.awaits_body());
        assert!(connection.body_received());
    }

    #[test]
    fn read_body_stops_at_content_length() {
        let (mut reactor, mut connection, mut peer) = open_pair(1024, 16);

        peer.write_all(b"POST / HTTP/1.1\r\nContent-Length: 3\r\n\r\nxyz").unwrap();
        assert_eq!(connection.on_readable(&mut reactor).unwrap(), ReadOutcome::Dispatch);

        let mut exchange = connection.exchange();
        let mut body = [0u8; 2];
        assert_eq!(exchange.read_body(&mut body).unwrap(), 2);
        assert_eq!(exchange.read_body(&mut body).unwrap(), 1);
        assert_eq!(body[0], b'z');
        assert_eq!(exchange.read_body(&mut body).unwrap(), 0);
    }

    #[test]
    fn trailing_bytes_are_rejected() {
        let (mut reactor, mut connection, mut peer) = open_pair(1024, 16);

        peer.write_all(b"GET / HTTP/1.1\r\n\r\nGET").unwrap();
        let result = connection.on_readable(&mut reactor);
        assert!(matches!(result, Err(ConnectionError::Parse { source: ParseError::TrailingBytes { extra: 3 } })));
    }

    #[test]
    fn full_buffer_without_head_is_too_large() {
        let (mut reactor, mut connection, mut peer) = open_pair(64, 16);

        peer.write_all(b"GET /").unwrap();
        peer.write_all(&[b'a'; 100]).unwrap();
        let result = connection.on_readable(&mut reactor);
        assert!(matches!(result, Err(ConnectionError::Parse { source: ParseError::TooLargeHeader { max_size: 64, .. } })));
    }

    #[test]
    fn too_many_entries_is_a_parse_error() {
        let (mut reactor, mut connection, mut peer) = open_pair(1024, 6);

        peer.write_all(b"GET / HTTP/1.1\r\nA: 1\r\nB: 2\r\nC: 3\r\n\r\n").unwrap();
        let result = connection.on_readable(&mut reactor);
        assert!(matches!(result, Err(ConnectionError::Parse { source: ParseError::TooManyEntries { max_num: 6 } })));
    }

    #[test]
    fn peer_close_is_reported() {
        let (mut reactor, mut connection, peer) = open_pair(1024, 16);
        drop(peer);

        assert!(matches!(connection.on_readable(&mut reactor), Err(ConnectionError::ReadClosed)));
    }

    #[test]
    fn released_response_is_flushed_and_kept_alive() {
        let (mut reactor, mut connection, mut peer) = open_pair(1024, 16);
        peer.write_all(b"GET / HTTP/1.1\r\n\r\n").unwrap();
        connection.on_readable(&mut reactor).unwrap();
        let first = connection.id();

        {
            let mut exchange = connection.exchange();
            exchange.write_status(200, "OK").unwrap();
            exchange.write_header("Connection", "Keep-Alive").unwrap();
            exchange.write_body(b"hi").unwrap();
            exchange.release().unwrap();
        }
        assert_eq!(connection.settle(&mut reactor).unwrap(), WriteOutcome::Pending);
        assert_eq!(connection.state(), ConnState::Flushing);
        assert!(connection.wants_write());

        assert_eq!(connection.on_writable(&mut reactor).unwrap(), WriteOutcome::Finished);
        assert!(!connection.wants_write());
        assert!(connection.keep_alive());

        let expected = b"HTTP/1.1 200 OK\r\nConnection: Keep-Alive\r\n\r\nhi";
        let mut received = vec![0u8; expected.len()];
        peer.read_exact(&mut received).unwrap();
        assert_eq!(received, expected);

        connection.init(&mut reactor).unwrap();
        assert_eq!(connection.state(), ConnState::Reading);
        assert_ne!(connection.id(), first);
        assert_eq!(connection.exchange().request().len(), 0);
    }

    #[test]
    fn status_line_alone_stays_buffered() {
        let (mut reactor, mut connection, mut peer) = open_pair(1024, 16);
        peer.write_all(b"GET / HTTP/1.1\r\n\r\n").unwrap();
        connection.on_readable(&mut reactor).unwrap();

        connection.exchange().write_status(200, "OK").unwrap();
        assert_eq!(connection.settle(&mut reactor).unwrap(), WriteOutcome::Pending);
        assert!(!connection.wants_write());
        assert_eq!(connection.state(), ConnState::Dispatched);
    }

    #[test]
    fn out_of_order_write_fails_settle() {
        let (mut reactor, mut connection, mut peer) = open_pair(1024, 16);
        peer.write_all(b"GET / HTTP/1.1\r\n\r\n").unwrap();
        connection.on_readable(&mut reactor).unwrap();

        let _ = connection.exchange().write_header("Host", "x");
        let result = connection.settle(&mut reactor);
        assert!(matches!(result, Err(ConnectionError::Protocol { source: ProtocolError::StatusNotWritten })));
    }

    #[test]
    fn release_without_status_fails_settle() {
        let (mut reactor, mut connection, mut peer) = open_pair(1024, 16);
        peer.write_all(b"GET / HTTP/1.1\r\n\r\n").unwrap();
        connection.on_readable(&mut reactor).unwrap();

        assert_eq!(connection.exchange().release(), Err(ProtocolError::StatusNotWritten));
        assert!(connection.settle(&mut reactor).is_err());
    }

    #[test]
    fn application_close_aborts() {
        let (mut reactor, mut connection, mut peer) = open_pair(1024, 16);
        peer.write_all(b"GET / HTTP/1.1\r\n\r\n").unwrap();
        connection.on_readable(&mut reactor).unwrap();

        connection.exchange().close();
        assert!(matches!(connection.settle(&mut reactor), Err(ConnectionError::Aborted)));
    }

    #[test]
    fn close_frees_the_slot() {
        let (mut reactor, mut connection, mut peer) = open_pair(1024, 16);
        let before = connection.id();

        connection.close(&mut reactor);
        assert!(connection.is_free());
        assert!(!reactor.is_idle_armed(0));
        assert_ne!(connection.id(), before);
        assert_eq!(connection.peer_addr(), None);

        // the socket is gone
        let mut buf = [0u8; 1];
        assert_eq!(peer.read(&mut buf).unwrap(), 0);

        // closing twice changes nothing
        let after = connection.id();
        connection.close(&mut reactor);
        assert_eq!(connection.id(), after);
    }
}
