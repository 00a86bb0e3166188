//! Listener, connection pool and the event loop tying them together
//!
//! A [`Server`] owns one reactor, at most one listening socket and a fixed
//! pool of connection slots. It never spawns threads: everything, including
//! the application's handler, runs on the thread calling
//! [`Server::poll_once`] or [`Server::run`].
//!
//! When every slot is busy, new connections are left in the listen backlog
//! and accepted as soon as a slot is freed.

mod config;
mod engine;
mod listener;
mod pool;
mod responder;

use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::os::fd::OwnedFd;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use mio::{Token, Waker};
use tracing::{error, info};

pub use config::{
    DEFAULT_EVENT_CAPACITY, DEFAULT_IDLE_TIMEOUT, DEFAULT_MAX_CONNECTIONS, DEFAULT_MAX_ENTRIES, DEFAULT_READ_BUFFER_SIZE,
    MIN_READ_BUFFER_SIZE, ServerConfig, ServerConfigBuilder,
};
pub use responder::Responder;

use crate::connection::ConnState;
use crate::ensure;
use crate::handler::Handler;
use crate::protocol::{ConnectionError, ConnectionId, ListenError, PeerAddr};
use crate::reactor::{LISTENER, Reactor, Readiness, WAKER};

use self::engine::Core;
use self::listener::Listener;
use self::pool::Pool;

/// A single-threaded HTTP/1.x connection engine.
///
/// `H` receives every complete request; see [`Handler`].
#[derive(Debug)]
pub struct Server<H> {
    config: ServerConfig,
    core: Core,
    listener: Option<Listener>,
    handler: H,
    shutdown: Arc<AtomicBool>,
    ready: Vec<Readiness>,
    expired: Vec<usize>,
}

impl<H> Server<H> {
    /// Creates a server with its pool and reactor; it does not listen yet.
    ///
    /// # Errors
    ///
    /// Returns the OS error if the poll instance cannot be created.
    pub fn new(config: ServerConfig, handler: H) -> io::Result<Self> {
        let reactor = Reactor::new(config.max_connections(), config.event_capacity(), config.idle_timeout())?;
        let pool = Pool::new(config.max_connections(), config.read_buffer_size(), config.max_entries());
        Ok(Self {
            core: Core::new(reactor, pool),
            listener: None,
            handler,
            shutdown: Arc::new(AtomicBool::new(false)),
            ready: Vec::with_capacity(config.event_capacity()),
            expired: Vec::new(),
            config,
        })
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }

    /// Listens on every IPv4 interface at `port`.
    ///
    /// # Errors
    ///
    /// See [`Server::listen_tcp`].
    pub fn listen_on_port(&mut self, port: u16) -> Result<(), ListenError> {
        self.listen_tcp(SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)))
    }

    /// Listens on a TCP address. Port 0 picks a free port, see
    /// [`Server::local_addr`].
    ///
    /// # Errors
    ///
    /// Returns `ListenError::AlreadyListening` if a listener is active, or the
    /// socket error if the socket cannot be created, bound or listened on.
    pub fn listen_tcp(&mut self, addr: SocketAddr) -> Result<(), ListenError> {
        ensure!(self.listener.is_none(), ListenError::AlreadyListening);
        let listener = Listener::bind_tcp(addr, self.backlog())?;
        self.start_listening(listener)
    }

    /// Listens on a Unix domain socket at `path`.
    ///
    /// A stale socket file at `path` is replaced. The socket file is made
    /// accessible to everyone and removed again by [`Server::unlisten`].
    ///
    /// # Errors
    ///
    /// Same as [`Server::listen_tcp`].
    pub fn listen_unix<P: AsRef<Path>>(&mut self, path: P) -> Result<(), ListenError> {
        ensure!(self.listener.is_none(), ListenError::AlreadyListening);
        let listener = Listener::bind_unix(path.as_ref(), self.backlog())?;
        self.start_listening(listener)
    }

    /// Listens on an already bound TCP or Unix socket, for example one
    /// inherited from a supervisor.
    ///
    /// # Errors
    ///
    /// Same as [`Server::listen_tcp`].
    pub fn listen_fd(&mut self, fd: OwnedFd) -> Result<(), ListenError> {
        ensure!(self.listener.is_none(), ListenError::AlreadyListening);
        let listener = Listener::from_fd(fd, self.backlog())?;
        self.start_listening(listener)
    }

    /// Stops accepting and closes the listening socket. Open connections are
    /// not affected. Does nothing when not listening.
    pub fn unlisten(&mut self) {
        if let Some(listener) = self.listener.take() {
            listener.close(self.core.reactor.registry());
            self.core.accept_backlogged = false;
            info!("stop listening");
        }
    }

    pub fn is_listening(&self) -> bool {
        self.listener.is_some()
    }

    /// The bound TCP address, `None` when not listening or on a Unix socket.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.as_ref().and_then(Listener::local_addr)
    }

    /// Whether any request is with the application, waiting to be released.
    pub fn has_dispatched(&self) -> bool {
        self.core.pool.any_dispatched()
    }

    /// Number of pool slots bound to a socket.
    pub fn open_connections(&self) -> usize {
        self.core.pool.in_use()
    }

    pub fn peer_addr(&self, id: ConnectionId) -> Option<PeerAddr> {
        self.core.pool.get(id.slot).filter(|connection| connection.id() == id).and_then(|connection| connection.peer_addr())
    }

    /// Resumes a request the handler left unreleased.
    ///
    /// Returns `None` if `id` no longer refers to a dispatched request, for
    /// example because the connection timed out in the meantime.
    pub fn responder(&mut self, id: ConnectionId) -> Option<Responder<'_>> {
        let connection = self.core.pool.get(id.slot)?;
        let dispatched = connection.id() == id && connection.state() == ConnState::Dispatched;
        dispatched.then(|| Responder::new(&mut self.core, id))
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle { flag: Arc::clone(&self.shutdown), waker: self.core.reactor.waker() }
    }

    fn backlog(&self) -> i32 {
        i32::try_from(self.core.pool.capacity()).unwrap_or(i32::MAX)
    }

    fn start_listening(&mut self, mut listener: Listener) -> Result<(), ListenError> {
        if let Err(e) = listener.register(self.core.reactor.registry()) {
            listener.close(self.core.reactor.registry());
            return Err(ListenError::socket(e));
        }

        match (listener.local_addr(), listener.unix_path()) {
            (Some(addr), _) => info!(%addr, "start listening"),
            (None, Some(path)) => info!(path = %path.display(), "start listening"),
            (None, None) => info!("start listening"),
        }
        self.listener = Some(listener);
        Ok(())
    }

    fn accept_pending(&mut self) {
        if let Some(listener) = &self.listener {
            self.core.accept_all(listener);
        }
    }

    fn expire_idle(&mut self) {
        self.core.reactor.expire_idle(&mut self.expired);
        for slot in self.expired.drain(..) {
            self.core.close(slot, Some(ConnectionError::IdleTimeout));
        }
    }
}

impl<H: Handler> Server<H> {
    /// Waits for readiness events, at most `timeout` (`None` waits until
    /// something happens), and processes them: accepts, reads, dispatches,
    /// flushes and idle timeouts.
    ///
    /// # Errors
    ///
    /// Returns the OS error if polling itself fails. Connection level errors
    /// only close the affected connection and are never returned.
    pub fn poll_once(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        let mut ready = std::mem::take(&mut self.ready);
        self.core.reactor.poll(&mut ready, timeout)?;

        for readiness in ready.drain(..) {
            match readiness.token {
                LISTENER if readiness.error => {
                    error!("listening socket failed, stop listening");
                    self.unlisten();
                }
                LISTENER => self.accept_pending(),
                WAKER => {}
                Token(slot) => self.core.on_connection_event(&mut self.handler, slot, readiness),
            }
        }
        self.ready = ready;

        self.expire_idle();

        if self.core.accept_backlogged && self.core.pool.has_free() {
            self.accept_pending();
        }
        Ok(())
    }

    /// Runs [`Server::poll_once`] until a [`ShutdownHandle`] is triggered.
    ///
    /// # Errors
    ///
    /// Returns the OS error if polling fails.
    pub fn run(&mut self) -> io::Result<()> {
        info!(capacity = self.config.max_connections(), "event loop started");
        while !self.shutdown.load(Ordering::Acquire) {
            self.poll_once(None)?;
        }
        self.shutdown.store(false, Ordering::Release);
        info!("event loop stopped");
        Ok(())
    }
}

impl<H> Drop for Server<H> {
    fn drop(&mut self) {
        self.unlisten();
    }
}

/// Stops [`Server::run`] from any thread.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    flag: Arc<AtomicBool>,
    waker: Arc<Waker>,
}

impl ShutdownHandle {
    /// Asks the loop to return after the current iteration.
    ///
    /// # Errors
    ///
    /// Returns the OS error if the event loop could not be woken.
    pub fn shutdown(&self) -> io::Result<()> {
        self.flag.store(true, Ordering::Release);
        self.waker.wake()
    }
}
