//! Listening socket setup.
//!
//! Sockets are created through `socket2` so the options are set before bind,
//! then handed to `mio` as non-blocking listeners.

use std::fs;
use std::io;
use std::net::SocketAddr;
use std::os::fd::OwnedFd;
use std::os::unix::fs::{FileTypeExt, PermissionsExt};
use std::path::{Path, PathBuf};

use mio::Registry;
use mio::event::Source;
use mio::net::{TcpListener, UnixListener};
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use tracing::{debug, warn};

use crate::connection::Stream;
use crate::protocol::{ListenError, PeerAddr};
use crate::reactor::LISTENER;

/// Permissions of a listening Unix socket file
const UNIX_SOCKET_MODE: u32 = 0o777;

#[derive(Debug)]
enum ListenSocket {
    Tcp(TcpListener),
    Unix(UnixListener),
}

#[derive(Debug)]
pub(crate) struct Listener {
    socket: ListenSocket,
    /// Socket file to remove once the listener is closed
    unix_path: Option<PathBuf>,
}

impl Listener {
    pub(crate) fn bind_tcp(addr: SocketAddr, backlog: i32) -> Result<Self, ListenError> {
        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
        socket.set_reuse_address(true)?;
        socket.set_keepalive(true)?;
        socket.set_linger(None)?;
        socket.set_nodelay(true)?;
        socket.set_nonblocking(true)?;
        socket.bind(&addr.into()).map_err(|e| ListenError::bind(addr, e))?;
        socket.listen(backlog)?;

        let listener = TcpListener::from_std(socket.into());
        Ok(Self { socket: ListenSocket::Tcp(listener), unix_path: None })
    }

    pub(crate) fn bind_unix(path: &Path, backlog: i32) -> Result<Self, ListenError> {
        remove_stale_socket(path)?;

        let socket = Socket::new(Domain::UNIX, Type::STREAM, None)?;
        // socket level options some platforms reject on unix sockets
        if let Err(e) = socket.set_keepalive(true).and_then(|()| socket.set_linger(None)) {
            debug!(path = %path.display(), "unix socket options not applied, cause {}", e);
        }
        socket.set_nonblocking(true)?;
        let address = SockAddr::unix(path)?;
        socket.bind(&address).map_err(|e| ListenError::bind_unix(path, e))?;

        let listening = fs::set_permissions(path, fs::Permissions::from_mode(UNIX_SOCKET_MODE)).and_then(|()| socket.listen(backlog));
        if let Err(e) = listening {
            discard_socket_file(path);
            return Err(ListenError::socket(e));
        }

        let listener = UnixListener::from_std(OwnedFd::from(socket).into());
        Ok(Self { socket: ListenSocket::Unix(listener), unix_path: Some(path.to_path_buf()) })
    }

    /// Adopts an already bound socket, TCP or Unix.
    pub(crate) fn from_fd(fd: OwnedFd, backlog: i32) -> Result<Self, ListenError> {
        let socket = Socket::from(fd);
        socket.set_nonblocking(true)?;
        socket.listen(backlog)?;

        let socket = if socket.local_addr()?.as_socket().is_some() {
            ListenSocket::Tcp(TcpListener::from_std(socket.into()))
        } else {
            ListenSocket::Unix(UnixListener::from_std(OwnedFd::from(socket).into()))
        };
        Ok(Self { socket, unix_path: None })
    }

    pub(crate) fn local_addr(&self) -> Option<SocketAddr> {
        match &self.socket {
            ListenSocket::Tcp(listener) => listener.local_addr().ok(),
            ListenSocket::Unix(_) => None,
        }
    }

    pub(crate) fn unix_path(&self) -> Option<&Path> {
        self.unix_path.as_deref()
    }

    pub(crate) fn accept(&self) -> io::Result<(Stream, PeerAddr)> {
        match &self.socket {
            ListenSocket::Tcp(listener) => listener.accept().map(|(stream, addr)| (Stream::Tcp(stream), PeerAddr::Inet(addr))),
            ListenSocket::Unix(listener) => listener.accept().map(|(stream, _)| (Stream::Unix(stream), PeerAddr::Unix)),
        }
    }

    pub(crate) fn register(&mut self, registry: &Registry) -> io::Result<()> {
        match &mut self.socket {
            ListenSocket::Tcp(listener) => listener.register(registry, LISTENER, mio::Interest::READABLE),
            ListenSocket::Unix(listener) => listener.register(registry, LISTENER, mio::Interest::READABLE),
        }
    }

    /// Stops watching the socket, closes it and removes its socket file.
    pub(crate) fn close(mut self, registry: &Registry) {
        let deregistered = match &mut self.socket {
            ListenSocket::Tcp(listener) => listener.deregister(registry),
            ListenSocket::Unix(listener) => listener.deregister(registry),
        };
        if let Err(e) = deregistered {
            debug!("failed to deregister listener, cause {}", e);
        }

        if let Some(path) = self.unix_path.take() {
            drop(self.socket);
            if let Err(e) = fs::remove_file(&path) {
                warn!(path = %path.display(), "failed to remove unix socket, cause {}", e);
            }
        }
    }
}

/// A socket file left behind by an earlier process would make bind fail.
fn remove_stale_socket(path: &Path) -> Result<(), ListenError> {
    match fs::symlink_metadata(path) {
        Ok(metadata) if metadata.file_type().is_socket() => {
            debug!(path = %path.display(), "removing stale unix socket");
            fs::remove_file(path).map_err(|e| ListenError::bind_unix(path, e))
        }
        _ => Ok(()),
    }
}

/// Removes the socket file of a listener that did not come up.
fn discard_socket_file(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        debug!(path = %path.display(), "failed to remove unix socket, cause {}", e);
    }
}
