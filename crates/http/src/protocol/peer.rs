use std::fmt;
use std::net::SocketAddr;

/// Address of the remote end of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerAddr {
    Inet(SocketAddr),
    /// Unix domain peers are unnamed for all practical purposes.
    Unix,
}

impl PeerAddr {
    pub fn ip(&self) -> Option<std::net::IpAddr> {
        match self {
            PeerAddr::Inet(addr) => Some(addr.ip()),
            PeerAddr::Unix => None,
        }
    }
}

impl fmt::Display for PeerAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeerAddr::Inet(addr) => addr.fmt(f),
            PeerAddr::Unix => f.write_str("unix"),
        }
    }
}

/// Identifies one request/response cycle on a pooled connection.
///
/// The generation changes every time the slot is initialized, so an id kept
/// past its cycle (keep-alive reuse, close, a new accept into the same slot)
/// no longer resolves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId {
    pub(crate) slot: usize,
    pub(crate) generation: u32,
}

impl ConnectionId {
    pub fn slot(&self) -> usize {
        self.slot
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.slot, self.generation)
    }
}
