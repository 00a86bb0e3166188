use std::io;
use std::path::Path;

use thiserror::Error;

/// Failure to put a listener into the listening state.
///
/// The listener stays unlistened after any of these.
#[derive(Debug, Error)]
pub enum ListenError {
    #[error("server is already listening")]
    AlreadyListening,

    #[error("socket setup error: {source}")]
    Socket {
        #[from]
        source: io::Error,
    },

    #[error("bind {address} error: {source}")]
    Bind { address: String, source: io::Error },
}

impl ListenError {
    pub fn socket<E: Into<io::Error>>(e: E) -> Self {
        Self::Socket { source: e.into() }
    }

    pub fn bind<A: ToString>(address: A, source: io::Error) -> Self {
        Self::Bind { address: address.to_string(), source }
    }

    pub fn bind_unix(path: &Path, source: io::Error) -> Self {
        Self::bind(path.display(), source)
    }
}

/// Reasons an incoming connection was not taken off the backlog.
#[derive(Debug, Error)]
pub enum AcceptError {
    #[error("connection pool exhausted, all {capacity} slots in use")]
    PoolExhausted { capacity: usize },

    #[error("accept error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("header size too large, current: {current_size} exceed the limit {max_size}")]
    TooLargeHeader { current_size: usize, max_size: usize },

    #[error("entry number exceed the limit {max_num}")]
    TooManyEntries { max_num: usize },

    #[error("invalid header: {reason}")]
    InvalidHeader { reason: String },

    #[error("invalid content-length header: {reason}")]
    InvalidContentLength { reason: String },

    #[error("{extra} unexpected bytes after the request")]
    TrailingBytes { extra: usize },
}

impl ParseError {
    pub fn too_large_header(current_size: usize, max_size: usize) -> Self {
        Self::TooLargeHeader { current_size, max_size }
    }

    pub fn too_many_entries(max_num: usize) -> Self {
        Self::TooManyEntries { max_num }
    }

    pub fn invalid_header<S: ToString>(str: S) -> Self {
        Self::InvalidHeader { reason: str.to_string() }
    }

    pub fn invalid_content_length<S: ToString>(str: S) -> Self {
        Self::InvalidContentLength { reason: str.to_string() }
    }

    pub fn trailing_bytes(extra: usize) -> Self {
        Self::TrailingBytes { extra }
    }
}

/// The application called the response operations out of order.
///
/// Any of these poisons the connection: it is closed once control returns to
/// the server.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("status line already written")]
    StatusAlreadyWritten,

    #[error("status line must be written first")]
    StatusNotWritten,

    #[error("headers already terminated")]
    HeadersTerminated,

    #[error("response already released")]
    ResponseComplete,
}

/// Why a connection was closed.
///
/// Every variant has the same recovery: the affected connection is closed and
/// nothing propagates past it.
#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("read error: {source}")]
    Read { source: io::Error },

    #[error("peer closed the connection")]
    ReadClosed,

    #[error("write error: {source}")]
    Write { source: io::Error },

    #[error("socket accepted zero bytes")]
    WriteZero,

    #[error("request error: {source}")]
    Parse {
        #[from]
        source: ParseError,
    },

    #[error("protocol violation: {source}")]
    Protocol {
        #[from]
        source: ProtocolError,
    },

    #[error("idle timeout")]
    IdleTimeout,

    #[error("closed by application")]
    Aborted,
}

impl ConnectionError {
    pub fn read<E: Into<io::Error>>(e: E) -> Self {
        Self::Read { source: e.into() }
    }

    pub fn write<E: Into<io::Error>>(e: E) -> Self {
        Self::Write { source: e.into() }
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{name} must be greater than zero")]
    Zero { name: &'static str },

    #[error("read buffer size {size} is below the minimum {min}")]
    ReadBufferTooSmall { size: usize, min: usize },
}
