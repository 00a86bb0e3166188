//! Per-connection state machine
//!
//! Each pool slot is an [`HttpConnection`](http_connection::HttpConnection)
//! that moves through four states:
//!
//! - `Free`: no socket bound
//! - `Reading`: read watch active, bytes are fed to the parser bridge
//! - `Dispatched`: the request was handed to the application through an
//!   [`Exchange`] and the application owns the response; the read watch
//!   stays only while body bytes the buffer could not hold are still due
//! - `Flushing`: the application released the response, the write watch
//!   drains what is left
//!
//! A flushed response either closes the socket or, when the application
//! wrote `Connection: Keep-Alive`, puts the slot back into `Reading` for the
//! next request, unless part of the request body was never read. Any I/O failure, parse failure, protocol violation or idle
//! timeout closes the connection; none of them propagates further.

mod exchange;
mod http_connection;
mod stream;

pub use exchange::Exchange;
pub(crate) use http_connection::{ConnState, HttpConnection, ReadOutcome, WriteOutcome};
pub(crate) use stream::Stream;
