//! An embeddable, single-threaded HTTP/1.x connection engine
//!
//! This crate accepts connections on a TCP or Unix socket, reads and parses
//! request heads into a fixed per-connection buffer, hands each complete
//! request to the application and streams back whatever response bytes the
//! application writes. It runs entirely on the caller's thread on top of a
//! `mio` reactor, with a fixed pool of connection slots allocated up front.
//!
//! # Features
//!
//! - TCP, Unix domain and inherited-descriptor listeners
//! - Fixed connection pool; excess peers wait in the listen backlog
//! - Zero-copy request views borrowing the read buffer
//! - Bounded request entries (request elements plus headers)
//! - Application-driven response writing with order checks
//! - Deferred responses finished after the handler returned
//! - Idle timeouts and `Connection: Keep-Alive` reuse
//!
//! # Example
//!
//! ```no_run
//! use micro_evhttp::handler::make_handler;
//! use micro_evhttp::{Exchange, Server, ServerConfig};
//! use tracing::{Level, error, info};
//! use tracing_subscriber::FmtSubscriber;
//!
//! fn main() {
//!     // Initialize logging
//!     let subscriber = FmtSubscriber::builder()
//!         .with_max_level(Level::INFO)
//!         .finish();
//!     tracing::subscriber::set_global_default(subscriber)
//!         .expect("setting default subscriber failed");
//!
//!     let mut server = Server::new(ServerConfig::default(), make_handler(hello_world))
//!         .expect("failed to create server");
//!
//!     info!(port = 8080, "start listening");
//!     if let Err(e) = server.listen_on_port(8080) {
//!         error!(cause = %e, "bind server error");
//!         return;
//!     }
//!
//!     if let Err(e) = server.run() {
//!         error!(cause = %e, "event loop failed");
//!     }
//! }
//!
//! fn hello_world(exchange: &mut Exchange<'_>) {
//!     let request = exchange.request();
//!     info!("request path {}", request.path().unwrap_or("/"));
//!
//!     let body = "Hello World!\r\n";
//!     let written = exchange
//!         .write_status(200, "OK")
//!         .and_then(|()| exchange.write_header("Content-Length", &body.len().to_string()))
//!         .and_then(|()| exchange.write_body(body.as_bytes()))
//!         .and_then(|()| exchange.release());
//!     if let Err(e) = written {
//!         error!(cause = %e, "failed to write response");
//!     }
//! }
//! ```
//!
//! # Architecture
//!
//! The crate is organized into several key modules:
//!
//! - [`server`]: listener, connection pool and event loop
//! - [`connection`]: the per-connection state machine and [`Exchange`]
//! - [`codec`]: incremental request parsing and response buffering
//! - [`protocol`]: request views, entries and error types
//! - [`handler`]: the [`Handler`](handler::Handler) trait
//!
//! # Request Lifetime
//!
//! A request is dispatched once its head and `Content-Length` body are
//! buffered. A body larger than the read buffer is dispatched early and the
//! rest is read through [`Exchange::read_body`], with
//! [`Handler::body_readable`](handler::Handler::body_readable) signalling
//! when more of it arrives. A connection whose body was not read to the end
//! is closed after the response, even with keep-alive. All request views borrow the
//! connection's read buffer and cannot outlive the handler call; use
//! [`Entry::to_owned_entry`](protocol::Entry::to_owned_entry) to keep values.
//!
//! # Limitations
//!
//! - No pipelining: bytes past the declared body close the connection
//! - No chunked request bodies
//! - No framing added to responses: the application writes every header
//! - No TLS support

pub mod codec;
pub mod connection;
pub mod handler;
pub mod protocol;
pub mod server;

mod reactor;
mod utils;
pub(crate) use utils::ensure;

pub use connection::Exchange;
pub use server::{Responder, Server, ServerConfig, ShutdownHandle};
