//! Protocol value types shared between the engine and the application.
//!
//! - **Entries** ([`Entry`], [`EntryKind`], [`OwnedEntry`]): parsed headers and
//!   request-line elements, viewed in place inside the read buffer
//! - **Requests** ([`Request`]): the borrowed view handed to the application
//!   at dispatch time
//! - **Identity** ([`ConnectionId`], [`PeerAddr`]): who is on the other end and
//!   which request/response cycle an operation belongs to
//! - **Errors** ([`ListenError`], [`AcceptError`], [`ParseError`],
//!   [`ProtocolError`], [`ConnectionError`], [`ConfigError`])

mod entry;
pub(crate) use entry::EntryIndex;
pub use entry::Entry;
pub use entry::EntryKind;
pub use entry::OwnedEntry;

mod request;
pub use request::Request;

mod peer;
pub use peer::ConnectionId;
pub use peer::PeerAddr;

mod error;
pub use error::AcceptError;
pub use error::ConfigError;
pub use error::ConnectionError;
pub use error::ListenError;
pub use error::ParseError;
pub use error::ProtocolError;
