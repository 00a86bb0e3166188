//! Byte-level request and response handling.
//!
//! - [`ParserBridge`]: feeds the read buffer to the request head parser and
//!   records every parsed element as a range into that buffer
//! - [`ResponseBuffer`]: accumulates the status line, headers and body the
//!   application writes, in wire order, until the socket takes them

mod parser_bridge;
mod response_buffer;

pub use parser_bridge::{ParseStatus, ParserBridge};
pub use response_buffer::{ResponseBuffer, ResponsePhase};
