//! Codestage Transport Layer
//!
//! This module provides the framing codec and the TCP accept loop.
//!
//! # Wire Format
//!
//! Requests are text lines, optionally followed by a raw payload whose
//! length the line declares:
//!
//! ```text
//! PARSE 37\n<37 bytes>
//! CALL hello 4096\n
//! ```
//!
//! Responses always carry a status line and a length-prefixed payload:
//!
//! ```text
//! OK 5\nhello
//! ERROR 22\ncommit: nothing staged
//! ```
//!
//! # Components
//!
//! - **[`CommandReader`]** / **[`write_response`]**: server side of the codec
//! - **[`ResponseReader`]** / **[`write_command`]**: client side of the codec
//! - **[`TcpServer`]**: async accept loop with a connection limit
//!
//! # Size Limits
//!
//! Command lines and declared payloads are bounded by [`FrameLimits`];
//! oversized declarations are rejected before any payload byte is read.

pub mod codec;
pub mod tcp_server;

pub use codec::{
    write_command, write_response, CommandReader, FrameLimits, ResponseReader,
    DEFAULT_MAX_LINE_BYTES, DEFAULT_MAX_PAYLOAD_BYTES,
};
pub use tcp_server::{TcpServer, DEFAULT_MAX_CONNECTIONS};
