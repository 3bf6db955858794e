//! Codestage Common Types and Transport
//!
//! This crate provides the wire protocol definitions and the framing layer
//! shared by the codestage server and client.
//!
//! # Overview
//!
//! Codestage is a per-connection program staging and execution service. A
//! client submits program text (`PARSE`), promotes it to the connection's
//! active image (`COMMIT`), invokes functions from that image with a bounded
//! output buffer (`CALL`), and ends the session (`QUIT`).
//!
//! - **Protocol Layer**: commands, responses, and the error taxonomy
//! - **Transport Layer**: line-plus-payload framing and the TCP accept loop
//!
//! # Example
//!
//! ```
//! use codestage_common::{CallRequest, Command, CommandLine};
//!
//! let line = CommandLine::parse("CALL hello 4096").unwrap();
//! assert_eq!(line.with_payload(Vec::new()), Command::Call(CallRequest::new("hello", 4096)));
//! ```

pub mod protocol;
pub mod transport;

pub use protocol::*;
