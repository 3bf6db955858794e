//! Codestage Response Types
//!
//! Every reply uses the same envelope, whether it reports success or failure:
//!
//! ```text
//! <STATUS> <payload-length>\n<payload bytes>
//! ```
//!
//! `STATUS` is `OK` or `ERROR`. Error payloads are UTF-8 text of the form
//! `<kind>: <message>`, so a single generic framer handles both.

use std::fmt;

use super::error::{CodestageError, ErrorKind, Result};

/// Leading token of a response status line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    Error,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Ok => "OK",
            Status::Error => "ERROR",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A framed reply from the server.
///
/// # Example
///
/// ```
/// use codestage_common::protocol::{ErrorKind, Response};
///
/// let ok = Response::ok_with(b"hi".to_vec());
/// assert_eq!(ok.encode(), b"OK 2\nhi");
///
/// let err = Response::error(ErrorKind::Commit, "nothing staged");
/// assert_eq!(err.encode(), b"ERROR 22\ncommit: nothing staged");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: Status,
    pub payload: Vec<u8>,
}

impl Response {
    /// Success without payload (`OK 0`).
    pub fn ok() -> Self {
        Response {
            status: Status::Ok,
            payload: Vec::new(),
        }
    }

    /// Success carrying `payload`.
    pub fn ok_with(payload: Vec<u8>) -> Self {
        Response {
            status: Status::Ok,
            payload,
        }
    }

    /// Failure of the given kind.
    pub fn error(kind: ErrorKind, message: impl fmt::Display) -> Self {
        Response {
            status: Status::Error,
            payload: format!("{}: {}", kind, message).into_bytes(),
        }
    }

    /// Failure describing `err`, categorised by [`CodestageError::kind`].
    pub fn from_error(err: &CodestageError) -> Self {
        match err {
            // Already carries its kind; avoid "kind: kind: message".
            CodestageError::Remote { kind, message } => Response::error(*kind, message),
            other => Response::error(other.kind(), other),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == Status::Ok
    }

    /// Encodes status line and payload into one buffer.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = format!("{} {}\n", self.status, self.payload.len()).into_bytes();
        buf.extend_from_slice(&self.payload);
        buf
    }

    /// Decodes a status line (without its `\n` terminator).
    pub fn parse_status_line(line: &str) -> Result<(Status, usize)> {
        let mut parts = line.split_whitespace();
        let status = match parts.next() {
            Some("OK") => Status::Ok,
            Some("ERROR") => Status::Error,
            Some(other) => {
                return Err(CodestageError::InvalidResponse(format!(
                    "unknown status '{}'",
                    other
                )))
            }
            None => return Err(CodestageError::InvalidResponse("empty status line".into())),
        };

        let len = parts
            .next()
            .and_then(|n| n.parse::<usize>().ok())
            .ok_or_else(|| {
                CodestageError::InvalidResponse(format!("invalid status line '{}'", line))
            })?;

        if parts.next().is_some() {
            return Err(CodestageError::InvalidResponse(format!(
                "trailing data in status line '{}'",
                line
            )));
        }

        Ok((status, len))
    }

    /// Converts an error reply into [`CodestageError::Remote`].
    pub fn into_result(self) -> Result<Vec<u8>> {
        match self.status {
            Status::Ok => Ok(self.payload),
            Status::Error => {
                let text = String::from_utf8_lossy(&self.payload);
                let (kind, message) = text.split_once(": ").ok_or_else(|| {
                    CodestageError::InvalidResponse(format!("malformed error payload '{}'", text))
                })?;
                Err(CodestageError::Remote {
                    kind: kind.parse()?,
                    message: message.to_string(),
                })
            }
        }
    }
}
