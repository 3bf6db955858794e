use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error category carried on the wire in `ERROR` replies.
///
/// The textual form is the first token of an error payload
/// (`<kind>: <message>`), so clients can branch on it without parsing the
/// human-readable message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The byte stream can no longer be trusted; the connection is closed.
    Framing,
    /// A request exceeded a configured bound that does not affect framing.
    Limit,
    /// The submitted program failed to parse or initialize.
    Compile,
    /// Nothing was staged when a staged image was required.
    Commit,
    /// The requested function is not part of the active image.
    Lookup,
    /// The function threw or ran out of its execution budget.
    Execution,
    /// The function did not finish within the configured wall-clock limit.
    Timeout,
    /// The output did not fit the requested capacity under the reject policy.
    Overflow,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Framing => "framing",
            ErrorKind::Limit => "limit",
            ErrorKind::Compile => "compile",
            ErrorKind::Commit => "commit",
            ErrorKind::Lookup => "lookup",
            ErrorKind::Execution => "execution",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Overflow => "overflow",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ErrorKind {
    type Err = CodestageError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "framing" => Ok(ErrorKind::Framing),
            "limit" => Ok(ErrorKind::Limit),
            "compile" => Ok(ErrorKind::Compile),
            "commit" => Ok(ErrorKind::Commit),
            "lookup" => Ok(ErrorKind::Lookup),
            "execution" => Ok(ErrorKind::Execution),
            "timeout" => Ok(ErrorKind::Timeout),
            "overflow" => Ok(ErrorKind::Overflow),
            other => Err(CodestageError::InvalidResponse(format!(
                "unknown error kind '{}'",
                other
            ))),
        }
    }
}

#[derive(Error, Debug)]
pub enum CodestageError {
    #[error("malformed command: {0}")]
    MalformedCommand(String),

    #[error("unknown command '{0}'")]
    UnknownCommand(String),

    #[error("command line exceeds {max} bytes")]
    LineTooLong { max: usize },

    #[error("declared payload of {declared} bytes exceeds maximum of {max} bytes")]
    PayloadTooLarge { declared: usize, max: usize },

    #[error("connection closed after {received} of {expected} payload bytes")]
    PayloadTruncated { expected: usize, received: usize },

    #[error("connection closed in the middle of a command line")]
    IncompleteLine,

    #[error("requested capacity {requested} exceeds maximum of {max} bytes")]
    CapacityTooLarge { requested: usize, max: usize },

    #[error("{0}")]
    Compile(String),

    #[error("nothing staged")]
    NothingStaged,

    #[error("no committed image")]
    NoActiveImage,

    #[error("unknown function '{0}'")]
    UnknownFunction(String),

    #[error("{0}")]
    Execution(String),

    #[error("resource limit exceeded: {0}")]
    BudgetExceeded(String),

    #[error("execution timed out after {0}ms")]
    Timeout(u64),

    #[error("output exceeds capacity of {capacity} bytes")]
    OutputOverflow { capacity: usize },

    #[error("{kind}: {message}")]
    Remote { kind: ErrorKind, message: String },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CodestageError {
    /// Wire category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            CodestageError::MalformedCommand(_)
            | CodestageError::UnknownCommand(_)
            | CodestageError::LineTooLong { .. }
            | CodestageError::PayloadTooLarge { .. }
            | CodestageError::PayloadTruncated { .. }
            | CodestageError::IncompleteLine
            | CodestageError::InvalidResponse(_)
            | CodestageError::Connection(_)
            | CodestageError::Io(_) => ErrorKind::Framing,
            // Config errors never reach the wire; they stop the server from starting.
            CodestageError::CapacityTooLarge { .. } | CodestageError::Config(_) => ErrorKind::Limit,
            CodestageError::Compile(_) => ErrorKind::Compile,
            CodestageError::NothingStaged => ErrorKind::Commit,
            CodestageError::NoActiveImage | CodestageError::UnknownFunction(_) => ErrorKind::Lookup,
            CodestageError::Execution(_)
            | CodestageError::BudgetExceeded(_)
            | CodestageError::Json(_) => ErrorKind::Execution,
            CodestageError::Timeout(_) => ErrorKind::Timeout,
            CodestageError::OutputOverflow { .. } => ErrorKind::Overflow,
            CodestageError::Remote { kind, .. } => *kind,
        }
    }

    /// Whether the connection must be torn down after reporting this error.
    ///
    /// Only framing failures are fatal: once the stream position is unknown
    /// there is no way to find the start of the next command.
    pub fn is_fatal(&self) -> bool {
        self.kind() == ErrorKind::Framing
    }
}

pub type Result<T> = std::result::Result<T, CodestageError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_round_trips_through_text() {
        for kind in [
            ErrorKind::Framing,
            ErrorKind::Limit,
            ErrorKind::Compile,
            ErrorKind::Commit,
            ErrorKind::Lookup,
            ErrorKind::Execution,
            ErrorKind::Timeout,
            ErrorKind::Overflow,
        ] {
            assert_eq!(kind.as_str().parse::<ErrorKind>().unwrap(), kind);
        }
    }

    #[test]
    fn test_unknown_kind_is_rejected() {
        assert!("fatal".parse::<ErrorKind>().is_err());
    }

    #[test]
    fn test_only_framing_errors_are_fatal() {
        assert!(CodestageError::UnknownCommand("LINK".into()).is_fatal());
        assert!(CodestageError::PayloadTruncated { expected: 10, received: 3 }.is_fatal());
        assert!(CodestageError::PayloadTooLarge { declared: 10, max: 5 }.is_fatal());

        assert!(!CodestageError::CapacityTooLarge { requested: 10, max: 5 }.is_fatal());
        assert!(!CodestageError::Compile("bad".into()).is_fatal());
        assert!(!CodestageError::NothingStaged.is_fatal());
        assert!(!CodestageError::UnknownFunction("f".into()).is_fatal());
        assert!(!CodestageError::Timeout(100).is_fatal());
    }

    #[test]
    fn test_lookup_covers_missing_image() {
        assert_eq!(CodestageError::NoActiveImage.kind(), ErrorKind::Lookup);
        assert_eq!(CodestageError::UnknownFunction("x".into()).kind(), ErrorKind::Lookup);
    }

    #[test]
    fn test_remote_error_keeps_kind() {
        let err = CodestageError::Remote {
            kind: ErrorKind::Compile,
            message: "unexpected token".into(),
        };
        assert_eq!(err.kind(), ErrorKind::Compile);
        assert_eq!(err.to_string(), "compile: unexpected token");
    }
}
