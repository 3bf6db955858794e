//! Codestage Command Types
//!
//! A command is a single text line, optionally followed by a raw payload whose
//! length the line declares. Parsing happens in two steps because the payload
//! length must be known before the payload can be read off the stream:
//!
//! 1. [`CommandLine::parse`] decodes the line itself
//! 2. [`CommandLine::with_payload`] attaches the payload and yields a [`Command`]
//!
//! # Grammar
//!
//! ```text
//! PARSE <n>                          followed by n raw bytes
//! COMMIT
//! CALL <name> <capacity> [<json>]
//! DUMP
//! QUIT
//! ```
//!
//! Command words are case-insensitive and tokens are separated by runs of
//! spaces or tabs.

use serde_json::Value;

use super::error::{CodestageError, Result};

/// Name of a callable entry point inside a committed image.
pub type FunctionName = String;

/// Arguments of a CALL command.
///
/// # Example
///
/// ```
/// use codestage_common::protocol::CallRequest;
/// use serde_json::json;
///
/// let call = CallRequest::new("hello", 4096).with_args(json!({"n": 3}));
/// assert_eq!(call.capacity, 4096);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct CallRequest {
    pub function: FunctionName,
    /// Maximum number of output bytes the caller will accept.
    pub capacity: usize,
    /// Optional JSON argument handed to the function.
    pub args: Option<Value>,
}

impl CallRequest {
    pub fn new(function: impl Into<FunctionName>, capacity: usize) -> Self {
        CallRequest {
            function: function.into(),
            capacity,
            args: None,
        }
    }

    pub fn with_args(mut self, args: Value) -> Self {
        self.args = Some(args);
        self
    }
}

/// A decoded command line, before any payload has been read.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandLine {
    Parse { len: usize },
    Commit,
    Call(CallRequest),
    Dump,
    Quit,
}

impl CommandLine {
    /// Decodes a command line (without its `\n` terminator).
    ///
    /// # Errors
    ///
    /// - `UnknownCommand` if the command word is not recognised
    /// - `MalformedCommand` for an empty line, missing or extra operands, or
    ///   operands that do not parse
    pub fn parse(line: &str) -> Result<Self> {
        let (word, rest) = next_token(line)
            .ok_or_else(|| CodestageError::MalformedCommand("empty command line".into()))?;

        match word.to_ascii_lowercase().as_str() {
            "parse" => {
                let (len, rest) = next_token(rest).ok_or_else(|| {
                    CodestageError::MalformedCommand("PARSE requires a payload length".into())
                })?;
                expect_end(rest, "PARSE")?;
                Ok(CommandLine::Parse {
                    len: parse_number(len, "payload length")?,
                })
            }
            "commit" => {
                expect_end(rest, "COMMIT")?;
                Ok(CommandLine::Commit)
            }
            "call" => {
                let (function, rest) = next_token(rest).ok_or_else(|| {
                    CodestageError::MalformedCommand("CALL requires a function name".into())
                })?;
                let (capacity, rest) = next_token(rest).ok_or_else(|| {
                    CodestageError::MalformedCommand("CALL requires an output capacity".into())
                })?;

                let capacity = parse_number(capacity, "capacity")?;
                let args = rest.trim_matches(is_separator);
                let args = if args.is_empty() {
                    None
                } else {
                    Some(serde_json::from_str(args).map_err(|e| {
                        CodestageError::MalformedCommand(format!("CALL arguments are not valid JSON: {}", e))
                    })?)
                };

                Ok(CommandLine::Call(CallRequest {
                    function: function.to_string(),
                    capacity,
                    args,
                }))
            }
            "dump" => {
                expect_end(rest, "DUMP")?;
                Ok(CommandLine::Dump)
            }
            "quit" => {
                expect_end(rest, "QUIT")?;
                Ok(CommandLine::Quit)
            }
            _ => Err(CodestageError::UnknownCommand(word.to_string())),
        }
    }

    /// Number of raw bytes that follow this line on the wire.
    pub fn payload_len(&self) -> usize {
        match self {
            CommandLine::Parse { len } => *len,
            _ => 0,
        }
    }

    /// Completes the command with the payload read off the stream.
    ///
    /// The payload must be exactly [`payload_len`](Self::payload_len) bytes;
    /// the codec guarantees this before calling.
    pub fn with_payload(self, payload: Vec<u8>) -> Command {
        debug_assert_eq!(payload.len(), self.payload_len());
        match self {
            CommandLine::Parse { .. } => Command::Parse { source: payload },
            CommandLine::Commit => Command::Commit,
            CommandLine::Call(call) => Command::Call(call),
            CommandLine::Dump => Command::Dump,
            CommandLine::Quit => Command::Quit,
        }
    }
}

/// A complete command, payload included.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Parse { source: Vec<u8> },
    Commit,
    Call(CallRequest),
    Dump,
    Quit,
}

impl Command {
    /// Upper-case command word, as written on the wire.
    pub fn name(&self) -> &'static str {
        match self {
            Command::Parse { .. } => "PARSE",
            Command::Commit => "COMMIT",
            Command::Call(_) => "CALL",
            Command::Dump => "DUMP",
            Command::Quit => "QUIT",
        }
    }

    /// Encodes the command line and payload as they travel on the wire.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut buf = match self {
            Command::Parse { source } => format!("PARSE {}\n", source.len()).into_bytes(),
            Command::Call(call) => {
                let mut line = format!("CALL {} {}", call.function, call.capacity);
                if let Some(args) = &call.args {
                    line.push(' ');
                    line.push_str(&serde_json::to_string(args)?);
                }
                line.push('\n');
                line.into_bytes()
            }
            other => format!("{}\n", other.name()).into_bytes(),
        };

        if let Command::Parse { source } = self {
            buf.extend_from_slice(source);
        }

        Ok(buf)
    }
}

fn is_separator(c: char) -> bool {
    c == ' ' || c == '\t'
}

/// Splits off the next separator-delimited token.
fn next_token(s: &str) -> Option<(&str, &str)> {
    let s = s.trim_start_matches(is_separator);
    if s.is_empty() {
        return None;
    }
    let end = s.find(is_separator).unwrap_or(s.len());
    Some((&s[..end], &s[end..]))
}

fn expect_end(rest: &str, command: &str) -> Result<()> {
    match next_token(rest) {
        None => Ok(()),
        Some((extra, _)) => Err(CodestageError::MalformedCommand(format!(
            "unexpected operand '{}' after {}",
            extra, command
        ))),
    }
}

fn parse_number(token: &str, what: &str) -> Result<usize> {
    token
        .parse::<usize>()
        .map_err(|_| CodestageError::MalformedCommand(format!("invalid {} '{}'", what, token)))
}
