use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use crate::protocol::error::{CodestageError, Result};
use crate::protocol::{Command, CommandLine, Response, Status};

/// Default maximum length of a command line, terminator excluded (64 KiB)
pub const DEFAULT_MAX_LINE_BYTES: usize = 64 * 1024;

/// Default maximum declared PARSE payload (16 MB)
pub const DEFAULT_MAX_PAYLOAD_BYTES: usize = 16 * 1024 * 1024;

/// Status lines are tiny; anything longer is not a codestage server.
const MAX_STATUS_LINE_BYTES: usize = 64;

/// Bounds applied while decoding commands.
///
/// Both limits are checked before any memory is committed to the offending
/// line or payload, so a hostile peer cannot make the server allocate more
/// than these sizes per connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameLimits {
    pub max_line_bytes: usize,
    pub max_payload_bytes: usize,
}

impl Default for FrameLimits {
    fn default() -> Self {
        Self {
            max_line_bytes: DEFAULT_MAX_LINE_BYTES,
            max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
        }
    }
}

/// Decodes commands from the server's side of a connection.
///
/// Each call to [`read_command`](Self::read_command) yields one complete
/// command (line plus payload) no matter how the bytes were split across
/// transport reads. Any error it returns leaves the stream position
/// undefined; callers must stop reading afterwards.
///
/// # Example
///
/// ```
/// use codestage_common::protocol::Command;
/// use codestage_common::transport::{CommandReader, FrameLimits};
///
/// # #[tokio::main]
/// # async fn main() -> codestage_common::Result<()> {
/// let wire: &[u8] = b"PARSE 3\nabcCOMMIT\n";
/// let mut reader = CommandReader::new(wire, FrameLimits::default());
///
/// assert_eq!(reader.read_command().await?, Some(Command::Parse { source: b"abc".to_vec() }));
/// assert_eq!(reader.read_command().await?, Some(Command::Commit));
/// assert_eq!(reader.read_command().await?, None);
/// # Ok(())
/// # }
/// ```
pub struct CommandReader<R> {
    inner: BufReader<R>,
    limits: FrameLimits,
    line: Vec<u8>,
}

impl<R: AsyncRead + Unpin> CommandReader<R> {
    pub fn new(reader: R, limits: FrameLimits) -> Self {
        Self {
            inner: BufReader::new(reader),
            limits,
            line: Vec::new(),
        }
    }

    /// Reads the next command.
    ///
    /// Returns `Ok(None)` when the peer closed the stream exactly at a command
    /// boundary.
    ///
    /// # Errors
    ///
    /// - `LineTooLong` / `IncompleteLine` / `MalformedCommand` /
    ///   `UnknownCommand` for a bad command line
    /// - `PayloadTooLarge` if the declared payload exceeds the limit; no
    ///   payload byte is read in that case
    /// - `PayloadTruncated` if the stream ends before the declared payload
    pub async fn read_command(&mut self) -> Result<Option<Command>> {
        let line = match read_line(&mut self.inner, &mut self.line, self.limits.max_line_bytes).await? {
            Some(line) => line,
            None => return Ok(None),
        };

        let line = std::str::from_utf8(line).map_err(|_| {
            CodestageError::MalformedCommand("command line is not valid UTF-8".into())
        })?;
        let header = CommandLine::parse(line)?;

        let len = header.payload_len();
        if len > self.limits.max_payload_bytes {
            return Err(CodestageError::PayloadTooLarge {
                declared: len,
                max: self.limits.max_payload_bytes,
            });
        }

        let payload = read_payload(&mut self.inner, len).await?;
        Ok(Some(header.with_payload(payload)))
    }
}

/// Decodes responses on the client's side of a connection.
pub struct ResponseReader<R> {
    inner: BufReader<R>,
    line: Vec<u8>,
}

impl<R: AsyncRead + Unpin> ResponseReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            inner: BufReader::new(reader),
            line: Vec::new(),
        }
    }

    /// Reads the next response, payload included.
    ///
    /// # Errors
    ///
    /// - `Connection` if the server closed the stream before a status line
    /// - `InvalidResponse` for a malformed status line
    /// - `PayloadTruncated` if the stream ends inside the payload
    pub async fn read_response(&mut self) -> Result<Response> {
        let line = read_line(&mut self.inner, &mut self.line, MAX_STATUS_LINE_BYTES)
            .await?
            .ok_or_else(|| CodestageError::Connection("connection closed by server".into()))?;

        let line = std::str::from_utf8(line)
            .map_err(|_| CodestageError::InvalidResponse("status line is not valid UTF-8".into()))?;
        let (status, len): (Status, usize) = Response::parse_status_line(line)?;

        let payload = read_payload(&mut self.inner, len).await?;
        Ok(Response { status, payload })
    }
}

/// Writes a response as one buffer and flushes it.
pub async fn write_response<W: AsyncWrite + Unpin>(writer: &mut W, response: &Response) -> Result<()> {
    write_frame(writer, &response.encode(), "writing response").await
}

/// Writes a command (line and payload) and flushes it.
pub async fn write_command<W: AsyncWrite + Unpin>(writer: &mut W, command: &Command) -> Result<()> {
    write_frame(writer, &command.encode()?, "writing command").await
}

async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, frame: &[u8], context: &str) -> Result<()> {
    writer
        .write_all(frame)
        .await
        .map_err(|e| map_io_error(e, context))?;
    writer
        .flush()
        .await
        .map_err(|e| map_io_error(e, context))?;
    Ok(())
}

/// Reads one `\n`-terminated line of at most `max` bytes into `buf`.
///
/// The terminator and an optional preceding `\r` are stripped. `Ok(None)`
/// means end of stream before any byte of the line.
async fn read_line<'a, R: AsyncRead + Unpin>(
    reader: &mut BufReader<R>,
    buf: &'a mut Vec<u8>,
    max: usize,
) -> Result<Option<&'a [u8]>> {
    buf.clear();

    // One byte of slack for the terminator itself.
    let limit = max.saturating_add(1) as u64;
    let n = (&mut *reader)
        .take(limit)
        .read_until(b'\n', buf)
        .await
        .map_err(|e| map_io_error(e, "reading command line"))?;

    if n == 0 {
        return Ok(None);
    }

    if buf.last() != Some(&b'\n') {
        return if buf.len() > max {
            Err(CodestageError::LineTooLong { max })
        } else {
            Err(CodestageError::IncompleteLine)
        };
    }

    buf.pop();
    if buf.last() == Some(&b'\r') {
        buf.pop();
    }

    Ok(Some(buf.as_slice()))
}

/// Reads exactly `len` bytes, however many reads it takes.
async fn read_payload<R: AsyncRead + Unpin>(reader: &mut R, len: usize) -> Result<Vec<u8>> {
    let mut payload = vec![0u8; len];
    let mut received = 0;

    while received < len {
        let n = reader
            .read(&mut payload[received..])
            .await
            .map_err(|e| map_io_error(e, "reading payload"))?;
        if n == 0 {
            return Err(CodestageError::PayloadTruncated {
                expected: len,
                received,
            });
        }
        received += n;
    }

    Ok(payload)
}

/// Map IO errors to appropriate CodestageError variants
///
/// Resets and aborts become `Connection` errors with the failing step as
/// context; everything else is kept as `Io`.
fn map_io_error(err: std::io::Error, context: &str) -> CodestageError {
    match err.kind() {
        std::io::ErrorKind::ConnectionReset
        | std::io::ErrorKind::ConnectionAborted
        | std::io::ErrorKind::BrokenPipe
        | std::io::ErrorKind::NotConnected => {
            CodestageError::Connection(format!("{}: connection lost", context))
        }
        _ => CodestageError::Io(err),
    }
}
