use codestage_common::protocol::error::{CodestageError, Result};
use codestage_common::protocol::{CallRequest, Command, Response};
use codestage_common::transport::{write_command, ResponseReader};
use serde_json::Value;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

/// Codestage client
///
/// Holds a single connection for its whole lifetime. Staged and committed
/// programs belong to that connection, so a client that reconnects starts
/// over with nothing staged.
///
/// # Example
///
/// ```no_run
/// use codestage_client::CodestageClient;
///
/// # async fn example() -> codestage_common::Result<()> {
/// let mut client = CodestageClient::connect("127.0.0.1:4000").await?;
/// client.parse(b"function hello() { return 'Hello, world!'; }").await?;
/// client.commit().await?;
/// let output = client.call("hello", 4096).await?;
/// assert_eq!(output, b"Hello, world!");
/// client.quit().await?;
/// # Ok(())
/// # }
/// ```
pub struct CodestageClient {
    addr: String,
    reader: ResponseReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl CodestageClient {
    /// Connects to a Codestage server.
    pub async fn connect(addr: impl Into<String>) -> Result<Self> {
        let addr = addr.into();
        let stream = TcpStream::connect(&addr)
            .await
            .map_err(|e| CodestageError::Connection(format!("Failed to connect to {}: {}", addr, e)))?;
        stream
            .set_nodelay(true)
            .map_err(|e| CodestageError::Connection(format!("Failed to set TCP_NODELAY: {}", e)))?;

        tracing::debug!("Connected to {}", addr);

        let (read_half, writer) = stream.into_split();
        Ok(Self {
            addr,
            reader: ResponseReader::new(read_half),
            writer,
        })
    }

    /// Address this client was connected to.
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Sends one command and waits for its reply.
    ///
    /// Error replies are returned as `Ok(Response)`; only transport failures
    /// are errors here.
    pub async fn send(&mut self, command: &Command) -> Result<Response> {
        tracing::trace!("Sending {}", command.name());
        write_command(&mut self.writer, command).await?;
        self.reader.read_response().await
    }

    /// Stages program text on the server.
    pub async fn parse(&mut self, source: impl Into<Vec<u8>>) -> Result<()> {
        self.request(&Command::Parse {
            source: source.into(),
        })
        .await
        .map(drop)
    }

    /// Makes the staged program the active one.
    pub async fn commit(&mut self) -> Result<()> {
        self.request(&Command::Commit).await.map(drop)
    }

    /// Stages and commits in one step.
    pub async fn load(&mut self, source: impl Into<Vec<u8>>) -> Result<()> {
        self.parse(source).await?;
        self.commit().await
    }

    /// Calls a function of the active program without arguments.
    pub async fn call(&mut self, function: impl Into<String>, capacity: usize) -> Result<Vec<u8>> {
        self.request(&Command::Call(CallRequest::new(function, capacity)))
            .await
    }

    /// Calls a function of the active program with a JSON argument.
    pub async fn call_with_args(
        &mut self,
        function: impl Into<String>,
        capacity: usize,
        args: Value,
    ) -> Result<Vec<u8>> {
        self.request(&Command::Call(CallRequest::new(function, capacity).with_args(args)))
            .await
    }

    /// Fetches the source text of the staged program.
    pub async fn dump(&mut self) -> Result<Vec<u8>> {
        self.request(&Command::Dump).await
    }

    /// Ends the session and closes the connection.
    pub async fn quit(mut self) -> Result<()> {
        self.request(&Command::Quit).await.map(drop)
    }

    async fn request(&mut self, command: &Command) -> Result<Vec<u8>> {
        self.send(command).await?.into_result()
    }
}
