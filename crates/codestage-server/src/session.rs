//! One client connection.
//!
//! A session reads commands strictly in order and answers each one before
//! reading the next, so replies always match the order of requests. It owns
//! the connection's [`ProgramStore`]; nothing in it is visible to other
//! connections.

use std::sync::Arc;

use codestage_common::protocol::{
    error::{CodestageError, Result},
    CallRequest, Command, Response,
};
use codestage_common::transport::{write_response, CommandReader};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};

use crate::config::ServerConfig;
use crate::runtime::Engine;
use crate::store::ProgramStore;

pub struct Session<S> {
    reader: CommandReader<ReadHalf<S>>,
    writer: WriteHalf<S>,
    store: ProgramStore,
    engine: Arc<Engine>,
    max_capacity: usize,
    peer: String,
}

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite,
{
    pub fn new(stream: S, engine: Arc<Engine>, config: &ServerConfig, peer: impl Into<String>) -> Self {
        let (read_half, writer) = tokio::io::split(stream);
        Self {
            reader: CommandReader::new(read_half, config.frame_limits()),
            writer,
            store: ProgramStore::new(),
            engine,
            max_capacity: config.max_capacity,
            peer: peer.into(),
        }
    }

    /// Serves commands until QUIT, end of stream, or a fatal error.
    ///
    /// A fatal error is reported to the peer (best effort) before the
    /// connection is closed, and then returned.
    pub async fn run(mut self) -> Result<()> {
        loop {
            let command = match self.reader.read_command().await {
                Ok(Some(command)) => command,
                Ok(None) => {
                    tracing::debug!("[{}] Peer closed the connection", self.peer);
                    return Ok(());
                }
                Err(e) => return self.abort(e).await,
            };

            if command == Command::Quit {
                tracing::debug!("[{}] QUIT", self.peer);
                write_response(&mut self.writer, &Response::ok()).await?;
                self.writer.shutdown().await?;
                return Ok(());
            }

            let name = command.name();
            let response = match self.dispatch(command).await {
                Ok(response) => response,
                Err(e) if e.is_fatal() => return self.abort(e).await,
                Err(e) => {
                    tracing::debug!("[{}] {} failed: {}", self.peer, name, e);
                    Response::from_error(&e)
                }
            };

            write_response(&mut self.writer, &response).await?;
        }
    }

    async fn dispatch(&mut self, command: Command) -> Result<Response> {
        match command {
            Command::Parse { source } => {
                tracing::debug!("[{}] PARSE {} bytes", self.peer, source.len());
                let compiled = self.engine.compile(source).await;
                let image = self.store.stage(compiled)?;
                tracing::debug!("[{}] Staged image with {} functions", self.peer, image.len());
                for entry in image.functions() {
                    tracing::trace!(
                        "[{}]   {}/{} ({:?})",
                        self.peer,
                        entry.name,
                        entry.arity,
                        entry.binding
                    );
                }
                Ok(Response::ok())
            }
            Command::Commit => {
                let image = self.store.commit()?;
                tracing::debug!("[{}] Committed image with {} functions", self.peer, image.len());
                Ok(Response::ok())
            }
            Command::Call(call) => self.call(call).await,
            Command::Dump => {
                let image = self.store.pending().ok_or(CodestageError::NothingStaged)?;
                Ok(Response::ok_with(image.source().as_bytes().to_vec()))
            }
            // Answered by the loop before dispatch.
            Command::Quit => Ok(Response::ok()),
        }
    }

    async fn call(&mut self, call: CallRequest) -> Result<Response> {
        tracing::debug!("[{}] CALL {} {}", self.peer, call.function, call.capacity);

        if call.capacity > self.max_capacity {
            return Err(CodestageError::CapacityTooLarge {
                requested: call.capacity,
                max: self.max_capacity,
            });
        }

        let image = self.store.require_active()?;
        let outcome = self.engine.call(image, call).await?;
        if outcome.truncated {
            tracing::debug!(
                "[{}] Output truncated from {} to {} bytes",
                self.peer,
                outcome.produced,
                outcome.payload.len()
            );
        }

        Ok(Response::ok_with(outcome.payload))
    }

    async fn abort(mut self, err: CodestageError) -> Result<()> {
        tracing::warn!("[{}] Closing connection: {}", self.peer, err);
        // The peer may already be gone; the original error is what matters.
        let _ = write_response(&mut self.writer, &Response::from_error(&err)).await;
        let _ = self.writer.shutdown().await;
        Err(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource_limits::ResourceLimits;
    use crate::runtime::{Backend, BoaBackend, OutputBuffer, OverflowPolicy, ProgramImage};
    use std::time::Duration;
    use codestage_common::protocol::{ErrorKind, Status};
    use codestage_common::transport::ResponseReader;
    use tokio::io::{AsyncReadExt, DuplexStream};

    const HELLO: &[u8] = b"function hello() { return 'Hello'; }";

    fn spawn_session(config: ServerConfig) -> (DuplexStream, tokio::task::JoinHandle<Result<()>>) {
        let engine = Engine::new(config.limits.clone()).with_overflow_policy(config.overflow_policy);
        spawn_session_with(config, engine)
    }

    fn spawn_session_with(
        config: ServerConfig,
        engine: Engine,
    ) -> (DuplexStream, tokio::task::JoinHandle<Result<()>>) {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let session = Session::new(server, Arc::new(engine), &config, "test-peer");
        (client, tokio::spawn(session.run()))
    }

    /// Sends raw request bytes and reads `n` replies.
    async fn exchange(client: &mut DuplexStream, request: &[u8], n: usize) -> Vec<Response> {
        client.write_all(request).await.unwrap();
        let mut reader = ResponseReader::new(client);
        let mut responses = Vec::new();
        for _ in 0..n {
            responses.push(reader.read_response().await.unwrap());
        }
        responses
    }

    fn parse_request(source: &[u8]) -> Vec<u8> {
        let mut request = format!("PARSE {}\n", source.len()).into_bytes();
        request.extend_from_slice(source);
        request
    }

    fn error_kind(response: &Response) -> ErrorKind {
        match response.clone().into_result() {
            Err(CodestageError::Remote { kind, .. }) => kind,
            other => panic!("expected error reply, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_parse_commit_call_quit() {
        let (mut client, handle) = spawn_session(ServerConfig::default());

        let mut request = parse_request(HELLO);
        request.extend_from_slice(b"COMMIT\nCALL hello 4096\nQUIT\n");
        let responses = exchange(&mut client, &request, 4).await;

        assert_eq!(responses[0], Response::ok());
        assert_eq!(responses[1], Response::ok());
        assert_eq!(responses[2], Response::ok_with(b"Hello".to_vec()));
        assert_eq!(responses[3], Response::ok());

        let mut rest = Vec::new();
        client.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_commit_before_parse_is_reported() {
        let (mut client, _handle) = spawn_session(ServerConfig::default());

        let responses = exchange(&mut client, b"COMMIT\n", 1).await;
        assert_eq!(error_kind(&responses[0]), ErrorKind::Commit);
    }

    #[tokio::test]
    async fn test_call_before_commit_is_lookup_error() {
        let (mut client, _handle) = spawn_session(ServerConfig::default());

        let mut request = parse_request(HELLO);
        request.extend_from_slice(b"CALL hello 16\n");
        let responses = exchange(&mut client, &request, 2).await;

        assert!(responses[0].is_ok());
        assert_eq!(error_kind(&responses[1]), ErrorKind::Lookup);
    }

    #[tokio::test]
    async fn test_capacity_above_maximum_is_not_fatal() {
        let (mut client, _handle) = spawn_session(ServerConfig::default().with_max_capacity(8));

        let mut request = parse_request(HELLO);
        request.extend_from_slice(b"COMMIT\nCALL hello 9\nCALL hello 8\n");
        let responses = exchange(&mut client, &request, 4).await;

        assert_eq!(error_kind(&responses[2]), ErrorKind::Limit);
        assert_eq!(responses[3], Response::ok_with(b"Hello".to_vec()));
    }

    #[tokio::test]
    async fn test_overflow_reject_policy() {
        let config = ServerConfig::default().with_overflow_policy(OverflowPolicy::Reject);
        let (mut client, _handle) = spawn_session(config);

        let mut request = parse_request(HELLO);
        request.extend_from_slice(b"COMMIT\nCALL hello 2\n");
        let responses = exchange(&mut client, &request, 3).await;

        assert_eq!(error_kind(&responses[2]), ErrorKind::Overflow);
    }

    #[tokio::test]
    async fn test_dump_returns_pending_source() {
        let (mut client, _handle) = spawn_session(ServerConfig::default());

        let responses = exchange(&mut client, b"DUMP\n", 1).await;
        assert_eq!(error_kind(&responses[0]), ErrorKind::Commit);

        let mut request = parse_request(HELLO);
        request.extend_from_slice(b"DUMP\nCOMMIT\nDUMP\n");
        let responses = exchange(&mut client, &request, 4).await;

        assert_eq!(responses[1], Response::ok_with(HELLO.to_vec()));
        assert_eq!(error_kind(&responses[3]), ErrorKind::Commit);
    }

    #[tokio::test]
    async fn test_unknown_command_closes_connection() {
        let (mut client, handle) = spawn_session(ServerConfig::default());

        let responses = exchange(&mut client, b"LINK\n", 1).await;
        assert_eq!(responses[0].status, Status::Error);
        assert_eq!(error_kind(&responses[0]), ErrorKind::Framing);

        let mut rest = Vec::new();
        client.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
        assert!(matches!(
            handle.await.unwrap(),
            Err(CodestageError::UnknownCommand(_))
        ));
    }

    #[tokio::test]
    async fn test_oversized_payload_is_fatal_without_reading_it() {
        let (mut client, handle) =
            spawn_session(ServerConfig::default().with_max_payload_bytes(16));

        let responses = exchange(&mut client, b"PARSE 17\n", 1).await;
        assert_eq!(error_kind(&responses[0]), ErrorKind::Framing);
        assert!(matches!(
            handle.await.unwrap(),
            Err(CodestageError::PayloadTooLarge { declared: 17, max: 16 })
        ));
    }

    #[tokio::test]
    async fn test_short_payload_is_fatal() {
        let (mut client, handle) = spawn_session(ServerConfig::default());

        client.write_all(b"PARSE 37\nfunction").await.unwrap();
        client.shutdown().await.unwrap();

        assert!(matches!(
            handle.await.unwrap(),
            Err(CodestageError::PayloadTruncated { expected: 37, received: 8 })
        ));
    }

    #[tokio::test]
    async fn test_clean_eof_ends_session() {
        let (mut client, handle) = spawn_session(ServerConfig::default());

        exchange(&mut client, &parse_request(HELLO), 1).await;
        client.shutdown().await.unwrap();

        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_timeout_is_reported_and_session_continues() {
        let limits = ResourceLimits::new().with_execution_timeout(Duration::from_millis(50));
        let config = ServerConfig::default().with_limits(limits.clone());
        let (mut client, _handle) =
            spawn_session_with(config, Engine::with_backend(Arc::new(SlowBackend), limits));

        let mut request = parse_request(b"function slow() {} function hello() { return 'Hello'; }");
        request.extend_from_slice(b"COMMIT\nCALL slow 8\nCALL hello 8\n");
        let responses = exchange(&mut client, &request, 4).await;

        assert_eq!(error_kind(&responses[2]), ErrorKind::Timeout);
        assert_eq!(responses[3], Response::ok_with(b"Hello".to_vec()));
    }

    /// Boa backend whose `slow` function stalls past any test timeout.
    struct SlowBackend;

    impl Backend for SlowBackend {
        fn compile(&self, source: &[u8], limits: &ResourceLimits) -> Result<ProgramImage> {
            BoaBackend.compile(source, limits)
        }

        fn invoke(
            &self,
            image: &ProgramImage,
            call: &CallRequest,
            limits: &ResourceLimits,
            out: &mut OutputBuffer,
        ) -> Result<()> {
            if call.function == "slow" {
                std::thread::sleep(Duration::from_millis(300));
            }
            BoaBackend.invoke(image, call, limits, out)
        }
    }
}
