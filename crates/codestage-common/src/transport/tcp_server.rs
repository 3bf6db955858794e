use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;

use crate::protocol::error::{CodestageError, Result};

/// Default number of connections served at the same time
pub const DEFAULT_MAX_CONNECTIONS: usize = 256;

/// Async TCP accept loop.
///
/// Every accepted connection is handed to the handler on its own tokio task.
/// At most `max_connections` handlers run at once; further connections stay
/// in the listen backlog until a slot frees up.
pub struct TcpServer {
    listener: TcpListener,
    connection_slots: Arc<Semaphore>,
}

impl TcpServer {
    /// Creates a new TCP server bound to the specified address.
    ///
    /// # Arguments
    /// * `bind_addr` - The address to bind to (e.g., "127.0.0.1:4000")
    pub async fn new(bind_addr: &str) -> Result<Self> {
        let listener = TcpListener::bind(bind_addr).await
            .map_err(|e| CodestageError::Connection(format!("Failed to bind to {}: {}", bind_addr, e)))?;

        Ok(Self {
            listener,
            connection_slots: Arc::new(Semaphore::new(DEFAULT_MAX_CONNECTIONS)),
        })
    }

    /// Limits the number of concurrently served connections.
    pub fn with_max_connections(mut self, max_connections: usize) -> Self {
        self.connection_slots = Arc::new(Semaphore::new(max_connections));
        self
    }

    /// Gets the actual bound address.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener.local_addr()
            .map_err(|e| CodestageError::Connection(format!("Failed to get local addr: {}", e)))
    }

    /// Runs the accept loop forever.
    pub async fn run_with_handler<F, Fut>(&self, handler: F) -> Result<()>
    where
        F: Fn(TcpStream, SocketAddr) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.run_until(handler, std::future::pending()).await
    }

    /// Runs the accept loop until `shutdown` resolves.
    ///
    /// Connections already being served keep running on their own tasks after
    /// the loop returns.
    pub async fn run_until<F, Fut, S>(&self, handler: F, shutdown: S) -> Result<()>
    where
        F: Fn(TcpStream, SocketAddr) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
        S: Future<Output = ()>,
    {
        let handler = Arc::new(handler);
        tokio::pin!(shutdown);

        loop {
            // Wait for a free slot before accepting, so excess clients queue in the backlog
            let permit = tokio::select! {
                permit = self.connection_slots.clone().acquire_owned() => permit
                    .map_err(|e| CodestageError::Connection(format!("Connection limiter closed: {}", e)))?,
                _ = &mut shutdown => break,
            };

            let (stream, peer_addr) = tokio::select! {
                accepted = self.listener.accept() => accepted
                    .map_err(|e| CodestageError::Connection(format!("Failed to accept connection: {}", e)))?,
                _ = &mut shutdown => break,
            };

            tracing::info!("Connection established from {}", peer_addr);

            let handler = handler.clone();
            tokio::spawn(async move {
                if let Err(e) = handler(stream, peer_addr).await {
                    tracing::error!("Connection {} ended with error: {}", peer_addr, e);
                }
                tracing::info!("Connection from {} closed", peer_addr);
                drop(permit);
            });
        }

        tracing::info!("Accept loop stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_tcp_server_creation() {
        let server = TcpServer::new("127.0.0.1:0").await;
        assert!(server.is_ok());
    }

    #[tokio::test]
    async fn test_tcp_server_local_addr() {
        let server = TcpServer::new("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr().unwrap();
        assert_ne!(addr.port(), 0);
    }

    #[tokio::test]
    async fn test_tcp_server_invalid_bind_address() {
        let server = TcpServer::new("not-an-address").await;
        assert!(matches!(server, Err(CodestageError::Connection(_))));
    }

    #[tokio::test]
    async fn test_handler_runs_per_connection() {
        let server = TcpServer::new("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr().unwrap();

        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let accept = tokio::spawn(async move {
            server
                .run_until(
                    |mut stream: TcpStream, _peer| async move {
                        stream.write_all(b"hi\n").await?;
                        Ok::<(), CodestageError>(())
                    },
                    async {
                        let _ = stop_rx.await;
                    },
                )
                .await
        });

        for _ in 0..2 {
            let mut client = TcpStream::connect(addr).await.unwrap();
            let mut buf = Vec::new();
            client.read_to_end(&mut buf).await.unwrap();
            assert_eq!(buf, b"hi\n".to_vec());
        }

        stop_tx.send(()).unwrap();
        accept.await.unwrap().unwrap();
    }
}
