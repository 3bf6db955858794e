use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use codestage_common::protocol::error::{CodestageError, Result};
use codestage_common::transport::TcpServer;

use crate::config::ServerConfig;
use crate::runtime::Engine;
use crate::session::Session;

/// Codestage TCP server.
///
/// Binds a listener, then serves every accepted connection with its own
/// [`Session`]. Sessions share one [`Engine`] and nothing else.
///
/// # Example
///
/// ```no_run
/// use codestage_server::{Server, ServerConfig};
///
/// # async fn example() -> codestage_common::Result<()> {
/// let server = Server::bind(ServerConfig::default().with_bind("127.0.0.1:4000")).await?;
/// server.run().await?;
/// # Ok(())
/// # }
/// ```
pub struct Server {
    tcp: TcpServer,
    engine: Arc<Engine>,
    config: Arc<ServerConfig>,
}

impl Server {
    /// Validates `config` and binds its listen address.
    pub async fn bind(config: ServerConfig) -> Result<Self> {
        config.validate().map_err(CodestageError::Config)?;

        let engine = Engine::new(config.limits.clone()).with_overflow_policy(config.overflow_policy);
        let tcp = TcpServer::new(&config.bind)
            .await?
            .with_max_connections(config.max_connections);

        tracing::info!(
            "Codestage server bound to {} (max capacity {} bytes, overflow policy {})",
            config.bind,
            config.max_capacity,
            config.overflow_policy
        );

        Ok(Self {
            tcp,
            engine: Arc::new(engine),
            config: Arc::new(config),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.tcp.local_addr()
    }

    /// Serves connections forever.
    pub async fn run(&self) -> Result<()> {
        self.run_until(std::future::pending()).await
    }

    /// Serves connections until `shutdown` resolves.
    pub async fn run_until<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let engine = self.engine.clone();
        let config = self.config.clone();

        self.tcp
            .run_until(
                move |stream, peer| {
                    let engine = engine.clone();
                    let config = config.clone();
                    async move {
                        stream.set_nodelay(true)?;
                        Session::new(stream, engine, &config, peer.to_string()).run().await
                    }
                },
                shutdown,
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bind_ephemeral_port() {
        let server = Server::bind(ServerConfig::default().with_bind("127.0.0.1:0"))
            .await
            .unwrap();
        assert_ne!(server.local_addr().unwrap().port(), 0);
    }

    #[tokio::test]
    async fn test_bind_rejects_invalid_config() {
        let result = Server::bind(ServerConfig::default().with_max_capacity(0)).await;
        assert!(matches!(result, Err(CodestageError::Config(_))));
    }

    #[tokio::test]
    async fn test_run_until_returns_on_shutdown() {
        let server = Server::bind(ServerConfig::default().with_bind("127.0.0.1:0"))
            .await
            .unwrap();
        server.run_until(async {}).await.unwrap();
    }
}
