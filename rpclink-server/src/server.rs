//! TCP server implementation.

use crate::config::Config;
use crate::error::ServerError;
use crate::tls::acceptor_for;
use rpclink_core::{CoreError, Link, LinkConfig};
use rpclink_protocol::{MethodRegistry, RpcCodec, TaggedCodec};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;

/// Time a peer gets to complete the TLS handshake.
pub const DEFAULT_TLS_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Server configuration.
#[derive(Clone)]
pub struct ServerConfig {
    /// Address to bind to.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Settings for each connection's link.
    pub link: LinkConfig,
    /// TLS acceptor (if TLS is enabled).
    pub tls_acceptor: Option<Arc<TlsAcceptor>>,
    pub tls_handshake_timeout: Duration,
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("bind_addr", &self.bind_addr)
            .field("max_connections", &self.max_connections)
            .field("link", &self.link)
            .field("tls_enabled", &self.tls_acceptor.is_some())
            .field("tls_handshake_timeout", &self.tls_handshake_timeout)
            .finish()
    }
}

impl ServerConfig {
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            max_connections: 1000,
            link: LinkConfig::default(),
            tls_acceptor: None,
            tls_handshake_timeout: DEFAULT_TLS_HANDSHAKE_TIMEOUT,
        }
    }

    /// Builds the runtime configuration from loaded settings.
    pub fn from_config(config: &Config) -> Result<Self, ServerError> {
        let mut server_config = Self::new(config.network.bind_addr);
        server_config.max_connections = config.network.max_connections;
        server_config.link = config.link.to_link_config();
        if let Some(acceptor) = acceptor_for(&config.tls)? {
            server_config = server_config.with_tls(acceptor);
        }
        Ok(server_config)
    }

    /// Sets the TLS acceptor.
    pub fn with_tls(mut self, acceptor: TlsAcceptor) -> Self {
        self.tls_acceptor = Some(Arc::new(acceptor));
        self
    }

    pub fn with_tls_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.tls_handshake_timeout = timeout;
        self
    }

    pub fn with_link_config(mut self, link: LinkConfig) -> Self {
        self.link = link;
        self
    }

    /// Returns whether TLS is enabled.
    pub fn tls_enabled(&self) -> bool {
        self.tls_acceptor.is_some()
    }
}

/// Server statistics.
#[derive(Debug, Default)]
pub struct ServerStats {
    pub connections_total: AtomicU64,
    pub connections_active: AtomicU64,
    pub errors_total: AtomicU64,
}

/// TCP server for rpclink.
///
/// Every accepted connection gets its own [`Link`] sharing one codec, so
/// peers can call registered methods and receive replies over the same
/// stream they send on.
pub struct Server {
    config: ServerConfig,
    codec: Arc<dyn RpcCodec>,
    stats: Arc<ServerStats>,
    shutdown: CancellationToken,
    running: AtomicBool,
}

impl Server {
    /// Creates a server dispatching to `registry`.
    pub fn new(config: ServerConfig, registry: Arc<MethodRegistry>) -> Self {
        Self::with_codec(config, Arc::new(TaggedCodec::new(registry)))
    }

    /// Creates a server with a custom codec.
    pub fn with_codec(config: ServerConfig, codec: Arc<dyn RpcCodec>) -> Self {
        Self {
            config,
            codec,
            stats: Arc::new(ServerStats::default()),
            shutdown: CancellationToken::new(),
            running: AtomicBool::new(false),
        }
    }

    /// Binds the configured address and serves until shutdown.
    pub async fn run(&self) -> Result<(), ServerError> {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        self.serve(listener).await
    }

    /// Serves connections accepted from `listener` until shutdown.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), ServerError> {
        if self.shutdown.is_cancelled() {
            return Err(ServerError::ShuttingDown);
        }
        self.running.store(true, Ordering::SeqCst);

        let tls_mode = if self.config.tls_enabled() {
            "TLS"
        } else {
            "plain"
        };
        tracing::info!(
            "Server listening on {} ({})",
            listener.local_addr()?,
            tls_mode
        );

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((tcp_stream, addr)) => self.accept(tcp_stream, addr),
                        Err(e) => {
                            tracing::error!("Accept error: {}", e);
                        }
                    }
                }
                _ = self.shutdown.cancelled() => {
                    tracing::info!("Server shutting down");
                    break;
                }
            }
        }

        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn accept(&self, tcp_stream: TcpStream, addr: SocketAddr) {
        if self.stats.connections_active.load(Ordering::Relaxed)
            >= self.config.max_connections as u64
        {
            tracing::warn!("Connection limit reached, rejecting {}", addr);
            return;
        }

        self.stats.connections_total.fetch_add(1, Ordering::Relaxed);
        self.stats.connections_active.fetch_add(1, Ordering::Relaxed);
        tcp_stream.set_nodelay(true).ok();

        let tls_acceptor = self.config.tls_acceptor.clone();
        let handshake_timeout = self.config.tls_handshake_timeout;
        let link = Link::new(
            self.codec.clone(),
            self.config.link.clone(),
            self.shutdown.child_token(),
        );
        let stats = self.stats.clone();

        tokio::spawn(async move {
            let result = match tls_acceptor {
                Some(acceptor) => {
                    tracing::debug!("[{}] Performing TLS handshake", addr);
                    match tokio::time::timeout(handshake_timeout, acceptor.accept(tcp_stream)).await {
                        Ok(Ok(tls_stream)) => {
                            Self::handle_connection(&link, tls_stream, addr, " (TLS)").await
                        }
                        Ok(Err(e)) => Err(ServerError::TlsHandshake(e.to_string())),
                        Err(_) => Err(ServerError::TlsHandshake(format!(
                            "no handshake within {:?}",
                            handshake_timeout
                        ))),
                    }
                }
                None => Self::handle_connection(&link, tcp_stream, addr, "").await,
            };

            if let Err(e) = result {
                tracing::debug!("Connection {} error: {}", addr, e);
                stats.errors_total.fetch_add(1, Ordering::Relaxed);
            }
            stats.connections_active.fetch_sub(1, Ordering::Relaxed);
            tracing::info!("Client disconnected: {}", addr);
        });
    }

    async fn handle_connection<S>(
        link: &Link,
        stream: S,
        addr: SocketAddr,
        tls_status: &str,
    ) -> Result<(), ServerError>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        tracing::info!("Client connected: {}{}", addr, tls_status);

        match link.serve(stream).await {
            Ok(()) | Err(CoreError::ConnectionClosed) | Err(CoreError::Shutdown) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Signals the server and all its connections to stop.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Returns whether the accept loop is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> &ServerStats {
        &self.stats
    }
}
