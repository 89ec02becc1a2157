//! Connection management.
//!
//! [`ConnectionManager`] keeps one logical link alive: it dials, retries
//! every `retry_interval` until a dial succeeds, serves the link over the
//! new stream, and starts over when that stream goes away.

use crate::error::ClientError;
use crate::stream::ClientStream;
use crate::tls::{create_tls_connector, TlsClientConfig};
use rpclink_core::{CoreError, Link, LinkConfig};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

/// Delay between failed dial attempts.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(2);

/// Upper bound on a single TCP connect.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Connection configuration.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub host: String,
    pub port: u16,
    /// TLS settings; plain TCP when `None`.
    pub tls: Option<TlsClientConfig>,
    /// Wait between failed dials. There is no attempt limit.
    pub retry_interval: Duration,
    pub connect_timeout: Duration,
    /// Framing, reassembly and call settings.
    pub link: LinkConfig,
}

impl ConnectionConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            tls: None,
            retry_interval: DEFAULT_RETRY_INTERVAL,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            link: LinkConfig::default(),
        }
    }

    pub fn with_tls(mut self, tls_config: TlsClientConfig) -> Self {
        self.tls = Some(tls_config);
        self
    }

    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.link = self.link.with_request_timeout(timeout);
        self
    }

    pub fn with_link_config(mut self, link: LinkConfig) -> Self {
        self.link = link;
        self
    }

    /// `host:port` as dialed.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Produces fresh streams to the peer.
pub trait Dialer: Send + Sync + 'static {
    type Stream: AsyncRead + AsyncWrite + Send + 'static;

    /// Makes one connection attempt.
    fn dial(&self) -> impl Future<Output = Result<Self::Stream, ClientError>> + Send;

    /// Human-readable target for logs.
    fn target(&self) -> String;
}

/// Dials TCP, optionally upgrading to TLS.
#[derive(Debug, Clone)]
pub struct TcpDialer {
    host: String,
    port: u16,
    tls: Option<TlsClientConfig>,
    connect_timeout: Duration,
}

impl TcpDialer {
    pub fn new(config: &ConnectionConfig) -> Self {
        Self {
            host: config.host.clone(),
            port: config.port,
            tls: config.tls.clone(),
            connect_timeout: config.connect_timeout,
        }
    }
}

impl Dialer for TcpDialer {
    type Stream = ClientStream;

    async fn dial(&self) -> Result<ClientStream, ClientError> {
        let addr = self.target();
        tracing::debug!("Connecting to {}...", addr);

        let tcp_stream = tokio::time::timeout(
            self.connect_timeout,
            TcpStream::connect((self.host.as_str(), self.port)),
        )
        .await
        .map_err(|_| ClientError::ConnectTimeout(addr.clone()))??;

        tcp_stream.set_nodelay(true).ok();

        let Some(ref tls_config) = self.tls else {
            tracing::debug!("TCP connected to {}", addr);
            return Ok(ClientStream::plain(tcp_stream));
        };

        if tls_config.insecure {
            tracing::warn!("Using insecure TLS (certificate verification disabled)");
        }
        let (connector, server_name) = create_tls_connector(tls_config, &self.host)?;

        tracing::debug!("Performing TLS handshake...");
        let tls_stream = connector
            .connect(server_name, tcp_stream)
            .await
            .map_err(|e| ClientError::TlsHandshake(e.to_string()))?;

        tracing::debug!("TLS connected to {}", addr);
        Ok(ClientStream::tls(tls_stream))
    }

    fn target(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Keeps a [`Link`] attached to a live stream until the link shuts down.
pub struct ConnectionManager<D> {
    dialer: D,
    link: Arc<Link>,
    retry_interval: Duration,
    attempts: AtomicU64,
}

impl<D: Dialer> ConnectionManager<D> {
    pub fn new(dialer: D, link: Arc<Link>, retry_interval: Duration) -> Self {
        Self {
            dialer,
            link,
            retry_interval,
            attempts: AtomicU64::new(0),
        }
    }

    pub fn link(&self) -> &Arc<Link> {
        &self.link
    }

    /// Dial attempts made so far, successful or not.
    pub fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::Relaxed)
    }

    /// Runs the dial/serve/redial cycle until the link's shutdown token fires.
    pub async fn run(&self) {
        let target = self.dialer.target();

        loop {
            let Some(stream) = self.dial_with_retry().await else {
                break;
            };
            tracing::debug!("Connected to {}", target);

            match self.link.serve(stream).await {
                Err(CoreError::Shutdown) => break,
                Err(e) => tracing::warn!("Connection to {} lost: {}; reconnecting", target, e),
                Ok(()) => tracing::warn!("Connection to {} closed; reconnecting", target),
            }
        }

        tracing::debug!("Connection manager for {} stopped", target);
    }

    /// Dials until a stream is established. Returns `None` on shutdown.
    async fn dial_with_retry(&self) -> Option<D::Stream> {
        let shutdown = self.link.shutdown_token();

        loop {
            let attempt = self.attempts.fetch_add(1, Ordering::Relaxed) + 1;
            let result = tokio::select! {
                _ = shutdown.cancelled() => return None,
                result = self.dialer.dial() => result,
            };

            match result {
                Ok(stream) => return Some(stream),
                Err(e) => tracing::warn!(
                    "Connect attempt {} to {} failed: {}; retrying in {:?}",
                    attempt,
                    self.dialer.target(),
                    e,
                    self.retry_interval
                ),
            }

            tokio::select! {
                _ = shutdown.cancelled() => return None,
                _ = tokio::time::sleep(self.retry_interval) => {}
            }
        }
    }
}
