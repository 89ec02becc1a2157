//! High-level client API.

use crate::connection::{ConnectionConfig, ConnectionManager, Dialer, TcpDialer};
use crate::error::ClientError;
use crate::tls::TlsClientConfig;
use rpclink_core::{CoreError, Link, LinkConfig};
use rpclink_protocol::registry::FUNCTION_LIST_METHOD;
use rpclink_protocol::{MethodRegistry, RpcCodec, TaggedCodec};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Connects to `host:port`, plain or over TLS, with default settings.
///
/// TLS uses a verifier that accepts any server certificate; build a
/// [`ConnectionConfig`] with [`TlsClientConfig::with_ca_cert`] to verify.
///
/// # Panics
///
/// Panics if `host` is empty. Must be called inside a Tokio runtime.
pub fn new_client(host: &str, port: u16, use_tls: bool) -> Client {
    assert!(!host.is_empty(), "new_client: host must not be empty");

    let mut config = ConnectionConfig::new(host, port);
    if use_tls {
        tracing::warn!("TLS to {}:{} will not verify the server certificate", host, port);
        config = config.with_tls(TlsClientConfig::permissive());
    }
    Client::connect(config)
}

/// High-level client for rpclink.
///
/// Owns one logical link that a background task keeps connected. The link
/// also answers calls from the peer through the client's registry.
pub struct Client {
    link: Arc<Link>,
    registry: Option<Arc<MethodRegistry>>,
    shutdown: CancellationToken,
    supervisor: Option<JoinHandle<()>>,
}

impl Client {
    /// Starts connecting with the given configuration and returns at once.
    ///
    /// Calls made before the first connection is up wait for it.
    pub fn connect(config: ConnectionConfig) -> Self {
        Self::connect_with_registry(config, Arc::new(MethodRegistry::new()))
    }

    /// Like [`Client::connect`], serving peer calls from `registry`.
    pub fn connect_with_registry(config: ConnectionConfig, registry: Arc<MethodRegistry>) -> Self {
        let codec = Arc::new(TaggedCodec::new(registry.clone()));
        let mut client = Self::with_dialer(
            TcpDialer::new(&config),
            codec,
            config.link,
            config.retry_interval,
        );
        client.registry = Some(registry);
        client
    }

    /// Starts a client over an arbitrary dialer and codec.
    pub fn with_dialer<D: Dialer>(
        dialer: D,
        codec: Arc<dyn RpcCodec>,
        link_config: LinkConfig,
        retry_interval: Duration,
    ) -> Self {
        let shutdown = CancellationToken::new();
        let link = Arc::new(Link::new(codec, link_config, shutdown.clone()));
        let manager = ConnectionManager::new(dialer, link.clone(), retry_interval);
        let supervisor = tokio::spawn(async move { manager.run().await });

        Self {
            link,
            registry: None,
            shutdown,
            supervisor: Some(supervisor),
        }
    }

    /// Calls `method` on the peer and waits for its result.
    ///
    /// While no connection is up the call waits for one. The request
    /// timeout covers that wait too.
    pub async fn call(&self, method: &str, args: &[Value]) -> Result<Value, ClientError> {
        Ok(self.link.call(method, args).await?)
    }

    /// Like [`Client::call`] with an explicit timeout.
    pub async fn call_with_timeout(
        &self,
        method: &str,
        args: &[Value],
        timeout: Duration,
    ) -> Result<Value, ClientError> {
        Ok(self.link.call_with_timeout(method, args, timeout).await?)
    }

    /// Checks the peer answers at all.
    pub async fn ping(&self) -> Result<(), ClientError> {
        self.call(FUNCTION_LIST_METHOD, &[]).await?;
        Ok(())
    }

    /// Methods the peer exposes. Empty when the peer hides its table.
    pub async fn list_methods(&self) -> Result<Vec<String>, ClientError> {
        let value = self.call(FUNCTION_LIST_METHOD, &[]).await?;
        Ok(value
            .as_array()
            .map(|names| {
                names
                    .iter()
                    .filter_map(|n| n.as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default())
    }

    /// Returns whether a connection is currently up.
    pub fn is_connected(&self) -> bool {
        self.link.is_attached()
    }

    /// Waits until a connection is up.
    pub async fn wait_connected(&self) -> Result<(), ClientError> {
        let mut attached = self.link.watch_attached();
        tokio::select! {
            _ = self.shutdown.cancelled() => Err(CoreError::Shutdown.into()),
            result = attached.wait_for(|up| *up) => match result {
                Ok(_) => Ok(()),
                Err(_) => Err(CoreError::Shutdown.into()),
            },
        }
    }

    /// Registry answering calls from the peer, when built with a [`TaggedCodec`].
    pub fn registry(&self) -> Option<&Arc<MethodRegistry>> {
        self.registry.as_ref()
    }

    /// Returns the number of calls waiting for a reply.
    pub fn pending_count(&self) -> usize {
        self.link.pending_count()
    }

    /// Stops reconnecting and drops the current connection.
    pub fn close(&self) {
        tracing::debug!("Closing client");
        self.shutdown.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Closes the client and waits for the background task to finish.
    pub async fn shutdown(mut self) {
        self.close();
        if let Some(supervisor) = self.supervisor.take() {
            let _ = supervisor.await;
        }
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
