//! Server error types.

use thiserror::Error;

/// Server errors.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] rpclink_protocol::ProtocolError),

    #[error("link error: {0}")]
    Core(#[from] rpclink_core::CoreError),

    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("server shutting down")]
    ShuttingDown,

    #[error("TLS configuration error: {0}")]
    TlsConfig(String),

    #[error("TLS handshake failed: {0}")]
    TlsHandshake(String),
}
