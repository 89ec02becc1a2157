//! Client error types.

use rpclink_core::CoreError;
use thiserror::Error;

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Core(#[from] CoreError),

    #[error("connect to {0} timed out")]
    ConnectTimeout(String),

    #[error("TLS configuration error: {0}")]
    TlsConfig(String),

    #[error("TLS handshake failed: {0}")]
    TlsHandshake(String),
}

impl ClientError {
    /// Returns whether this error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::Io(_) => true,
            ClientError::ConnectTimeout(_) => true,
            ClientError::TlsHandshake(_) => true,
            ClientError::Core(e) => e.is_retryable(),
            ClientError::TlsConfig(_) => false,
        }
    }
}

impl From<rpclink_protocol::ProtocolError> for ClientError {
    fn from(e: rpclink_protocol::ProtocolError) -> Self {
        ClientError::Core(CoreError::Protocol(e))
    }
}
