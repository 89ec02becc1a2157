//! Link error types.

use rpclink_protocol::{ProtocolError, RequestId};
use thiserror::Error;

/// Link errors.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("connection closed")]
    ConnectionClosed,

    /// The connection carrying a pending call went away before its reply.
    #[error("connection lost before reply arrived")]
    ConnectionLost,

    #[error("request timeout")]
    Timeout,

    #[error("link shut down")]
    Shutdown,

    #[error("message {id} too large: {size} bytes (max {max})")]
    MessageTooLarge {
        id: RequestId,
        size: usize,
        max: usize,
    },
}

impl CoreError {
    /// Returns whether the call may succeed if issued again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CoreError::Io(_)
                | CoreError::ConnectionClosed
                | CoreError::ConnectionLost
                | CoreError::Timeout
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable() {
        assert!(CoreError::Timeout.is_retryable());
        assert!(CoreError::ConnectionLost.is_retryable());
        assert!(CoreError::ConnectionClosed.is_retryable());
        assert!(!CoreError::Shutdown.is_retryable());
        assert!(!CoreError::MessageTooLarge {
            id: RequestId::new(1),
            size: 2,
            max: 1
        }
        .is_retryable());
    }

    #[test]
    fn test_display() {
        let err = CoreError::MessageTooLarge {
            id: RequestId::new(9),
            size: 100,
            max: 10,
        };
        let msg = err.to_string();
        assert!(msg.contains('9'));
        assert!(msg.contains("100"));
    }
}
