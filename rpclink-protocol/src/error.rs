//! Protocol error types.

use thiserror::Error;

/// Protocol-level errors that can occur during framing or payload handling.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("invalid magic bytes: expected 'RLNK', got {0:?}")]
    InvalidMagic([u8; 4]),

    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(u8),

    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: u32, max: u32 },

    #[error("context too large: {0} bytes")]
    ContextTooLarge(usize),

    #[error("CRC mismatch: expected {expected:#x}, got {actual:#x}")]
    CrcMismatch { expected: u32, actual: u32 },

    #[error("invalid frame flags: {0:#x}")]
    InvalidFlags(u8),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed payload: {0}")]
    Malformed(String),
}
