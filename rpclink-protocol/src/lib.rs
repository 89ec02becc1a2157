//! # rpclink-protocol
//!
//! Wire protocol implementation for rpclink.
//!
//! This crate provides:
//! - Binary framing with length prefix and CRC32C validation
//! - Reply/finish flags used for correlation and reassembly
//! - Tagged RPC payload encoding (call, result, error)
//! - Method registry that services inbound calls

pub mod codec;
pub mod error;
pub mod frame;
pub mod registry;
pub mod rpc;

pub use codec::{Decoder, Encoder};
pub use error::ProtocolError;
pub use frame::{Frame, FrameFlags, Header, RequestId, FRAME_HEADER_SIZE, MAGIC};
pub use registry::{MethodRegistry, RpcService};
pub use rpc::{ReplyError, RpcCodec, TaggedCodec};

/// Protocol version supported by this implementation.
pub const PROTOCOL_VERSION: u8 = 1;

/// Default port for rpclink peers.
pub const DEFAULT_PORT: u16 = 7411;

/// Maximum frame body size (16 MiB).
pub const MAX_BODY_SIZE: u32 = 16 * 1024 * 1024;
