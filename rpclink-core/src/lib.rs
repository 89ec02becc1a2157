//! # rpclink-core
//!
//! Connection-agnostic link machinery for rpclink.
//!
//! This crate provides:
//! - Time-bounded reassembly of messages split across frames
//! - Correlation of replies with the calls that requested them
//! - Routing of inbound frames to the reply path or the call dispatcher
//! - A [`Link`] that runs the read/write loops over any byte stream

pub mod assembler;
pub mod buffer;
pub mod config;
pub mod correlator;
pub mod error;
pub mod link;
pub mod router;

pub use assembler::ResponseAssembler;
pub use buffer::PartialBuffer;
pub use config::LinkConfig;
pub use correlator::{PendingCall, RequestCorrelator};
pub use error::CoreError;
pub use link::Link;
pub use router::{MessageRouter, Outbound, ReplyQueue};
