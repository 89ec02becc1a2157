//! # rpclink-client
//!
//! Client library for rpclink.
//!
//! This crate provides:
//! - A single persistent connection that is redialed forever on failure
//! - Optional TLS
//! - Async calls with request/reply correlation over the shared link

pub mod client;
pub mod connection;
pub mod error;
pub mod stream;
pub mod tls;

pub use client::{new_client, Client};
pub use connection::{ConnectionConfig, ConnectionManager, Dialer, TcpDialer};
pub use tls::TlsClientConfig;
pub use error::ClientError;
pub use rpclink_protocol::DEFAULT_PORT;
