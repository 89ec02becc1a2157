//! # rpclink-server
//!
//! TCP server for rpclink.
//!
//! This crate provides:
//! - An accept loop that serves one link per connection
//! - Method dispatch through a shared registry
//! - YAML and environment configuration
//! - Optional TLS support

pub mod config;
pub mod error;
pub mod server;
pub mod tls;

pub use config::{Config, ConfigError, LinkSettings, NetworkConfig, TlsConfig};
pub use error::ServerError;
pub use server::{Server, ServerConfig, ServerStats, DEFAULT_TLS_HANDSHAKE_TIMEOUT};
