//! Server configuration.
//!
//! Configuration is loaded in the following order (later overrides earlier):
//! 1. Default values
//! 2. YAML config file (if specified via RPCLINK_CONFIG)
//! 3. Environment variables

use rpclink_core::LinkConfig;
use rpclink_protocol::DEFAULT_PORT;
use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Server configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Network configuration.
    pub network: NetworkConfig,
    /// Framing and reassembly settings applied to every connection.
    pub link: LinkSettings,
    /// TLS configuration.
    pub tls: TlsConfig,
    /// Answer the `#` method with the registered method names.
    pub expose_method_list: bool,
}

impl Config {
    /// Loads configuration from file, then applies environment variable overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match std::env::var("RPCLINK_CONFIG") {
            Ok(path) => Self::from_file(path)?,
            Err(_) => Self::default(),
        };
        config.apply_env_overrides();
        config.tls.validate()?;
        Ok(config)
    }

    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        serde_yaml::from_str(&content).map_err(|e| ConfigError::Parse(path.to_path_buf(), e))
    }

    /// Saves configuration to a YAML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content =
            serde_yaml::to_string(self).map_err(|e| ConfigError::Parse(path.to_path_buf(), e))?;
        std::fs::write(path, content).map_err(|e| ConfigError::Io(path.to_path_buf(), e))
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Applies overrides read through `lookup`, keyed by environment variable name.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        self.network.apply_overrides(&lookup);
        self.link.apply_overrides(&lookup);
        self.tls.apply_overrides(&lookup);
    }
}

fn parse_flag(value: &str) -> bool {
    value == "1" || value.eq_ignore_ascii_case("true")
}

/// Network configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Address to bind to.
    #[serde(with = "socket_addr_serde")]
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, DEFAULT_PORT)),
            max_connections: 1000,
        }
    }
}

impl NetworkConfig {
    fn apply_overrides(&mut self, lookup: &impl Fn(&str) -> Option<String>) {
        if let Some(addr) = lookup("RPCLINK_BIND") {
            match addr.parse() {
                Ok(parsed) => self.bind_addr = parsed,
                Err(_) => tracing::warn!("Ignoring invalid RPCLINK_BIND={}", addr),
            }
        }
    }
}

/// Per-connection link settings, in file-friendly units.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkSettings {
    /// Largest body carried by one frame before a message is split.
    pub max_frame_body: usize,
    /// Seconds a partial message may wait for its final frame.
    pub retention_secs: u64,
    /// Seconds a server-issued call waits for its reply.
    pub request_timeout_secs: u64,
    /// Largest reassembled message accepted.
    pub max_message_size: usize,
}

impl Default for LinkSettings {
    fn default() -> Self {
        let defaults = LinkConfig::default();
        Self {
            max_frame_body: defaults.max_frame_body,
            retention_secs: defaults.retention.as_secs(),
            request_timeout_secs: defaults.request_timeout.as_secs(),
            max_message_size: defaults.max_message_size,
        }
    }
}

impl LinkSettings {
    fn apply_overrides(&mut self, lookup: &impl Fn(&str) -> Option<String>) {
        if let Some(size) = lookup("RPCLINK_MAX_FRAME_BODY").and_then(|v| v.parse().ok()) {
            self.max_frame_body = size;
        }
        if let Some(secs) = lookup("RPCLINK_RETENTION_SECS").and_then(|v| v.parse().ok()) {
            self.retention_secs = secs;
        }
    }

    /// Converts to the runtime link configuration.
    pub fn to_link_config(&self) -> LinkConfig {
        LinkConfig::new()
            .with_max_frame_body(self.max_frame_body)
            .with_retention(Duration::from_secs(self.retention_secs))
            .with_request_timeout(Duration::from_secs(self.request_timeout_secs))
            .with_max_message_size(self.max_message_size)
    }
}

/// TLS configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsConfig {
    /// Enable TLS.
    pub enabled: bool,
    /// Path to PEM-encoded server certificate file.
    pub cert_path: Option<PathBuf>,
    /// Path to PEM-encoded private key file.
    pub key_path: Option<PathBuf>,
    /// Require client certificate authentication (mTLS).
    pub require_client_cert: bool,
    /// CA certificate(s) for verifying client certs. Required with mTLS.
    pub client_ca_path: Option<PathBuf>,
}

impl TlsConfig {
    fn apply_overrides(&mut self, lookup: &impl Fn(&str) -> Option<String>) {
        if let Some(enabled) = lookup("RPCLINK_TLS_ENABLED") {
            self.enabled = parse_flag(&enabled);
        }
        if let Some(path) = lookup("RPCLINK_TLS_CERT") {
            self.cert_path = Some(PathBuf::from(path));
        }
        if let Some(path) = lookup("RPCLINK_TLS_KEY") {
            self.key_path = Some(PathBuf::from(path));
        }
    }

    /// Validates TLS configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.enabled {
            return Ok(());
        }

        if self.cert_path.is_none() {
            return Err(ConfigError::Validation(
                "TLS enabled but cert_path not set".to_string(),
            ));
        }
        if self.key_path.is_none() {
            return Err(ConfigError::Validation(
                "TLS enabled but key_path not set".to_string(),
            ));
        }
        if self.require_client_cert && self.client_ca_path.is_none() {
            return Err(ConfigError::Validation(
                "mTLS enabled but client_ca_path not set".to_string(),
            ));
        }

        Ok(())
    }
}

/// Configuration error.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{}': {1}", .0.display())]
    Io(PathBuf, #[source] std::io::Error),

    #[error("failed to parse config file '{}': {1}", .0.display())]
    Parse(PathBuf, #[source] serde_yaml::Error),

    #[error("configuration validation failed: {0}")]
    Validation(String),
}

/// Custom serde module for SocketAddr (to handle as string in YAML).
mod socket_addr_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::net::SocketAddr;

    pub fn serialize<S>(addr: &SocketAddr, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&addr.to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<SocketAddr, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
