//! rpclink - persistent-connection RPC server
//!
//! Serves registered methods to every connected peer over framed,
//! multiplexed links.

use rpclink_protocol::MethodRegistry;
use rpclink_server::{Config, Server, ServerConfig};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Methods every server answers.
fn builtin_registry(expose_method_list: bool) -> Arc<MethodRegistry> {
    let registry = Arc::new(MethodRegistry::new().with_method_listing(expose_method_list));

    registry.add_function("ping", |_| Ok(json!("pong")), Some("system"));
    registry.add_function("echo", |args| Ok(Value::Array(args)), Some("system"));
    registry.add_function(
        "version",
        |_| Ok(json!(env!("CARGO_PKG_VERSION"))),
        Some("system"),
    );
    registry
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = match Config::load() {
        Ok(c) => {
            if let Ok(path) = std::env::var("RPCLINK_CONFIG") {
                tracing::info!("Loaded config from {}", path);
            }
            c
        }
        Err(e) => {
            tracing::error!("Failed to load config: {}", e);
            return Err(e.into());
        }
    };

    tracing::info!("Starting rpclink server");
    tracing::info!("  Bind address: {}", config.network.bind_addr);
    tracing::info!(
        "  Max frame body: {} bytes, partial retention: {}s",
        config.link.max_frame_body,
        config.link.retention_secs
    );
    tracing::info!(
        "  TLS: {}",
        if config.tls.enabled { "enabled" } else { "disabled" }
    );

    let registry = builtin_registry(config.expose_method_list);
    tracing::info!("  Methods: {}", registry.method_names().join(", "));

    let server = Arc::new(Server::new(ServerConfig::from_config(&config)?, registry));

    let shutdown_server = server.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        tracing::info!("Received shutdown signal, stopping server...");
        shutdown_server.shutdown();
    });

    // Run server (blocks until shutdown)
    server.run().await?;

    tracing::info!("Server stopped");
    Ok(())
}
