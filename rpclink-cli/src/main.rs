//! rpclink-cli - Command-line interface for rpclink
//!
//! Connects to a peer, issues one call and prints the result.

mod commands;

use clap::{Parser, Subcommand};
use colored::Colorize;
use rpclink_client::{Client, ConnectionConfig, TlsClientConfig};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "rpclink-cli")]
#[command(about = "Command-line interface for rpclink peers")]
#[command(version)]
struct Cli {
    /// Peer host
    #[arg(short = 'H', long, env = "RPCLINK_HOST", default_value = "127.0.0.1")]
    host: String,

    /// Peer port
    #[arg(short, long, env = "RPCLINK_PORT", default_value_t = rpclink_client::DEFAULT_PORT)]
    port: u16,

    /// Seconds to wait for the connection and for each reply
    #[arg(short, long, default_value_t = 10)]
    timeout: u64,

    // ===== TLS Options =====
    /// Enable TLS connection
    #[arg(long, env = "RPCLINK_TLS")]
    tls: bool,

    /// Path to CA certificate for server verification
    #[arg(long, env = "RPCLINK_CA_CERT")]
    ca_cert: Option<PathBuf>,

    /// Path to client certificate (for mTLS)
    #[arg(long, env = "RPCLINK_CLIENT_CERT")]
    client_cert: Option<PathBuf>,

    /// Path to client private key (for mTLS)
    #[arg(long, env = "RPCLINK_CLIENT_KEY")]
    client_key: Option<PathBuf>,

    /// Skip server certificate verification (INSECURE)
    #[arg(long, short = 'k')]
    insecure: bool,

    /// Server name for TLS SNI (defaults to host)
    #[arg(long)]
    server_name: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Check the peer answers
    Ping,

    /// List the methods the peer exposes
    Methods,

    /// Call a method
    Call {
        /// Method name, including any namespace prefix
        method: String,

        /// Arguments: JSON values, @file.json, or bare strings
        args: Vec<String>,
    },
}

impl Cli {
    fn tls_config(&self) -> Result<Option<TlsClientConfig>, String> {
        if !(self.tls || self.ca_cert.is_some() || self.client_cert.is_some() || self.insecure) {
            return Ok(None);
        }

        let mut tls = TlsClientConfig::new();
        tls.ca_cert_path = self.ca_cert.clone();
        match (&self.client_cert, &self.client_key) {
            (Some(cert), Some(key)) => tls = tls.with_client_cert(cert, key),
            (None, None) => {}
            _ => return Err("--client-cert and --client-key must be used together".into()),
        }
        tls.insecure = self.insecure;
        tls.server_name = self.server_name.clone();
        Ok(Some(tls))
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();

    let tls = match cli.tls_config() {
        Ok(tls) => tls,
        Err(msg) => {
            eprintln!("{}: {}", "Error".red(), msg);
            std::process::exit(1);
        }
    };

    let timeout = Duration::from_secs(cli.timeout);
    let mut config = ConnectionConfig::new(cli.host.clone(), cli.port)
        .with_connect_timeout(timeout)
        .with_request_timeout(timeout);
    if let Some(tls) = tls {
        config = config.with_tls(tls);
    }
    let client = Client::connect(config);

    if tokio::time::timeout(timeout, client.wait_connected()).await.is_err() {
        eprintln!(
            "{}: no connection to {}:{} after {:?}",
            "Connection failed".red(),
            cli.host,
            cli.port,
            timeout
        );
        std::process::exit(1);
    }

    let result = commands::execute(&client, cli.command).await;
    client.shutdown().await;

    match result {
        Ok(output) => println!("{}", output),
        Err(e) => {
            eprintln!("{}: {}", "Error".red(), e);
            std::process::exit(1);
        }
    }

    Ok(())
}
