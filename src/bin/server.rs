//! MCP server binary.
//!
//! Loads configuration (YAML file, then environment, then flags), registers
//! every enabled data source and serves MCP over Streamable HTTP or stdio.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use mcp_bridge::config::{Config, ConfigError, Transport};
use mcp_bridge::logging::init_tracing;
use mcp_bridge::mcp::{McpServer, ServerError, serve_http, serve_stdio};
use miette::Diagnostic;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Error, Diagnostic, Debug)]
enum BinaryError {
    #[error("Configuration error: {0}")]
    #[diagnostic(code(mcp_bridge::binary::config))]
    Config(#[from] ConfigError),

    #[error("Server error: {0}")]
    #[diagnostic(code(mcp_bridge::binary::server))]
    Server(#[from] ServerError),

    #[error("Cannot resolve listen address {0}")]
    #[diagnostic(code(mcp_bridge::binary::address))]
    Address(String),

    #[error("I/O error: {0}")]
    #[diagnostic(code(mcp_bridge::binary::io))]
    Io(#[from] std::io::Error),
}

#[derive(Parser)]
#[command(name = "mcpb-server")]
#[command(author, version, about = "MCP server exposing configured data sources", long_about = None)]
struct Cli {
    /// YAML configuration file
    #[arg(short, long, env = "MCP_CONFIG")]
    config: Option<PathBuf>,

    /// Host address to bind to (overrides SERVER_HOST)
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on (overrides SERVER_PORT)
    #[arg(short, long)]
    port: Option<u16>,

    /// Transport: streamable-http or stdio (overrides MCP_TRANSPORT)
    #[arg(short, long)]
    transport: Option<Transport>,

    /// Directory for persisted schema files (overrides RESOURCES_DIR)
    #[arg(long)]
    resources_dir: Option<PathBuf>,
}

impl Cli {
    fn apply(self, config: &mut Config) {
        if let Some(host) = self.host {
            config.server.host = host;
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(transport) = self.transport {
            config.server.transport = transport;
        }
        if let Some(dir) = self.resources_dir {
            config.server.resources_dir = dir;
        }
    }
}

async fn resolve(host: &str, port: u16) -> Result<SocketAddr, BinaryError> {
    tokio::net::lookup_host((host, port))
        .await?
        .next()
        .ok_or_else(|| BinaryError::Address(format!("{}:{}", host, port)))
}

fn shutdown_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let cancel = token.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Shutdown requested"),
            Err(e) => warn!("Cannot listen for Ctrl-C: {}", e),
        }
        cancel.cancel();
    });
    token
}

async fn run(cli: Cli) -> Result<(), BinaryError> {
    let mut config = Config::load(cli.config.as_deref())?;
    cli.apply(&mut config);

    let server = McpServer::from_config(&config)?;
    info!(
        "Starting MCP server '{}' with {} data source(s)",
        server.name(),
        server.sources().len()
    );
    server.start().await;

    let served = match config.server.transport {
        Transport::Stdio => serve_stdio(server.clone()).await,
        Transport::StreamableHttp => {
            let addr = resolve(&config.server.host, config.server.port).await?;
            serve_http(server.clone(), addr, shutdown_on_ctrl_c()).await
        }
    };

    server.stop().await;
    served?;
    Ok(())
}

#[tokio::main]
async fn main() -> miette::Result<()> {
    init_tracing();
    let cli = Cli::parse();
    run(cli).await?;
    Ok(())
}
