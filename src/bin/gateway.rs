//! HTTP gateway binary.
//!
//! Forwards REST requests to a remote MCP server, or with `--embedded` to an
//! in-process server built from the same configuration `mcpb-server` reads.

use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use mcp_bridge::config::{Config, ConfigError};
use mcp_bridge::gateway::{
    self, AppState, EmbeddedBackend, GatewayConfig, GatewayError, HttpLanguageModel, LanguageModel,
    LlmConfig, McpBackend, RemoteBackend, parse_origins,
};
use mcp_bridge::logging::init_tracing;
use mcp_bridge::mcp::{McpServer, ServerError};
use miette::Diagnostic;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Error, Diagnostic, Debug)]
enum BinaryError {
    #[error("Configuration error: {0}")]
    #[diagnostic(code(mcp_bridge::binary::config))]
    Config(#[from] ConfigError),

    #[error("Embedded server error: {0}")]
    #[diagnostic(code(mcp_bridge::binary::server))]
    Server(#[from] ServerError),

    #[error("Gateway error: {0}")]
    #[diagnostic(code(mcp_bridge::binary::gateway))]
    Gateway(#[from] GatewayError),
}

#[derive(Parser)]
#[command(name = "mcpb-gateway")]
#[command(author, version, about = "HTTP gateway for MCP data source servers", long_about = None)]
struct Cli {
    /// Streamable HTTP endpoint of the MCP server
    #[arg(long, env = "MCP_SERVER_URL", default_value = "http://127.0.0.1:8000/mcp")]
    mcp_server_url: String,

    /// Run the MCP server in-process instead of connecting to one
    #[arg(long)]
    embedded: bool,

    /// YAML configuration for the embedded server
    #[arg(short, long, env = "MCP_CONFIG")]
    config: Option<PathBuf>,

    /// Host address to bind to
    #[arg(long, env = "CLIENT_HOST", default_value = "0.0.0.0")]
    host: IpAddr,

    /// Port to listen on
    #[arg(short, long, env = "CLIENT_PORT", default_value = "8001")]
    port: u16,

    /// Comma separated allowed CORS origins
    #[arg(long, env = "CORS_ORIGINS", default_value = "*")]
    cors_origins: String,

    /// Data source used when a request names none
    #[arg(long, env = "DEFAULT_DATA_SOURCE")]
    default_data_source: Option<String>,

    /// OpenAI-compatible API base URL; enables /ask and /ask-llm
    #[arg(long, env = "LLM_API_URL")]
    llm_api_url: Option<String>,

    #[arg(long, env = "LLM_API_KEY", hide_env_values = true)]
    llm_api_key: Option<String>,

    #[arg(long, env = "LLM_MODEL", default_value = "gpt-4o-mini")]
    llm_model: String,

    #[arg(long, env = "LLM_TEMPERATURE", default_value_t = LlmConfig::DEFAULT_TEMPERATURE)]
    llm_temperature: f32,

    #[arg(long, env = "LLM_MAX_TOKENS", default_value_t = LlmConfig::DEFAULT_MAX_TOKENS)]
    llm_max_tokens: u32,
}

impl Cli {
    fn gateway_config(&self) -> GatewayConfig {
        GatewayConfig {
            host: self.host,
            port: self.port,
            cors_origins: parse_origins(&self.cors_origins),
        }
    }

    fn language_model(&self) -> Result<Option<Arc<dyn LanguageModel>>, GatewayError> {
        let Some(url) = &self.llm_api_url else {
            info!("No LLM configured; /ask and /ask-llm will answer 501");
            return Ok(None);
        };
        let mut config = LlmConfig::new(url.clone(), self.llm_model.clone());
        config.api_key = self.llm_api_key.clone();
        config.temperature = self.llm_temperature;
        config.max_tokens = self.llm_max_tokens;
        info!(model = %config.model, "LLM enabled");
        Ok(Some(Arc::new(HttpLanguageModel::new(config)?)))
    }
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

async fn serve<B: McpBackend + 'static>(cli: &Cli, backend: B) -> Result<(), BinaryError> {
    let mut state = AppState::new(backend).with_default_data_source(cli.default_data_source.clone());
    if let Some(llm) = cli.language_model()? {
        state = state.with_llm(llm);
    }
    gateway::run(cli.gateway_config(), state, shutdown_on_ctrl_c()).await?;
    Ok(())
}

async fn run(cli: Cli) -> Result<(), BinaryError> {
    if cli.embedded {
        let config = Config::load(cli.config.as_deref())?;
        let server = McpServer::from_config(&config)?;
        server.start().await;
        let served = serve(&cli, EmbeddedBackend::new(server.clone())).await;
        server.stop().await;
        served
    } else {
        serve(&cli, RemoteBackend::new(cli.mcp_server_url.clone())).await
    }
}

#[tokio::main]
async fn main() -> miette::Result<()> {
    init_tracing();
    let cli = Cli::parse();
    run(cli).await?;
    Ok(())
}
