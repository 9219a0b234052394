//! HTTP gateway: a REST front end that forwards to an MCP server.
//!
//! - **backend**: remote (Streamable HTTP client) or embedded MCP server
//! - **handlers** / **routes**: the axum application and its OpenAPI document
//! - **llm**: optional language model behind `/ask` and `/ask-llm`

mod backend;
mod error;
mod handlers;
pub mod llm;
mod routes;
mod state;

#[cfg(test)]
mod handlers_test;

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use axum::Router;
use axum::http::HeaderValue;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

pub use backend::{EmbeddedBackend, McpBackend, RemoteBackend, ResourceInfo, ToolInfo, ToolOutput};
pub use error::{ErrorResponse, GatewayError, GatewayResult};
pub use llm::{HttpLanguageModel, LanguageModel, LlmAction, LlmConfig, extract_sql, parse_action};
pub use routes::{ApiDoc, create_router};
pub use state::AppState;

/// Gateway server configuration
#[derive(Debug, Clone, PartialEq)]
pub struct GatewayConfig {
    /// Host address to bind to
    pub host: IpAddr,
    /// Port to listen on
    pub port: u16,
    /// Allowed CORS origins; `*` allows any
    pub cors_origins: Vec<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 8001,
            cors_origins: vec!["*".to_string()],
        }
    }
}

impl GatewayConfig {
    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

/// Split a comma separated origin list.
pub fn parse_origins(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

pub fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.is_empty() || origins.iter().any(|o| o == "*") {
        return layer.allow_origin(Any);
    }
    let values: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("Ignoring invalid CORS origin: {}", origin);
                None
            }
        })
        .collect();
    layer.allow_origin(AllowOrigin::list(values))
}

/// Router with tracing and CORS layers applied.
pub fn app<B: McpBackend + 'static>(state: AppState<B>, config: &GatewayConfig) -> Router {
    create_router(state)
        .layer(cors_layer(&config.cors_origins))
        .layer(TraceLayer::new_for_http())
}

/// Run the gateway until `shutdown` is cancelled.
pub async fn run<B: McpBackend + 'static>(
    config: GatewayConfig,
    state: AppState<B>,
    shutdown: CancellationToken,
) -> GatewayResult<()> {
    let mcp_server = state.backend().describe();
    let app = app(state, &config);

    let listener = tokio::net::TcpListener::bind(config.addr()).await?;
    info!(
        "Gateway listening on http://{} (MCP server: {})",
        listener.local_addr()?,
        mcp_server
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = GatewayConfig::default();
        assert_eq!(config.addr().to_string(), "0.0.0.0:8001");
        assert_eq!(config.cors_origins, vec!["*"]);
    }

    #[test]
    fn test_parse_origins() {
        assert_eq!(
            parse_origins("http://a.test, http://b.test,,"),
            vec!["http://a.test", "http://b.test"]
        );
        assert!(parse_origins("").is_empty());
    }
}
