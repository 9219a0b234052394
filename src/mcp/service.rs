//! Transports: Streamable HTTP (nested under `/mcp` in an axum router) and stdio.

use std::net::SocketAddr;

use axum::Router;
use axum::routing::get;
use rmcp::ServiceExt;
use rmcp::transport::streamable_http_server::{
    StreamableHttpServerConfig, StreamableHttpService, session::local::LocalSessionManager,
};
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::info;

use super::error::ServerError;
use super::server::McpServer;

/// Create the Streamable HTTP service.
///
/// Each session gets a clone of `server`; clones share the same data sources
/// and caches.
///
/// # Example
/// ```no_run
/// use axum::Router;
/// # use mcp_bridge::mcp::{McpServer, create_mcp_service};
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let server = McpServer::builder("demo").build()?;
/// let app: Router = Router::new().nest_service("/mcp", create_mcp_service(server));
/// # Ok(())
/// # }
/// ```
pub fn create_mcp_service(server: McpServer) -> StreamableHttpService<McpServer> {
    let service_factory = move || -> Result<McpServer, std::io::Error> { Ok(server.clone()) };

    let config = StreamableHttpServerConfig {
        stateful_mode: true,
        ..Default::default()
    };

    StreamableHttpService::new(
        service_factory,
        LocalSessionManager::default().into(),
        config,
    )
}

/// Router serving MCP at `/mcp` plus a plain liveness check at `/health`.
pub fn create_router(server: McpServer) -> Router {
    let name = server.name().to_string();
    Router::new()
        .nest_service("/mcp", create_mcp_service(server))
        .route(
            "/health",
            get(move || {
                let name = name.clone();
                async move { axum::Json(serde_json::json!({"status": "ok", "server": name})) }
            }),
        )
        .layer(TraceLayer::new_for_http())
}

/// Serve over Streamable HTTP until `shutdown` is cancelled.
pub async fn serve_http(
    server: McpServer,
    addr: SocketAddr,
    shutdown: CancellationToken,
) -> Result<(), ServerError> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(
        "MCP server '{}' listening on http://{}/mcp",
        server.name(),
        listener.local_addr()?
    );

    axum::serve(listener, create_router(server))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    Ok(())
}

/// Serve a single client over stdin/stdout until it disconnects.
pub async fn serve_stdio(server: McpServer) -> Result<(), ServerError> {
    info!("MCP server '{}' serving on stdio", server.name());
    let running = server
        .serve(rmcp::transport::stdio())
        .await
        .map_err(|e| ServerError::Transport(e.to_string()))?;
    let reason = running
        .waiting()
        .await
        .map_err(|e| ServerError::Transport(e.to_string()))?;
    info!("MCP stdio session ended: {:?}", reason);
    Ok(())
}
