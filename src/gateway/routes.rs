//! Gateway route configuration.

use axum::Router;
use axum::routing::{get, post};
use utoipa::OpenApi;
use utoipa_scalar::{Scalar, Servable};

use super::backend::{McpBackend, ResourceInfo, ToolInfo};
use super::error::ErrorResponse;
use super::handlers::{
    self, AskLlmRequest, AskLlmResponse, AskRequest, AskResponse, DataSourcesResponse,
    HealthResponse, QueryRequest, QueryResponse, RefreshSchemaResponse, ResourcesResponse,
    RootResponse, SchemaResponse, ToolsResponse,
};
use super::state::AppState;

/// Register handlers generic over the backend type, applying the turbofish.
macro_rules! routes {
    ($B:ty => {
        $($method:ident $path:literal => $($handler:ident)::+),* $(,)?
    }) => {{
        let router = Router::new();
        $(
            let router = router.route($path, $method($($handler)::+::<$B>));
        )*
        router
    }};
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    info(
        title = "MCP Bridge Gateway",
        version = "0.1.0",
        description = "HTTP front end for MCP data source servers",
        license(name = "GPL-2.0")
    ),
    paths(
        handlers::root,
        handlers::health,
        handlers::list_tools,
        handlers::list_resources,
        handlers::get_schema,
        handlers::query,
        handlers::ask,
        handlers::ask_llm,
        handlers::refresh_schema,
        handlers::list_data_sources,
    ),
    components(
        schemas(
            RootResponse,
            HealthResponse,
            ToolInfo,
            ToolsResponse,
            ResourceInfo,
            ResourcesResponse,
            SchemaResponse,
            QueryRequest,
            QueryResponse,
            AskRequest,
            AskResponse,
            AskLlmRequest,
            AskLlmResponse,
            RefreshSchemaResponse,
            DataSourcesResponse,
            ErrorResponse,
        )
    ),
    tags(
        (name = "system", description = "Gateway and MCP server status"),
        (name = "mcp", description = "MCP tool and resource catalogue"),
        (name = "data", description = "Queries and schemas"),
        (name = "llm", description = "Natural language endpoints")
    )
)]
pub struct ApiDoc;

/// Create the gateway router with OpenAPI documentation at `/docs`.
pub fn create_router<B: McpBackend + 'static>(state: AppState<B>) -> Router {
    let api = ApiDoc::openapi();

    let system_routes = routes!(B => {
        get "/" => handlers::root,
        get "/health" => handlers::health,
        get "/tools" => handlers::list_tools,
        get "/resources" => handlers::list_resources,
    });

    let data_routes = routes!(B => {
        get "/schema" => handlers::get_schema,
        post "/query" => handlers::query,
        post "/refresh-schema" => handlers::refresh_schema,
        get "/data-sources" => handlers::list_data_sources,
    });

    let llm_routes = routes!(B => {
        post "/ask" => handlers::ask,
        post "/ask-llm" => handlers::ask_llm,
    });

    system_routes
        .merge(data_routes)
        .merge(llm_routes)
        .merge(Scalar::with_url("/docs", api))
        .with_state(state)
}
