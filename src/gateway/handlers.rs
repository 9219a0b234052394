//! Gateway route handlers.
//!
//! Every route forwards to the MCP backend: `/query` calls
//! `query_<data_source>`, `/schema` reads `<data_source>://schema`, and the
//! `/ask*` routes put a language model in front of those calls.

use std::collections::BTreeMap;

use axum::{
    Json,
    extract::{Query, State},
    http::StatusCode,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::{info, instrument, warn};
use utoipa::{IntoParams, ToSchema};

use super::backend::{McpBackend, ResourceInfo, ToolInfo, ToolOutput};
use super::error::{ErrorResponse, GatewayError, GatewayResult};
use super::llm::{LlmAction, extract_sql, parse_action};
use super::state::AppState;
use crate::datasource::tool_name;
use crate::mcp::prompts;

pub const MAX_LIMIT: usize = 1000;
const DEFAULT_LIMIT: usize = 100;

fn default_limit() -> usize {
    DEFAULT_LIMIT
}

// =============================================================================
// DTOs
// =============================================================================

/// Service banner
#[derive(Serialize, ToSchema)]
pub struct RootResponse {
    #[schema(example = "mcp-bridge gateway")]
    pub name: String,
    #[schema(example = "0.1.0")]
    pub version: String,
    /// Where MCP traffic goes
    #[schema(example = "http://127.0.0.1:8000/mcp")]
    pub mcp_server: String,
    /// Route path to description
    pub endpoints: BTreeMap<String, String>,
}

/// Health of the upstream MCP server
#[derive(Serialize, ToSchema)]
pub struct HealthResponse {
    #[schema(example = "healthy")]
    pub status: String,
    #[schema(example = "http://127.0.0.1:8000/mcp")]
    pub server_url: String,
    /// Number of tools the server advertises
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Serialize, ToSchema)]
pub struct ToolsResponse {
    pub tools: Vec<ToolInfo>,
}

#[derive(Serialize, ToSchema)]
pub struct ResourcesResponse {
    pub resources: Vec<ResourceInfo>,
}

/// Optional data source selector
#[derive(Debug, Deserialize, IntoParams)]
pub struct DataSourceQuery {
    /// Data source name; falls back to the configured default
    #[param(example = "database")]
    pub data_source: Option<String>,
}

#[derive(Serialize, ToSchema)]
pub struct SchemaResponse {
    pub success: bool,
    #[schema(example = "database")]
    pub data_source: String,
    pub schema: Value,
}

/// Query request DTO
#[derive(Debug, Deserialize, ToSchema)]
pub struct QueryRequest {
    /// Native query for the data source (SQL, endpoint, path, JQL)
    #[schema(example = "SELECT id, name FROM users")]
    pub query: String,
    /// Maximum rows, 1 to 1000
    #[serde(default = "default_limit")]
    #[schema(example = 100, minimum = 1, maximum = 1000)]
    pub limit: usize,
    #[schema(example = "database")]
    pub data_source: Option<String>,
}

#[derive(Serialize, ToSchema)]
pub struct QueryResponse {
    pub success: bool,
    pub data: Value,
    #[schema(example = 2)]
    pub count: usize,
}

/// Natural language question answered with generated SQL
#[derive(Debug, Deserialize, ToSchema)]
pub struct AskRequest {
    #[schema(example = "How many users signed up last week?")]
    pub question: String,
    #[serde(default = "default_limit")]
    #[schema(example = 100, minimum = 1, maximum = 1000)]
    pub limit: usize,
    pub data_source: Option<String>,
}

#[derive(Serialize, ToSchema)]
pub struct AskResponse {
    pub success: bool,
    pub question: String,
    #[schema(example = "SELECT COUNT(*) FROM users;")]
    pub generated_sql: String,
    pub data: Value,
    pub count: usize,
}

/// Natural language request answered with a model-chosen MCP action
#[derive(Debug, Deserialize, ToSchema)]
pub struct AskLlmRequest {
    #[schema(example = "What tables does the database have?")]
    pub question: String,
    pub data_source: Option<String>,
}

#[derive(Serialize, ToSchema)]
pub struct AskLlmResponse {
    pub success: bool,
    pub question: String,
    /// The action the model chose
    pub action: Value,
    pub result: Value,
}

#[derive(Serialize, ToSchema)]
pub struct RefreshSchemaResponse {
    pub success: bool,
    #[schema(example = "Schema refreshed successfully")]
    pub message: String,
    pub result: Value,
}

#[derive(Serialize, ToSchema)]
pub struct DataSourcesResponse {
    pub success: bool,
    pub data_sources: Value,
}

// =============================================================================
// Helpers
// =============================================================================

fn check_limit(limit: usize) -> GatewayResult<()> {
    if (1..=MAX_LIMIT).contains(&limit) {
        Ok(())
    } else {
        Err(GatewayError::BadRequest(format!(
            "limit must be between 1 and {}",
            MAX_LIMIT
        )))
    }
}

/// Row count of a query result: array length, otherwise one.
fn result_count(data: &Value) -> usize {
    match data {
        Value::Array(rows) => rows.len(),
        _ => 1,
    }
}

/// Fail with 400 carrying the tool's own error message.
fn tool_success(output: ToolOutput) -> GatewayResult<Value> {
    if output.is_error {
        Err(GatewayError::BadRequest(output.error_message()))
    } else {
        Ok(output.json())
    }
}

/// Pick the data source: the request's, the configured default, or the
/// first one the server advertises. The source must have a query tool.
async fn resolve_data_source<B: McpBackend>(
    state: &AppState<B>,
    requested: Option<String>,
) -> GatewayResult<String> {
    let tools = state.backend().list_tools().await?;
    let query_tools = tools.iter().filter_map(|t| t.name.strip_prefix("query_"));

    let name = match requested.or_else(|| state.default_data_source().map(str::to_string)) {
        Some(name) => name,
        None => query_tools
            .clone()
            .next()
            .map(str::to_string)
            .ok_or_else(|| GatewayError::NotFound("No data sources available".to_string()))?,
    };

    if query_tools.clone().any(|n| n == name) {
        Ok(name)
    } else {
        Err(GatewayError::NotFound(format!("Unknown data source: {}", name)))
    }
}

async fn run_query<B: McpBackend>(
    state: &AppState<B>,
    data_source: &str,
    query: &str,
    limit: usize,
) -> GatewayResult<Value> {
    let mut args = Map::new();
    args.insert("query".to_string(), Value::String(query.to_string()));
    args.insert("limit".to_string(), json!(limit));
    let output = state.backend().call_tool(&tool_name(data_source), args).await?;
    tool_success(output)
}

// =============================================================================
// Handlers
// =============================================================================

/// Service banner and endpoint map
#[utoipa::path(
    get,
    path = "/",
    tag = "system",
    responses(
        (status = 200, description = "Service information", body = RootResponse)
    )
)]
#[instrument(skip(state))]
pub async fn root<B: McpBackend>(State(state): State<AppState<B>>) -> Json<RootResponse> {
    let endpoints = [
        ("/health", "MCP server health"),
        ("/tools", "List MCP tools"),
        ("/resources", "List MCP resources"),
        ("/schema", "Schema of a data source"),
        ("/query", "Run a native query against a data source"),
        ("/ask", "Answer a question with generated SQL"),
        ("/ask-llm", "Answer a question with a model-chosen MCP action"),
        ("/refresh-schema", "Regenerate cached schemas"),
        ("/data-sources", "List configured data sources"),
        ("/docs", "API reference"),
    ]
    .into_iter()
    .map(|(path, description)| (path.to_string(), description.to_string()))
    .collect();

    Json(RootResponse {
        name: "mcp-bridge gateway".to_string(),
        version: crate::version().to_string(),
        mcp_server: state.backend().describe(),
        endpoints,
    })
}

/// MCP server health
///
/// Healthy when the server answers a tool listing.
#[utoipa::path(
    get,
    path = "/health",
    tag = "system",
    responses(
        (status = 200, description = "MCP server reachable", body = HealthResponse),
        (status = 503, description = "MCP server unreachable", body = HealthResponse)
    )
)]
#[instrument(skip(state))]
pub async fn health<B: McpBackend>(
    State(state): State<AppState<B>>,
) -> (StatusCode, Json<HealthResponse>) {
    let server_url = state.backend().describe();
    match state.backend().list_tools().await {
        Ok(tools) => (
            StatusCode::OK,
            Json(HealthResponse {
                status: "healthy".to_string(),
                server_url,
                tools: Some(tools.len()),
                error: None,
            }),
        ),
        Err(e) => {
            warn!("MCP server health check failed: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthResponse {
                    status: "unhealthy".to_string(),
                    server_url,
                    tools: None,
                    error: Some(e.to_string()),
                }),
            )
        }
    }
}

/// List MCP tools
#[utoipa::path(
    get,
    path = "/tools",
    tag = "mcp",
    responses(
        (status = 200, description = "Tools advertised by the MCP server", body = ToolsResponse),
        (status = 503, description = "MCP server unreachable", body = ErrorResponse)
    )
)]
#[instrument(skip(state))]
pub async fn list_tools<B: McpBackend>(
    State(state): State<AppState<B>>,
) -> GatewayResult<Json<ToolsResponse>> {
    let tools = state.backend().list_tools().await?;
    Ok(Json(ToolsResponse { tools }))
}

/// List MCP resources
#[utoipa::path(
    get,
    path = "/resources",
    tag = "mcp",
    responses(
        (status = 200, description = "Resources advertised by the MCP server", body = ResourcesResponse),
        (status = 503, description = "MCP server unreachable", body = ErrorResponse)
    )
)]
#[instrument(skip(state))]
pub async fn list_resources<B: McpBackend>(
    State(state): State<AppState<B>>,
) -> GatewayResult<Json<ResourcesResponse>> {
    let resources = state.backend().list_resources().await?;
    Ok(Json(ResourcesResponse { resources }))
}

/// Schema of a data source
#[utoipa::path(
    get,
    path = "/schema",
    tag = "data",
    params(DataSourceQuery),
    responses(
        (status = 200, description = "Data source schema", body = SchemaResponse),
        (status = 404, description = "Unknown data source", body = ErrorResponse),
        (status = 502, description = "Schema generation failed", body = ErrorResponse)
    )
)]
#[instrument(skip(state))]
pub async fn get_schema<B: McpBackend>(
    State(state): State<AppState<B>>,
    Query(params): Query<DataSourceQuery>,
) -> GatewayResult<Json<SchemaResponse>> {
    let data_source = resolve_data_source(&state, params.data_source).await?;
    let text = state
        .backend()
        .read_resource(&crate::datasource::schema_uri(&data_source))
        .await?;
    let schema = serde_json::from_str(&text).unwrap_or(Value::String(text));
    Ok(Json(SchemaResponse {
        success: true,
        data_source,
        schema,
    }))
}

/// Run a native query
///
/// Forwards to the `query_<data_source>` tool.
#[utoipa::path(
    post,
    path = "/query",
    tag = "data",
    request_body = QueryRequest,
    responses(
        (status = 200, description = "Query results", body = QueryResponse),
        (status = 400, description = "Invalid query or limit", body = ErrorResponse),
        (status = 404, description = "Unknown data source", body = ErrorResponse)
    )
)]
#[instrument(skip(state))]
pub async fn query<B: McpBackend>(
    State(state): State<AppState<B>>,
    Json(req): Json<QueryRequest>,
) -> GatewayResult<Json<QueryResponse>> {
    check_limit(req.limit)?;
    if req.query.trim().is_empty() {
        return Err(GatewayError::BadRequest("query must not be empty".to_string()));
    }
    let data_source = resolve_data_source(&state, req.data_source).await?;
    let data = run_query(&state, &data_source, &req.query, req.limit).await?;
    Ok(Json(QueryResponse {
        success: true,
        count: result_count(&data),
        data,
    }))
}

/// Answer a question with generated SQL
///
/// Reads the data source schema, asks the language model for one SELECT
/// statement, and runs it through the query tool.
#[utoipa::path(
    post,
    path = "/ask",
    tag = "llm",
    request_body = AskRequest,
    responses(
        (status = 200, description = "Generated SQL and its results", body = AskResponse),
        (status = 400, description = "No SQL could be generated or the query failed", body = ErrorResponse),
        (status = 501, description = "No language model configured", body = ErrorResponse)
    )
)]
#[instrument(skip(state))]
pub async fn ask<B: McpBackend>(
    State(state): State<AppState<B>>,
    Json(req): Json<AskRequest>,
) -> GatewayResult<Json<AskResponse>> {
    let llm = state.llm().cloned().ok_or(GatewayError::LlmNotConfigured)?;
    check_limit(req.limit)?;
    let data_source = resolve_data_source(&state, req.data_source).await?;

    let schema_text = state
        .backend()
        .read_resource(&crate::datasource::schema_uri(&data_source))
        .await?;
    let prompt = prompts::sql_prompt(&req.question, &schema_text, req.limit);
    let completion = llm.complete(&prompt).await?;
    let sql = extract_sql(&completion).ok_or_else(|| {
        GatewayError::BadRequest("Could not generate SQL from your question".to_string())
    })?;
    info!(data_source = %data_source, sql = %sql, "generated SQL");

    let data = run_query(&state, &data_source, &sql, req.limit).await?;
    Ok(Json(AskResponse {
        success: true,
        question: req.question,
        generated_sql: sql,
        count: result_count(&data),
        data,
    }))
}

/// Answer a question with a model-chosen MCP action
///
/// The model sees the tool and resource catalogue and replies with a
/// `call_tool` or `read_resource` action, which is executed.
#[utoipa::path(
    post,
    path = "/ask-llm",
    tag = "llm",
    request_body = AskLlmRequest,
    responses(
        (status = 200, description = "Executed action and its result", body = AskLlmResponse),
        (status = 400, description = "The model returned no usable action", body = ErrorResponse),
        (status = 501, description = "No language model configured", body = ErrorResponse)
    )
)]
#[instrument(skip(state))]
pub async fn ask_llm<B: McpBackend>(
    State(state): State<AppState<B>>,
    Json(req): Json<AskLlmRequest>,
) -> GatewayResult<Json<AskLlmResponse>> {
    let llm = state.llm().cloned().ok_or(GatewayError::LlmNotConfigured)?;

    let tools: Vec<(String, String)> = state
        .backend()
        .list_tools()
        .await?
        .into_iter()
        .map(|t| (t.name, t.description))
        .collect();
    let resources: Vec<(String, String)> = state
        .backend()
        .list_resources()
        .await?
        .into_iter()
        .map(|r| (r.uri, r.description))
        .collect();

    // Schema context is best effort; the model can still pick an action without it.
    let schema_text = match resolve_data_source(&state, req.data_source).await {
        Ok(data_source) => state
            .backend()
            .read_resource(&crate::datasource::schema_uri(&data_source))
            .await
            .ok(),
        Err(_) => None,
    };

    let prompt = prompts::tool_prompt(&req.question, &tools, &resources, schema_text.as_deref());
    let completion = llm.complete(&prompt).await?;
    let action = parse_action(&completion)?;
    info!(?action, "executing LLM action");

    let result = match &action {
        LlmAction::CallTool { tool, args } => {
            tool_success(state.backend().call_tool(tool, args.clone()).await?)?
        }
        LlmAction::ReadResource { uri } => {
            let text = state.backend().read_resource(uri).await?;
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        }
    };

    Ok(Json(AskLlmResponse {
        success: true,
        question: req.question,
        action: serde_json::to_value(&action).map_err(|e| GatewayError::Internal(e.to_string()))?,
        result,
    }))
}

/// Regenerate cached schemas
///
/// Refreshes one data source, or all of them when none is named.
#[utoipa::path(
    post,
    path = "/refresh-schema",
    tag = "data",
    params(DataSourceQuery),
    responses(
        (status = 200, description = "Schemas refreshed", body = RefreshSchemaResponse),
        (status = 400, description = "Refresh failed", body = ErrorResponse)
    )
)]
#[instrument(skip(state))]
pub async fn refresh_schema<B: McpBackend>(
    State(state): State<AppState<B>>,
    Query(params): Query<DataSourceQuery>,
) -> GatewayResult<Json<RefreshSchemaResponse>> {
    let mut args = Map::new();
    if let Some(name) = params.data_source {
        args.insert("data_source".to_string(), Value::String(name));
    }
    let result = tool_success(state.backend().call_tool("refresh_schema", args).await?)?;
    Ok(Json(RefreshSchemaResponse {
        success: true,
        message: "Schema refreshed successfully".to_string(),
        result,
    }))
}

/// List configured data sources
#[utoipa::path(
    get,
    path = "/data-sources",
    tag = "data",
    responses(
        (status = 200, description = "Data sources with redacted configuration", body = DataSourcesResponse),
        (status = 503, description = "MCP server unreachable", body = ErrorResponse)
    )
)]
#[instrument(skip(state))]
pub async fn list_data_sources<B: McpBackend>(
    State(state): State<AppState<B>>,
) -> GatewayResult<Json<DataSourcesResponse>> {
    let data_sources = tool_success(
        state
            .backend()
            .call_tool("list_data_sources", Map::new())
            .await?,
    )?;
    Ok(Json(DataSourcesResponse {
        success: true,
        data_sources,
    }))
}
