//! MCP server: one registry of data sources exposed as tools and resources.
//!
//! Every registered source `<name>` contributes
//! - the tool `query_<name>`
//! - the resources `<name>://schema` and `prompts://<name>`
//!
//! on top of the base tools (`list_data_sources`, `health_check`,
//! `refresh_schema`, `cache_stats`) and the `server://info` resource.
//!
//! Tool failures are reported as tool results with `is_error` set and a
//! `{"error": "..."}` body; protocol level errors are kept for unknown tools
//! and resources.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rmcp::{
    ErrorData as McpError, RoleServer, ServerHandler,
    handler::server::{router::tool::ToolRouter, wrapper::Parameters},
    model::*,
    schemars,
    schemars::JsonSchema,
    service::RequestContext,
    tool, tool_router,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use sha2::{Digest, Sha256};
use tracing::{debug, error, info, warn};

use super::error::ServerError;
use super::prompts;
use crate::cache::{CacheConfig, CacheKind, CacheManager};
use crate::config::Config;
use crate::datasource::{
    self, DataSource, DataSourceError, QueryRequest, describe, prompts_uri, schema_uri, tool_name,
};
use crate::schema::{SchemaStore, canonical_json, hex_digest, schema_hash};

const SERVER_INFO_URI: &str = "server://info";

#[derive(Debug, Default, Serialize, Deserialize, JsonSchema)]
pub struct RefreshSchemaParams {
    #[schemars(description = "Data source to refresh. Omit to refresh every data source.")]
    #[serde(default)]
    pub data_source: Option<String>,
}

struct ServerCore {
    name: String,
    sources: Vec<Arc<dyn DataSource>>,
    cache: CacheManager,
    schemas: SchemaStore,
}

/// MCP server handler. Cloning is cheap; every clone shares one registry.
#[derive(Clone)]
pub struct McpServer {
    core: Arc<ServerCore>,
    tool_router: ToolRouter<Self>,
}

/// Collects data sources before the server is built.
pub struct McpServerBuilder {
    name: String,
    cache: CacheConfig,
    resources_dir: PathBuf,
    sources: Vec<Arc<dyn DataSource>>,
}

impl McpServerBuilder {
    pub fn cache_config(mut self, cache: CacheConfig) -> Self {
        self.cache = cache;
        self
    }

    pub fn resources_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.resources_dir = dir.into();
        self
    }

    /// Register a source. Names must be unique.
    pub fn data_source(mut self, source: Arc<dyn DataSource>) -> Result<Self, ServerError> {
        datasource::validate_name(source.name())?;
        if self.sources.iter().any(|s| s.name() == source.name()) {
            return Err(ServerError::DuplicateDataSource(source.name().to_string()));
        }
        info!("Added data source: {} ({})", source.name(), source.kind());
        self.sources.push(source);
        Ok(self)
    }

    pub fn build(self) -> Result<McpServer, ServerError> {
        let schemas = SchemaStore::new(self.resources_dir)?;
        Ok(McpServer {
            core: Arc::new(ServerCore {
                name: self.name,
                sources: self.sources,
                cache: CacheManager::new(&self.cache),
                schemas,
            }),
            tool_router: McpServer::tool_router(),
        })
    }
}

fn json_text(value: &Value) -> Result<String, McpError> {
    serde_json::to_string_pretty(value)
        .map_err(|e| McpError::internal_error(format!("failed to encode result: {}", e), None))
}

fn success(value: &Value) -> Result<CallToolResult, McpError> {
    Ok(CallToolResult::success(vec![Content::text(json_text(value)?)]))
}

fn failure(message: impl std::fmt::Display) -> CallToolResult {
    CallToolResult::error(vec![Content::text(
        json!({ "error": message.to_string() }).to_string(),
    )])
}

/// Query cache key: `<source>:<sha256(query + params)>:<limit>`.
pub fn query_cache_key(source: &str, request: &QueryRequest) -> String {
    let mut hasher = Sha256::new();
    hasher.update(request.query.as_bytes());
    hasher.update(canonical_json(&Value::Object(request.params.clone())).as_bytes());
    format!(
        "{}:{}:{}",
        source,
        hex_digest(&hasher.finalize()),
        request.limit
    )
}

fn query_input_schema(source: &dyn DataSource) -> Map<String, Value> {
    let schema = json!({
        "type": "object",
        "properties": {
            "query": {"type": "string", "description": source.query_help()},
            "limit": {
                "type": "integer",
                "minimum": 1,
                "maximum": source.settings().max_query_limit,
                "default": datasource::DEFAULT_QUERY_LIMIT,
                "description": "Maximum number of records to return"
            },
            "params": {"type": "object", "description": "Source specific parameters"}
        },
        "required": ["query"]
    });
    match schema {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

fn resource(uri: String, name: String, description: String) -> Resource {
    let mut raw = RawResource::new(uri, name);
    raw.description = Some(description);
    raw.mime_type = Some("application/json".to_string());
    raw.no_annotation()
}

impl McpServer {
    pub fn builder(name: impl Into<String>) -> McpServerBuilder {
        McpServerBuilder {
            name: name.into(),
            cache: CacheConfig::default(),
            resources_dir: PathBuf::from("resources"),
            sources: Vec::new(),
        }
    }

    /// Build a server with every enabled data source of `config`.
    pub fn from_config(config: &Config) -> Result<Self, ServerError> {
        let mut builder = Self::builder(&config.server.name)
            .cache_config(config.server.cache.clone())
            .resources_dir(&config.server.resources_dir);
        for entry in config.enabled_sources() {
            let source = datasource::build(&entry.name, entry.settings.clone(), entry.adapter.clone())?;
            builder = builder.data_source(source)?;
        }
        builder.build()
    }

    pub fn name(&self) -> &str {
        &self.core.name
    }

    pub fn sources(&self) -> &[Arc<dyn DataSource>] {
        &self.core.sources
    }

    pub fn source(&self, name: &str) -> Option<&Arc<dyn DataSource>> {
        self.core.sources.iter().find(|s| s.name() == name)
    }

    pub fn cache(&self) -> &CacheManager {
        &self.core.cache
    }

    pub fn schema_store(&self) -> &SchemaStore {
        &self.core.schemas
    }

    /// Connect every source. Failures are logged; the server still starts.
    pub async fn start(&self) {
        info!("Starting MCP server: {}", self.name());
        match self.core.schemas.cleanup_stale() {
            Ok(0) => {}
            Ok(n) => info!("Removed {} stale cached schemas", n),
            Err(e) => warn!("Failed to clean up cached schemas: {}", e),
        }
        for source in self.sources() {
            match source.connect().await {
                Ok(()) => info!("Connected to data source: {}", source.name()),
                Err(e) => error!("Failed to connect to {}: {}", source.name(), e),
            }
        }
    }

    /// Disconnect every source.
    pub async fn stop(&self) {
        info!("Stopping MCP server: {}", self.name());
        for source in self.sources() {
            match source.disconnect().await {
                Ok(()) => info!("Disconnected from data source: {}", source.name()),
                Err(e) => error!("Error disconnecting from {}: {}", source.name(), e),
            }
        }
    }

    /// Base tools followed by one query tool per source.
    pub fn tools(&self) -> Vec<Tool> {
        let mut tools = self.tool_router.list_all();
        for source in self.sources() {
            tools.push(Tool::new(
                tool_name(source.name()),
                format!(
                    "Execute queries against the {} data source ({}). {}",
                    source.name(),
                    source.kind(),
                    source.query_help()
                ),
                Arc::new(query_input_schema(source.as_ref())),
            ));
        }
        tools
    }

    pub fn resources(&self) -> Vec<Resource> {
        let mut resources = vec![resource(
            SERVER_INFO_URI.to_string(),
            "server-info".to_string(),
            "Server information and registered data sources".to_string(),
        )];
        for source in self.sources() {
            resources.push(resource(
                schema_uri(source.name()),
                format!("{}-schema", source.name()),
                format!("Schema of the {} data source", source.name()),
            ));
            resources.push(resource(
                prompts_uri(source.name()),
                format!("{}-prompts", source.name()),
                format!("LLM prompt templates for the {} data source", source.name()),
            ));
        }
        resources
    }

    /// Dispatch a tool call by name. Shared by the MCP handler and the
    /// gateway's in-process backend.
    pub async fn call_tool_by_name(
        &self,
        name: &str,
        arguments: Option<Map<String, Value>>,
    ) -> Result<CallToolResult, McpError> {
        let arguments = arguments.unwrap_or_default();
        match name {
            "list_data_sources" => self.list_data_sources().await,
            "health_check" => self.health_check().await,
            "cache_stats" => self.cache_stats().await,
            "refresh_schema" => {
                let params: RefreshSchemaParams = serde_json::from_value(Value::Object(arguments))
                    .map_err(|e| McpError::invalid_params(e.to_string(), None))?;
                self.refresh_schema(Parameters(params)).await
            }
            other => {
                let source = other
                    .strip_prefix("query_")
                    .and_then(|source| self.source(source))
                    .ok_or_else(|| {
                        McpError::invalid_params(format!("Unknown tool: {}", other), None)
                    })?;
                Ok(self.run_query(source.as_ref(), arguments).await)
            }
        }
    }

    async fn run_query(&self, source: &dyn DataSource, arguments: Map<String, Value>) -> CallToolResult {
        let request: QueryRequest = match serde_json::from_value(Value::Object(arguments)) {
            Ok(request) => request,
            Err(e) => return failure(format!("Invalid query parameters: {}", e)),
        };
        if let Err(e) = source.validate_query(&request) {
            return failure(e);
        }

        let key = query_cache_key(source.name(), &request);
        let rows = match self.core.cache.get(CacheKind::Query, &key) {
            Some(cached) => {
                debug!("Cache hit for query on {}", source.name());
                cached
            }
            None => match source.query(&request).await {
                Ok(rows) => {
                    let rows = Value::Array(rows);
                    let ttl = Duration::from_secs(source.settings().query_cache_ttl);
                    self.core.cache.set(CacheKind::Query, key, rows.clone(), Some(ttl));
                    rows
                }
                Err(e) => {
                    error!("Query error for {}: {}", source.name(), e);
                    return failure(e);
                }
            },
        };
        match json_text(&rows) {
            Ok(text) => CallToolResult::success(vec![Content::text(text)]),
            Err(e) => failure(e.message),
        }
    }

    /// Schema of `source`: schema cache, then the store, then regenerated.
    pub async fn schema(&self, source: &dyn DataSource) -> Result<Value, DataSourceError> {
        let name = source.name();
        if let Some(schema) = self.core.cache.get(CacheKind::Schema, name) {
            return Ok(schema);
        }
        let schema = match self.core.schemas.get(name) {
            Some(schema) => schema,
            None => self.regenerate_schema(source).await?,
        };
        self.core.cache.set(
            CacheKind::Schema,
            name,
            schema.clone(),
            Some(Duration::from_secs(source.settings().schema_cache_ttl)),
        );
        Ok(schema)
    }

    async fn regenerate_schema(&self, source: &dyn DataSource) -> Result<Value, DataSourceError> {
        let schema = serde_json::to_value(source.get_schema().await?)?;
        if let Err(e) = self.core.schemas.save(source.name(), &schema) {
            warn!("Failed to persist schema for {}: {}", source.name(), e);
        }
        Ok(schema)
    }

    async fn refresh_one(&self, source: &dyn DataSource) -> Result<Value, DataSourceError> {
        self.core.cache.delete(CacheKind::Schema, source.name());
        let schema = self.regenerate_schema(source).await?;
        Ok(json!({
            "status": "success",
            "data_source": source.name(),
            "generated_at": schema["metadata"]["generated_at"],
            "hash": schema_hash(&schema),
        }))
    }

    /// Aggregate health of every source.
    pub async fn health(&self) -> Value {
        let mut reports = Map::new();
        let mut healthy = true;
        for source in self.sources() {
            let report = source.health_check().await;
            healthy &= report.is_healthy();
            reports.insert(
                source.name().to_string(),
                serde_json::to_value(&report).unwrap_or(Value::Null),
            );
        }
        json!({
            "status": if healthy { "healthy" } else { "degraded" },
            "server": self.name(),
            "data_sources": reports,
            "timestamp": Utc::now(),
        })
    }

    fn server_info(&self) -> Value {
        let sources: Vec<Value> = self.sources().iter().map(|s| describe(s.as_ref())).collect();
        json!({
            "name": self.name(),
            "version": crate::version(),
            "status": "running",
            "data_sources": sources,
            "timestamp": Utc::now(),
        })
    }

    /// Text of the resource at `uri`.
    pub async fn read_resource_text(&self, uri: &str) -> Result<String, McpError> {
        if uri == SERVER_INFO_URI {
            return json_text(&self.server_info());
        }
        // A registered `<source>://schema` wins over the `prompts://` scheme.
        if let Some(source) = uri.strip_suffix("://schema").and_then(|name| self.source(name)) {
            let schema = self.schema(source.as_ref()).await.map_err(|e| {
                error!("Schema generation error for {}: {}", source.name(), e);
                McpError::internal_error(e.to_string(), None)
            })?;
            return json_text(&schema);
        }
        if let Some(name) = uri.strip_prefix("prompts://") {
            let source = self.source(name).ok_or_else(|| not_found(uri))?;
            let document =
                prompts::prompt_document(name, source.kind(), source.settings().max_query_limit);
            return json_text(&document);
        }
        Err(not_found(uri))
    }
}

fn not_found(uri: &str) -> McpError {
    McpError::resource_not_found(format!("Resource not found: {}", uri), None)
}

#[tool_router]
impl McpServer {
    #[tool(description = "List all registered data sources with their type, connection state and redacted configuration")]
    pub async fn list_data_sources(&self) -> Result<CallToolResult, McpError> {
        let sources: Vec<Value> = self.sources().iter().map(|s| describe(s.as_ref())).collect();
        success(&Value::Array(sources))
    }

    #[tool(description = "Check the health of every data source")]
    pub async fn health_check(&self) -> Result<CallToolResult, McpError> {
        success(&self.health().await)
    }

    #[tool(description = "Regenerate and store the schema of one data source, or of all of them")]
    pub async fn refresh_schema(
        &self,
        Parameters(params): Parameters<RefreshSchemaParams>,
    ) -> Result<CallToolResult, McpError> {
        match params.data_source.filter(|s| !s.is_empty()) {
            Some(name) => {
                let Some(source) = self.source(&name) else {
                    return Ok(failure(format!("Data source '{}' not found", name)));
                };
                match self.refresh_one(source.as_ref()).await {
                    Ok(result) => success(&result),
                    Err(e) => Ok(failure(e)),
                }
            }
            None => {
                let mut results = Map::new();
                for source in self.sources() {
                    let result = match self.refresh_one(source.as_ref()).await {
                        Ok(_) => json!({"status": "success"}),
                        Err(e) => json!({"status": "error", "error": e.to_string()}),
                    };
                    results.insert(source.name().to_string(), result);
                }
                success(&Value::Object(results))
            }
        }
    }

    #[tool(description = "Cache hit and miss statistics for the query, schema and metadata caches")]
    pub async fn cache_stats(&self) -> Result<CallToolResult, McpError> {
        let stats = serde_json::to_value(self.cache().stats())
            .map_err(|e| McpError::internal_error(e.to_string(), None))?;
        success(&stats)
    }
}

impl ServerHandler for McpServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            capabilities: ServerCapabilities::builder()
                .enable_tools()
                .enable_resources()
                .build(),
            server_info: Implementation {
                name: self.name().to_string(),
                version: crate::version().to_string(),
                ..Default::default()
            },
            instructions: Some(format!(
                "Read-only access to {} data source(s). Call query_<name> to fetch records and read <name>://schema to see what is available.",
                self.sources().len()
            )),
            ..Default::default()
        }
    }

    async fn list_tools(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, McpError> {
        Ok(ListToolsResult::with_all_items(self.tools()))
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParam,
        _context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        self.call_tool_by_name(&request.name, request.arguments).await
    }

    async fn list_resources(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListResourcesResult, McpError> {
        Ok(ListResourcesResult::with_all_items(self.resources()))
    }

    async fn read_resource(
        &self,
        request: ReadResourceRequestParam,
        _context: RequestContext<RoleServer>,
    ) -> Result<ReadResourceResult, McpError> {
        let text = self.read_resource_text(&request.uri).await?;
        Ok(ReadResourceResult {
            contents: vec![ResourceContents::text(text, request.uri)],
        })
    }
}
