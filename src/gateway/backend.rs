//! Where the gateway sends MCP traffic.
//!
//! [`RemoteBackend`] talks Streamable HTTP to a running `mcpb-server`;
//! [`EmbeddedBackend`] calls an in-process [`McpServer`] directly.

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use rmcp::model::{CallToolRequestParam, CallToolResult, ReadResourceRequestParam, ResourceContents};
use rmcp::service::{Peer, RunningService, ServiceError};
use rmcp::transport::StreamableHttpClientTransport;
use rmcp::{RoleClient, ServiceExt};
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use utoipa::ToSchema;

use super::error::{GatewayError, GatewayResult};
use crate::datasource::http::init_crypto;
use crate::mcp::McpServer;

/// A tool advertised by the MCP server.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct ToolInfo {
    #[schema(example = "query_database")]
    pub name: String,
    pub description: String,
}

/// A resource advertised by the MCP server.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct ResourceInfo {
    #[schema(example = "database://schema")]
    pub uri: String,
    pub name: String,
    pub description: String,
}

/// Flattened tool call result: joined text content plus the error flag.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutput {
    pub is_error: bool,
    pub text: String,
}

impl ToolOutput {
    pub fn ok(text: impl Into<String>) -> Self {
        Self {
            is_error: false,
            text: text.into(),
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            is_error: true,
            text: text.into(),
        }
    }

    /// Decode the text as JSON, falling back to a JSON string.
    pub fn json(&self) -> Value {
        serde_json::from_str(&self.text).unwrap_or_else(|_| Value::String(self.text.clone()))
    }

    /// The message of an error result (`{"error": ...}` bodies are unwrapped).
    pub fn error_message(&self) -> String {
        match self.json() {
            Value::Object(map) => match map.get("error") {
                Some(Value::String(message)) => message.clone(),
                Some(other) => other.to_string(),
                None => self.text.clone(),
            },
            _ => self.text.clone(),
        }
    }
}

impl From<CallToolResult> for ToolOutput {
    fn from(result: CallToolResult) -> Self {
        let text = result
            .content
            .iter()
            .filter_map(|content| content.as_text().map(|t| t.text.as_str()))
            .collect::<Vec<_>>()
            .join("\n");
        Self {
            is_error: result.is_error.unwrap_or(false),
            text,
        }
    }
}

/// Operations the gateway needs from an MCP server.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait McpBackend: Send + Sync {
    /// Human readable location of the server, shown by `/health`.
    fn describe(&self) -> String;

    async fn list_tools(&self) -> GatewayResult<Vec<ToolInfo>>;

    async fn list_resources(&self) -> GatewayResult<Vec<ResourceInfo>>;

    async fn call_tool(&self, name: &str, arguments: Map<String, Value>) -> GatewayResult<ToolOutput>;

    /// Text of the resource at `uri`.
    async fn read_resource(&self, uri: &str) -> GatewayResult<String>;
}

fn resource_text(contents: Vec<ResourceContents>) -> String {
    contents
        .into_iter()
        .filter_map(|content| match content {
            ResourceContents::TextResourceContents { text, .. } => Some(text),
            ResourceContents::BlobResourceContents { .. } => None,
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// In-process backend sharing the server's data sources and caches.
#[derive(Clone)]
pub struct EmbeddedBackend {
    server: McpServer,
}

impl EmbeddedBackend {
    pub fn new(server: McpServer) -> Self {
        Self { server }
    }

    pub fn server(&self) -> &McpServer {
        &self.server
    }
}

#[async_trait]
impl McpBackend for EmbeddedBackend {
    fn describe(&self) -> String {
        format!("embedded:{}", self.server.name())
    }

    async fn list_tools(&self) -> GatewayResult<Vec<ToolInfo>> {
        Ok(self
            .server
            .tools()
            .into_iter()
            .map(|tool| ToolInfo {
                name: tool.name.to_string(),
                description: tool.description.map(|d| d.to_string()).unwrap_or_default(),
            })
            .collect())
    }

    async fn list_resources(&self) -> GatewayResult<Vec<ResourceInfo>> {
        Ok(self
            .server
            .resources()
            .into_iter()
            .map(|resource| ResourceInfo {
                uri: resource.raw.uri,
                name: resource.raw.name,
                description: resource.raw.description.unwrap_or_default(),
            })
            .collect())
    }

    async fn call_tool(&self, name: &str, arguments: Map<String, Value>) -> GatewayResult<ToolOutput> {
        let result = self.server.call_tool_by_name(name, Some(arguments)).await?;
        Ok(result.into())
    }

    async fn read_resource(&self, uri: &str) -> GatewayResult<String> {
        Ok(self.server.read_resource_text(uri).await?)
    }
}

type ClientSession = RunningService<RoleClient, ()>;

/// rmcp Streamable HTTP client. Connects on first use and reconnects after
/// transport failures.
pub struct RemoteBackend {
    url: String,
    session: Mutex<Option<ClientSession>>,
}

impl RemoteBackend {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            session: Mutex::new(None),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn peer(&self) -> GatewayResult<Peer<RoleClient>> {
        let mut session = self.session.lock().await;
        if let Some(running) = session.as_ref() {
            return Ok(running.peer().clone());
        }

        init_crypto();
        debug!(url = %self.url, "connecting to MCP server");
        let transport = StreamableHttpClientTransport::from_uri(self.url.clone());
        let running = ()
            .serve(transport)
            .await
            .map_err(|e| GatewayError::Unavailable(e.to_string()))?;
        info!(url = %self.url, "connected to MCP server");
        let peer = running.peer().clone();
        *session = Some(running);
        Ok(peer)
    }

    /// Map a client error; anything other than a protocol error drops the
    /// session so the next call reconnects.
    async fn fail(&self, error: ServiceError) -> GatewayError {
        match error {
            ServiceError::McpError(data) => data.into(),
            other => {
                warn!(url = %self.url, error = %other, "MCP session failed, dropping it");
                if let Some(running) = self.session.lock().await.take() {
                    let _ = running.cancel().await;
                }
                GatewayError::Unavailable(other.to_string())
            }
        }
    }
}

#[async_trait]
impl McpBackend for RemoteBackend {
    fn describe(&self) -> String {
        self.url.clone()
    }

    async fn list_tools(&self) -> GatewayResult<Vec<ToolInfo>> {
        let peer = self.peer().await?;
        match peer.list_all_tools().await {
            Ok(tools) => Ok(tools
                .into_iter()
                .map(|tool| ToolInfo {
                    name: tool.name.to_string(),
                    description: tool.description.map(|d| d.to_string()).unwrap_or_default(),
                })
                .collect()),
            Err(e) => Err(self.fail(e).await),
        }
    }

    async fn list_resources(&self) -> GatewayResult<Vec<ResourceInfo>> {
        let peer = self.peer().await?;
        match peer.list_all_resources().await {
            Ok(resources) => Ok(resources
                .into_iter()
                .map(|resource| ResourceInfo {
                    uri: resource.raw.uri,
                    name: resource.raw.name,
                    description: resource.raw.description.unwrap_or_default(),
                })
                .collect()),
            Err(e) => Err(self.fail(e).await),
        }
    }

    async fn call_tool(&self, name: &str, arguments: Map<String, Value>) -> GatewayResult<ToolOutput> {
        let peer = self.peer().await?;
        let request = CallToolRequestParam {
            name: name.to_string().into(),
            arguments: Some(arguments),
        };
        match peer.call_tool(request).await {
            Ok(result) => Ok(result.into()),
            Err(e) => Err(self.fail(e).await),
        }
    }

    async fn read_resource(&self, uri: &str) -> GatewayResult<String> {
        let peer = self.peer().await?;
        let request = ReadResourceRequestParam {
            uri: uri.to_string(),
        };
        match peer.read_resource(request).await {
            Ok(result) => Ok(resource_text(result.contents)),
            Err(e) => Err(self.fail(e).await),
        }
    }
}
