//! Gateway errors and their HTTP mapping.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use miette::Diagnostic;
use rmcp::ErrorData as McpError;
use rmcp::model::ErrorCode;
use serde::Serialize;
use thiserror::Error;
use utoipa::ToSchema;

/// Error body returned by every gateway route.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    /// Human readable error message
    #[schema(example = "Unknown data source: crm")]
    pub error: String,
}

#[derive(Error, Diagnostic, Debug)]
pub enum GatewayError {
    #[error("{0}")]
    #[diagnostic(code(mcp_bridge::gateway::bad_request))]
    BadRequest(String),

    #[error("{0}")]
    #[diagnostic(code(mcp_bridge::gateway::not_found))]
    NotFound(String),

    #[error("Natural language processing not configured")]
    #[diagnostic(
        code(mcp_bridge::gateway::llm_not_configured),
        help("Set LLM_API_URL and LLM_MODEL to enable /ask and /ask-llm")
    )]
    LlmNotConfigured,

    #[error("LLM request failed: {0}")]
    #[diagnostic(code(mcp_bridge::gateway::llm))]
    Llm(String),

    #[error("MCP server error: {0}")]
    #[diagnostic(code(mcp_bridge::gateway::upstream))]
    Upstream(String),

    #[error("MCP server unavailable: {0}")]
    #[diagnostic(code(mcp_bridge::gateway::unavailable))]
    Unavailable(String),

    #[error("{0}")]
    #[diagnostic(code(mcp_bridge::gateway::internal))]
    Internal(String),

    #[error("I/O error: {0}")]
    #[diagnostic(code(mcp_bridge::gateway::io))]
    Io(#[from] std::io::Error),
}

pub type GatewayResult<T> = Result<T, GatewayError>;

impl GatewayError {
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::BadRequest(_) => StatusCode::BAD_REQUEST,
            GatewayError::NotFound(_) => StatusCode::NOT_FOUND,
            GatewayError::LlmNotConfigured => StatusCode::NOT_IMPLEMENTED,
            GatewayError::Llm(_) | GatewayError::Upstream(_) => StatusCode::BAD_GATEWAY,
            GatewayError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::Internal(_) | GatewayError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<McpError> for GatewayError {
    fn from(error: McpError) -> Self {
        let message = error.message.to_string();
        if error.code == ErrorCode::RESOURCE_NOT_FOUND {
            GatewayError::NotFound(message)
        } else if error.code == ErrorCode::INVALID_PARAMS {
            GatewayError::BadRequest(message)
        } else {
            GatewayError::Upstream(message)
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(status = status.as_u16(), "{}", self);
        } else {
            tracing::debug!(status = status.as_u16(), "{}", self);
        }
        (
            status,
            Json(ErrorResponse {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}
