//! Data source error types.
//!
//! Adapter failures are reported through one storage-agnostic enum so the
//! MCP layer can turn any of them into a `{"error": ...}` payload.

use miette::Diagnostic;
use thiserror::Error;

/// Data source operation errors.
#[derive(Error, Diagnostic, Debug)]
pub enum DataSourceError {
    #[error("Invalid query: {message}")]
    #[diagnostic(code(mcp_bridge::datasource::validation))]
    Validation { message: String },

    #[error("Connection error: {message}")]
    #[diagnostic(
        code(mcp_bridge::datasource::connection),
        help("Check the data source settings and that the backend is reachable.")
    )]
    Connection { message: String },

    #[error("Query failed: {message}")]
    #[diagnostic(code(mcp_bridge::datasource::query))]
    Query { message: String },

    #[error("Schema generation failed: {message}")]
    #[diagnostic(code(mcp_bridge::datasource::schema))]
    Schema { message: String },

    #[error("HTTP {status}: {body}")]
    #[diagnostic(code(mcp_bridge::datasource::http_status))]
    HttpStatus { status: u16, body: String },

    #[error("Not found: {path}")]
    #[diagnostic(code(mcp_bridge::datasource::not_found))]
    NotFound { path: String },

    #[error("I/O error: {message}")]
    #[diagnostic(code(mcp_bridge::datasource::io))]
    Io { message: String },

    #[error("Invalid configuration: {message}")]
    #[diagnostic(code(mcp_bridge::datasource::config))]
    Config { message: String },
}

impl DataSourceError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn query(message: impl Into<String>) -> Self {
        Self::Query {
            message: message.into(),
        }
    }

    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Whether the caller sent a request the source refuses to run.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation { .. })
    }
}

impl From<sqlx::Error> for DataSourceError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::Configuration(_) => DataSourceError::Connection {
                message: e.to_string(),
            },
            other => DataSourceError::Query {
                message: other.to_string(),
            },
        }
    }
}

impl From<reqwest::Error> for DataSourceError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_connect() || e.is_timeout() {
            DataSourceError::Connection {
                message: e.to_string(),
            }
        } else {
            DataSourceError::Query {
                message: e.to_string(),
            }
        }
    }
}

impl From<std::io::Error> for DataSourceError {
    fn from(e: std::io::Error) -> Self {
        DataSourceError::Io {
            message: e.to_string(),
        }
    }
}

impl From<serde_json::Error> for DataSourceError {
    fn from(e: serde_json::Error) -> Self {
        DataSourceError::Query {
            message: format!("invalid JSON: {}", e),
        }
    }
}

/// Result type for data source operations.
pub type DataSourceResult<T> = Result<T, DataSourceError>;
