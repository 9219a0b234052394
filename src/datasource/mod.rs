//! Data source adapters behind one capability interface.
//!
//! # Architecture
//!
//! - `error`: adapter-agnostic error type
//! - `models`: query requests, schema documents, health reports
//! - `sql`, `rest`, `filesystem`, `jira`: concrete adapters
//! - `http`: authenticated, rate limited, retrying HTTP plumbing shared by
//!   `rest` and `jira`
//!
//! The server holds adapters as `Arc<dyn DataSource>` so any number of
//! differently typed sources can be registered side by side.

mod error;
pub mod filesystem;
pub mod http;
pub mod jira;
mod models;
pub mod rate_limit;
pub mod rest;
pub mod sql;


use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

#[cfg(test)]
use mockall::automock;

pub use error::{DataSourceError, DataSourceResult};
pub use filesystem::{FileSystemConfig, FileSystemDataSource};
pub use jira::{JiraConfig, JiraDataSource};
pub use models::*;
pub use rest::{RestApiConfig, RestApiDataSource};
pub use sql::{SqlConfig, SqlDataSource, SqlDriver};

/// Capability interface every adapter fulfils.
///
/// Implementations are internally synchronised; all methods take `&self`.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait DataSource: Send + Sync {
    /// Registered name, used for tool and resource names.
    fn name(&self) -> &str;

    fn kind(&self) -> DataSourceKind;

    fn settings(&self) -> &SourceSettings;

    fn is_connected(&self) -> bool;

    /// Establish the connection. Calling it twice is a no-op.
    async fn connect(&self) -> DataSourceResult<()>;

    /// Release the connection. Calling it twice is a no-op.
    async fn disconnect(&self) -> DataSourceResult<()>;

    /// Introspect the source.
    async fn get_schema(&self) -> DataSourceResult<Schema>;

    /// Run a query, connecting first if needed.
    async fn query(&self, request: &QueryRequest) -> DataSourceResult<Vec<Value>>;

    /// Reject requests the source must not run.
    fn validate_query(&self, request: &QueryRequest) -> DataSourceResult<()>;

    /// Check the backend. Never fails; problems are reported in the result.
    async fn health_check(&self) -> HealthReport;

    /// Configuration summary, secrets included. Use [`describe`] for output.
    fn config_summary(&self) -> Map<String, Value>;

    /// One line description used in tool listings and prompts.
    fn query_help(&self) -> &'static str;
}

/// Tool name under which a source's query operation is exposed.
pub fn tool_name(source: &str) -> String {
    format!("query_{}", source)
}

/// Resource URI of a source's schema.
pub fn schema_uri(source: &str) -> String {
    format!("{}://schema", source)
}

/// Resource URI of a source's prompt templates.
pub fn prompts_uri(source: &str) -> String {
    format!("prompts://{}", source)
}

/// URI schemes owned by the server itself.
pub const RESERVED_NAMES: [&str; 2] = ["prompts", "server"];

/// Check a data source name is usable in tool names and URIs.
pub fn validate_name(name: &str) -> DataSourceResult<()> {
    if RESERVED_NAMES.contains(&name) {
        return Err(DataSourceError::Config {
            message: format!("data source name '{}' is reserved", name),
        });
    }
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(DataSourceError::Config {
            message: format!(
                "data source name '{}' must be non-empty and only contain [a-z0-9_-]",
                name
            ),
        })
    }
}

const SECRET_MARKERS: [&str; 4] = ["password", "token", "secret", "key"];

/// Replace values of secret-looking keys with `***`.
pub fn redact(config: Map<String, Value>) -> Map<String, Value> {
    config
        .into_iter()
        .map(|(k, v)| {
            let lower = k.to_lowercase();
            // Header names are not secrets even though they end in "key".
            let secret = SECRET_MARKERS.iter().any(|m| lower.contains(m))
                && !lower.ends_with("_header");
            if secret && !v.is_null() {
                (k, Value::String("***".to_string()))
            } else {
                (k, v)
            }
        })
        .collect()
}

/// Public description of a registered source.
pub fn describe(source: &dyn DataSource) -> Value {
    let settings = source.settings();
    serde_json::json!({
        "name": source.name(),
        "type": source.kind(),
        "connected": source.is_connected(),
        "tool": tool_name(source.name()),
        "schema_uri": schema_uri(source.name()),
        "schema_cache_ttl": settings.schema_cache_ttl,
        "query_cache_ttl": settings.query_cache_ttl,
        "max_query_limit": settings.max_query_limit,
        "config": redact(source.config_summary()),
    })
}

/// Shared limit check used by every adapter's `validate_query`.
pub(crate) fn check_limit(settings: &SourceSettings, request: &QueryRequest) -> DataSourceResult<()> {
    if request.limit == 0 {
        return Err(DataSourceError::validation("limit must be at least 1"));
    }
    if request.limit > settings.max_query_limit {
        return Err(DataSourceError::validation(format!(
            "limit {} exceeds the maximum of {}",
            request.limit, settings.max_query_limit
        )));
    }
    Ok(())
}

/// Adapter configuration, one variant per kind.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AdapterConfig {
    Sql(SqlConfig),
    RestApi(RestApiConfig),
    Filesystem(FileSystemConfig),
    Jira(JiraConfig),
}

impl AdapterConfig {
    pub fn kind(&self) -> DataSourceKind {
        match self {
            Self::Sql(_) => DataSourceKind::Sql,
            Self::RestApi(_) => DataSourceKind::RestApi,
            Self::Filesystem(_) => DataSourceKind::Filesystem,
            Self::Jira(_) => DataSourceKind::Jira,
        }
    }
}

/// Build the adapter described by `config`.
pub fn build(
    name: &str,
    settings: SourceSettings,
    config: AdapterConfig,
) -> DataSourceResult<Arc<dyn DataSource>> {
    validate_name(name)?;
    let source: Arc<dyn DataSource> = match config {
        AdapterConfig::Sql(c) => Arc::new(SqlDataSource::new(name, settings, c)),
        AdapterConfig::RestApi(c) => Arc::new(RestApiDataSource::new(name, settings, c)?),
        AdapterConfig::Filesystem(c) => Arc::new(FileSystemDataSource::new(name, settings, c)),
        AdapterConfig::Jira(c) => Arc::new(JiraDataSource::new(name, settings, c)?),
    };
    Ok(source)
}
