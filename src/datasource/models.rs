//! Data shapes shared by every adapter.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Default number of records returned when a request does not say.
pub const DEFAULT_QUERY_LIMIT: usize = 100;

/// The adapter families this crate ships.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataSourceKind {
    Sql,
    RestApi,
    Filesystem,
    Jira,
}

impl DataSourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sql => "sql",
            Self::RestApi => "rest_api",
            Self::Filesystem => "filesystem",
            Self::Jira => "jira",
        }
    }
}

impl fmt::Display for DataSourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Caching and limit settings every data source carries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceSettings {
    /// Seconds a generated schema stays fresh.
    pub schema_cache_ttl: u64,
    /// Seconds a query result stays in the query cache.
    pub query_cache_ttl: u64,
    /// Upper bound for `QueryRequest::limit`.
    pub max_query_limit: usize,
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            schema_cache_ttl: 3600,
            query_cache_ttl: 300,
            max_query_limit: 1000,
        }
    }
}

impl SourceSettings {
    /// Clamp a requested limit to what this source allows.
    pub fn effective_limit(&self, requested: usize) -> usize {
        requested.min(self.max_query_limit)
    }
}

/// A query as it arrives from a tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryRequest {
    /// Source specific query text (SQL, endpoint, JQL, filesystem op).
    pub query: String,
    /// Maximum number of records to return.
    #[serde(default = "default_limit")]
    pub limit: usize,
    /// Extra, source specific parameters.
    #[serde(default)]
    pub params: Map<String, Value>,
}

fn default_limit() -> usize {
    DEFAULT_QUERY_LIMIT
}

impl QueryRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            limit: DEFAULT_QUERY_LIMIT,
            params: Map::new(),
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// String parameter lookup, empty strings count as absent.
    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.params
            .get(key)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }
}

/// Metadata block at the top of every schema document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaMetadata {
    pub data_source: String,
    pub source_type: DataSourceKind,
    pub generated_at: DateTime<Utc>,
    /// Seconds the schema stays fresh.
    pub cache_ttl: u64,
    /// Number of tables / endpoints / entries / projects described.
    pub total_items: usize,
    #[serde(flatten)]
    pub details: Map<String, Value>,
}

/// A schema document: metadata plus a kind-specific body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    pub metadata: SchemaMetadata,
    #[serde(flatten)]
    pub body: Map<String, Value>,
}

impl Schema {
    pub fn new(
        data_source: &str,
        source_type: DataSourceKind,
        settings: &SourceSettings,
        total_items: usize,
    ) -> Self {
        Self {
            metadata: SchemaMetadata {
                data_source: data_source.to_string(),
                source_type,
                generated_at: Utc::now(),
                cache_ttl: settings.schema_cache_ttl,
                total_items,
                details: Map::new(),
            },
            body: Map::new(),
        }
    }

    pub fn with_detail(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.details.insert(key.to_string(), value.into());
        self
    }

    pub fn with_section(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.body.insert(key.to_string(), value.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

/// Result of a data source health check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub data_source: String,
    #[serde(rename = "type")]
    pub kind: DataSourceKind,
    pub connected: bool,
    #[serde(flatten)]
    pub details: Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl HealthReport {
    pub fn healthy(data_source: &str, kind: DataSourceKind, details: Map<String, Value>) -> Self {
        Self {
            status: HealthStatus::Healthy,
            data_source: data_source.to_string(),
            kind,
            connected: true,
            details,
            error: None,
            timestamp: Utc::now(),
        }
    }

    pub fn unhealthy(
        data_source: &str,
        kind: DataSourceKind,
        connected: bool,
        error: impl ToString,
    ) -> Self {
        Self {
            status: HealthStatus::Unhealthy,
            data_source: data_source.to_string(),
            kind,
            connected,
            details: Map::new(),
            error: Some(error.to_string()),
            timestamp: Utc::now(),
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }
}
