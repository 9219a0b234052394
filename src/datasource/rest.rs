//! REST API data source.
//!
//! Queries take the form `"[METHOD] /path[?k=v]"`; `params` are merged into
//! the query string. Only safe methods are allowed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::{debug, info, instrument};

use super::http::{Auth, AuthType, HttpConnector, RetryPolicy};
use super::{
    DataSource, DataSourceError, DataSourceKind, DataSourceResult, HealthReport, QueryRequest,
    Schema, SourceSettings, check_limit,
};

/// Paths tried when the API offers neither a schema nor a discovery endpoint.
pub const COMMON_ENDPOINTS: [&str; 8] = [
    "/users",
    "/products",
    "/orders",
    "/items",
    "/data",
    "/api/v1/users",
    "/api/v1/products",
    "/api/v1/orders",
];

/// Keys searched, in order, for the record array of an object response.
const RECORD_KEYS: [&str; 4] = ["data", "items", "results", "records"];

const SAFE_METHODS: [&str; 3] = ["GET", "HEAD", "OPTIONS"];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RestApiConfig {
    pub base_url: String,
    pub auth_type: AuthType,
    pub auth_token: Option<String>,
    pub api_key: Option<String>,
    pub api_key_header: String,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Request timeout in seconds.
    pub timeout: u64,
    /// Requests per minute.
    pub rate_limit: usize,
    pub retry_attempts: u32,
    pub retry_backoff_ms: u64,
    pub schema_endpoint: String,
    pub discovery_endpoint: String,
    pub health_endpoint: String,
}

impl Default for RestApiConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            auth_type: AuthType::None,
            auth_token: None,
            api_key: None,
            api_key_header: "X-API-Key".to_string(),
            username: None,
            password: None,
            timeout: 30,
            rate_limit: 100,
            retry_attempts: 3,
            retry_backoff_ms: 1000,
            schema_endpoint: "/schema".to_string(),
            discovery_endpoint: "/discovery".to_string(),
            health_endpoint: "/health".to_string(),
        }
    }
}

impl RestApiConfig {
    pub(crate) fn auth(&self) -> Auth {
        match self.auth_type {
            AuthType::None => Auth::None,
            AuthType::Bearer => Auth::Bearer {
                token: self.auth_token.clone().unwrap_or_default(),
            },
            AuthType::Basic => Auth::Basic {
                username: self.username.clone().unwrap_or_default(),
                password: self.password.clone().unwrap_or_default(),
            },
            AuthType::ApiKey => Auth::ApiKey {
                header: self.api_key_header.clone(),
                key: self.api_key.clone().unwrap_or_default(),
            },
        }
    }

    pub(crate) fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.retry_attempts,
            backoff: Duration::from_millis(self.retry_backoff_ms),
        }
    }
}

/// A parsed REST query.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiCall {
    pub method: Method,
    pub endpoint: String,
    pub query: Vec<(String, String)>,
}

/// Parse `"[METHOD] /path[?k=v&...]"` plus request params into an [`ApiCall`].
pub fn parse_call(request: &QueryRequest) -> DataSourceResult<ApiCall> {
    let text = request.query.trim();
    let mut parts = text.split_whitespace();
    let (method, target) = match (parts.next(), parts.next(), parts.next()) {
        (Some(target), None, None) => ("GET", target),
        (Some(method), Some(target), None) => (method, target),
        (None, _, _) => return Err(DataSourceError::validation("endpoint is required")),
        _ => {
            return Err(DataSourceError::validation(
                "expected '[METHOD] /path', got extra tokens",
            ));
        }
    };

    let method = method.to_uppercase();
    let method = Method::from_bytes(method.as_bytes())
        .map_err(|_| DataSourceError::validation(format!("invalid HTTP method '{}'", method)))?;

    let (path, raw_query) = match target.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (target, None),
    };
    let endpoint = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{}", path)
    };

    // Inline pairs are stored decoded; reqwest encodes them again on send.
    let mut query: Vec<(String, String)> = raw_query
        .into_iter()
        .flat_map(|q| url::form_urlencoded::parse(q.as_bytes()))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    for (key, value) in &request.params {
        let value = match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        query.push((key.clone(), value));
    }

    Ok(ApiCall {
        method,
        endpoint,
        query,
    })
}

/// Turn an API response into a bounded list of records.
pub fn extract_records(response: Value, limit: usize) -> Vec<Value> {
    match response {
        Value::Array(items) => items.into_iter().take(limit).collect(),
        Value::Object(mut map) => {
            for key in RECORD_KEYS {
                if map.get(key).is_some_and(Value::is_array) {
                    if let Some(Value::Array(items)) = map.remove(key) {
                        return items.into_iter().take(limit).collect();
                    }
                }
            }
            vec![Value::Object(map)]
        }
        Value::Null => Vec::new(),
        other => vec![json!({ "data": other })],
    }
}

/// Data source backed by an HTTP JSON API.
#[derive(Debug)]
pub struct RestApiDataSource {
    name: String,
    settings: SourceSettings,
    config: RestApiConfig,
    connector: HttpConnector,
    connected: AtomicBool,
}

impl RestApiDataSource {
    pub fn new(name: &str, settings: SourceSettings, config: RestApiConfig) -> DataSourceResult<Self> {
        let connector = HttpConnector::new(
            &config.base_url,
            config.auth(),
            Duration::from_secs(config.timeout),
            config.rate_limit,
            config.retry_policy(),
        )?;
        Ok(Self {
            name: name.to_string(),
            settings,
            config,
            connector,
            connected: AtomicBool::new(false),
        })
    }

    fn auth_section(&self) -> Value {
        json!({
            "type": self.config.auth_type,
            "required": self.config.auth_type != AuthType::None,
        })
    }

    async fn discover_common_endpoints(&self) -> Vec<Value> {
        let mut found = Vec::new();
        for path in COMMON_ENDPOINTS {
            match self.connector.get_json(path, &[]).await {
                Ok(response @ (Value::Array(_) | Value::Object(_))) => {
                    let resource = path.rsplit('/').next().unwrap_or(path);
                    let (response_type, sample) = match &response {
                        Value::Array(items) => {
                            ("array", Value::Array(items.iter().take(3).cloned().collect()))
                        }
                        _ => ("object", response.clone()),
                    };
                    found.push(json!({
                        "path": path,
                        "method": "GET",
                        "description": format!("Get {} data", resource),
                        "response_type": response_type,
                        "sample_response": sample,
                    }));
                }
                Ok(_) => {}
                Err(e) => debug!(path, error = %e, "common endpoint unavailable"),
            }
        }
        found
    }
}

#[async_trait]
impl DataSource for RestApiDataSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> DataSourceKind {
        DataSourceKind::RestApi
    }

    fn settings(&self) -> &SourceSettings {
        &self.settings
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn connect(&self) -> DataSourceResult<()> {
        if !self.connected.swap(true, Ordering::SeqCst) {
            info!(data_source = %self.name, base_url = %self.connector.base_url(), "connected to REST API");
        }
        Ok(())
    }

    async fn disconnect(&self) -> DataSourceResult<()> {
        if self.connected.swap(false, Ordering::SeqCst) {
            info!(data_source = %self.name, "disconnected from REST API");
        }
        Ok(())
    }

    #[instrument(skip(self), fields(data_source = %self.name))]
    async fn get_schema(&self) -> DataSourceResult<Schema> {
        self.connect().await?;

        if let Ok(data) = self.connector.get_json(&self.config.schema_endpoint, &[]).await {
            let endpoints = data.get("endpoints").cloned().unwrap_or_else(|| json!([]));
            let models = data.get("models").cloned().unwrap_or_else(|| json!({}));
            let total = endpoints.as_array().map_or(0, Vec::len);
            return Ok(Schema::new(&self.name, self.kind(), &self.settings, total)
                .with_detail("base_url", self.connector.base_url())
                .with_detail("discovery_method", "schema_endpoint")
                .with_section("endpoints", endpoints)
                .with_section("models", models)
                .with_section("authentication", self.auth_section()));
        }

        let (endpoints, method) = match self
            .connector
            .get_json(&self.config.discovery_endpoint, &[])
            .await
        {
            Ok(data) => (
                data.get("endpoints")
                    .and_then(Value::as_array)
                    .cloned()
                    .unwrap_or_default(),
                "discovery_endpoint",
            ),
            Err(_) => (self.discover_common_endpoints().await, "common_endpoints"),
        };

        Ok(
            Schema::new(&self.name, self.kind(), &self.settings, endpoints.len())
                .with_detail("base_url", self.connector.base_url())
                .with_detail("discovery_method", method)
                .with_section("endpoints", Value::Array(endpoints))
                .with_section("authentication", self.auth_section()),
        )
    }

    #[instrument(skip(self, request), fields(data_source = %self.name))]
    async fn query(&self, request: &QueryRequest) -> DataSourceResult<Vec<Value>> {
        self.connect().await?;
        let limit = self.settings.effective_limit(request.limit);
        let mut call = parse_call(request)?;
        if !call.query.iter().any(|(k, _)| k == "limit") {
            call.query.push(("limit".to_string(), limit.to_string()));
        }

        let response = self
            .connector
            .request_json(call.method, &call.endpoint, &call.query)
            .await?;
        Ok(extract_records(response, limit))
    }

    fn validate_query(&self, request: &QueryRequest) -> DataSourceResult<()> {
        let call = parse_call(request)?;
        if !SAFE_METHODS.contains(&call.method.as_str()) {
            return Err(DataSourceError::validation(format!(
                "method {} is not allowed; use one of {}",
                call.method,
                SAFE_METHODS.join(", ")
            )));
        }
        if call.endpoint == "/" && request.query.trim().is_empty() {
            return Err(DataSourceError::validation("endpoint is required"));
        }
        if call.endpoint.contains("..") || call.endpoint.contains("//") {
            return Err(DataSourceError::validation(
                "endpoint must not contain '..' or '//'",
            ));
        }
        check_limit(&self.settings, request)
    }

    async fn health_check(&self) -> HealthReport {
        if let Err(e) = self.connect().await {
            return HealthReport::unhealthy(&self.name, self.kind(), false, e);
        }
        match self.connector.get_json(&self.config.health_endpoint, &[]).await {
            Ok(_) => {
                let mut details = Map::new();
                details.insert("base_url".into(), self.connector.base_url().into());
                details.insert("auth_type".into(), json!(self.config.auth_type));
                HealthReport::healthy(&self.name, self.kind(), details)
            }
            Err(e) => HealthReport::unhealthy(&self.name, self.kind(), self.is_connected(), e),
        }
    }

    fn config_summary(&self) -> Map<String, Value> {
        match serde_json::to_value(&self.config) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        }
    }

    fn query_help(&self) -> &'static str {
        "REST endpoint as \"[GET|HEAD|OPTIONS] /path?key=value\"; params are added to the query string"
    }
}

#[cfg(test)]
#[path = "rest_test.rs"]
mod rest_test;
