//! JIRA data source: JQL searches over the REST API v2.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::{info, instrument};

use super::http::{Auth, AuthType, HttpConnector, RetryPolicy};
use super::{
    DataSource, DataSourceError, DataSourceKind, DataSourceResult, HealthReport, QueryRequest,
    Schema, SourceSettings, check_limit,
};

const SEARCH: &str = "/rest/api/2/search";
const MYSELF: &str = "/rest/api/2/myself";
const PROJECTS: &str = "/rest/api/2/project";
const ISSUE_TYPES: &str = "/rest/api/2/issuetype";
const STATUSES: &str = "/rest/api/2/status";
const FIELDS: &str = "/rest/api/2/field";

/// Fields every flattened issue carries.
const STANDARD_FIELDS: [&str; 8] = [
    "summary",
    "status",
    "issuetype",
    "priority",
    "assignee",
    "reporter",
    "created",
    "updated",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JiraConfig {
    pub base_url: String,
    pub auth_type: AuthType,
    pub username: Option<String>,
    pub api_token: Option<String>,
    /// Seconds.
    pub timeout: u64,
    /// Requests per minute.
    pub rate_limit: usize,
    pub retry_attempts: u32,
    pub retry_backoff_ms: u64,
    /// Extra fields requested with every search.
    pub default_fields: Vec<String>,
}

impl Default for JiraConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            auth_type: AuthType::Basic,
            username: None,
            api_token: None,
            timeout: 30,
            rate_limit: 100,
            retry_attempts: 3,
            retry_backoff_ms: 1000,
            default_fields: Vec::new(),
        }
    }
}

impl JiraConfig {
    fn auth(&self) -> DataSourceResult<Auth> {
        let token = self.api_token.clone().unwrap_or_default();
        match self.auth_type {
            AuthType::Basic => Ok(Auth::Basic {
                username: self.username.clone().unwrap_or_default(),
                password: token,
            }),
            AuthType::Bearer => Ok(Auth::Bearer { token }),
            AuthType::None => Ok(Auth::None),
            AuthType::ApiKey => Err(DataSourceError::Config {
                message: "JIRA supports basic or bearer authentication".to_string(),
            }),
        }
    }
}

/// Fields requested from the search endpoint: standard, configured, then per request.
pub fn requested_fields(config: &JiraConfig, request: &QueryRequest) -> Vec<String> {
    let from_request: Vec<String> = match request.params.get("fields") {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        Some(Value::String(list)) => list
            .split(',')
            .map(str::trim)
            .filter(|f| !f.is_empty())
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    };

    let mut fields: Vec<String> = STANDARD_FIELDS.iter().map(|f| f.to_string()).collect();
    for field in config.default_fields.iter().chain(&from_request) {
        if !fields.contains(field) {
            fields.push(field.clone());
        }
    }
    fields
}

fn nested_name(fields: &Value, key: &str, attribute: &str) -> Value {
    fields
        .get(key)
        .and_then(|v| v.get(attribute))
        .cloned()
        .unwrap_or(Value::Null)
}

/// Flatten an issue from the search response into one record.
pub fn flatten_issue(issue: &Value, extra_fields: &[String]) -> Value {
    let fields = issue.get("fields").cloned().unwrap_or_else(|| json!({}));
    let mut record = Map::new();
    record.insert("key".into(), issue.get("key").cloned().unwrap_or(Value::Null));
    record.insert("id".into(), issue.get("id").cloned().unwrap_or(Value::Null));
    record.insert(
        "summary".into(),
        fields.get("summary").cloned().unwrap_or(Value::Null),
    );
    record.insert("status".into(), nested_name(&fields, "status", "name"));
    record.insert("issue_type".into(), nested_name(&fields, "issuetype", "name"));
    record.insert("priority".into(), nested_name(&fields, "priority", "name"));
    record.insert(
        "assignee".into(),
        nested_name(&fields, "assignee", "displayName"),
    );
    record.insert(
        "reporter".into(),
        nested_name(&fields, "reporter", "displayName"),
    );
    record.insert(
        "created".into(),
        fields.get("created").cloned().unwrap_or(Value::Null),
    );
    record.insert(
        "updated".into(),
        fields.get("updated").cloned().unwrap_or(Value::Null),
    );

    for field in extra_fields {
        if STANDARD_FIELDS.contains(&field.as_str()) {
            continue;
        }
        record.insert(
            field.clone(),
            fields.get(field).cloned().unwrap_or(Value::Null),
        );
    }
    Value::Object(record)
}

/// Group statuses by their category name.
fn statuses_by_category(statuses: &[Value]) -> Map<String, Value> {
    let mut grouped = Map::new();
    for status in statuses {
        let category = status
            .get("statusCategory")
            .and_then(|c| c.get("name"))
            .and_then(Value::as_str)
            .unwrap_or("Uncategorized")
            .to_string();
        let entry = grouped.entry(category).or_insert_with(|| json!([]));
        if let Some(list) = entry.as_array_mut() {
            list.push(json!({
                "id": status.get("id"),
                "name": status.get("name"),
            }));
        }
    }
    grouped
}

fn as_list(value: Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items,
        _ => Vec::new(),
    }
}

/// JIRA issue tracker reached over HTTP.
#[derive(Debug)]
pub struct JiraDataSource {
    name: String,
    settings: SourceSettings,
    config: JiraConfig,
    connector: HttpConnector,
    connected: AtomicBool,
}

impl JiraDataSource {
    pub fn new(name: &str, settings: SourceSettings, config: JiraConfig) -> DataSourceResult<Self> {
        let connector = HttpConnector::new(
            &config.base_url,
            config.auth()?,
            Duration::from_secs(config.timeout),
            config.rate_limit,
            RetryPolicy {
                attempts: config.retry_attempts,
                backoff: Duration::from_millis(config.retry_backoff_ms),
            },
        )?;
        Ok(Self {
            name: name.to_string(),
            settings,
            config,
            connector,
            connected: AtomicBool::new(false),
        })
    }
}

#[async_trait]
impl DataSource for JiraDataSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> DataSourceKind {
        DataSourceKind::Jira
    }

    fn settings(&self) -> &SourceSettings {
        &self.settings
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn connect(&self) -> DataSourceResult<()> {
        if self.is_connected() {
            return Ok(());
        }
        let me = self.connector.get_json(MYSELF, &[]).await?;
        let user = me
            .get("displayName")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown");
        info!(
            data_source = %self.name,
            base_url = %self.connector.base_url(),
            user = %user,
            "connected to JIRA"
        );
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> DataSourceResult<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    #[instrument(skip(self), fields(data_source = %self.name))]
    async fn get_schema(&self) -> DataSourceResult<Schema> {
        self.connect().await?;

        let projects = as_list(self.connector.get_json(PROJECTS, &[]).await?);
        let issue_types = as_list(self.connector.get_json(ISSUE_TYPES, &[]).await?);
        let statuses = as_list(self.connector.get_json(STATUSES, &[]).await?);
        let fields = as_list(self.connector.get_json(FIELDS, &[]).await?);

        let projects: Vec<Value> = projects
            .iter()
            .map(|p| {
                json!({
                    "key": p.get("key"),
                    "name": p.get("name"),
                    "id": p.get("id"),
                    "project_type": p.get("projectTypeKey"),
                })
            })
            .collect();
        let issue_types: Vec<Value> = issue_types
            .iter()
            .map(|t| {
                json!({
                    "id": t.get("id"),
                    "name": t.get("name"),
                    "subtask": t.get("subtask").and_then(Value::as_bool).unwrap_or(false),
                    "description": t.get("description"),
                })
            })
            .collect();
        let fields: Vec<Value> = fields
            .iter()
            .map(|f| {
                json!({
                    "id": f.get("id"),
                    "name": f.get("name"),
                    "custom": f.get("custom").and_then(Value::as_bool).unwrap_or(false),
                    "type": f.get("schema").and_then(|s| s.get("type")),
                })
            })
            .collect();

        Ok(
            Schema::new(&self.name, self.kind(), &self.settings, projects.len())
                .with_detail("base_url", self.connector.base_url())
                .with_section("projects", projects)
                .with_section("issue_types", issue_types)
                .with_section("statuses", statuses_by_category(&statuses))
                .with_section("fields", fields),
        )
    }

    #[instrument(skip(self, request), fields(data_source = %self.name))]
    async fn query(&self, request: &QueryRequest) -> DataSourceResult<Vec<Value>> {
        self.connect().await?;
        let limit = self.settings.effective_limit(request.limit);
        let fields = requested_fields(&self.config, request);

        let params = vec![
            ("jql".to_string(), request.query.trim().to_string()),
            ("maxResults".to_string(), limit.to_string()),
            ("fields".to_string(), fields.join(",")),
        ];
        let response = self.connector.get_json(SEARCH, &params).await?;
        let issues = response
            .get("issues")
            .and_then(Value::as_array)
            .ok_or_else(|| DataSourceError::query("search response has no issues array"))?;

        Ok(issues
            .iter()
            .take(limit)
            .map(|issue| flatten_issue(issue, &fields))
            .collect())
    }

    fn validate_query(&self, request: &QueryRequest) -> DataSourceResult<()> {
        let jql = request.query.trim();
        if jql.is_empty() {
            return Err(DataSourceError::validation("JQL query is empty"));
        }
        if jql.contains(';') {
            return Err(DataSourceError::validation("JQL must not contain ';'"));
        }
        check_limit(&self.settings, request)
    }

    async fn health_check(&self) -> HealthReport {
        match self.connector.get_json(MYSELF, &[]).await {
            Ok(me) => {
                self.connected.store(true, Ordering::SeqCst);
                let mut details = Map::new();
                details.insert("base_url".into(), self.connector.base_url().into());
                details.insert(
                    "user".into(),
                    me.get("displayName").cloned().unwrap_or(Value::Null),
                );
                HealthReport::healthy(&self.name, self.kind(), details)
            }
            Err(e) => HealthReport::unhealthy(&self.name, self.kind(), false, e),
        }
    }

    fn config_summary(&self) -> Map<String, Value> {
        match serde_json::to_value(&self.config) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        }
    }

    fn query_help(&self) -> &'static str {
        "a JQL expression, e.g. project = PROJ AND status = \"In Progress\"; params.fields adds fields"
    }
}

#[cfg(test)]
#[path = "jira_test.rs"]
mod jira_test;
