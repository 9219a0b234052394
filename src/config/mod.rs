//! Server configuration.
//!
//! Values are layered: defaults, then an optional YAML file, then environment
//! variables. Command line flags are applied last by the binaries.
//!
//! ```yaml
//! server:
//!   name: shop-mcp
//!   port: 8000
//!   transport: streamable-http
//!   resources_dir: resources
//!   cache:
//!     query_cache_size: 1000
//! datasources:
//!   - name: shop
//!     type: sql
//!     driver: sqlite
//!     path: ./shop.db
//!     max_query_limit: 500
//! ```

#[cfg(test)]
#[path = "mod_test.rs"]
mod mod_test;

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cache::CacheConfig;
use crate::datasource::http::AuthType;
use crate::datasource::{
    AdapterConfig, FileSystemConfig, JiraConfig, RestApiConfig, SourceSettings, SqlConfig,
    SqlDriver, validate_name,
};

#[derive(Error, Diagnostic, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {message}")]
    #[diagnostic(code(mcp_bridge::config::io))]
    Io { path: String, message: String },

    #[error("Invalid config file {path}: {message}")]
    #[diagnostic(
        code(mcp_bridge::config::parse),
        help("Data sources need a `name` and a `type` of sql, rest_api, filesystem or jira.")
    )]
    Parse { path: String, message: String },

    #[error("Invalid value for {key}: {value}")]
    #[diagnostic(code(mcp_bridge::config::env))]
    InvalidValue { key: String, value: String },

    #[error("Duplicate data source name: {0}")]
    #[diagnostic(code(mcp_bridge::config::duplicate))]
    Duplicate(String),

    #[error("{0}")]
    #[diagnostic(code(mcp_bridge::config::invalid_name))]
    InvalidName(String),
}

/// How the MCP server talks to clients.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Transport {
    Stdio,
    #[default]
    #[serde(alias = "http")]
    StreamableHttp,
}

impl FromStr for Transport {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "stdio" => Ok(Transport::Stdio),
            "streamable-http" | "streamable_http" | "http" => Ok(Transport::StreamableHttp),
            other => Err(format!("unknown transport '{}'", other)),
        }
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Transport::Stdio => "stdio",
            Transport::StreamableHttp => "streamable-http",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub name: String,
    pub host: String,
    pub port: u16,
    pub transport: Transport,
    /// Directory holding persisted schemas.
    pub resources_dir: PathBuf,
    pub cache: CacheConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: "mcp-bridge".to_string(),
            host: "127.0.0.1".to_string(),
            port: 8000,
            transport: Transport::default(),
            resources_dir: PathBuf::from("resources"),
            cache: CacheConfig::default(),
        }
    }
}

fn enabled_default() -> bool {
    true
}

/// One entry of the `datasources:` list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataSourceEntry {
    pub name: String,
    #[serde(default = "enabled_default")]
    pub enabled: bool,
    #[serde(flatten)]
    pub settings: SourceSettings,
    #[serde(flatten)]
    pub adapter: AdapterConfig,
}

impl DataSourceEntry {
    pub fn new(name: impl Into<String>, adapter: AdapterConfig) -> Self {
        Self {
            name: name.into(),
            enabled: true,
            settings: SourceSettings::default(),
            adapter,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub datasources: Vec<DataSourceEntry>,
}

impl Config {
    /// Parse a YAML document.
    pub fn from_yaml(text: &str) -> Result<Self, ConfigError> {
        Self::parse_yaml(text, "<inline>")
    }

    fn parse_yaml(text: &str, origin: &str) -> Result<Self, ConfigError> {
        // An empty file is a valid, default configuration.
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(text).map_err(|e| ConfigError::Parse {
            path: origin.to_string(),
            message: e.to_string(),
        })
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let origin = path.display().to_string();
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: origin.clone(),
            message: e.to_string(),
        })?;
        Self::parse_yaml(&text, &origin)
    }

    /// Defaults, then the file (when given), then the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env_with(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides read through `lookup`.
    pub fn apply_env_with<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(&lookup);

        if let Some(name) = env.string("SERVER_NAME") {
            self.server.name = name;
        }
        if let Some(host) = env.string("SERVER_HOST") {
            self.server.host = host;
        }
        if let Some(port) = env.parse("SERVER_PORT")? {
            self.server.port = port;
        }
        if let Some(transport) = env.parse("MCP_TRANSPORT")? {
            self.server.transport = transport;
        }
        if let Some(dir) = env.string("RESOURCES_DIR") {
            self.server.resources_dir = PathBuf::from(dir);
        }

        let schema_ttl: Option<u64> = env.parse("SCHEMA_CACHE_TTL")?;
        let query_ttl: Option<u64> = env.parse("QUERY_CACHE_TTL")?;
        let max_limit: Option<usize> = env.parse("MAX_QUERY_LIMIT")?;

        for (name, adapter) in env_sources(&env)? {
            match self.datasources.iter_mut().find(|d| d.name == name) {
                Some(entry) => entry.adapter = adapter,
                None => self.datasources.push(DataSourceEntry::new(name, adapter)),
            }
        }

        for entry in &mut self.datasources {
            if let Some(ttl) = schema_ttl {
                entry.settings.schema_cache_ttl = ttl;
            }
            if let Some(ttl) = query_ttl {
                entry.settings.query_cache_ttl = ttl;
            }
            if let Some(limit) = max_limit {
                entry.settings.max_query_limit = limit;
            }
        }
        Ok(())
    }

    /// Check names are valid and unique.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = std::collections::HashSet::new();
        for entry in &self.datasources {
            validate_name(&entry.name).map_err(|e| ConfigError::InvalidName(e.to_string()))?;
            if !seen.insert(entry.name.as_str()) {
                return Err(ConfigError::Duplicate(entry.name.clone()));
            }
        }
        Ok(())
    }

    pub fn enabled_sources(&self) -> impl Iterator<Item = &DataSourceEntry> {
        self.datasources.iter().filter(|d| d.enabled)
    }
}

struct Env<'a, F: Fn(&str) -> Option<String>>(&'a F);

impl<F: Fn(&str) -> Option<String>> Env<'_, F> {
    fn string(&self, key: &str) -> Option<String> {
        (self.0)(key).filter(|v| !v.trim().is_empty())
    }

    fn parse<T: FromStr>(&self, key: &str) -> Result<Option<T>, ConfigError> {
        self.string(key)
            .map(|value| {
                value.trim().parse().map_err(|_| ConfigError::InvalidValue {
                    key: key.to_string(),
                    value,
                })
            })
            .transpose()
    }

    fn auth(&self, key: &str) -> Result<Option<AuthType>, ConfigError> {
        self.string(key)
            .map(|value| {
                AuthType::parse(&value).map_err(|_| ConfigError::InvalidValue {
                    key: key.to_string(),
                    value,
                })
            })
            .transpose()
    }
}

/// Data sources described purely by environment variables.
fn env_sources<F>(env: &Env<'_, F>) -> Result<Vec<(String, AdapterConfig)>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut sources = Vec::new();

    let db_type = env.string("DB_TYPE");
    let db_name = env.string("DB_NAME");
    let db_path = env.string("DB_PATH");
    if db_type.is_some() || db_name.is_some() || db_path.is_some() {
        let mut sql = SqlConfig::default();
        if let Some(driver) = db_type {
            sql.driver = SqlDriver::parse(&driver).map_err(|_| ConfigError::InvalidValue {
                key: "DB_TYPE".to_string(),
                value: driver,
            })?;
        }
        if let Some(host) = env.string("DB_HOST") {
            sql.host = host;
        }
        sql.port = env.parse("DB_PORT")?.or(sql.port);
        if let Some(user) = env.string("DB_USER") {
            sql.user = user;
        }
        sql.password = env.string("DB_PASSWORD").or(sql.password);
        sql.database = db_name.unwrap_or_default();
        sql.path = db_path.map(PathBuf::from);
        sources.push(("database".to_string(), AdapterConfig::Sql(sql)));
    }

    if let Some(base_url) = env.string("API_BASE_URL") {
        let mut rest = RestApiConfig {
            base_url,
            ..Default::default()
        };
        if let Some(auth_type) = env.auth("API_AUTH_TYPE")? {
            rest.auth_type = auth_type;
        }
        rest.auth_token = env.string("API_AUTH_TOKEN");
        rest.api_key = env.string("API_KEY");
        rest.username = env.string("API_USERNAME");
        rest.password = env.string("API_PASSWORD");
        if let Some(timeout) = env.parse("API_TIMEOUT")? {
            rest.timeout = timeout;
        }
        if let Some(rate_limit) = env.parse("API_RATE_LIMIT")? {
            rest.rate_limit = rate_limit;
        }
        if let Some(attempts) = env.parse("API_RETRY_ATTEMPTS")? {
            rest.retry_attempts = attempts;
        }
        sources.push(("api".to_string(), AdapterConfig::RestApi(rest)));
    }

    if let Some(root) = env.string("FILESYSTEM_ROOT_PATH") {
        let fs = FileSystemConfig {
            root_path: PathBuf::from(root),
            ..Default::default()
        };
        sources.push(("filesystem".to_string(), AdapterConfig::Filesystem(fs)));
    }

    if let Some(base_url) = env.string("JIRA_BASE_URL") {
        let mut jira = JiraConfig {
            base_url,
            ..Default::default()
        };
        if let Some(auth_type) = env.auth("JIRA_AUTH_TYPE")? {
            jira.auth_type = auth_type;
        }
        jira.username = env.string("JIRA_USERNAME");
        jira.api_token = env.string("JIRA_API_TOKEN");
        sources.push(("jira".to_string(), AdapterConfig::Jira(jira)));
    }

    Ok(sources)
}
