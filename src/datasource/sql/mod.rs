//! SQL database data source (MySQL, PostgreSQL, SQLite).
//!
//! Only single `SELECT` statements are executed. Results are converted to
//! JSON objects column by column, see [`rows`].

mod rows;
mod schema;
pub mod validate;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use sqlx::mysql::{MySqlConnectOptions, MySqlPool, MySqlPoolOptions};
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use tokio::sync::RwLock;
use tracing::{info, instrument, warn};

use super::{
    DataSource, DataSourceError, DataSourceKind, DataSourceResult, HealthReport, QueryRequest,
    Schema, SourceSettings, check_limit,
};
use schema::TableRows;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SqlDriver {
    #[default]
    Mysql,
    #[serde(alias = "postgres")]
    Postgresql,
    Sqlite,
}

impl SqlDriver {
    pub fn parse(s: &str) -> DataSourceResult<Self> {
        match s.trim().to_lowercase().as_str() {
            "mysql" | "mariadb" => Ok(Self::Mysql),
            "postgresql" | "postgres" | "pg" => Ok(Self::Postgresql),
            "sqlite" | "sqlite3" => Ok(Self::Sqlite),
            other => Err(DataSourceError::Config {
                message: format!("unsupported SQL driver '{}'", other),
            }),
        }
    }

    pub fn default_port(&self) -> Option<u16> {
        match self {
            Self::Mysql => Some(3306),
            Self::Postgresql => Some(5432),
            Self::Sqlite => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SqlConfig {
    pub driver: SqlDriver,
    pub host: String,
    /// Defaults to the driver's standard port.
    pub port: Option<u16>,
    pub user: String,
    pub password: Option<String>,
    pub database: String,
    /// Database file, SQLite only. `:memory:` opens a private in-memory database.
    pub path: Option<PathBuf>,
    /// MySQL only.
    pub charset: String,
    pub max_connections: u32,
    /// Seconds.
    pub connect_timeout: u64,
}

impl Default for SqlConfig {
    fn default() -> Self {
        Self {
            driver: SqlDriver::Mysql,
            host: "localhost".to_string(),
            port: None,
            user: "root".to_string(),
            password: None,
            database: String::new(),
            path: None,
            charset: "utf8mb4".to_string(),
            max_connections: 10,
            connect_timeout: 10,
        }
    }
}

impl SqlConfig {
    fn port(&self) -> u16 {
        self.port.or(self.driver.default_port()).unwrap_or_default()
    }

    /// Human readable connection target, without credentials.
    pub fn target(&self) -> String {
        match self.driver {
            SqlDriver::Sqlite => self
                .path
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| ":memory:".to_string()),
            _ => format!("{}:{}/{}", self.host, self.port(), self.database),
        }
    }
}

#[derive(Debug, Clone)]
enum SqlPool {
    MySql(MySqlPool),
    Postgres(PgPool),
    Sqlite(SqlitePool),
}

impl SqlPool {
    async fn open(config: &SqlConfig) -> DataSourceResult<Self> {
        let timeout = Duration::from_secs(config.connect_timeout);
        let pool = match config.driver {
            SqlDriver::Mysql => {
                let mut options = MySqlConnectOptions::new()
                    .host(&config.host)
                    .port(config.port())
                    .username(&config.user)
                    .database(&config.database)
                    .charset(&config.charset);
                if let Some(password) = &config.password {
                    options = options.password(password);
                }
                let pool = MySqlPoolOptions::new()
                    .max_connections(config.max_connections)
                    .acquire_timeout(timeout)
                    .connect_with(options)
                    .await?;
                SqlPool::MySql(pool)
            }
            SqlDriver::Postgresql => {
                let mut options = PgConnectOptions::new()
                    .host(&config.host)
                    .port(config.port())
                    .username(&config.user)
                    .database(&config.database);
                if let Some(password) = &config.password {
                    options = options.password(password);
                }
                let pool = PgPoolOptions::new()
                    .max_connections(config.max_connections)
                    .acquire_timeout(timeout)
                    .connect_with(options)
                    .await?;
                SqlPool::Postgres(pool)
            }
            SqlDriver::Sqlite => {
                let path = config.path.clone().ok_or_else(|| DataSourceError::Config {
                    message: "sqlite data sources need a path".to_string(),
                })?;
                let in_memory = path.as_os_str() == ":memory:";
                let options = if in_memory {
                    "sqlite::memory:".parse::<SqliteConnectOptions>()?
                } else {
                    SqliteConnectOptions::new().filename(&path).read_only(true)
                };
                let options = options.busy_timeout(timeout).foreign_keys(true);
                // Every in-memory connection is its own database; keep exactly one alive.
                let pool_options = if in_memory {
                    SqlitePoolOptions::new()
                        .max_connections(1)
                        .idle_timeout(None)
                        .max_lifetime(None)
                } else {
                    SqlitePoolOptions::new().max_connections(config.max_connections)
                };
                let pool = pool_options
                    .acquire_timeout(timeout)
                    .connect_with(options)
                    .await?;
                SqlPool::Sqlite(pool)
            }
        };
        Ok(pool)
    }

    /// Run a statement with string binds and convert every row to JSON.
    async fn fetch(&self, sql: &str, binds: &[&str]) -> DataSourceResult<Vec<Map<String, Value>>> {
        let rows = match self {
            SqlPool::MySql(pool) => {
                let mut query = sqlx::query(sql);
                for bind in binds {
                    query = query.bind(*bind);
                }
                query.fetch_all(pool).await?.iter().map(rows::mysql_row).collect()
            }
            SqlPool::Postgres(pool) => {
                let mut query = sqlx::query(sql);
                for bind in binds {
                    query = query.bind(*bind);
                }
                query.fetch_all(pool).await?.iter().map(rows::pg_row).collect()
            }
            SqlPool::Sqlite(pool) => {
                let mut query = sqlx::query(sql);
                for bind in binds {
                    query = query.bind(*bind);
                }
                query.fetch_all(pool).await?.iter().map(rows::sqlite_row).collect()
            }
        };
        Ok(rows)
    }

    async fn ping(&self) -> DataSourceResult<()> {
        self.fetch("SELECT 1", &[]).await.map(|_| ())
    }

    async fn close(&self) {
        match self {
            SqlPool::MySql(pool) => pool.close().await,
            SqlPool::Postgres(pool) => pool.close().await,
            SqlPool::Sqlite(pool) => pool.close().await,
        }
    }
}

/// Read-only SQL data source backed by a sqlx pool.
#[derive(Debug)]
pub struct SqlDataSource {
    name: String,
    settings: SourceSettings,
    config: SqlConfig,
    pool: RwLock<Option<SqlPool>>,
    connected: AtomicBool,
}

impl SqlDataSource {
    pub fn new(name: &str, settings: SourceSettings, config: SqlConfig) -> Self {
        Self {
            name: name.to_string(),
            settings,
            config,
            pool: RwLock::new(None),
            connected: AtomicBool::new(false),
        }
    }

    async fn pool(&self) -> DataSourceResult<SqlPool> {
        if let Some(pool) = self.pool.read().await.as_ref() {
            return Ok(pool.clone());
        }
        self.connect().await?;
        self.pool
            .read()
            .await
            .clone()
            .ok_or_else(|| DataSourceError::connection("connection pool is not available"))
    }

    async fn describe_table(
        &self,
        pool: &SqlPool,
        database: &str,
        table: Map<String, Value>,
    ) -> DataSourceResult<(String, Value)> {
        let name = match table.get("name") {
            Some(Value::String(name)) => name.clone(),
            _ => {
                return Err(DataSourceError::Schema {
                    message: "catalog returned a table without a name".to_string(),
                });
            }
        };
        let catalog = self.config.driver.catalog();
        let binds: Vec<&str> = if catalog.binds_database {
            vec![database, name.as_str()]
        } else {
            vec![name.as_str()]
        };

        let columns = pool.fetch(catalog.columns, &binds).await?;
        let indexes = pool.fetch(catalog.indexes, &binds).await?;
        let foreign_keys = pool.fetch(catalog.foreign_keys, &binds).await?;
        let sample = pool
            .fetch(&self.config.driver.sample_query(&name), &[])
            .await
            .unwrap_or_else(|e| {
                warn!(table = %name, error = %e, "failed to read sample rows");
                Vec::new()
            });

        let mut table = table;
        if table.get("row_count").is_none_or(Value::is_null) {
            let count = pool.fetch(&self.config.driver.count_query(&name), &[]).await?;
            if let Some(n) = count.first().and_then(|row| row.get("row_count")) {
                table.insert("row_count".into(), n.clone());
            }
        }

        let document = schema::table_document(TableRows {
            table,
            columns,
            indexes,
            foreign_keys,
            sample,
        });
        Ok((name, document))
    }
}

#[async_trait]
impl DataSource for SqlDataSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> DataSourceKind {
        DataSourceKind::Sql
    }

    fn settings(&self) -> &SourceSettings {
        &self.settings
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn connect(&self) -> DataSourceResult<()> {
        let mut guard = self.pool.write().await;
        if guard.is_some() {
            return Ok(());
        }
        let pool = SqlPool::open(&self.config).await?;
        info!(
            data_source = %self.name,
            driver = ?self.config.driver,
            target = %self.config.target(),
            "connected to database"
        );
        *guard = Some(pool);
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> DataSourceResult<()> {
        if let Some(pool) = self.pool.write().await.take() {
            self.connected.store(false, Ordering::SeqCst);
            pool.close().await;
            info!(data_source = %self.name, "disconnected from database");
        }
        Ok(())
    }

    #[instrument(skip(self), fields(data_source = %self.name))]
    async fn get_schema(&self) -> DataSourceResult<Schema> {
        let pool = self.pool().await?;
        let catalog = self.config.driver.catalog();

        let database = pool
            .fetch(catalog.database, &[])
            .await?
            .first()
            .and_then(|row| row.get("db"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| self.config.database.clone());

        let table_binds: Vec<&str> = if catalog.binds_database {
            vec![database.as_str()]
        } else {
            Vec::new()
        };
        let tables = pool.fetch(catalog.tables, &table_binds).await?;

        let mut documents = Map::new();
        for table in tables {
            let (name, document) = self.describe_table(&pool, &database, table).await?;
            documents.insert(name, document);
        }

        Ok(
            Schema::new(&self.name, self.kind(), &self.settings, documents.len())
                .with_detail("database_name", database)
                .with_detail("driver", json!(self.config.driver))
                .with_detail("total_tables", documents.len())
                .with_section("tables", documents),
        )
    }

    #[instrument(skip(self, request), fields(data_source = %self.name))]
    async fn query(&self, request: &QueryRequest) -> DataSourceResult<Vec<Value>> {
        validate::validate_select(&request.query)?;
        let limit = self.settings.effective_limit(request.limit);
        let sql = validate::apply_limit(&request.query, limit);
        let pool = self.pool().await?;

        let mut rows = pool.fetch(&sql, &[]).await?;
        rows.truncate(limit);
        Ok(rows.into_iter().map(Value::Object).collect())
    }

    fn validate_query(&self, request: &QueryRequest) -> DataSourceResult<()> {
        validate::validate_select(&request.query)?;
        check_limit(&self.settings, request)
    }

    async fn health_check(&self) -> HealthReport {
        let pool = match self.pool().await {
            Ok(pool) => pool,
            Err(e) => return HealthReport::unhealthy(&self.name, self.kind(), false, e),
        };
        match pool.ping().await {
            Ok(()) => {
                let mut details = Map::new();
                details.insert("driver".into(), json!(self.config.driver));
                details.insert("target".into(), self.config.target().into());
                HealthReport::healthy(&self.name, self.kind(), details)
            }
            Err(e) => HealthReport::unhealthy(&self.name, self.kind(), true, e),
        }
    }

    fn config_summary(&self) -> Map<String, Value> {
        match serde_json::to_value(&self.config) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        }
    }

    fn query_help(&self) -> &'static str {
        "a single read-only SQL SELECT statement; LIMIT is added when missing"
    }
}
