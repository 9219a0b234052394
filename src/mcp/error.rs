use miette::Diagnostic;
use thiserror::Error;

use crate::config::ConfigError;
use crate::datasource::DataSourceError;
use crate::schema::SchemaStoreError;

#[derive(Error, Diagnostic, Debug)]
pub enum ServerError {
    #[error("Data source '{0}' is registered twice")]
    #[diagnostic(code(mcp_bridge::server::duplicate_source))]
    DuplicateDataSource(String),

    #[error("Data source error: {0}")]
    #[diagnostic(code(mcp_bridge::server::datasource))]
    DataSource(#[from] DataSourceError),

    #[error("Schema store error: {0}")]
    #[diagnostic(code(mcp_bridge::server::schema_store))]
    SchemaStore(#[from] SchemaStoreError),

    #[error("Configuration error: {0}")]
    #[diagnostic(code(mcp_bridge::server::config))]
    Config(#[from] ConfigError),

    #[error("Transport error: {0}")]
    #[diagnostic(code(mcp_bridge::server::transport))]
    Transport(String),

    #[error("I/O error: {0}")]
    #[diagnostic(code(mcp_bridge::server::io))]
    Io(#[from] std::io::Error),
}
