//! MCP servers over pluggable data sources, plus an HTTP gateway in front of them.

pub mod cache;
pub mod config;
pub mod datasource;
pub mod gateway;
pub mod logging;
pub mod mcp;
pub mod schema;

/// Version reported by the server and gateway.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
