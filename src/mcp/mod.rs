//! Model Context Protocol server.
//!
//! - **server**: the handler; a registry of data sources exposed as tools
//!   and resources
//! - **service**: Streamable HTTP and stdio transports
//! - **prompts**: LLM prompt templates served as resources and reused by
//!   the gateway

mod error;
pub mod prompts;
pub mod server;
mod service;


pub use error::ServerError;
pub use server::{McpServer, McpServerBuilder, RefreshSchemaParams, query_cache_key};
pub use service::{create_mcp_service, create_router, serve_http, serve_stdio};
