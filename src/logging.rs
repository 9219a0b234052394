//! Tracing setup shared by the binaries.

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_FILTER: &str = "mcp_bridge=info,tower_http=info";

/// Filter from `RUST_LOG`, else `LOG_LEVEL` applied to this crate, else the default.
pub fn env_filter() -> EnvFilter {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }
    match std::env::var("LOG_LEVEL") {
        Ok(level) if !level.trim().is_empty() => {
            let level = level.trim().to_lowercase();
            EnvFilter::try_new(format!("mcp_bridge={},tower_http={}", level, level))
                .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
        }
        _ => EnvFilter::new(DEFAULT_FILTER),
    }
}

/// Install the global subscriber. Logs go to stderr so the stdio transport
/// keeps stdout for protocol frames.
pub fn init_tracing() {
    // A second call (tests, embedded use) keeps the first subscriber.
    let _ = tracing_subscriber::registry()
        .with(env_filter())
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true),
        )
        .try_init();
}

#[cfg(test)]
mod tests {
    use std::env;

    use serial_test::serial;

    use super::*;

    #[test]
    #[serial]
    fn test_log_level_is_used_without_rust_log() {
        unsafe {
            env::remove_var("RUST_LOG");
            env::set_var("LOG_LEVEL", "DEBUG");
        }
        let filter = env_filter().to_string();
        unsafe {
            env::remove_var("LOG_LEVEL");
        }
        assert!(filter.contains("mcp_bridge=debug"));
    }

    #[test]
    #[serial]
    fn test_default_filter() {
        unsafe {
            env::remove_var("RUST_LOG");
            env::remove_var("LOG_LEVEL");
        }
        assert!(env_filter().to_string().contains("mcp_bridge=info"));
    }
}
