use std::collections::HashMap;
use std::env;

use serial_test::serial;

use super::*;

const YAML: &str = r#"
server:
  name: shop-mcp
  port: 9000
  transport: stdio
  cache:
    query_cache_size: 10
datasources:
  - name: shop
    type: sql
    driver: sqlite
    path: ./shop.db
    max_query_limit: 500
  - name: docs
    type: filesystem
    root_path: /srv/docs
    enabled: false
"#;

fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = vars
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    move |key| map.get(key).cloned()
}

#[test]
fn test_defaults() {
    let config = Config::default();
    assert_eq!(config.server.name, "mcp-bridge");
    assert_eq!(config.server.port, 8000);
    assert_eq!(config.server.transport, Transport::StreamableHttp);
    assert_eq!(config.server.cache.schema_cache_ttl, 3600);
    assert!(config.datasources.is_empty());
}

#[test]
fn test_yaml_parsing() {
    let config = Config::from_yaml(YAML).unwrap();

    assert_eq!(config.server.name, "shop-mcp");
    assert_eq!(config.server.port, 9000);
    assert_eq!(config.server.host, "127.0.0.1");
    assert_eq!(config.server.transport, Transport::Stdio);
    assert_eq!(config.server.cache.query_cache_size, 10);
    assert_eq!(config.server.cache.query_cache_ttl, 300);

    let shop = &config.datasources[0];
    assert_eq!(shop.name, "shop");
    assert!(shop.enabled);
    assert_eq!(shop.settings.max_query_limit, 500);
    assert_eq!(shop.settings.query_cache_ttl, 300);
    match &shop.adapter {
        AdapterConfig::Sql(sql) => {
            assert_eq!(sql.driver, SqlDriver::Sqlite);
            assert_eq!(sql.path.as_deref(), Some(Path::new("./shop.db")));
        }
        other => panic!("unexpected adapter {:?}", other),
    }

    assert_eq!(config.enabled_sources().count(), 1);
}

#[test]
fn test_empty_yaml_is_default() {
    let config = Config::from_yaml("  \n").unwrap();
    assert_eq!(config.server, ServerConfig::default());
}

#[test]
fn test_unknown_type_is_a_parse_error() {
    let err = Config::from_yaml("datasources:\n  - name: x\n    type: mongo\n").unwrap_err();
    assert!(matches!(err, ConfigError::Parse { .. }));
}

#[test]
fn test_transport_from_str() {
    assert_eq!("stdio".parse::<Transport>().unwrap(), Transport::Stdio);
    assert_eq!("HTTP".parse::<Transport>().unwrap(), Transport::StreamableHttp);
    assert!("sse".parse::<Transport>().is_err());
}

#[test]
fn test_env_overrides_server_settings() {
    let mut config = Config::from_yaml(YAML).unwrap();
    config
        .apply_env_with(lookup(&[
            ("SERVER_NAME", "from-env"),
            ("SERVER_PORT", "7000"),
            ("MCP_TRANSPORT", "streamable-http"),
            ("MAX_QUERY_LIMIT", "50"),
        ]))
        .unwrap();

    assert_eq!(config.server.name, "from-env");
    assert_eq!(config.server.port, 7000);
    assert_eq!(config.server.transport, Transport::StreamableHttp);
    assert!(config.datasources.iter().all(|d| d.settings.max_query_limit == 50));
}

#[test]
fn test_env_defines_data_sources() {
    let mut config = Config::default();
    config
        .apply_env_with(lookup(&[
            ("DB_TYPE", "postgresql"),
            ("DB_HOST", "db.internal"),
            ("DB_PORT", "5433"),
            ("DB_NAME", "shop"),
            ("API_BASE_URL", "https://api.example.com"),
            ("API_AUTH_TYPE", "bearer"),
            ("API_AUTH_TOKEN", "tok"),
            ("API_RATE_LIMIT", "10"),
            ("FILESYSTEM_ROOT_PATH", "/srv/docs"),
            ("JIRA_BASE_URL", "https://jira.example.com"),
            ("JIRA_USERNAME", "ada"),
        ]))
        .unwrap();

    let names: Vec<_> = config.datasources.iter().map(|d| d.name.as_str()).collect();
    assert_eq!(names, ["database", "api", "filesystem", "jira"]);

    match &config.datasources[0].adapter {
        AdapterConfig::Sql(sql) => {
            assert_eq!(sql.driver, SqlDriver::Postgresql);
            assert_eq!(sql.host, "db.internal");
            assert_eq!(sql.port, Some(5433));
            assert_eq!(sql.database, "shop");
        }
        other => panic!("unexpected adapter {:?}", other),
    }
    match &config.datasources[1].adapter {
        AdapterConfig::RestApi(rest) => {
            assert_eq!(rest.auth_type, AuthType::Bearer);
            assert_eq!(rest.auth_token.as_deref(), Some("tok"));
            assert_eq!(rest.rate_limit, 10);
        }
        other => panic!("unexpected adapter {:?}", other),
    }
    config.validate().unwrap();
}

#[test]
fn test_env_replaces_yaml_source_with_same_name() {
    let mut config = Config::default();
    config.datasources.push(DataSourceEntry::new(
        "api",
        AdapterConfig::RestApi(RestApiConfig {
            base_url: "http://old".to_string(),
            ..Default::default()
        }),
    ));
    config
        .apply_env_with(lookup(&[("API_BASE_URL", "http://new")]))
        .unwrap();

    assert_eq!(config.datasources.len(), 1);
    match &config.datasources[0].adapter {
        AdapterConfig::RestApi(rest) => assert_eq!(rest.base_url, "http://new"),
        other => panic!("unexpected adapter {:?}", other),
    }
}

#[test]
fn test_invalid_env_values_are_reported() {
    let mut config = Config::default();
    let err = config
        .apply_env_with(lookup(&[("SERVER_PORT", "eighty")]))
        .unwrap_err();
    assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "SERVER_PORT"));

    let err = config
        .apply_env_with(lookup(&[("DB_TYPE", "oracle")]))
        .unwrap_err();
    assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "DB_TYPE"));
}

#[test]
fn test_validate_rejects_duplicates_and_bad_names() {
    let fs = || AdapterConfig::Filesystem(FileSystemConfig::default());

    let mut config = Config::default();
    config.datasources.push(DataSourceEntry::new("docs", fs()));
    config.datasources.push(DataSourceEntry::new("docs", fs()));
    assert!(matches!(config.validate(), Err(ConfigError::Duplicate(_))));

    let mut config = Config::default();
    config.datasources.push(DataSourceEntry::new("My Docs", fs()));
    assert!(matches!(config.validate(), Err(ConfigError::InvalidName(_))));
}

#[test]
#[serial]
fn test_load_reads_file_then_process_env() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.yaml");
    std::fs::write(&path, YAML).unwrap();

    unsafe {
        env::set_var("SERVER_PORT", "8123");
    }
    let config = Config::load(Some(&path));
    unsafe {
        env::remove_var("SERVER_PORT");
    }

    let config = config.unwrap();
    assert_eq!(config.server.name, "shop-mcp");
    assert_eq!(config.server.port, 8123);
}

#[test]
#[serial]
fn test_load_missing_file_is_io_error() {
    let err = Config::load(Some(Path::new("/nonexistent/config.yaml"))).unwrap_err();
    assert!(matches!(err, ConfigError::Io { .. }));
}
