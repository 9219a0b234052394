use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use axum::extract::Query;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{Value, json};

use super::*;

async fn serve(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{}", addr)
}

fn source(base_url: &str) -> RestApiDataSource {
    let config = RestApiConfig {
        base_url: base_url.to_string(),
        retry_backoff_ms: 1,
        ..Default::default()
    };
    RestApiDataSource::new("api", SourceSettings::default(), config).unwrap()
}

#[test]
fn test_parse_call_defaults_to_get() {
    let call = parse_call(&QueryRequest::new("/users")).unwrap();
    assert_eq!(call.method, Method::GET);
    assert_eq!(call.endpoint, "/users");
    assert!(call.query.is_empty());
}

#[test]
fn test_parse_call_merges_query_string_and_params() {
    let request = QueryRequest::new("get users?active=true")
        .with_param("page", 2)
        .with_param("sort", "name");
    let call = parse_call(&request).unwrap();

    assert_eq!(call.method, Method::GET);
    assert_eq!(call.endpoint, "/users");
    assert_eq!(
        call.query,
        vec![
            ("active".to_string(), "true".to_string()),
            ("page".to_string(), "2".to_string()),
            ("sort".to_string(), "name".to_string()),
        ]
    );
}

#[test]
fn test_parse_call_decodes_inline_query() {
    let call = parse_call(&QueryRequest::new("/search?name=John%20Doe&q=a+b")).unwrap();
    assert_eq!(
        call.query,
        vec![
            ("name".to_string(), "John Doe".to_string()),
            ("q".to_string(), "a b".to_string()),
        ]
    );
}

#[test]
fn test_parse_call_rejects_extra_tokens() {
    let err = parse_call(&QueryRequest::new("GET /a /b")).unwrap_err();
    assert!(err.is_validation());
}

#[test]
fn test_validate_rejects_unsafe_methods_and_traversal() {
    let api = source("http://127.0.0.1:9");

    assert!(api.validate_query(&QueryRequest::new("GET /users")).is_ok());
    assert!(api.validate_query(&QueryRequest::new("HEAD /users")).is_ok());
    assert!(api.validate_query(&QueryRequest::new("POST /users")).is_err());
    assert!(api.validate_query(&QueryRequest::new("DELETE /users/1")).is_err());
    assert!(api.validate_query(&QueryRequest::new("/../etc/passwd")).is_err());
    assert!(api.validate_query(&QueryRequest::new("//evil.com")).is_err());
    assert!(api.validate_query(&QueryRequest::new("")).is_err());
    assert!(
        api.validate_query(&QueryRequest::new("/users").with_limit(5000))
            .is_err()
    );
}

#[test]
fn test_extract_records_shapes() {
    let array = json!([1, 2, 3]);
    assert_eq!(extract_records(array, 2), vec![json!(1), json!(2)]);

    let wrapped = json!({"total": 2, "items": [{"id": 1}, {"id": 2}]});
    assert_eq!(extract_records(wrapped, 10).len(), 2);

    let single = json!({"id": 7, "name": "x"});
    assert_eq!(extract_records(single.clone(), 10), vec![single]);

    assert!(extract_records(Value::Null, 10).is_empty());
}

#[test]
fn test_new_requires_base_url() {
    let result = RestApiDataSource::new("api", SourceSettings::default(), RestApiConfig::default());
    assert!(result.is_err());
}

#[tokio::test]
async fn test_query_passes_params_and_limit() {
    let router = Router::new().route(
        "/users",
        get(|Query(q): Query<std::collections::HashMap<String, String>>| async move {
            Json(json!({
                "data": [
                    {"id": 1, "role": q.get("role").cloned()},
                    {"id": 2, "limit": q.get("limit").cloned()},
                    {"id": 3},
                ]
            }))
        }),
    );
    let api = source(&serve(router).await);

    let rows = api
        .query(
            &QueryRequest::new("/users")
                .with_limit(2)
                .with_param("role", "admin"),
        )
        .await
        .unwrap();

    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["role"], "admin");
    assert_eq!(rows[1]["limit"], "2");
    assert!(api.is_connected());
}

#[tokio::test]
async fn test_query_sends_encoded_inline_value_once() {
    let router = Router::new().route(
        "/search",
        get(|Query(q): Query<std::collections::HashMap<String, String>>| async move {
            Json(json!([{"name": q.get("name").cloned()}]))
        }),
    );
    let api = source(&serve(router).await);

    let rows = api
        .query(&QueryRequest::new("/search?name=John%20Doe"))
        .await
        .unwrap();

    assert_eq!(rows, vec![json!({"name": "John Doe"})]);
}

#[tokio::test]
async fn test_query_sends_bearer_token() {
    let router = Router::new().route(
        "/me",
        get(|headers: HeaderMap| async move {
            let auth = headers
                .get("authorization")
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
                .to_string();
            Json(json!({"authorization": auth}))
        }),
    );
    let config = RestApiConfig {
        base_url: serve(router).await,
        auth_type: AuthType::Bearer,
        auth_token: Some("t0k".to_string()),
        ..Default::default()
    };
    let api = RestApiDataSource::new("api", SourceSettings::default(), config).unwrap();

    let rows = api.query(&QueryRequest::new("/me")).await.unwrap();
    assert_eq!(rows[0]["authorization"], "Bearer t0k");
}

#[tokio::test]
async fn test_query_retries_server_errors() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let router = Router::new().route(
        "/flaky",
        get(move || {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    (StatusCode::SERVICE_UNAVAILABLE, Json(json!({})))
                } else {
                    (StatusCode::OK, Json(json!([{"ok": true}])))
                }
            }
        }),
    );
    let api = source(&serve(router).await);

    let rows = api.query(&QueryRequest::new("/flaky")).await.unwrap();
    assert_eq!(rows, vec![json!({"ok": true})]);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_query_does_not_retry_client_errors() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let router = Router::new().route(
        "/missing",
        get(move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                StatusCode::NOT_FOUND
            }
        }),
    );
    let api = source(&serve(router).await);

    let err = api.query(&QueryRequest::new("/missing")).await.unwrap_err();
    assert!(matches!(err, DataSourceError::HttpStatus { status: 404, .. }));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_schema_from_schema_endpoint() {
    let router = Router::new().route(
        "/schema",
        get(|| async {
            Json(json!({
                "endpoints": [{"path": "/users", "method": "GET"}],
                "models": {"User": {"id": "integer"}}
            }))
        }),
    );
    let api = source(&serve(router).await);

    let schema = api.get_schema().await.unwrap();
    assert_eq!(schema.metadata.total_items, 1);
    assert_eq!(schema.metadata.details["discovery_method"], "schema_endpoint");
    assert_eq!(schema.body["models"]["User"]["id"], "integer");
}

#[tokio::test]
async fn test_schema_falls_back_to_common_endpoints() {
    let router = Router::new()
        .route("/users", get(|| async { Json(json!([{"id": 1}])) }))
        .route("/orders", get(|| async { Json(json!({"count": 0})) }));
    let api = source(&serve(router).await);

    let schema = api.get_schema().await.unwrap();
    assert_eq!(schema.metadata.details["discovery_method"], "common_endpoints");
    let endpoints = schema.body["endpoints"].as_array().unwrap();
    assert_eq!(endpoints.len(), 2);
    assert_eq!(endpoints[0]["path"], "/users");
    assert_eq!(endpoints[0]["response_type"], "array");
    assert_eq!(endpoints[1]["response_type"], "object");
}

#[tokio::test]
async fn test_health_check_reports_unreachable_api() {
    let router = Router::new().route("/health", get(|| async { StatusCode::INTERNAL_SERVER_ERROR }));
    let api = source(&serve(router).await);

    let report = api.health_check().await;
    assert!(!report.is_healthy());
    assert!(report.error.unwrap().contains("500"));
}

#[tokio::test]
async fn test_health_check_ok() {
    let router = Router::new().route("/health", get(|| async { Json(json!({"status": "ok"})) }));
    let api = source(&serve(router).await);

    let report = api.health_check().await;
    assert!(report.is_healthy());
    assert_eq!(report.details["auth_type"], "none");
}
