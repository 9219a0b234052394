use std::sync::Arc;

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode},
};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;

use super::backend::{MockMcpBackend, ResourceInfo, ToolInfo, ToolOutput};
use super::llm::MockLanguageModel;
use super::{AppState, GatewayError, create_router};

fn backend() -> MockMcpBackend {
    let mut backend = MockMcpBackend::new();
    backend
        .expect_describe()
        .return_const("http://mcp.test/mcp".to_string());
    backend
}

fn tool(name: &str) -> ToolInfo {
    ToolInfo {
        name: name.to_string(),
        description: format!("{} tool", name),
    }
}

/// Backend advertising base tools plus `query_<name>` for each source.
fn backend_with_sources(sources: &[&str]) -> MockMcpBackend {
    let mut tools = vec![tool("list_data_sources"), tool("health_check")];
    tools.extend(sources.iter().map(|s| tool(&format!("query_{}", s))));
    let mut backend = backend();
    backend
        .expect_list_tools()
        .returning(move || Ok(tools.clone()));
    backend
}

fn router(backend: MockMcpBackend) -> Router {
    create_router(AppState::new(backend))
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_root_lists_endpoints() {
    let response = router(backend()).oneshot(get("/")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert_eq!(body["mcp_server"], "http://mcp.test/mcp");
    assert!(body["endpoints"]["/query"].is_string());
    assert!(body["endpoints"]["/docs"].is_string());
}

#[tokio::test]
async fn test_health_healthy() {
    let response = router(backend_with_sources(&["db"]))
        .oneshot(get("/health"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["server_url"], "http://mcp.test/mcp");
    assert_eq!(body["tools"], 3);
}

#[tokio::test]
async fn test_health_unreachable_is_503() {
    let mut backend = backend();
    backend
        .expect_list_tools()
        .returning(|| Err(GatewayError::Unavailable("connection refused".into())));

    let response = router(backend).oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

    let body = json_body(response).await;
    assert_eq!(body["status"], "unhealthy");
    assert!(body["error"].as_str().unwrap().contains("connection refused"));
}

#[tokio::test]
async fn test_tools_and_resources() {
    let mut backend = backend_with_sources(&["db"]);
    backend.expect_list_resources().returning(|| {
        Ok(vec![ResourceInfo {
            uri: "db://schema".into(),
            name: "db schema".into(),
            description: "Schema of db".into(),
        }])
    });
    let app = router(backend);

    let body = json_body(app.clone().oneshot(get("/tools")).await.unwrap()).await;
    assert_eq!(body["tools"].as_array().unwrap().len(), 3);
    assert_eq!(body["tools"][2]["name"], "query_db");

    let body = json_body(app.oneshot(get("/resources")).await.unwrap()).await;
    assert_eq!(body["resources"][0]["uri"], "db://schema");
}

#[tokio::test]
async fn test_tools_upstream_down_is_503() {
    let mut backend = backend();
    backend
        .expect_list_tools()
        .returning(|| Err(GatewayError::Unavailable("down".into())));

    let response = router(backend).oneshot(get("/tools")).await.unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body = json_body(response).await;
    assert!(body["error"].as_str().unwrap().contains("down"));
}

#[tokio::test]
async fn test_query_maps_to_query_tool() {
    let mut backend = backend_with_sources(&["db", "api"]);
    backend
        .expect_call_tool()
        .withf(|name, args| {
            name == "query_api" && args["query"] == "users" && args["limit"] == 5
        })
        .times(1)
        .returning(|_, _| Ok(ToolOutput::ok(r#"[{"id":1},{"id":2}]"#)));

    let response = router(backend)
        .oneshot(post_json(
            "/query",
            json!({"query": "users", "limit": 5, "data_source": "api"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["count"], 2);
    assert_eq!(body["data"][1]["id"], 2);
}

#[tokio::test]
async fn test_query_defaults_to_first_source_and_limit() {
    let mut backend = backend_with_sources(&["db"]);
    backend
        .expect_call_tool()
        .withf(|name, args| name == "query_db" && args["limit"] == 100)
        .returning(|_, _| Ok(ToolOutput::ok(r#"{"total": 7}"#)));

    let response = router(backend)
        .oneshot(post_json("/query", json!({"query": "SELECT COUNT(*) AS total FROM t"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    // Non-array results count as one row.
    assert_eq!(body["count"], 1);
    assert_eq!(body["data"]["total"], 7);
}

#[tokio::test]
async fn test_query_uses_configured_default_source() {
    let mut backend = backend_with_sources(&["db", "api"]);
    backend
        .expect_call_tool()
        .withf(|name, _| name == "query_api")
        .returning(|_, _| Ok(ToolOutput::ok("[]")));

    let state = AppState::new(backend).with_default_data_source(Some("api".into()));
    let response = create_router(state)
        .oneshot(post_json("/query", json!({"query": "users"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["count"], 0);
}

#[tokio::test]
async fn test_query_unknown_source_is_404() {
    let response = router(backend_with_sources(&["db"]))
        .oneshot(post_json("/query", json!({"query": "x", "data_source": "crm"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(json_body(response).await["error"], "Unknown data source: crm");
}

#[tokio::test]
async fn test_query_limit_out_of_range_is_400() {
    let app = router(backend_with_sources(&["db"]));

    for limit in [0, 1001] {
        let response = app
            .clone()
            .oneshot(post_json("/query", json!({"query": "SELECT 1", "limit": limit})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json_body(response).await;
        assert!(body["error"].as_str().unwrap().contains("between 1 and 1000"));
    }
}

#[tokio::test]
async fn test_query_tool_error_is_400() {
    let mut backend = backend_with_sources(&["db"]);
    backend.expect_call_tool().returning(|_, _| {
        Ok(ToolOutput::error(
            r#"{"error":"Only SELECT queries are allowed"}"#,
        ))
    });

    let response = router(backend)
        .oneshot(post_json("/query", json!({"query": "DELETE FROM users"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        json_body(response).await["error"],
        "Only SELECT queries are allowed"
    );
}

#[tokio::test]
async fn test_ask_without_llm_is_501() {
    let response = router(backend())
        .oneshot(post_json("/ask", json!({"question": "how many users?"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_IMPLEMENTED);
    assert_eq!(
        json_body(response).await["error"],
        "Natural language processing not configured"
    );
}

#[tokio::test]
async fn test_ask_llm_without_llm_is_501() {
    let response = router(backend())
        .oneshot(post_json("/ask-llm", json!({"question": "anything"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_IMPLEMENTED);
}

#[tokio::test]
async fn test_ask_runs_generated_sql() {
    let mut backend = backend_with_sources(&["db"]);
    backend
        .expect_read_resource()
        .withf(|uri| uri == "db://schema")
        .returning(|_| Ok(r#"{"tables": {"users": {}}}"#.to_string()));
    backend
        .expect_call_tool()
        .withf(|name, args| {
            name == "query_db" && args["query"] == "SELECT COUNT(*) AS n FROM users;"
        })
        .returning(|_, _| Ok(ToolOutput::ok(r#"[{"n": 42}]"#)));

    let mut llm = MockLanguageModel::new();
    llm.expect_complete()
        .withf(|prompt| prompt.contains("how many users?") && prompt.contains("users"))
        .returning(|_| Ok("```sql\nSELECT COUNT(*) AS n FROM users;\n```".to_string()));

    let state = AppState::new(backend).with_llm(Arc::new(llm));
    let response = create_router(state)
        .oneshot(post_json("/ask", json!({"question": "how many users?"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert_eq!(body["question"], "how many users?");
    assert_eq!(body["generated_sql"], "SELECT COUNT(*) AS n FROM users;");
    assert_eq!(body["data"][0]["n"], 42);
    assert_eq!(body["count"], 1);
}

#[tokio::test]
async fn test_ask_without_sql_in_answer_is_400() {
    let mut backend = backend_with_sources(&["db"]);
    backend
        .expect_read_resource()
        .returning(|_| Ok("{}".to_string()));

    let mut llm = MockLanguageModel::new();
    llm.expect_complete()
        .returning(|_| Ok("I don't know.".to_string()));

    let state = AppState::new(backend).with_llm(Arc::new(llm));
    let response = create_router(state)
        .oneshot(post_json("/ask", json!({"question": "why?"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        json_body(response).await["error"],
        "Could not generate SQL from your question"
    );
}

#[tokio::test]
async fn test_ask_llm_executes_read_resource_action() {
    let mut backend = backend_with_sources(&["db"]);
    backend.expect_list_resources().returning(|| Ok(vec![]));
    backend
        .expect_read_resource()
        .withf(|uri| uri == "db://schema")
        .returning(|_| Ok(r#"{"tables": {"users": {"row_count": 3}}}"#.to_string()));

    let mut llm = MockLanguageModel::new();
    llm.expect_complete()
        .returning(|_| Ok(r#"{"action": "read_resource", "uri": "db://schema"}"#.to_string()));

    let state = AppState::new(backend).with_llm(Arc::new(llm));
    let response = create_router(state)
        .oneshot(post_json("/ask-llm", json!({"question": "what tables exist?"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert_eq!(body["action"]["action"], "read_resource");
    assert_eq!(body["result"]["tables"]["users"]["row_count"], 3);
}

#[tokio::test]
async fn test_ask_llm_executes_call_tool_action() {
    let mut backend = backend_with_sources(&["db"]);
    backend.expect_list_resources().returning(|| Ok(vec![]));
    backend
        .expect_read_resource()
        .returning(|_| Ok("{}".to_string()));
    backend
        .expect_call_tool()
        .withf(|name, _| name == "health_check")
        .returning(|_, _| Ok(ToolOutput::ok(r#"{"status": "healthy"}"#)));

    let mut llm = MockLanguageModel::new();
    llm.expect_complete().returning(|_| {
        Ok(r#"Sure: {"action": "call_tool", "tool": "health_check", "args": {}}"#.to_string())
    });

    let state = AppState::new(backend).with_llm(Arc::new(llm));
    let response = create_router(state)
        .oneshot(post_json("/ask-llm", json!({"question": "is it up?"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["result"]["status"], "healthy");
}

#[tokio::test]
async fn test_schema_route() {
    let mut backend = backend_with_sources(&["db"]);
    backend
        .expect_read_resource()
        .withf(|uri| uri == "db://schema")
        .returning(|_| Ok(r#"{"tables": {}}"#.to_string()));

    let response = router(backend)
        .oneshot(get("/schema?data_source=db"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["data_source"], "db");
    assert!(body["schema"]["tables"].is_object());
}

#[tokio::test]
async fn test_schema_generation_failure_is_502() {
    let mut backend = backend_with_sources(&["db"]);
    backend
        .expect_read_resource()
        .returning(|_| Err(GatewayError::Upstream("connection lost".into())));

    let response = router(backend).oneshot(get("/schema")).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn test_refresh_schema_forwards_data_source() {
    let mut backend = backend();
    backend
        .expect_call_tool()
        .withf(|name, args| name == "refresh_schema" && args["data_source"] == "db")
        .returning(|_, _| Ok(ToolOutput::ok(r#"{"status": "refreshed", "data_source": "db"}"#)));

    let response = router(backend)
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/refresh-schema?data_source=db")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert_eq!(body["message"], "Schema refreshed successfully");
    assert_eq!(body["result"]["status"], "refreshed");
}

#[tokio::test]
async fn test_data_sources_route() {
    let mut backend = backend();
    backend
        .expect_call_tool()
        .withf(|name, args| name == "list_data_sources" && args.is_empty())
        .returning(|_, _| Ok(ToolOutput::ok(r#"[{"name": "db", "type": "sql"}]"#)));

    let response = router(backend).oneshot(get("/data-sources")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert_eq!(body["data_sources"][0]["name"], "db");
}

#[tokio::test]
async fn test_docs_served() {
    let response = router(backend()).oneshot(get("/docs")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}
