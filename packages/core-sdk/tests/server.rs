use std::path::Path;

use axum::{
    body::{to_bytes, Body},
    http::{header::CONTENT_TYPE, Request},
    Router,
};
use serde_json::{json, Value};
use sublink_core_sdk::{
    db,
    server::{self, AppState},
};
use tempfile::TempDir;
use tower::ServiceExt;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn setup(demo_mode: bool) -> (TempDir, Router) {
    let dir = tempfile::tempdir().expect("tempdir");
    let db_path = dir.path().join("sublink.db");
    let conn = db::open_db(&db_path).expect("open db");
    db::migrate(&conn).expect("migrate");
    let app = server::router(AppState { db_path, demo_mode });
    (dir, app)
}

fn store_settings(dir: &Path, api_url: &str, api_key: &str) {
    let conn = db::open_db(dir.join("sublink.db")).expect("open db");
    db::save_llm_settings(
        &conn,
        &db::LlmSettings {
            api_url: api_url.to_string(),
            api_key: api_key.to_string(),
            model: String::new(),
        },
    )
    .expect("save settings");
}

async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> Value {
    let builder = Request::builder().method(method).uri(uri);
    let req = match body {
        Some(b) => builder
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(b.to_string())),
        None => builder.body(Body::empty()),
    }
    .expect("build request");
    let resp = app.clone().oneshot(req).await.expect("router call");
    assert_eq!(resp.status(), 200);
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.expect("read body");
    serde_json::from_slice(&bytes).expect("json envelope")
}

fn node_payload() -> Value {
    json!([
        {"id": 1, "name": "HK-01", "link": "vless://uuid-secret@hk.example.com:443", "country": "HK", "group": "a"},
        {"id": 2, "name": "JP-01", "link": "ss://cGFzcw@jp.example.com:8388", "country": "JP", "group": "a"}
    ])
}

#[tokio::test]
async fn test_settings_roundtrip_hides_key() {
    let (_dir, app) = setup(false);

    let saved = call(
        &app,
        "POST",
        "/api/v1/llm/settings",
        Some(json!({"apiUrl": "https://api.example.com/v1", "apiKey": "sk-1", "model": "gpt-4o"})),
    )
    .await;
    assert_eq!(saved["code"], 200);

    let got = call(&app, "GET", "/api/v1/llm/settings", None).await;
    assert_eq!(got["code"], 200);
    assert_eq!(got["data"]["apiUrl"], "https://api.example.com/v1");
    assert_eq!(got["data"]["model"], "gpt-4o");
    assert_eq!(got["data"]["hasApiKey"], true);
    assert!(!got.to_string().contains("sk-1"));
}

#[tokio::test]
async fn test_organize_rejects_empty_nodes() {
    let (_dir, app) = setup(false);
    let resp = call(
        &app,
        "POST",
        "/api/v1/llm/organize-nodes",
        Some(json!({"nodes": [], "instruction": ""})),
    )
    .await;
    assert_eq!(resp["code"], 400);
    assert_eq!(resp["msg"], "节点列表不能为空");
}

#[tokio::test]
async fn test_bad_json_is_uniform_failure() {
    let (_dir, app) = setup(false);
    let req = Request::builder()
        .method("POST")
        .uri("/api/v1/llm/generate-rules")
        .header(CONTENT_TYPE, "application/json")
        .body(Body::from("{not json"))
        .expect("build request");
    let resp = app.oneshot(req).await.expect("router call");
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.expect("read body");
    let v: Value = serde_json::from_slice(&bytes).expect("json envelope");
    assert_eq!(v["code"], 400);
    assert_eq!(v["msg"], "参数错误");
}

#[tokio::test]
async fn test_organize_without_settings_fails() {
    let (_dir, app) = setup(false);
    let resp = call(
        &app,
        "POST",
        "/api/v1/llm/organize-nodes",
        Some(json!({"nodes": node_payload()})),
    )
    .await;
    assert_eq!(resp["code"], 400);
    assert!(resp["msg"].as_str().unwrap().contains("not configured"));
}

#[tokio::test]
async fn test_organize_forwards_sanitized_nodes() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_string_contains(r#"\"protocol\":\"vless\""#))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "x",
            "choices": [{"index": 0, "message": {"role": "assistant", "content": "{\"groups\":[]}"}}]
        })))
        .expect(1)
        .mount(&upstream)
        .await;

    let (dir, app) = setup(false);
    store_settings(dir.path(), &upstream.uri(), "sk-test");

    let resp = call(
        &app,
        "POST",
        "/api/v1/llm/organize-nodes",
        Some(json!({"nodes": node_payload(), "instruction": "按地区"})),
    )
    .await;
    assert_eq!(resp["code"], 200, "{resp}");
    assert_eq!(resp["data"]["result"], "{\"groups\":[]}");

    let received = upstream.received_requests().await.expect("recorded requests");
    let body = String::from_utf8_lossy(&received[0].body).to_string();
    assert!(!body.contains("uuid-secret"));
    assert!(!body.contains("cGFzcw"));
}

#[tokio::test]
async fn test_generate_rules_rejects_unknown_client() {
    let (dir, app) = setup(false);
    store_settings(dir.path(), "https://api.example.com", "sk-test");
    let resp = call(
        &app,
        "POST",
        "/api/v1/llm/generate-rules",
        Some(json!({"nodes": node_payload(), "clientType": "quantumult"})),
    )
    .await;
    assert_eq!(resp["code"], 400);
    assert!(resp["msg"].as_str().unwrap().contains("quantumult"));
}

#[tokio::test]
async fn test_upstream_error_becomes_failure_envelope() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
        .mount(&upstream)
        .await;

    let (dir, app) = setup(false);
    store_settings(dir.path(), &upstream.uri(), "sk-test");
    let resp = call(
        &app,
        "POST",
        "/api/v1/llm/generate-rules",
        Some(json!({"nodes": node_payload(), "clientType": "clash"})),
    )
    .await;
    assert_eq!(resp["code"], 400);
    let msg = resp["msg"].as_str().unwrap();
    assert!(msg.starts_with("规则生成失败"));
    assert!(msg.contains("503"));
}

#[tokio::test]
async fn test_demo_mode_blocks_llm_calls() {
    let (dir, app) = setup(true);
    store_settings(dir.path(), "https://api.example.com", "sk-test");
    let resp = call(
        &app,
        "POST",
        "/api/v1/llm/organize-nodes",
        Some(json!({"nodes": node_payload()})),
    )
    .await;
    assert_eq!(resp["code"], 400);
    assert_eq!(resp["msg"], "演示模式下不可用");

    let settings = call(&app, "GET", "/api/v1/llm/settings", None).await;
    assert_eq!(settings["code"], 200);
}

#[tokio::test]
async fn test_connection_endpoint_requires_url_and_key() {
    let (_dir, app) = setup(false);
    let resp = call(
        &app,
        "POST",
        "/api/v1/llm/test-connection",
        Some(json!({"apiUrl": "https://api.example.com", "apiKey": ""})),
    )
    .await;
    assert_eq!(resp["code"], 400);
    assert_eq!(resp["msg"], "API URL 和 API Key 不能为空");
}

#[tokio::test]
async fn test_connection_endpoint_uses_form_config() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_string_contains("\"model\":\"gpt-3.5-turbo\""))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "x",
            "choices": [{"index": 0, "message": {"role": "assistant", "content": "ok"}}]
        })))
        .expect(1)
        .mount(&upstream)
        .await;

    let (_dir, app) = setup(false);
    let resp = call(
        &app,
        "POST",
        "/api/v1/llm/test-connection",
        Some(json!({"apiUrl": format!("{}/v1", upstream.uri()), "apiKey": "sk-test"})),
    )
    .await;
    assert_eq!(resp["code"], 200, "{resp}");
    assert_eq!(resp["msg"], "连接测试成功");
}
