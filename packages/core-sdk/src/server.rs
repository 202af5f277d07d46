use std::path::PathBuf;

use anyhow::Result;
use axum::{
    extract::{rejection::JsonRejection, Request, State},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, get_service, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tower_http::services::ServeDir;

use crate::{
    db,
    error::LlmError,
    llm,
    models::{ClientFormat, LlmConfig, NodeInfo, NodeInput},
    telemetry,
};

const CODE_OK: u16 = 200;
const CODE_FAIL: u16 = 400;

/**
 * \brief 服务共享状态：每个请求按路径重新打开数据库读取设置。
 */
#[derive(Debug, Clone)]
pub struct AppState {
    pub db_path: PathBuf,
    /** \brief 演示模式下禁止调用 LLM 整理/生成接口 */
    pub demo_mode: bool,
}

/**
 * \brief 统一响应结构。
 */
#[derive(Serialize, Deserialize, Debug)]
pub struct ApiResponse {
    pub code: u16,
    pub data: Value,
    pub msg: String,
}

fn ok(msg: &str, data: Value) -> Json<ApiResponse> {
    Json(ApiResponse {
        code: CODE_OK,
        data,
        msg: msg.to_string(),
    })
}

fn fail(msg: impl Into<String>) -> Json<ApiResponse> {
    Json(ApiResponse {
        code: CODE_FAIL,
        data: Value::Null,
        msg: msg.into(),
    })
}

/**
 * \brief 构建路由，静态前端目录取 SUBLINK_UI_DIR（默认 web）。
 */
pub fn router(state: AppState) -> Router {
    let ui_root = std::env::var("SUBLINK_UI_DIR").unwrap_or_else(|_| "web".to_string());
    let static_service =
        get_service(ServeDir::new(ui_root).append_index_html_on_directories(true));

    let llm_routes = Router::new()
        .route("/organize-nodes", post(organize_nodes))
        .route("/generate-rules", post(generate_rules))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            demo_mode_restrict,
        ))
        .route("/test-connection", post(test_connection))
        .route("/settings", get(get_settings).post(save_settings));

    Router::new()
        .nest("/api/v1/llm", llm_routes)
        .fallback_service(static_service)
        .with_state(state)
}

/**
 * \brief 启动本地 HTTP 服务。
 * \param addr 监听地址，如 "127.0.0.1:8000"
 */
pub async fn run(addr: &str, state: AppState) -> Result<()> {
    {
        let conn = db::open_db(&state.db_path)?;
        db::migrate(&conn)?;
        telemetry::set_enabled(db::get_telemetry_enabled(&conn)?);
    }
    let demo_mode = state.demo_mode;
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    println!("Server listening on http://{}", addr);
    telemetry::log_event(
        "server",
        &format!("listening addr={} demo_mode={}", addr, demo_mode),
    );
    axum::serve(listener, app).await?;
    Ok(())
}

async fn demo_mode_restrict(State(state): State<AppState>, req: Request, next: Next) -> Response {
    if state.demo_mode {
        telemetry::log_warn("server.demo", &format!("blocked {}", req.uri().path()));
        return fail("演示模式下不可用").into_response();
    }
    next.run(req).await
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct OrganizeRequest {
    #[serde(default)]
    nodes: Vec<NodeInput>,
    #[serde(default)]
    instruction: String,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct GenerateRulesRequest {
    #[serde(default)]
    nodes: Vec<NodeInput>,
    #[serde(default)]
    client_type: String,
    #[serde(default)]
    instruction: String,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct TestConnectionRequest {
    #[serde(default)]
    api_url: String,
    #[serde(default)]
    api_key: String,
    #[serde(default)]
    model: String,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct SettingsRequest {
    #[serde(default)]
    api_url: String,
    /** \brief 留空表示保留已存储的密钥 */
    #[serde(default)]
    api_key: String,
    #[serde(default)]
    model: String,
    #[serde(default)]
    telemetry_enabled: Option<bool>,
}

/**
 * \brief 每个请求重新读取已保存的设置。
 */
fn load_config(state: &AppState) -> Result<LlmConfig> {
    let conn = db::open_db(&state.db_path)?;
    telemetry::set_enabled(db::get_telemetry_enabled(&conn)?);
    let s = db::load_llm_settings(&conn)?;
    Ok(LlmConfig::resolve(&s.api_url, &s.api_key, &s.model)?)
}

fn sanitize(nodes: &[NodeInput]) -> Vec<NodeInfo> {
    nodes.iter().map(NodeInput::sanitize).collect()
}

/**
 * \brief POST /api/v1/llm/organize-nodes
 */
async fn organize_nodes(
    State(state): State<AppState>,
    payload: Result<Json<OrganizeRequest>, JsonRejection>,
) -> Json<ApiResponse> {
    let Ok(Json(req)) = payload else {
        return fail("参数错误");
    };
    if req.nodes.is_empty() {
        return fail("节点列表不能为空");
    }
    let config = match load_config(&state) {
        Ok(c) => c,
        Err(e) => return fail(format!("LLM整理失败: {}", e)),
    };
    let nodes = sanitize(&req.nodes);
    match llm::organize_nodes(&config, &nodes, &req.instruction).await {
        Ok(result) => ok("整理完成", json!({ "result": result })),
        Err(e) => fail(format!("LLM整理失败: {}", e)),
    }
}

/**
 * \brief POST /api/v1/llm/generate-rules
 */
async fn generate_rules(
    State(state): State<AppState>,
    payload: Result<Json<GenerateRulesRequest>, JsonRejection>,
) -> Json<ApiResponse> {
    let Ok(Json(req)) = payload else {
        return fail("参数错误");
    };
    if req.nodes.is_empty() {
        return fail("节点列表不能为空");
    }
    let format = match req.client_type.parse::<ClientFormat>() {
        Ok(f) => f,
        Err(e) => return fail(format!("规则生成失败: {}", e)),
    };
    let config = match load_config(&state) {
        Ok(c) => c,
        Err(e) => return fail(format!("规则生成失败: {}", e)),
    };
    let nodes = sanitize(&req.nodes);
    match llm::generate_rules(&config, &nodes, format, &req.instruction).await {
        Ok(result) => ok("生成完成", json!({ "result": result })),
        Err(e) => fail(format!("规则生成失败: {}", e)),
    }
}

/**
 * \brief POST /api/v1/llm/test-connection，使用表单中尚未保存的配置。
 */
async fn test_connection(
    payload: Result<Json<TestConnectionRequest>, JsonRejection>,
) -> Json<ApiResponse> {
    let Ok(Json(req)) = payload else {
        return fail("参数错误");
    };
    let config = match LlmConfig::resolve(&req.api_url, &req.api_key, &req.model) {
        Ok(c) => c,
        Err(LlmError::MissingConfiguration(_)) => return fail("API URL 和 API Key 不能为空"),
        Err(e) => return fail(format!("连接测试失败: {}", e)),
    };
    match llm::test_connection(&config).await {
        Ok(()) => ok("连接测试成功", Value::Null),
        Err(e) => fail(format!("连接测试失败: {}", e)),
    }
}

/**
 * \brief GET /api/v1/llm/settings，不回传密钥本身。
 */
async fn get_settings(State(state): State<AppState>) -> Json<ApiResponse> {
    let read = || -> Result<Value> {
        let conn = db::open_db(&state.db_path)?;
        let s = db::load_llm_settings(&conn)?;
        Ok(json!({
            "apiUrl": s.api_url,
            "model": s.model,
            "hasApiKey": !s.api_key.is_empty(),
            "telemetryEnabled": db::get_telemetry_enabled(&conn)?,
        }))
    };
    match read() {
        Ok(data) => ok("获取成功", data),
        Err(e) => fail(format!("读取设置失败: {}", e)),
    }
}

/**
 * \brief POST /api/v1/llm/settings
 */
async fn save_settings(
    State(state): State<AppState>,
    payload: Result<Json<SettingsRequest>, JsonRejection>,
) -> Json<ApiResponse> {
    let Ok(Json(req)) = payload else {
        return fail("参数错误");
    };
    let write = || -> Result<()> {
        let conn = db::open_db(&state.db_path)?;
        db::save_llm_settings(
            &conn,
            &db::LlmSettings {
                api_url: req.api_url.clone(),
                api_key: req.api_key.clone(),
                model: req.model.clone(),
            },
        )?;
        if let Some(enabled) = req.telemetry_enabled {
            db::set_telemetry_enabled(&conn, enabled)?;
            telemetry::set_enabled(enabled);
        }
        Ok(())
    };
    match write() {
        Ok(()) => {
            telemetry::log_event(
                "server.settings",
                &format!("saved base={} model={}", req.api_url.trim(), req.model.trim()),
            );
            ok("保存成功", Value::Null)
        }
        Err(e) => fail(format!("保存设置失败: {}", e)),
    }
}
