use std::time::Duration;

use reqwest::{
    header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE},
    StatusCode,
};
use serde::{Deserialize, Serialize};

use crate::{
    error::LlmError,
    models::{ClientFormat, LlmConfig, Message, NodeInfo},
    prompts, telemetry,
};

const CHAT_COMPLETIONS_SUFFIX: &str = "/chat/completions";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);
const TEMPERATURE: f64 = 0.7;

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    temperature: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/**
 * \brief 由用户填写的基地址推导 chat/completions 完整地址。
 */
pub fn build_endpoint_url(api_url: &str) -> String {
    if api_url.ends_with(CHAT_COMPLETIONS_SUFFIX) {
        return api_url.to_string();
    }
    if api_url.ends_with("/v1") {
        return format!("{}{}", api_url, CHAT_COMPLETIONS_SUFFIX);
    }
    format!(
        "{}/v1{}",
        api_url.trim_end_matches('/'),
        CHAT_COMPLETIONS_SUFFIX
    )
}

fn request_body(config: &LlmConfig, messages: &[Message]) -> Result<Vec<u8>, LlmError> {
    let body = ChatRequest {
        model: &config.model,
        messages,
        temperature: TEMPERATURE,
        max_tokens: None,
    };
    serde_json::to_vec(&body).map_err(LlmError::Serialization)
}

fn transport_error(err: reqwest::Error, timeout: Duration) -> LlmError {
    if err.is_builder() {
        LlmError::RequestConstruction(err.to_string())
    } else if err.is_timeout() {
        LlmError::Timeout(timeout.as_secs())
    } else {
        LlmError::Network(err)
    }
}

/**
 * \brief 发送一次非流式 chat completion 请求，返回第一个 choice 的文本。
 *
 * 每次调用只发起一次请求，任何失败都直接返回，不重试。
 */
pub async fn chat_completion(config: &LlmConfig, messages: &[Message]) -> Result<String, LlmError> {
    chat_completion_with_timeout(config, messages, REQUEST_TIMEOUT).await
}

pub(crate) async fn chat_completion_with_timeout(
    config: &LlmConfig,
    messages: &[Message],
    timeout: Duration,
) -> Result<String, LlmError> {
    let body = request_body(config, messages)?;
    let url = build_endpoint_url(&config.api_url);

    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    let mut auth = HeaderValue::from_str(&format!("Bearer {}", config.api_key))
        .map_err(|e| LlmError::RequestConstruction(format!("invalid api key: {}", e)))?;
    auth.set_sensitive(true);
    headers.insert(AUTHORIZATION, auth);

    let client = reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| LlmError::RequestConstruction(e.to_string()))?;

    let resp = client
        .post(url)
        .headers(headers)
        .body(body)
        .send()
        .await
        .map_err(|e| transport_error(e, timeout))?;

    let status = resp.status();
    let text = resp.text().await.map_err(|e| transport_error(e, timeout))?;
    if status != StatusCode::OK {
        return Err(LlmError::Upstream {
            status: status.as_u16(),
            body: text,
        });
    }

    let parsed: ChatResponse = serde_json::from_str(&text).map_err(LlmError::ResponseParse)?;
    parsed
        .choices
        .into_iter()
        .next()
        .map(|choice| choice.message.content.unwrap_or_default())
        .ok_or(LlmError::EmptyResult)
}

async fn run_logged(
    category: &str,
    config: &LlmConfig,
    node_count: usize,
    messages: Vec<Message>,
) -> Result<String, LlmError> {
    match chat_completion(config, &messages).await {
        Ok(text) => {
            telemetry::log_event(
                category,
                &format!(
                    "done model={} nodes={} reply_len={}",
                    config.model,
                    node_count,
                    text.len()
                ),
            );
            Ok(text)
        }
        Err(e) => {
            telemetry::log_error(
                category,
                &format!("failed model={} nodes={}: {}", config.model, node_count, e),
            );
            Err(e)
        }
    }
}

/**
 * \brief 让 LLM 按指令对节点分组整理，原样返回模型回复。
 * \param instruction 为空时使用默认的“按地区和协议分组”指令
 */
pub async fn organize_nodes(
    config: &LlmConfig,
    nodes: &[NodeInfo],
    instruction: &str,
) -> Result<String, LlmError> {
    if nodes.is_empty() {
        return Err(LlmError::NoNodes);
    }
    let config = config.resolved()?;
    let messages = prompts::organize_messages(nodes, instruction)?;
    run_logged("llm.organize", &config, nodes.len(), messages).await
}

/**
 * \brief 让 LLM 为指定客户端格式生成分流规则，原样返回模型回复。
 */
pub async fn generate_rules(
    config: &LlmConfig,
    nodes: &[NodeInfo],
    format: ClientFormat,
    instruction: &str,
) -> Result<String, LlmError> {
    if nodes.is_empty() {
        return Err(LlmError::NoNodes);
    }
    let config = config.resolved()?;
    let messages = prompts::rules_messages(nodes, format, instruction)?;
    run_logged(&format!("llm.rules.{}", format), &config, nodes.len(), messages).await
}

/**
 * \brief 连接测试：发送固定消息，回复非空即视为成功。
 */
pub async fn test_connection(config: &LlmConfig) -> Result<(), LlmError> {
    let config = config.resolved()?;
    let messages = [Message::user(prompts::PING_PROMPT)];
    let reply = chat_completion(&config, &messages).await?;
    if reply.is_empty() {
        telemetry::log_error("llm.test", &format!("empty reply from {}", config.api_url));
        return Err(LlmError::EmptyResult);
    }
    telemetry::log_event("llm.test", &format!("ok base={} model={}", config.api_url, config.model));
    Ok(())
}
