use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{error::LlmError, protocol};

/** \brief 未配置模型名时使用的默认模型。 */
pub const DEFAULT_MODEL: &str = "gpt-3.5-turbo";

/**
 * \brief LLM 接口配置：每次调用时从设置中重新读取，不做缓存。
 */
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LlmConfig {
    /** \brief API 基地址，可为完整的 chat/completions 地址 */
    pub api_url: String,
    /** \brief API Key */
    pub api_key: String,
    /** \brief 模型名 */
    pub model: String,
}

impl LlmConfig {
    /**
     * \brief 由原始设置值构造配置；地址或密钥为空时报错，模型为空时使用默认值。
     */
    pub fn resolve(api_url: &str, api_key: &str, model: &str) -> Result<Self, LlmError> {
        let api_url = api_url.trim();
        let api_key = api_key.trim();
        if api_url.is_empty() {
            return Err(LlmError::MissingConfiguration("api url"));
        }
        if api_key.is_empty() {
            return Err(LlmError::MissingConfiguration("api key"));
        }
        let model = match model.trim() {
            "" => DEFAULT_MODEL,
            m => m,
        };
        Ok(Self {
            api_url: api_url.to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
        })
    }

    /**
     * \brief 对直接构造的配置重新做裁剪与默认值处理，实际发出的请求以返回值为准。
     */
    pub fn resolved(&self) -> Result<LlmConfig, LlmError> {
        Self::resolve(&self.api_url, &self.api_key, &self.model)
    }
}

/**
 * \brief 消息角色。
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/**
 * \brief 消息结构，与 OpenAI Chat 消息格式对齐。
 */
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /** \brief 角色：system/user/assistant */
    pub role: Role,
    /** \brief 内容 */
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/**
 * \brief 前端提交的完整节点记录，link 中含连接凭据，不得外发。
 */
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeInput {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub link: String,
    #[serde(default)]
    pub country: String,
    #[serde(default)]
    pub group: String,
}

impl NodeInput {
    /**
     * \brief 去除连接信息，仅保留可发送给 LLM 的字段。
     */
    pub fn sanitize(&self) -> NodeInfo {
        NodeInfo {
            id: self.id,
            name: self.name.clone(),
            protocol: protocol::protocol_from_link(&self.link),
            country: self.country.clone(),
            group: self.group.clone(),
        }
    }
}

/**
 * \brief 脱敏后的节点摘要，作为 JSON 嵌入用户消息。
 */
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub id: i64,
    pub name: String,
    pub protocol: String,
    pub country: String,
    pub group: String,
}

/**
 * \brief 规则生成的目标客户端格式。
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClientFormat {
    #[default]
    Clash,
    Surge,
    Generic,
}

impl ClientFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClientFormat::Clash => "clash",
            ClientFormat::Surge => "surge",
            ClientFormat::Generic => "generic",
        }
    }
}

impl fmt::Display for ClientFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ClientFormat {
    type Err = LlmError;

    /** \brief 空标签视为未选择，按 Clash 处理。 */
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "clash" | "mihomo" => Ok(ClientFormat::Clash),
            "surge" => Ok(ClientFormat::Surge),
            "generic" => Ok(ClientFormat::Generic),
            _ => Err(LlmError::UnsupportedClientFormat(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_defaults_model() {
        let cfg = LlmConfig::resolve("https://api.example.com", "sk-1", "  ").expect("resolve");
        assert_eq!(cfg.model, DEFAULT_MODEL);
        assert_eq!(cfg.api_url, "https://api.example.com");
    }

    #[test]
    fn test_resolve_requires_url_and_key() {
        let err = LlmConfig::resolve("", "sk-1", "gpt-4o").unwrap_err();
        assert!(matches!(err, LlmError::MissingConfiguration("api url")));
        let err = LlmConfig::resolve("https://api.example.com", "", "gpt-4o").unwrap_err();
        assert!(matches!(err, LlmError::MissingConfiguration("api key")));
    }

    #[test]
    fn test_resolved_trims_and_defaults_direct_config() {
        let raw = LlmConfig {
            api_url: " https://api.example.com/v1 ".into(),
            api_key: "sk-1 ".into(),
            model: String::new(),
        };
        let cfg = raw.resolved().expect("resolved");
        assert_eq!(cfg.api_url, "https://api.example.com/v1");
        assert_eq!(cfg.api_key, "sk-1");
        assert_eq!(cfg.model, DEFAULT_MODEL);
    }

    #[test]
    fn test_sanitize_strips_link() {
        let input = NodeInput {
            id: 7,
            name: "HK-01".into(),
            link: "trojan://secret@hk.example.com:443".into(),
            country: "HK".into(),
            group: "default".into(),
        };
        let info = input.sanitize();
        assert_eq!(info.protocol, "trojan");
        let json = serde_json::to_string(&info).expect("serialize");
        assert!(!json.contains("secret"));
        assert_eq!(
            json,
            r#"{"id":7,"name":"HK-01","protocol":"trojan","country":"HK","group":"default"}"#
        );
    }

    #[test]
    fn test_client_format_parse() {
        assert_eq!("".parse::<ClientFormat>().unwrap(), ClientFormat::Clash);
        assert_eq!("Mihomo".parse::<ClientFormat>().unwrap(), ClientFormat::Clash);
        assert_eq!("surge".parse::<ClientFormat>().unwrap(), ClientFormat::Surge);
        assert_eq!("generic".parse::<ClientFormat>().unwrap(), ClientFormat::Generic);
        let err = "quantumult".parse::<ClientFormat>().unwrap_err();
        assert!(matches!(err, LlmError::UnsupportedClientFormat(tag) if tag == "quantumult"));
    }

    #[test]
    fn test_message_role_serializes_lowercase() {
        let json = serde_json::to_value(Message::system("hi")).expect("serialize");
        assert_eq!(json, serde_json::json!({"role": "system", "content": "hi"}));
    }
}
