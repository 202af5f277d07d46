use thiserror::Error;

/**
 * \brief LLM 调用的错误类型，均为终止性错误，不做内部重试。
 */
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("LLM {0} is not configured")]
    MissingConfiguration(&'static str),

    #[error("node list must not be empty")]
    NoNodes,

    #[error("unsupported client format: {0}")]
    UnsupportedClientFormat(String),

    #[error("serialize request failed: {0}")]
    Serialization(#[source] serde_json::Error),

    #[error("build request failed: {0}")]
    RequestConstruction(String),

    #[error("request to LLM API failed: {0}")]
    Network(#[source] reqwest::Error),

    #[error("request to LLM API timed out after {0}s")]
    Timeout(u64),

    #[error("LLM API returned HTTP {status}: {body}")]
    Upstream { status: u16, body: String },

    #[error("parse LLM response failed: {0}")]
    ResponseParse(#[source] serde_json::Error),

    #[error("LLM API returned no choices")]
    EmptyResult,

    #[error("LLM reply does not match the expected schema: {0}")]
    SchemaMismatch(String),
}

impl LlmError {
    /** \brief 上游返回的 HTTP 状态码（仅 Upstream 错误）。 */
    pub fn status(&self) -> Option<u16> {
        match self {
            LlmError::Upstream { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_missing_configuration(&self) -> bool {
        matches!(self, LlmError::MissingConfiguration(_))
    }
}
