/*!
 * \brief 模型结构化回复的类型化解析。LLM 操作本身只返回原始文本，需要结构时由调用方显式解析；
 * 引用未提交节点 id 的回复会被拒绝。
 */

use std::collections::HashSet;

use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::error::LlmError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeGroup {
    pub name: String,
    pub node_ids: Vec<i64>,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrganizeReply {
    pub groups: Vec<NodeGroup>,
    #[serde(default)]
    pub suggestions: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyGroup {
    pub name: String,
    #[serde(rename = "type", default)]
    pub group_type: String,
    pub node_ids: Vec<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RulesReply {
    pub rules: String,
    #[serde(default)]
    pub proxy_groups: Vec<ProxyGroup>,
    #[serde(default)]
    pub description: String,
}

/** \brief 去掉回复外层可能包裹的 Markdown 代码块。 */
fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = match rest.find('\n') {
        Some(pos) => &rest[pos + 1..],
        None => rest,
    };
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

fn parse_json<T: DeserializeOwned>(text: &str) -> Result<T, LlmError> {
    serde_json::from_str(strip_code_fence(text)).map_err(|e| LlmError::SchemaMismatch(e.to_string()))
}

fn check_ids<'a>(
    group: &str,
    ids: impl IntoIterator<Item = &'a i64>,
    known: &HashSet<i64>,
) -> Result<(), LlmError> {
    for id in ids {
        if !known.contains(id) {
            return Err(LlmError::SchemaMismatch(format!(
                "group {:?} references unknown node id {}",
                group, id
            )));
        }
    }
    Ok(())
}

/**
 * \brief 解析节点整理回复，并校验 nodeIds 均来自提交的节点。
 */
pub fn parse_organize_reply(text: &str, known_ids: &[i64]) -> Result<OrganizeReply, LlmError> {
    let reply: OrganizeReply = parse_json(text)?;
    let known: HashSet<i64> = known_ids.iter().copied().collect();
    for group in &reply.groups {
        check_ids(&group.name, &group.node_ids, &known)?;
    }
    Ok(reply)
}

/**
 * \brief 解析规则生成回复，并校验代理组引用的 nodeIds。
 */
pub fn parse_rules_reply(text: &str, known_ids: &[i64]) -> Result<RulesReply, LlmError> {
    let reply: RulesReply = parse_json(text)?;
    let known: HashSet<i64> = known_ids.iter().copied().collect();
    for group in &reply.proxy_groups {
        check_ids(&group.name, &group.node_ids, &known)?;
    }
    Ok(reply)
}
