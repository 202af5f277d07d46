use crate::{
    error::LlmError,
    models::{ClientFormat, Message, NodeInfo},
};

/** \brief 连接测试使用的固定消息。 */
pub const PING_PROMPT: &str = "请回复 ok";

const ORGANIZE_SYSTEM_PROMPT: &str = r#"你是一个代理节点整理助手，负责按用户指令对代理节点进行分类、整理并给出建议。
结果必须是 JSON，格式如下：
{
  "groups": [
    {
      "name": "分组名称",
      "nodeIds": [1, 2, 3],
      "description": "分组说明"
    }
  ],
  "suggestions": "整理建议"
}

要求：
- nodeIds 只能使用节点列表中给出的 id
- 只输出 JSON，不要输出其他内容
- 分组名称简洁明了"#;

const ORGANIZE_DEFAULT_INSTRUCTION: &str = "请按地区和协议对节点进行分组整理。";

const RULES_DEFAULT_INSTRUCTION: &str =
    "请根据节点的地区和协议生成合适的分流规则，包含国内直连、国外代理、流媒体分流等常用规则。";

fn rule_format_description(format: ClientFormat) -> &'static str {
    match format {
        ClientFormat::Clash => {
            r#"Clash/Mihomo YAML 配置中的 rules 段，例如：
rules:
  - DOMAIN-SUFFIX,google.com,代理分组名
  - GEOIP,CN,DIRECT
  - MATCH,代理分组名"#
        }
        ClientFormat::Surge => {
            r#"Surge 配置中的 [Rule] 段，例如：
[Rule]
DOMAIN-SUFFIX,google.com,代理分组名
GEOIP,CN,DIRECT
FINAL,代理分组名"#
        }
        ClientFormat::Generic => "通用的代理分流规则格式",
    }
}

fn rules_system_prompt(format: ClientFormat) -> String {
    format!(
        r#"你是一个代理订阅规则生成助手，根据用户提供的节点信息和需求生成 {format} 订阅规则。

规则格式：{desc}

结果必须是 JSON，格式如下：
{{
  "rules": "规则内容（字符串）",
  "proxyGroups": [
    {{
      "name": "分组名称",
      "type": "select/url-test/fallback",
      "nodeIds": [1, 2, 3]
    }}
  ],
  "description": "规则说明"
}}

要求：
- 只输出 JSON，不要输出其他内容
- 规则应包含常用分流（国内直连、国外代理等）
- 代理组名称简洁明了
- nodeIds 只能使用节点列表中给出的 id"#,
        format = format,
        desc = rule_format_description(format),
    )
}

fn nodes_json(nodes: &[NodeInfo]) -> Result<String, LlmError> {
    serde_json::to_string(nodes).map_err(LlmError::Serialization)
}

/**
 * \brief 构造节点整理的 system/user 消息对。
 */
pub fn organize_messages(nodes: &[NodeInfo], instruction: &str) -> Result<Vec<Message>, LlmError> {
    let json = nodes_json(nodes)?;
    let instruction = instruction.trim();
    let user = if instruction.is_empty() {
        format!("需要整理的节点列表：\n{}\n\n{}", json, ORGANIZE_DEFAULT_INSTRUCTION)
    } else {
        format!("需要整理的节点列表：\n{}\n\n用户指令：{}", json, instruction)
    };
    Ok(vec![
        Message::system(ORGANIZE_SYSTEM_PROMPT),
        Message::user(user),
    ])
}

/**
 * \brief 构造规则生成的 system/user 消息对，system 提示随客户端格式变化。
 */
pub fn rules_messages(
    nodes: &[NodeInfo],
    format: ClientFormat,
    instruction: &str,
) -> Result<Vec<Message>, LlmError> {
    let json = nodes_json(nodes)?;
    let instruction = instruction.trim();
    let mut user = format!("可用的节点列表：\n{}\n\n", json);
    if instruction.is_empty() {
        user.push_str(RULES_DEFAULT_INSTRUCTION);
    } else {
        user.push_str("用户需求：");
        user.push_str(instruction);
    }
    Ok(vec![
        Message::system(rules_system_prompt(format)),
        Message::user(user),
    ])
}
