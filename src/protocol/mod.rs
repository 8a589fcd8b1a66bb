//! 结构化工具调用协议
//!
//! 模型输出统一为一个 JSON 对象：response_type（tool_request / final_response /
//! clarification）、reasoning、tools、response、confidence。本模块负责从
//! 自由文本中鲁棒提取该对象、把工具结果格式化回喂给模型，以及生成
//! 声明协议的系统提示词。

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::core::AgentError;

/// 工具调用请求
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,
    #[serde(default)]
    pub args: serde_json::Map<String, serde_json::Value>,
    /// 关联 id；缺省时由执行器补发
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_id: Option<String>,
}

impl ToolCall {
    pub fn new(name: impl Into<String>, args: serde_json::Value) -> Self {
        let args = match args {
            serde_json::Value::Object(map) => map,
            _ => serde_json::Map::new(),
        };
        Self {
            name: name.into(),
            args,
            call_id: None,
        }
    }
}

/// 工具执行结果。失败不是错误分支：success=false + 文本说明。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_id: Option<String>,
    pub success: bool,
    pub result: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

/// 模型响应类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseKind {
    ToolRequest,
    #[default]
    FinalResponse,
    Clarification,
}

/// 结构化模型响应。response_type 缺省按 final_response 处理。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuredResponse {
    #[serde(default)]
    pub response_type: ResponseKind,
    #[serde(default)]
    pub reasoning: String,
    #[serde(default)]
    pub tools: Vec<ToolCall>,
    #[serde(default)]
    pub response: String,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
}

fn default_confidence() -> f64 {
    1.0
}

fn fence_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"```(?:json)?\s*([\s\S]*?)```").unwrap())
}

fn trailing_comma_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r",\s*([}\]])").unwrap())
}

/// 从自由文本中提取 JSON 块：优先代码围栏内容，其次首个 { 到末个 } 的区间。
pub(crate) fn extract_json_block(raw: &str) -> Option<String> {
    if let Some(caps) = fence_re().captures(raw) {
        let inner = caps[1].trim();
        if !inner.is_empty() {
            return Some(inner.to_string());
        }
    }
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    if end <= start {
        return None;
    }
    Some(raw[start..=end].to_string())
}

/// 解析模型输出为结构化响应。
/// 首次解析失败时剥除尾随逗号重试一次；彻底失败返回 Protocol 错误。
pub fn parse_structured(raw: &str) -> Result<StructuredResponse, AgentError> {
    let block = extract_json_block(raw)
        .ok_or_else(|| AgentError::Protocol("no JSON object found in response".to_string()))?;

    match serde_json::from_str::<StructuredResponse>(&block) {
        Ok(parsed) => Ok(parsed),
        Err(first_err) => {
            let repaired = trailing_comma_re().replace_all(&block, "$1");
            serde_json::from_str::<StructuredResponse>(&repaired).map_err(|_| {
                AgentError::Protocol(format!("invalid structured response: {}", first_err))
            })
        }
    }
}

/// 单条结果的最大回传长度（字符数），超出时取头尾各半
const RESULT_CHAR_CAP: usize = 5000;
const RESULT_HALF: usize = 2500;

const TRUNCATION_MARKER: &str = "\n\n[... truncated ...]\n\n";

/// 中部截断：保留头尾，去掉中间。按字符计数，保证 UTF-8 边界安全。
/// 仅在截断后确实变短时才截断，刚好超限一点的文本原样返回。
pub fn truncate_middle(text: &str, cap: usize, half: usize) -> String {
    let count = text.chars().count();
    if count <= cap + TRUNCATION_MARKER.chars().count() {
        return text.to_string();
    }
    let head: String = text.chars().take(half).collect();
    let tail: String = text
        .chars()
        .skip(count.saturating_sub(half))
        .collect();
    format!("{}{}{}", head, TRUNCATION_MARKER, tail)
}

/// 把一批工具结果格式化为回喂模型的用户消息。
/// 每条带 SUCCESS / FAILED 头，超长结果做中部截断，结尾附继续指令。
pub fn format_tool_results(results: &[ToolResult]) -> String {
    let mut out = String::from("Tool execution results:\n\n");
    for r in results {
        let header = if r.success { "✓ SUCCESS" } else { "✗ FAILED" };
        out.push_str(&format!("### {} - {}\n", header, r.name));
        out.push_str(&truncate_middle(&r.result, RESULT_CHAR_CAP, RESULT_HALF));
        out.push_str("\n\n");
    }
    out.push_str(
        "Based on these results, either request more tools or provide your final_response. \
         Respond with JSON only.",
    );
    out
}

/// 工具清单条目：喂给模型的签名与描述
#[derive(Debug, Clone, Serialize)]
pub struct ToolManifest {
    pub name: String,
    pub signature: String,
    pub description: String,
}

/// 生成声明结构化协议与可用工具的系统提示词
pub fn structured_system_prompt(tools: &[ToolManifest]) -> String {
    let mut listing = String::new();
    for t in tools {
        listing.push_str(&format!("- {}: {}\n", t.signature, t.description));
    }
    format!(
        r#"You are a capable task-execution agent. You MUST respond with a single JSON object and nothing else:

{{
  "response_type": "tool_request" | "final_response" | "clarification",
  "reasoning": "brief reasoning about what to do next",
  "tools": [{{"name": "tool_name", "args": {{...}}}}],
  "response": "text for the user",
  "confidence": 0.0-1.0
}}

Rules:
- Use "tool_request" with a non-empty "tools" array when you need tool output to proceed.
- Use "final_response" when the task is complete; put the full answer in "response".
- Use "clarification" when you need more information from the user.
- Never invent tool output. Never emit text outside the JSON object.

Available tools:
{listing}"#
    )
}
