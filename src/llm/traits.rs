//! LLM 客户端抽象
//!
//! 所有后端（OpenAI 兼容 / Mock / Scripted）实现 LlmClient：
//! complete（可带工具清单，返回文本与工具调用）、complete_structured（按 JSON Schema 约束输出）。

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::memory::{Message, ToolCall};
use crate::tools::ToolSpec;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LlmError {
    #[error("LLM request failed: {0}")]
    Request(String),

    #[error("LLM returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Invalid LLM response: {0}")]
    InvalidResponse(String),

    #[error("LLM not configured: {0}")]
    NotConfigured(String),
}

/// 一次模型调用的输入
#[derive(Debug, Clone, Default)]
pub struct LlmRequest {
    pub messages: Vec<Message>,
    pub tools: Vec<ToolSpec>,
    /// 扩展推理模式（由后端决定如何开启）
    pub extended_reasoning: bool,
}

impl LlmRequest {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            ..Self::default()
        }
    }

    pub fn with_tools(mut self, tools: Vec<ToolSpec>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_extended_reasoning(mut self, on: bool) -> Self {
        self.extended_reasoning = on;
        self
    }
}

/// 模型回复：文本 + 工具调用（可为空）
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LlmReply {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
}

impl LlmReply {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            tool_calls: Vec::new(),
        }
    }

    pub fn with_tool_calls(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            content: content.into(),
            tool_calls,
        }
    }
}

/// 结构化输出：原始文本 + 解析结果；解析失败时 parsed 为 None 且 parse_error 有值
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StructuredReply {
    pub raw: String,
    pub parsed: Option<Value>,
    pub parse_error: Option<String>,
}

impl StructuredReply {
    /// 从模型原始输出中提取 JSON
    pub fn from_raw(raw: impl Into<String>) -> Self {
        let raw = raw.into();
        match extract_json(&raw) {
            Ok(value) => Self {
                raw,
                parsed: Some(value),
                parse_error: None,
            },
            Err(e) => Self {
                raw,
                parsed: None,
                parse_error: Some(e),
            },
        }
    }
}

/// 从文本中提取 JSON 对象：优先 ```json 代码块，否则取首个 `{` 到最后一个 `}`
pub fn extract_json(raw: &str) -> Result<Value, String> {
    let trimmed = raw.trim();
    let candidate = if let Some(start) = trimmed.find("```json") {
        let body = &trimmed[start + 7..];
        body.find("```").map(|end| &body[..end]).unwrap_or(body)
    } else {
        match (trimmed.find('{'), trimmed.rfind('}')) {
            (Some(s), Some(e)) if e > s => &trimmed[s..=e],
            _ => return Err("no JSON object found in model output".to_string()),
        }
    };
    serde_json::from_str(candidate.trim()).map_err(|e| e.to_string())
}

/// LLM 客户端 trait
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmReply, LlmError>;

    /// 结构化输出；默认在末尾追加 schema 说明后调用 complete 并从文本中提取 JSON
    async fn complete_structured(
        &self,
        request: &LlmRequest,
        schema: &Value,
    ) -> Result<StructuredReply, LlmError> {
        let mut messages = request.messages.clone();
        messages.push(Message::system(format!(
            "Respond with a single JSON object that matches this JSON Schema:\n{}",
            schema
        )));
        let plain = LlmRequest {
            messages,
            tools: Vec::new(),
            extended_reasoning: request.extended_reasoning,
        };
        let reply = self.complete(&plain).await?;
        Ok(StructuredReply::from_raw(reply.content))
    }

    /// 累计 token 使用统计：(prompt_tokens, completion_tokens, total_tokens)
    /// 默认返回 (0, 0, 0)，具体实现可覆盖
    fn token_usage(&self) -> (u64, u64, u64) {
        (0, 0, 0)
    }
}
