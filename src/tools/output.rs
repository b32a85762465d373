//! 工具结果解码
//!
//! 工具返回内容在 ToolLoop 边界处解码一次为 ToolOutput：
//! - 含 `path` 定位符（图片、文件）的结果为 Resource
//! - 其余 JSON 为 Structured，纯文本为 Text
//!
//! 识别的定位符形态：`{"path": "..."}`、`{"path": [...]}`、`{"result": {"path": ...}}`，
//! 以及 `[{"text": "<上述 JSON>"}, ...]` 形式的内容块列表。解析失败静默退回 Text。

use serde_json::Value;

use crate::tools::ToolContent;

#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutput {
    Text(String),
    Structured(Value),
    Resource { locators: Vec<String>, body: String },
}

impl ToolOutput {
    pub fn decode(content: ToolContent) -> Self {
        match content {
            ToolContent::Json(value) => Self::from_value(value, None),
            ToolContent::Text(text) => match serde_json::from_str::<Value>(text.trim()) {
                Ok(value @ (Value::Object(_) | Value::Array(_))) => {
                    Self::from_value(value, Some(text))
                }
                _ => ToolOutput::Text(text),
            },
        }
    }

    fn from_value(value: Value, original: Option<String>) -> Self {
        let mut locators = Vec::new();
        collect_locators(&value, &mut locators, true);
        if locators.is_empty() {
            return ToolOutput::Structured(value);
        }
        let body = original.unwrap_or_else(|| value.to_string());
        ToolOutput::Resource { locators, body }
    }

    pub fn locators(&self) -> &[String] {
        match self {
            ToolOutput::Resource { locators, .. } => locators,
            _ => &[],
        }
    }

    /// 写入工具结果回合的文本
    pub fn to_observation(&self) -> String {
        match self {
            ToolOutput::Text(text) => text.clone(),
            ToolOutput::Structured(value) => value.to_string(),
            ToolOutput::Resource { body, .. } => body.clone(),
        }
    }
}

fn push_paths(path: &Value, out: &mut Vec<String>) {
    match path {
        Value::String(p) if !p.trim().is_empty() => out.push(p.clone()),
        Value::Array(items) => {
            for item in items {
                if let Value::String(p) = item {
                    if !p.trim().is_empty() {
                        out.push(p.clone());
                    }
                }
            }
        }
        _ => {}
    }
}

fn collect_locators(value: &Value, out: &mut Vec<String>, top_level: bool) {
    match value {
        Value::Object(map) => {
            if let Some(path) = map.get("path") {
                push_paths(path, out);
            }
            if let Some(Value::Object(result)) = map.get("result") {
                if let Some(path) = result.get("path") {
                    push_paths(path, out);
                }
            }
        }
        // 内容块列表：每个块的 text 字段可能是嵌套 JSON
        Value::Array(items) if top_level => {
            for item in items {
                let Some(Value::String(text)) = item.get("text") else {
                    continue;
                };
                if let Ok(inner) = serde_json::from_str::<Value>(text.trim()) {
                    collect_locators(&inner, out, false);
                }
            }
        }
        _ => {}
    }
}
