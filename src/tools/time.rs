//! 当前时间工具：返回本地时间，可选 strftime 格式

use async_trait::async_trait;
use serde_json::Value;

use crate::tools::{Tool, ToolContent};

pub struct CurrentTimeTool;

#[async_trait]
impl Tool for CurrentTimeTool {
    fn name(&self) -> &str {
        "current_time"
    }

    fn description(&self) -> &str {
        "Returns the current local date and time. Args: {\"format\": optional strftime pattern}"
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "format": { "type": "string", "description": "strftime pattern, default %Y-%m-%d %H:%M:%S" }
            },
            "required": []
        })
    }

    async fn execute(&self, args: Value) -> Result<ToolContent, String> {
        let format = args
            .get("format")
            .and_then(|v| v.as_str())
            .unwrap_or("%Y-%m-%d %H:%M:%S");
        let mut out = String::new();
        use std::fmt::Write;
        write!(out, "{}", chrono::Local::now().format(format))
            .map_err(|_| format!("invalid format: {}", format))?;
        Ok(ToolContent::Text(out))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_year_format() {
        let out = CurrentTimeTool
            .execute(serde_json::json!({"format": "%Y"}))
            .await
            .unwrap();
        let ToolContent::Text(year) = out else {
            panic!("expected text");
        };
        assert_eq!(year.len(), 4);
    }
}
