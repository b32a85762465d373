//! 执行状态：一次运行中在节点之间传递的闭合、带版本的记录
//!
//! 合并规则（StateUpdate -> ExecutionState）：
//! - 标量（final_output、verdict）存在即覆盖
//! - 列表（messages、artifacts、reflection、context、resources）只追加
//! - iteration 仅在更新显式要求时 +1，运行内单调递增
//! - incomplete 运行内一旦置位不再清除
//!
//! 会话恢复时 begin_turn 只保留消息历史、数据产物与资源，计数器等运行级字段从零开始。

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::memory::{Message, Role};

/// 当前状态结构版本；检查点恢复时不匹配则拒绝
pub const STATE_VERSION: u32 = 1;

/// 结构化反思结果：缺失 / 建议 / 冗余 + 至多 3 条追问
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ReflectionVerdict {
    pub missing: String,
    pub advisable: String,
    pub superfluous: String,
    pub queries: Vec<String>,
    /// 所有解析尝试均失败时得到的空结果
    #[serde(default)]
    pub exhausted: bool,
}

impl ReflectionVerdict {
    /// 重试耗尽后的空反思
    pub fn exhausted() -> Self {
        Self {
            exhausted: true,
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.missing.is_empty()
            && self.advisable.is_empty()
            && self.superfluous.is_empty()
            && self.queries.is_empty()
    }

    /// 写入 reflection 笔记的部分（缺失与建议，空项忽略）
    pub fn notes(&self) -> Vec<String> {
        [&self.missing, &self.advisable]
            .into_iter()
            .filter(|s| !s.trim().is_empty())
            .cloned()
            .collect()
    }
}

/// 状态校验错误
#[derive(Error, Debug, PartialEq)]
pub enum StateError {
    #[error("Unsupported state version {found} (expected {expected})")]
    UnsupportedVersion { found: u32, expected: u32 },

    #[error("Tool result at message {index} has no matching tool call: {call_id}")]
    OrphanToolResult { index: usize, call_id: String },

    #[error("Tool result at message {index} is missing tool_call_id")]
    MissingCallId { index: usize },
}

/// 一次运行的执行状态
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExecutionState {
    version: u32,
    messages: Vec<Message>,
    artifacts: Vec<String>,
    iteration: u32,
    reflection: Vec<String>,
    context: Vec<String>,
    final_output: String,
    resources: Vec<String>,
    verdict: Option<ReflectionVerdict>,
    incomplete: bool,
}

impl Default for ExecutionState {
    fn default() -> Self {
        Self {
            version: STATE_VERSION,
            messages: Vec::new(),
            artifacts: Vec::new(),
            iteration: 0,
            reflection: Vec::new(),
            context: Vec::new(),
            final_output: String::new(),
            resources: Vec::new(),
            verdict: None,
            incomplete: false,
        }
    }
}

impl ExecutionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// 以初始消息历史创建状态
    pub fn with_messages(messages: Vec<Message>) -> Self {
        Self {
            messages,
            ..Self::default()
        }
    }

    /// 以外部提供的草稿创建状态（反思循环从已有草稿开始）
    pub fn with_draft(draft: impl Into<String>) -> Self {
        Self {
            final_output: draft.into(),
            ..Self::default()
        }
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn artifacts(&self) -> &[String] {
        &self.artifacts
    }

    pub fn iteration(&self) -> u32 {
        self.iteration
    }

    pub fn reflection(&self) -> &[String] {
        &self.reflection
    }

    pub fn context(&self) -> &[String] {
        &self.context
    }

    pub fn final_output(&self) -> &str {
        &self.final_output
    }

    pub fn resources(&self) -> &[String] {
        &self.resources
    }

    pub fn verdict(&self) -> Option<&ReflectionVerdict> {
        self.verdict.as_ref()
    }

    pub fn is_incomplete(&self) -> bool {
        self.incomplete
    }

    /// 最后一条 User 消息内容
    pub fn last_user_message(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
    }

    /// 运行开始前的校验：版本号、工具结果与工具调用的对应关系
    pub fn validate(&self) -> Result<(), StateError> {
        if self.version != STATE_VERSION {
            return Err(StateError::UnsupportedVersion {
                found: self.version,
                expected: STATE_VERSION,
            });
        }

        let mut issued: HashSet<&str> = HashSet::new();
        for (index, msg) in self.messages.iter().enumerate() {
            for call in &msg.tool_calls {
                issued.insert(call.id.as_str());
            }
            if msg.role == Role::Tool {
                let call_id = msg
                    .tool_call_id
                    .as_deref()
                    .ok_or(StateError::MissingCallId { index })?;
                if !issued.contains(call_id) {
                    return Err(StateError::OrphanToolResult {
                        index,
                        call_id: call_id.to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    /// 从检查点开始新一轮：保留消息历史、数据产物与资源，清空只属于上一次运行的字段
    pub fn begin_turn(&mut self) {
        self.iteration = 0;
        self.reflection.clear();
        self.context.clear();
        self.final_output.clear();
        self.verdict = None;
        self.incomplete = false;
    }

    /// 合并节点的部分更新
    pub fn apply(&mut self, update: StateUpdate) {
        self.messages.extend(update.messages);
        self.artifacts.extend(update.artifacts);
        self.reflection.extend(update.reflection);
        self.context.extend(update.context);
        self.resources.extend(update.resources);
        if let Some(output) = update.final_output {
            self.final_output = output;
        }
        if let Some(verdict) = update.verdict {
            self.verdict = Some(verdict);
        }
        if update.increment_iteration {
            self.iteration += 1;
        }
        if update.incomplete {
            self.incomplete = true;
        }
    }
}

/// 节点返回的部分更新
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StateUpdate {
    pub messages: Vec<Message>,
    pub artifacts: Vec<String>,
    pub reflection: Vec<String>,
    pub context: Vec<String>,
    pub resources: Vec<String>,
    pub final_output: Option<String>,
    pub verdict: Option<ReflectionVerdict>,
    pub increment_iteration: bool,
    pub incomplete: bool,
}

impl StateUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn message(mut self, message: Message) -> Self {
        self.messages.push(message);
        self
    }

    pub fn messages(mut self, messages: impl IntoIterator<Item = Message>) -> Self {
        self.messages.extend(messages);
        self
    }

    pub fn artifact(mut self, artifact: impl Into<String>) -> Self {
        self.artifacts.push(artifact.into());
        self
    }

    pub fn reflection(mut self, notes: impl IntoIterator<Item = String>) -> Self {
        self.reflection.extend(notes);
        self
    }

    pub fn context(mut self, snippet: impl Into<String>) -> Self {
        self.context.push(snippet.into());
        self
    }

    pub fn resources(mut self, locators: impl IntoIterator<Item = String>) -> Self {
        self.resources.extend(locators);
        self
    }

    pub fn final_output(mut self, output: impl Into<String>) -> Self {
        self.final_output = Some(output.into());
        self
    }

    pub fn verdict(mut self, verdict: ReflectionVerdict) -> Self {
        self.verdict = Some(verdict);
        self
    }

    pub fn increment_iteration(mut self) -> Self {
        self.increment_iteration = true;
        self
    }

    pub fn incomplete(mut self) -> Self {
        self.incomplete = true;
        self
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// 步骤日志中的可读摘要
    pub fn describe(&self) -> String {
        let mut out = String::new();
        for msg in &self.messages {
            if msg.requests_tools() {
                let names: Vec<&str> = msg.tool_calls.iter().map(|c| c.name.as_str()).collect();
                out.push_str(&format!("- {}: tool calls [{}]\n", msg.role.as_str(), names.join(", ")));
            } else {
                out.push_str(&format!("- {}: {}\n", msg.role.as_str(), msg.content));
            }
        }
        for artifact in &self.artifacts {
            out.push_str(&format!("{}\n\n", artifact));
        }
        if !self.reflection.is_empty() {
            out.push_str(&format!("Reflection: {:?}\n\n", self.reflection));
        }
        if let Some(verdict) = &self.verdict {
            out.push_str(&format!("Search Queries: {:?}\n\n", verdict.queries));
        }
        for snippet in &self.context {
            out.push_str(&format!("{}\n\n", snippet));
        }
        for locator in &self.resources {
            out.push_str(&format!("![resource]({})\n\n", locator));
        }
        if let Some(output) = &self.final_output {
            out.push_str(output);
            out.push('\n');
        }
        if self.increment_iteration {
            out.push_str("(iteration +1)\n");
        }
        if self.incomplete {
            out.push_str("(incomplete)\n");
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::ToolCall;

    #[test]
    fn test_lists_append_scalars_overwrite() {
        let mut state = ExecutionState::with_draft("v1");
        state.apply(StateUpdate::new().artifact("x").final_output("v2"));
        state.apply(StateUpdate::new().artifact("y"));

        assert_eq!(state.artifacts(), &["x".to_string(), "y".to_string()]);
        assert_eq!(state.final_output(), "v2");
        assert_eq!(state.iteration(), 0);
    }

    #[test]
    fn test_iteration_only_changes_when_incremented() {
        let mut state = ExecutionState::new();
        state.apply(StateUpdate::new().increment_iteration());
        state.apply(StateUpdate::new().final_output("x"));
        state.apply(StateUpdate::new().increment_iteration());
        assert_eq!(state.iteration(), 2);
    }

    #[test]
    fn test_begin_turn_keeps_history_only() {
        let mut state = ExecutionState::with_messages(vec![Message::user("q")]);
        state.apply(
            StateUpdate::new()
                .artifact("data")
                .resources(["a.png".to_string()])
                .reflection(["note".to_string()])
                .context("ctx")
                .final_output("answer")
                .verdict(ReflectionVerdict::exhausted())
                .increment_iteration()
                .incomplete(),
        );

        state.begin_turn();
        assert_eq!(state.messages().len(), 1);
        assert_eq!(state.artifacts(), &["data".to_string()]);
        assert_eq!(state.resources(), &["a.png".to_string()]);
        assert_eq!(state.iteration(), 0);
        assert!(state.reflection().is_empty());
        assert!(state.context().is_empty());
        assert_eq!(state.final_output(), "");
        assert!(state.verdict().is_none());
        assert!(!state.is_incomplete());
    }

    #[test]
    fn test_incomplete_is_sticky() {
        let mut state = ExecutionState::new();
        state.apply(StateUpdate::new().incomplete());
        state.apply(StateUpdate::new().final_output("done"));
        assert!(state.is_incomplete());
    }

    #[test]
    fn test_validate_rejects_orphan_tool_result() {
        let state = ExecutionState::with_messages(vec![
            Message::user("q"),
            Message::tool_result("nope", "r"),
        ]);
        assert!(matches!(
            state.validate(),
            Err(StateError::OrphanToolResult { index: 1, .. })
        ));
    }

    #[test]
    fn test_validate_accepts_paired_tool_result() {
        let call = ToolCall::new("search", serde_json::json!({})).with_id("c1");
        let state = ExecutionState::with_messages(vec![
            Message::user("q"),
            Message::assistant_with_tool_calls("", vec![call]),
            Message::tool_result("c1", "r"),
        ]);
        assert!(state.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_unknown_version() {
        let mut json = serde_json::to_value(ExecutionState::new()).unwrap();
        json["version"] = serde_json::json!(99);
        let state: ExecutionState = serde_json::from_value(json).unwrap();
        assert_eq!(
            state.validate(),
            Err(StateError::UnsupportedVersion { found: 99, expected: STATE_VERSION })
        );
    }

    #[test]
    fn test_verdict_notes_skip_empty() {
        let verdict = ReflectionVerdict {
            missing: "regional breakdown".into(),
            advisable: " ".into(),
            ..Default::default()
        };
        assert_eq!(verdict.notes(), vec!["regional breakdown".to_string()]);
        assert!(ReflectionVerdict::exhausted().is_empty());
    }
}
