//! Mock LLM 客户端（用于测试与本地演示，无需 API）
//!
//! - MockLlmClient：回显最后一条 User 消息
//! - ScriptedLlmClient：按顺序返回预设回复（complete 与 complete_structured 各一条队列），并记录每次请求

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use crate::llm::{LlmClient, LlmError, LlmReply, LlmRequest, StructuredReply};
use crate::memory::Role;

/// Mock 客户端：回显用户最后一条消息
#[derive(Debug, Default)]
pub struct MockLlmClient;

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmReply, LlmError> {
        let last_user = request
            .messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .unwrap_or("(no input)");
        Ok(LlmReply::text(format!("Echo from Mock: {}", last_user)))
    }
}

type Scripted<T> = Mutex<VecDeque<Result<T, LlmError>>>;

/// 脚本客户端：队列取尽后 complete 返回 fallback，complete_structured 返回解析失败
#[derive(Default)]
pub struct ScriptedLlmClient {
    replies: Scripted<LlmReply>,
    structured: Scripted<StructuredReply>,
    fallback: Option<LlmReply>,
    requests: Mutex<Vec<LlmRequest>>,
    structured_calls: AtomicUsize,
}

impl ScriptedLlmClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(self, reply: LlmReply) -> Self {
        self.push(Ok(reply))
    }

    pub fn reply_text(self, text: impl Into<String>) -> Self {
        self.reply(LlmReply::text(text))
    }

    pub fn fail(self, error: LlmError) -> Self {
        self.push(Err(error))
    }

    fn push(self, item: Result<LlmReply, LlmError>) -> Self {
        if let Ok(mut q) = self.replies.lock() {
            q.push_back(item);
        }
        self
    }

    /// 预设一条结构化回复（按原始文本解析）
    pub fn structured_raw(self, raw: impl Into<String>) -> Self {
        if let Ok(mut q) = self.structured.lock() {
            q.push_back(Ok(StructuredReply::from_raw(raw)));
        }
        self
    }

    pub fn structured_json(self, value: Value) -> Self {
        self.structured_raw(value.to_string())
    }

    /// complete 队列耗尽后的固定回复
    pub fn fallback(mut self, reply: LlmReply) -> Self {
        self.fallback = Some(reply);
        self
    }

    /// 已记录的 complete 请求
    pub fn requests(&self) -> Vec<LlmRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn complete_calls(&self) -> usize {
        self.requests.lock().map(|r| r.len()).unwrap_or_default()
    }

    pub fn structured_calls(&self) -> usize {
        self.structured_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmReply, LlmError> {
        if let Ok(mut r) = self.requests.lock() {
            r.push(request.clone());
        }
        let next = self.replies.lock().ok().and_then(|mut q| q.pop_front());
        match next {
            Some(item) => item,
            None => self
                .fallback
                .clone()
                .ok_or_else(|| LlmError::Request("script exhausted".to_string())),
        }
    }

    async fn complete_structured(
        &self,
        _request: &LlmRequest,
        _schema: &Value,
    ) -> Result<StructuredReply, LlmError> {
        self.structured_calls.fetch_add(1, Ordering::SeqCst);
        let next = self.structured.lock().ok().and_then(|mut q| q.pop_front());
        match next {
            Some(item) => item,
            None => Ok(StructuredReply::from_raw("not json")),
        }
    }
}
