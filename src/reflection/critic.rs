//! Critic：对草稿做结构化反思
//!
//! 以 JSON Schema 约束输出（缺失 / 建议 / 冗余 + 1-3 条追问），经有上限的重试组合子最多尝试 5 次；
//! 全部失败时返回空反思（exhausted），不向上抛错。

use std::sync::Arc;

use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;

use crate::core::{retry_with_cap, ReflectionVerdict};
use crate::llm::{LlmClient, LlmRequest};
use crate::memory::Message;

/// 默认结构化解析尝试次数
pub const DEFAULT_CRITIQUE_ATTEMPTS: usize = 5;
/// 追问条数上限
pub const MAX_QUERIES: usize = 3;

const CRITIC_PROMPT: &str = "You review a draft report. Critique what is missing, what would make the \
answer more helpful, and what is superfluous. Then propose 1-3 search queries that would gather the \
information needed to address the critique.";

/// 对草稿的评价
#[derive(Debug, Clone, Default, Deserialize, JsonSchema)]
pub struct Critique {
    /// Critique of what is missing.
    #[serde(default)]
    pub missing: String,
    /// Critique of what is helpful for a better answer.
    #[serde(default)]
    pub advisable: String,
    /// Critique of what is superfluous.
    #[serde(default)]
    pub superfluous: String,
}

/// Provide reflection and then follow up with search queries to improve the answer.
#[derive(Debug, Clone, Default, Deserialize, JsonSchema)]
pub struct Research {
    /// Your reflection on the initial answer.
    pub reflection: Critique,
    /// 1-3 search queries for researching improvements to address the critique of your current answer.
    #[serde(default)]
    pub search_queries: Vec<String>,
}

impl From<Research> for ReflectionVerdict {
    fn from(research: Research) -> Self {
        ReflectionVerdict {
            missing: research.reflection.missing,
            advisable: research.reflection.advisable,
            superfluous: research.reflection.superfluous,
            queries: research
                .search_queries
                .into_iter()
                .map(|q| q.trim().to_string())
                .filter(|q| !q.is_empty())
                .take(MAX_QUERIES)
                .collect(),
            exhausted: false,
        }
    }
}

pub struct Critic {
    llm: Arc<dyn LlmClient>,
    attempts: usize,
    schema: Value,
}

impl Critic {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        let schema = serde_json::to_value(schemars::schema_for!(Research)).unwrap_or_default();
        Self {
            llm,
            attempts: DEFAULT_CRITIQUE_ATTEMPTS,
            schema,
        }
    }

    pub fn attempts(mut self, attempts: usize) -> Self {
        self.attempts = attempts.max(1);
        self
    }

    pub fn schema(&self) -> &Value {
        &self.schema
    }

    /// 反思草稿；每次尝试都是独立的新调用，第一次解析成功即返回
    pub async fn reflect(&self, draft: &str) -> ReflectionVerdict {
        self.reflect_with_attempts(draft, self.attempts).await
    }

    /// 以指定尝试次数反思（运行级限额覆盖构造时的默认值）
    pub async fn reflect_with_attempts(&self, draft: &str, attempts: usize) -> ReflectionVerdict {
        let request = LlmRequest::new(vec![Message::system(CRITIC_PROMPT), Message::user(draft)]);
        let request = &request;

        let outcome = retry_with_cap("critique", attempts.max(1), |_attempt| async move {
            let reply = self
                .llm
                .complete_structured(request, &self.schema)
                .await
                .map_err(|e| e.to_string())?;
            let value = reply
                .parsed
                .ok_or_else(|| reply.parse_error.unwrap_or_else(|| "empty structured reply".to_string()))?;
            serde_json::from_value::<Research>(value).map_err(|e| e.to_string())
        })
        .await;

        match outcome.value {
            Some(research) => {
                let verdict = ReflectionVerdict::from(research);
                tracing::info!(
                    attempts = outcome.attempts,
                    queries = verdict.queries.len(),
                    "Critique parsed"
                );
                verdict
            }
            None => {
                tracing::warn!(attempts = outcome.attempts, "Critique exhausted, continuing with empty reflection");
                ReflectionVerdict::exhausted()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ScriptedLlmClient;
    use serde_json::json;

    #[tokio::test]
    async fn test_second_attempt_wins_and_queries_are_capped() {
        let llm = Arc::new(
            ScriptedLlmClient::new()
                .structured_raw("oops, prose instead of JSON")
                .structured_json(json!({
                    "reflection": {"missing": "costs by team", "advisable": "", "superfluous": "intro"},
                    "search_queries": ["q1", " ", "q2", "q3", "q4"]
                })),
        );
        let critic = Critic::new(llm.clone());

        let verdict = critic.reflect("draft").await;
        assert!(!verdict.exhausted);
        assert_eq!(verdict.queries, vec!["q1", "q2", "q3"]);
        assert_eq!(verdict.notes(), vec!["costs by team".to_string()]);
        assert_eq!(llm.structured_calls(), 2);
    }

    #[tokio::test]
    async fn test_exhaustion_yields_empty_verdict() {
        let llm = Arc::new(ScriptedLlmClient::new());
        let verdict = Critic::new(llm.clone()).attempts(3).reflect("draft").await;
        assert!(verdict.exhausted);
        assert!(verdict.is_empty());
        assert_eq!(llm.structured_calls(), 3);
    }

    #[test]
    fn test_schema_names_fields() {
        let critic = Critic::new(Arc::new(ScriptedLlmClient::new()));
        let schema = critic.schema().to_string();
        assert!(schema.contains("search_queries"));
        assert!(schema.contains("superfluous"));
    }
}
