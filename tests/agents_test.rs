//! 现成 Agent 的端到端测试（脚本 LLM）

use std::sync::Arc;

use async_trait::async_trait;

use hive::agents::chat::{AGENT, PLAN};
use hive::agents::{build_chat_agent, ChatAgentOptions, DataSource, ReportAgent};
use hive::core::{ExecutionState, RunContext};
use hive::llm::{LlmError, LlmReply, ScriptedLlmClient};
use hive::memory::{Message, Role};
use hive::workflow::GraphExecutor;

struct StaticSource {
    name: &'static str,
    data: Result<&'static str, &'static str>,
}

#[async_trait]
impl DataSource for StaticSource {
    fn name(&self) -> &str {
        self.name
    }

    async fn fetch(&self, _request: &str) -> Result<String, String> {
        self.data.map(str::to_string).map_err(str::to_string)
    }
}

#[tokio::test]
async fn test_chat_agent_with_plan() {
    let llm = Arc::new(
        ScriptedLlmClient::new()
            .reply_text("Sure. <plan>\n1. Look up the capital\n</plan>")
            .reply_text("Paris."),
    );
    let graph = build_chat_agent(
        llm.clone(),
        ChatAgentOptions {
            plan: true,
            ..ChatAgentOptions::default()
        },
    )
    .unwrap();
    let ctx = RunContext::builder().build().unwrap();

    let state = ExecutionState::with_messages(vec![Message::user("Capital of France?")]);
    let outcome = GraphExecutor::new(graph).run(state, &ctx).await.unwrap();

    assert_eq!(outcome.path, vec![PLAN, AGENT]);
    assert_eq!(outcome.answer(), "Paris.");
    let messages = outcome.state.messages();
    assert_eq!(messages.len(), 3);
    assert_eq!(messages[1].role, Role::User);
    assert!(messages[1].content.ends_with("1. Look up the capital"));

    // agent 看到了计划消息，首条为系统提示
    let agent_request = &llm.requests()[1];
    assert_eq!(agent_request.messages[0].role, Role::System);
    assert!(agent_request
        .messages
        .iter()
        .any(|m| m.content.contains("Refer to the following plan")));
}

#[tokio::test]
async fn test_chat_agent_plan_failure_still_answers() {
    let llm = Arc::new(
        ScriptedLlmClient::new()
            .fail(LlmError::Request("timeout".into()))
            .reply_text("Paris."),
    );
    let llm_calls = llm.clone();
    let graph = build_chat_agent(
        llm,
        ChatAgentOptions {
            plan: true,
            ..ChatAgentOptions::default()
        },
    )
    .unwrap();
    let ctx = RunContext::builder().build().unwrap();

    let state = ExecutionState::with_messages(vec![Message::user("Capital of France?")]);
    let outcome = GraphExecutor::new(graph).run(state, &ctx).await.unwrap();

    assert_eq!(outcome.answer(), "Paris.");
    assert_eq!(outcome.state.messages().len(), 2);
    // 计划只请求一次，不重试
    assert_eq!(llm_calls.complete_calls(), 2);
    assert!(!outcome.is_incomplete());
}

#[tokio::test]
async fn test_report_agent_uses_placeholder_for_failed_source() {
    let llm = Arc::new(ScriptedLlmClient::new().fallback(LlmReply::text("Quarterly summary")));
    let agent = ReportAgent::new(llm.clone())
        .critique_attempts(1)
        .source(StaticSource {
            name: "sales",
            data: Ok("revenue 42"),
        })
        .source(StaticSource {
            name: "weather",
            data: Err("service timeout"),
        });
    let ctx = RunContext::builder().run_id("rep").build().unwrap();

    let outcome = agent.run("Q3 review", &ctx).await.unwrap();

    assert_eq!(outcome.answer(), "Quarterly summary");
    assert_eq!(
        outcome.state.artifacts(),
        &[
            "## sales\n\nrevenue 42".to_string(),
            "## weather\n\n(data unavailable: service timeout)".to_string(),
        ]
    );
    let first_draft = &llm.requests()[0];
    let material = &first_draft.messages.last().unwrap().content;
    assert!(material.contains("<request>Q3 review</request>"));
    assert!(material.contains("revenue 42"));

    let steps = ctx.artifacts.steps().await.unwrap();
    assert!(steps.contains("```mermaid"));
    assert!(ctx.artifacts.report().await.unwrap().contains("Quarterly summary"));
}

#[tokio::test]
async fn test_report_agent_fails_when_every_source_fails() {
    let llm = Arc::new(ScriptedLlmClient::new().fallback(LlmReply::text("unused")));
    let agent = ReportAgent::new(llm.clone())
        .source(StaticSource {
            name: "sales",
            data: Err("403"),
        })
        .source(StaticSource {
            name: "weather",
            data: Err("503"),
        });
    let ctx = RunContext::builder().build().unwrap();

    let err = agent.run("Q3 review", &ctx).await.unwrap_err();
    assert!(err.is_fatal());
    assert_eq!(llm.complete_calls(), 0);
}
