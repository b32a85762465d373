//! 反思循环集成测试

use std::sync::Arc;

use serde_json::json;

use hive::core::{ExecutionState, RunContext, RunLimits};
use hive::llm::{LlmReply, ScriptedLlmClient};
use hive::memory::Message;
use hive::notify::{ChannelSink, ProgressEvent};
use hive::reflection::{ReflectionCycle, DRAFT, GATHER, REFLECT};
use hive::workflow::{GraphExecutor, WorkflowStatus};

#[tokio::test]
async fn test_unparseable_critique_degrades_and_finishes() {
    let llm = Arc::new(ScriptedLlmClient::new().reply_text("Report v2"));
    let graph = ReflectionCycle::new(llm.clone()).graph().unwrap();
    let (sink, mut rx) = ChannelSink::new();
    let ctx = RunContext::builder()
        .max_iteration(1)
        .sink(Arc::new(sink))
        .build()
        .unwrap();

    let outcome = GraphExecutor::new(graph)
        .run(ExecutionState::with_draft("Report v1"), &ctx)
        .await
        .unwrap();

    assert_eq!(outcome.status, WorkflowStatus::Completed);
    assert_eq!(outcome.answer(), "Report v2");
    assert!(outcome.state.reflection().is_empty());
    assert_eq!(outcome.state.iteration(), 2);
    assert_eq!(outcome.path, vec![DRAFT, REFLECT, GATHER, DRAFT]);
    assert_eq!(llm.structured_calls(), 5);
    // 只有一次重写调用，采用外部草稿不调用模型
    assert_eq!(llm.complete_calls(), 1);
    assert!(outcome.state.verdict().map(|v| v.exhausted).unwrap_or(false));

    let mut degraded = 0;
    while let Ok(n) = rx.try_recv() {
        if matches!(n.event, ProgressEvent::Degraded { .. }) {
            degraded += 1;
        }
    }
    assert_eq!(degraded, 1);
}

#[tokio::test]
async fn test_critique_attempts_come_from_run_limits() {
    let llm = Arc::new(ScriptedLlmClient::new().reply_text("Report v2"));
    let graph = ReflectionCycle::new(llm.clone()).graph().unwrap();
    let ctx = RunContext::builder()
        .limits(RunLimits {
            critique_attempts: 2,
            ..RunLimits::default()
        })
        .build()
        .unwrap();

    let outcome = GraphExecutor::new(graph)
        .run(ExecutionState::with_draft("Report v1"), &ctx)
        .await
        .unwrap();

    assert_eq!(outcome.answer(), "Report v2");
    assert_eq!(llm.structured_calls(), 2);
}

#[tokio::test]
async fn test_draft_passes_bounded_by_max_iteration() {
    let llm = Arc::new(
        ScriptedLlmClient::new().fallback(LlmReply::text("another draft")),
    );
    let graph = ReflectionCycle::new(llm.clone())
        .critique_attempts(1)
        .graph()
        .unwrap();
    let ctx = RunContext::builder().max_iteration(3).build().unwrap();

    let state = ExecutionState::with_messages(vec![Message::user("Summarize Q3 sales")]);
    let outcome = GraphExecutor::new(graph).run(state, &ctx).await.unwrap();

    assert_eq!(outcome.state.iteration(), 4);
    assert_eq!(outcome.path.iter().filter(|n| *n == DRAFT).count(), 4);
    assert_eq!(llm.complete_calls(), 4);
    assert_eq!(llm.structured_calls(), 3);
    assert!(!outcome.is_incomplete());
}

#[tokio::test]
async fn test_follow_up_queries_feed_the_revision() {
    let llm = Arc::new(
        ScriptedLlmClient::new()
            .reply_text("Draft 1")
            .structured_json(json!({
                "reflection": {
                    "missing": "rainfall figures",
                    "advisable": "cite a source",
                    "superfluous": ""
                },
                "search_queries": ["  rainfall 2024 ", ""]
            }))
            .reply_text("Rain was 800mm")
            .reply_text("Draft 2"),
    );
    let graph = ReflectionCycle::new(llm.clone()).graph().unwrap();
    let ctx = RunContext::builder().run_id("rf").build().unwrap();

    let state = ExecutionState::with_messages(vec![Message::user("Weather report")]);
    let outcome = GraphExecutor::new(graph).run(state, &ctx).await.unwrap();

    assert_eq!(outcome.answer(), "Draft 2");
    assert_eq!(outcome.state.context(), &["## rainfall 2024\n\nRain was 800mm".to_string()]);
    assert!(outcome
        .state
        .reflection()
        .iter()
        .any(|note| note.contains("rainfall figures")));
    let verdict = outcome.state.verdict().unwrap();
    assert_eq!(verdict.queries, vec!["rainfall 2024"]);

    // 重写请求带上了收集到的上下文
    let requests = llm.requests();
    assert_eq!(requests.len(), 3);
    let revise = requests[2].messages.last().unwrap();
    assert!(revise.content.contains("<draft>Draft 1</draft>"));
    assert!(revise.content.contains("Rain was 800mm"));

    // 新章节在报告顶部
    let report = ctx.artifacts.report().await.unwrap();
    assert!(report.find("Draft 2").unwrap() < report.find("Draft 1").unwrap());
    assert!(report.contains("# Report"));
}

#[tokio::test]
async fn test_first_draft_failure_is_fatal() {
    let llm = Arc::new(ScriptedLlmClient::new());
    let graph = ReflectionCycle::new(llm).graph().unwrap();
    let ctx = RunContext::builder().build().unwrap();

    let err = GraphExecutor::new(graph)
        .run(ExecutionState::with_messages(vec![Message::user("x")]), &ctx)
        .await
        .unwrap_err();
    assert!(err.is_fatal());
}
