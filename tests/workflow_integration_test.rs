//! 工作流集成测试

use std::sync::Arc;

use hive::core::{ExecutionState, FlowError, RunContext, StateError, StateUpdate};
use hive::llm::{LlmReply, ScriptedLlmClient};
use hive::memory::Message;
use hive::notify::{ChannelSink, ProgressEvent};
use hive::reflection::{ReflectionCycle, DRAFT, GATHER, REFLECT};
use hive::session::{MemorySessionStore, SessionStore};
use hive::workflow::*;

fn linear_graph() -> WorkflowGraph {
    WorkflowBuilder::new("linear")
        .node(
            "fetch-a",
            node_fn(|_s, _c| async { Ok(StateUpdate::new().artifact("x")) }),
        )
        .node(
            "fetch-b",
            node_fn(|_s, _c| async { Ok(StateUpdate::new().artifact("y")) }),
        )
        .node(
            "summarize",
            node_fn(|s: ExecutionState, _c| async move {
                Ok(StateUpdate::new().final_output(s.artifacts().concat()))
            }),
        )
        .edge(START, "fetch-a")
        .edge("fetch-a", "fetch-b")
        .edge("fetch-b", "summarize")
        .edge("summarize", END)
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_linear_graph_runs_in_order() {
    let ctx = RunContext::builder().run_id("lin").build().unwrap();
    let outcome = GraphExecutor::new(linear_graph())
        .run(ExecutionState::new(), &ctx)
        .await
        .unwrap();

    assert_eq!(outcome.status, WorkflowStatus::Completed);
    assert_eq!(outcome.path, vec!["fetch-a", "fetch-b", "summarize"]);
    assert_eq!(outcome.state.artifacts(), &["x".to_string(), "y".to_string()]);
    assert_eq!(outcome.answer(), "xy");
    assert!(!outcome.is_incomplete());

    let steps = ctx.artifacts.steps().await.unwrap();
    let a = steps.find("## fetch-a").unwrap();
    let b = steps.find("## fetch-b").unwrap();
    let s = steps.find("## summarize").unwrap();
    assert!(a < b && b < s);
    assert_eq!(ctx.artifacts.steps_key(), "artifacts/lin_steps.md");
}

#[tokio::test]
async fn test_self_loop_stops_at_step_ceiling() {
    let graph = WorkflowBuilder::new("spin")
        .node("spin", node_fn(|_s, _c| async { Ok(StateUpdate::new()) }))
        .edge(START, "spin")
        .conditional_edge(
            "spin",
            |_s: &ExecutionState, _c: &RunContext| "again",
            [("again", "spin"), ("done", END)],
        )
        .build()
        .unwrap();
    let ctx = RunContext::builder().max_steps(5).build().unwrap();

    let outcome = GraphExecutor::new(graph)
        .run(ExecutionState::new(), &ctx)
        .await
        .unwrap();

    assert_eq!(outcome.steps, 5);
    assert_eq!(outcome.abort, Some(AbortReason::StepBudgetExceeded { limit: 5 }));
    assert_eq!(outcome.status, WorkflowStatus::Aborted);
    assert!(outcome.state.is_incomplete());
}

#[tokio::test]
async fn test_fatal_error_crosses_run_boundary() {
    let graph = WorkflowBuilder::new("fatal")
        .node(
            "boom",
            node_fn(|_s, _c| async { Err(FlowError::fatal("boom", "all upstream data failed")) }),
        )
        .edge(START, "boom")
        .edge("boom", END)
        .build()
        .unwrap();
    let ctx = RunContext::builder().build().unwrap();

    let err = GraphExecutor::new(graph)
        .run(ExecutionState::new(), &ctx)
        .await
        .unwrap_err();
    assert!(err.is_fatal());
    assert!(ctx.artifacts.steps().await.unwrap().contains("Run aborted"));
}

#[tokio::test]
async fn test_invalid_state_rejected_before_any_node() {
    let state = ExecutionState::with_messages(vec![Message::tool_result("ghost", "data")]);
    let ctx = RunContext::builder().build().unwrap();

    let err = GraphExecutor::new(linear_graph()).run(state, &ctx).await.unwrap_err();
    assert!(matches!(
        err,
        FlowError::State(StateError::OrphanToolResult { .. })
    ));
    assert!(ctx.artifacts.steps().await.is_none());
}

#[tokio::test]
async fn test_progress_notifications_are_run_scoped() {
    let (sink, mut rx) = ChannelSink::new();
    let ctx = RunContext::builder()
        .run_id("notify")
        .sink(Arc::new(sink))
        .build()
        .unwrap();

    GraphExecutor::new(linear_graph())
        .run(ExecutionState::new(), &ctx)
        .await
        .unwrap();

    let mut events = Vec::new();
    while let Ok(n) = rx.try_recv() {
        assert_eq!(n.run_id, "notify");
        assert_eq!(n.index, events.len());
        events.push(n.event);
    }
    assert!(matches!(&events[0], ProgressEvent::StepStarted { node, step: 1, .. } if node == "fetch-a"));
    assert_eq!(
        events.last(),
        Some(&ProgressEvent::Status {
            trail: "fetch-a -> fetch-b -> summarize".to_string()
        })
    );
}

fn echo_graph() -> WorkflowGraph {
    WorkflowBuilder::new("echo")
        .node(
            "reply",
            node_fn(|s: ExecutionState, _c| async move {
                let heard = s.messages().len();
                Ok(StateUpdate::new()
                    .message(Message::assistant(format!("seen {} messages", heard)))
                    .final_output(format!("seen {} messages", heard)))
            }),
        )
        .edge(START, "reply")
        .edge("reply", END)
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_session_resume_across_turns() {
    let store: Arc<dyn SessionStore> = Arc::new(MemorySessionStore::new());
    let executor = GraphExecutor::new(echo_graph()).with_sessions(store.clone());

    let first = RunContext::builder().session_id("chat-1").build().unwrap();
    let outcome = executor
        .run_turn(vec![Message::user("hello")], &first)
        .await
        .unwrap();
    assert!(outcome.checkpointed);
    assert_eq!(outcome.answer(), "seen 1 messages");

    let second = RunContext::builder().session_id("chat-1").build().unwrap();
    let outcome = executor
        .run_turn(vec![Message::user("again")], &second)
        .await
        .unwrap();
    // user, assistant, user
    assert_eq!(outcome.answer(), "seen 3 messages");
    assert_eq!(store.get("chat-1").await.unwrap().messages().len(), 4);

    // 其他会话从新状态开始
    let other = RunContext::builder().session_id("chat-2").build().unwrap();
    let outcome = executor
        .run_turn(vec![Message::user("hi")], &other)
        .await
        .unwrap();
    assert_eq!(outcome.answer(), "seen 1 messages");
}

#[tokio::test]
async fn test_run_turn_without_session_does_not_checkpoint() {
    let executor = GraphExecutor::new(echo_graph())
        .with_sessions(Arc::new(MemorySessionStore::new()));
    let ctx = RunContext::builder().build().unwrap();

    let outcome = executor
        .run_turn(vec![Message::user("one-off")], &ctx)
        .await
        .unwrap();
    assert!(!outcome.checkpointed);
    assert_eq!(outcome.answer(), "seen 1 messages");
}

#[tokio::test]
async fn test_aborted_turn_does_not_taint_next_turn() {
    // 最后一条用户消息为 "spin" 时自循环，否则结束
    let graph = WorkflowBuilder::new("maybe-spin")
        .node("step", node_fn(|_s, _c| async { Ok(StateUpdate::new()) }))
        .edge(START, "step")
        .conditional_edge(
            "step",
            |s: &ExecutionState, _c: &RunContext| {
                if s.last_user_message() == Some("spin") {
                    "again"
                } else {
                    "done"
                }
            },
            [("again", "step"), ("done", END)],
        )
        .build()
        .unwrap();
    let executor = GraphExecutor::new(graph).with_sessions(Arc::new(MemorySessionStore::new()));

    let first = RunContext::builder().session_id("s").max_steps(2).build().unwrap();
    let outcome = executor.run_turn(vec![Message::user("spin")], &first).await.unwrap();
    assert_eq!(outcome.abort, Some(AbortReason::StepBudgetExceeded { limit: 2 }));
    assert!(outcome.is_incomplete());

    let second = RunContext::builder().session_id("s").max_steps(2).build().unwrap();
    let outcome = executor.run_turn(vec![Message::user("stop")], &second).await.unwrap();
    assert_eq!(outcome.status, WorkflowStatus::Completed);
    assert!(!outcome.is_incomplete());
    assert_eq!(outcome.state.messages().len(), 2);
}

#[tokio::test]
async fn test_resumed_reflection_cycle_reflects_again() {
    let llm = Arc::new(ScriptedLlmClient::new().fallback(LlmReply::text("draft")));
    let graph = ReflectionCycle::new(llm)
        .critique_attempts(1)
        .graph()
        .unwrap();
    let executor = GraphExecutor::new(graph).with_sessions(Arc::new(MemorySessionStore::new()));
    let expected = vec![DRAFT, REFLECT, GATHER, DRAFT];

    for question in ["first report", "second report"] {
        let ctx = RunContext::builder().session_id("r").max_iteration(1).build().unwrap();
        let outcome = executor
            .run_turn(vec![Message::user(question)], &ctx)
            .await
            .unwrap();
        assert_eq!(outcome.path, expected);
        assert_eq!(outcome.state.iteration(), 2);
    }
}

#[tokio::test]
async fn test_executors_sharing_a_store_serialize_turns() {
    let store: Arc<dyn SessionStore> = Arc::new(MemorySessionStore::new());
    let slow_echo = || {
        WorkflowBuilder::new("slow-echo")
            .node(
                "reply",
                node_fn(|_s, _c| async {
                    tokio::task::yield_now().await;
                    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
                    Ok(StateUpdate::new().message(Message::assistant("ok")))
                }),
            )
            .edge(START, "reply")
            .edge("reply", END)
            .build()
            .unwrap()
    };
    let a = Arc::new(GraphExecutor::new(slow_echo()).with_sessions(store.clone()));
    let b = Arc::new(GraphExecutor::new(slow_echo()).with_sessions(store.clone()));

    let handles: Vec<_> = (0..6)
        .map(|i| {
            let executor = if i % 2 == 0 { a.clone() } else { b.clone() };
            tokio::spawn(async move {
                let ctx = RunContext::builder().session_id("shared").build().unwrap();
                executor
                    .run_turn(vec![Message::user(format!("turn {}", i))], &ctx)
                    .await
                    .unwrap()
            })
        })
        .collect();
    for handle in handles {
        assert!(handle.await.unwrap().checkpointed);
    }

    // 六轮，每轮一条用户消息加一条回复
    assert_eq!(store.get("shared").await.unwrap().messages().len(), 12);
    assert!(store.turn_gate().is_empty());
}
