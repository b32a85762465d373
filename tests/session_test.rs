//! 会话存储集成测试

use std::sync::Arc;

use hive::core::{ExecutionState, RunContext, StateUpdate};
use hive::memory::Message;
use hive::session::{FileSessionStore, SessionError, SessionStore, SessionTier};
use hive::workflow::{node_fn, GraphExecutor, WorkflowBuilder, END, START};

fn sample_state() -> ExecutionState {
    let mut state = ExecutionState::with_messages(vec![Message::user("hello")]);
    state.apply(
        StateUpdate::new()
            .message(Message::assistant("hi there"))
            .artifact("## sales\n\n42")
            .final_output("hi there")
            .increment_iteration(),
    );
    state
}

#[tokio::test]
async fn test_file_store_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let state = sample_state();

    let store = FileSessionStore::new(dir.path()).await.unwrap();
    assert_eq!(store.tier(), SessionTier::LongTerm);
    let first = store.put("chat-1", &state).await.unwrap();

    let reopened = FileSessionStore::new(dir.path()).await.unwrap();
    let record = reopened.load("chat-1").await.unwrap().unwrap();
    assert_eq!(record.state, state);
    assert_eq!(record.created_at, first.created_at);

    // 重复读取结果一致
    assert_eq!(reopened.get("chat-1").await.unwrap(), state);
    assert_eq!(reopened.get("chat-1").await.unwrap(), state);
}

#[tokio::test]
async fn test_overwrite_keeps_created_at() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileSessionStore::new(dir.path()).await.unwrap();

    let first = store.put("s", &ExecutionState::new()).await.unwrap();
    let second = store.put("s", &sample_state()).await.unwrap();
    assert_eq!(second.created_at, first.created_at);
    assert!(second.updated_at >= first.updated_at);
    assert_eq!(store.get("s").await.unwrap(), sample_state());
}

#[tokio::test]
async fn test_missing_session_starts_fresh() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileSessionStore::new(dir.path()).await.unwrap();

    assert!(store.load("never-seen").await.unwrap().is_none());
    assert_eq!(store.get("never-seen").await.unwrap(), ExecutionState::new());
}

#[tokio::test]
async fn test_path_like_ids_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileSessionStore::new(dir.path()).await.unwrap();

    let err = store.put("../escape", &ExecutionState::new()).await.unwrap_err();
    assert!(matches!(err, SessionError::InvalidId(_)));
    assert!(matches!(
        store.load("a/b").await,
        Err(SessionError::InvalidId(_))
    ));
}

#[tokio::test]
async fn test_concurrent_turns_on_one_session_are_serialized() {
    let dir = tempfile::tempdir().unwrap();
    let store: Arc<dyn SessionStore> = Arc::new(FileSessionStore::new(dir.path()).await.unwrap());
    let graph = WorkflowBuilder::new("ack")
        .node(
            "ack",
            node_fn(|_s, _c| async {
                tokio::task::yield_now().await;
                Ok(StateUpdate::new().message(Message::assistant("ack")))
            }),
        )
        .edge(START, "ack")
        .edge("ack", END)
        .build()
        .unwrap();
    let executor = Arc::new(GraphExecutor::new(graph).with_sessions(store.clone()));

    let turns = (0..4).map(|i| {
        let executor = executor.clone();
        tokio::spawn(async move {
            let ctx = RunContext::builder().session_id("shared").build().unwrap();
            executor
                .run_turn(vec![Message::user(format!("msg {}", i))], &ctx)
                .await
                .unwrap()
        })
    });
    for turn in turns.collect::<Vec<_>>() {
        assert!(turn.await.unwrap().checkpointed);
    }

    // 每轮一条用户消息加一条回复，没有丢失
    let state = store.get("shared").await.unwrap();
    assert_eq!(state.messages().len(), 8);
}
