//! 工作流执行引擎
//!
//! 从 START 的后继开始，按图顺序逐个执行节点：合并部分更新、追加步骤日志、推送进度、解析出边，直到 END。
//! 步数达到 max_steps 或收到取消信号时提前结束，返回部分状态并标记不完整；节点返回 FlowError 时运行终止。
//! run_turn 在执行前后读写会话检查点；轮次闸门由会话存储持有，共享同一存储的执行器之间同一会话同一时刻只允许一个运行。

use std::sync::Arc;

use crate::core::{ExecutionState, FlowError, RunContext, StateUpdate};
use crate::memory::Message;
use crate::notify::ProgressEvent;
use crate::session::SessionStore;
use crate::workflow::graph::WorkflowGraph;
use crate::workflow::types::*;

/// 一次运行的结果
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub run_id: String,
    pub state: ExecutionState,
    pub status: WorkflowStatus,
    /// 已执行的节点数
    pub steps: usize,
    /// 节点执行顺序
    pub path: Vec<NodeId>,
    pub abort: Option<AbortReason>,
    /// 最终状态是否已写入会话存储
    pub checkpointed: bool,
}

impl RunOutcome {
    /// 中止或任何节点标记了不完整
    pub fn is_incomplete(&self) -> bool {
        self.abort.is_some() || self.state.is_incomplete()
    }

    pub fn answer(&self) -> &str {
        self.state.final_output()
    }
}

/// 图执行器
pub struct GraphExecutor {
    graph: Arc<WorkflowGraph>,
    sessions: Option<Arc<dyn SessionStore>>,
}

impl GraphExecutor {
    pub fn new(graph: WorkflowGraph) -> Self {
        Self {
            graph: Arc::new(graph),
            sessions: None,
        }
    }

    /// 挂接会话存储，启用 run_turn 的恢复与检查点
    pub fn with_sessions(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.sessions = Some(store);
        self
    }

    pub fn graph(&self) -> &WorkflowGraph {
        &self.graph
    }

    /// 执行一次运行
    pub async fn run(&self, mut state: ExecutionState, ctx: &RunContext) -> Result<RunOutcome, FlowError> {
        state.validate()?;
        tracing::info!(
            workflow = %self.graph.name(),
            run_id = %ctx.run_id,
            max_steps = ctx.limits.max_steps,
            "Workflow run started"
        );

        let mut current = self.graph.next(START, &state, ctx)?;
        let mut steps = 0usize;
        let mut path = Vec::new();
        let mut abort = None;

        while current != END {
            if ctx.is_cancelled() {
                abort = Some(AbortReason::Cancelled);
                break;
            }
            if steps >= ctx.limits.max_steps {
                abort = Some(AbortReason::StepBudgetExceeded {
                    limit: ctx.limits.max_steps,
                });
                break;
            }
            let node = self.graph.node(&current).ok_or_else(|| GraphError::UnknownNode {
                from: path.last().cloned().unwrap_or_else(|| START.to_string()),
                to: current.clone(),
            })?;

            steps += 1;
            ctx.notifier.emit(ProgressEvent::StepStarted {
                node: current.clone(),
                step: steps,
                max_steps: ctx.limits.max_steps,
            });
            ctx.notifier.status(&current);
            tracing::info!(run_id = %ctx.run_id, node = %current, step = steps, "Executing node");

            let result = tokio::select! {
                r = node.run(&state, ctx) => Some(r),
                _ = ctx.cancel.cancelled() => None,
            };
            let update = match result {
                None => {
                    abort = Some(AbortReason::Cancelled);
                    break;
                }
                Some(Ok(update)) => update,
                Some(Err(e)) => {
                    tracing::error!(run_id = %ctx.run_id, node = %current, "Node failed: {}", e);
                    ctx.notifier.emit(ProgressEvent::Error { text: e.to_string() });
                    ctx.artifacts
                        .log_step(&current, &format!("Run aborted: {}", e))
                        .await;
                    return Err(e);
                }
            };

            ctx.artifacts.log_step(&current, &update.describe()).await;
            state.apply(update);
            path.push(current.clone());
            current = self.graph.next(&current, &state, ctx)?;
        }

        let status = match abort {
            Some(reason) => {
                tracing::warn!(run_id = %ctx.run_id, steps, "Workflow aborted: {}", reason);
                state.apply(StateUpdate::new().incomplete());
                ctx.notifier.emit(ProgressEvent::Incomplete {
                    reason: reason.to_string(),
                });
                WorkflowStatus::Aborted
            }
            None => {
                tracing::info!(run_id = %ctx.run_id, steps, "Workflow completed");
                WorkflowStatus::Completed
            }
        };
        ctx.notifier.finish();

        Ok(RunOutcome {
            run_id: ctx.run_id.clone(),
            state,
            status,
            steps,
            path,
            abort,
            checkpointed: false,
        })
    }

    /// 会话内的一轮：加载检查点（不存在则新建状态）、重置运行级字段、追加输入消息、运行、写回检查点
    pub async fn run_turn(&self, input: Vec<Message>, ctx: &RunContext) -> Result<RunOutcome, FlowError> {
        let (Some(store), Some(session_id)) = (self.sessions.as_ref(), ctx.session_id.as_deref()) else {
            return self.run(ExecutionState::with_messages(input), ctx).await;
        };

        let _gate = store.turn_gate().acquire(session_id).await;
        let mut state = store.get(session_id).await?;
        state.begin_turn();
        tracing::info!(
            session_id = %session_id,
            history = state.messages().len(),
            "Session state loaded"
        );
        state.apply(StateUpdate::new().messages(input));

        let mut outcome = self.run(state, ctx).await?;
        match store.put(session_id, &outcome.state).await {
            Ok(_) => outcome.checkpointed = true,
            Err(e) => {
                tracing::warn!(session_id = %session_id, "Checkpoint write failed: {}", e);
            }
        }
        Ok(outcome)
    }
}
