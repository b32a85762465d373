//! 数据报告 Agent
//!
//! collect -> draft -> (reflect -> gather -> draft)* -> END
//!
//! collect 并发拉取全部数据源，单个失败以占位章节代替，全部失败时终止运行；
//! 之后进入反思循环，每轮草稿写入报告文档顶部。

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::join_all;

use crate::core::{ExecutionState, FlowError, RunContext, StateUpdate};
use crate::llm::LlmClient;
use crate::memory::Message;
use crate::notify::ProgressEvent;
use crate::reflection::ReflectionCycle;
use crate::workflow::{GraphError, GraphExecutor, Node, RunOutcome, WorkflowBuilder, WorkflowGraph, START};

pub const COLLECT: &str = "collect";

/// 报告的数据来源（外部协作方）
#[async_trait]
pub trait DataSource: Send + Sync {
    fn name(&self) -> &str;

    /// 拉取数据，返回可直接放进报告材料的文本
    async fn fetch(&self, request: &str) -> Result<String, String>;
}

pub struct ReportAgent {
    llm: Arc<dyn LlmClient>,
    sources: Vec<Arc<dyn DataSource>>,
    critique_attempts: Option<usize>,
    title: String,
}

impl ReportAgent {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self {
            llm,
            sources: Vec::new(),
            critique_attempts: None,
            title: "# Report".to_string(),
        }
    }

    pub fn source(mut self, source: impl DataSource + 'static) -> Self {
        self.sources.push(Arc::new(source));
        self
    }

    /// 覆盖 RunLimits::critique_attempts
    pub fn critique_attempts(mut self, attempts: usize) -> Self {
        self.critique_attempts = Some(attempts);
        self
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn graph(&self) -> Result<WorkflowGraph, GraphError> {
        let mut cycle = ReflectionCycle::new(self.llm.clone()).title(self.title.clone());
        if let Some(attempts) = self.critique_attempts {
            cycle = cycle.critique_attempts(attempts);
        }
        let builder = WorkflowBuilder::new("report")
            .node(
                COLLECT,
                CollectNode {
                    sources: self.sources.clone(),
                },
            )
            .edge(START, COLLECT);
        cycle.install(builder, COLLECT).build()
    }

    /// 针对一个请求生成报告；流程图写入步骤日志
    pub async fn run(&self, request: &str, ctx: &RunContext) -> Result<RunOutcome, FlowError> {
        let graph = self.graph()?;
        ctx.artifacts
            .log_step("workflow", &format!("```mermaid\n{}```", graph.to_mermaid()))
            .await;
        let state = ExecutionState::with_messages(vec![Message::user(request)]);
        GraphExecutor::new(graph).run(state, ctx).await
    }
}

struct CollectNode {
    sources: Vec<Arc<dyn DataSource>>,
}

#[async_trait]
impl Node for CollectNode {
    async fn run(&self, state: &ExecutionState, ctx: &RunContext) -> Result<StateUpdate, FlowError> {
        if self.sources.is_empty() {
            return Err(FlowError::fatal(COLLECT, "no data sources configured"));
        }
        let request = state.last_user_message().unwrap_or_default();
        let results = join_all(self.sources.iter().map(|source| source.fetch(request))).await;

        let mut update = StateUpdate::new();
        let mut failed = 0usize;
        for (source, result) in self.sources.iter().zip(results) {
            let section = match result {
                Ok(data) => format!("## {}\n\n{}", source.name(), data),
                Err(reason) => {
                    failed += 1;
                    tracing::warn!(run_id = %ctx.run_id, source = %source.name(), "Data source failed: {}", reason);
                    ctx.notifier.emit(ProgressEvent::ToolFailure {
                        tool: source.name().to_string(),
                        reason: reason.clone(),
                    });
                    format!("## {}\n\n(data unavailable: {})", source.name(), reason)
                }
            };
            update = update.artifact(section);
        }

        if failed == self.sources.len() {
            return Err(FlowError::fatal(COLLECT, "every data source failed"));
        }
        Ok(update)
    }
}
