//! 反思循环
//!
//! draft -> should_end? -> reflect -> gather -> draft ...
//!
//! - draft：没有草稿时由模型根据已有材料生成；第 0 轮已有外部草稿时直接采用；之后结合收集到的上下文重写，保留原有标题结构。
//!   每次都会递增 iteration、在报告顶部插入新章节并更新 final_output。
//! - should_end：iteration > max_iteration 时结束，终止条件只依赖计数器，因此草稿最多生成 max_iteration + 1 次。
//! - reflect：调用 Critic，保存结论与笔记；重试耗尽时推送 Degraded 通知后照常继续。
//! - gather：对每条追问并发运行一个 ToolLoop，回答写入 context，资源定位符累积。

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::join_all;

use crate::core::{ExecutionState, FlowError, RunContext, StateUpdate};
use crate::llm::{LlmClient, LlmRequest};
use crate::memory::Message;
use crate::notify::ProgressEvent;
use crate::react::ToolLoop;
use crate::reflection::Critic;
use crate::workflow::{Node, WorkflowBuilder, WorkflowGraph, END, START};

pub const DRAFT: &str = "draft";
pub const REFLECT: &str = "reflect";
pub const GATHER: &str = "gather";

const ROUTE_END: &str = "end";
const ROUTE_CONTINUE: &str = "continue";

const DRAFT_PROMPT: &str = "You are a careful analyst. Write a well structured markdown report that \
answers the request using only the material provided.";

const REVISE_PROMPT: &str = "You are a careful analyst. Keep every heading and the overall format of \
the <draft> report, and weave in the information from <context>. Explain simply.";

const GATHER_PROMPT: &str = "Research the question with the available tools and answer concisely \
with the facts you found.";

/// 报告章节标题
const DEFAULT_TITLE: &str = "# Report";

/// 反思循环的组成部分（可单独构图，也可接入更大的图）
#[derive(Clone)]
pub struct ReflectionCycle {
    llm: Arc<dyn LlmClient>,
    critique_attempts: Option<usize>,
    gather_turn_budget: Option<usize>,
    title: String,
}

impl ReflectionCycle {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self {
            llm,
            critique_attempts: None,
            gather_turn_budget: None,
            title: DEFAULT_TITLE.to_string(),
        }
    }

    /// 反思尝试次数；默认取 RunLimits::critique_attempts
    pub fn critique_attempts(mut self, attempts: usize) -> Self {
        self.critique_attempts = Some(attempts.max(1));
        self
    }

    /// 每条追问的 ToolLoop 回合上限；默认取 RunLimits::tool_turn_budget
    pub fn gather_turn_budget(mut self, budget: usize) -> Self {
        self.gather_turn_budget = Some(budget);
        self
    }

    /// 报告章节标题（一级标题）
    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    /// 把 draft/reflect/gather 三个节点及其边加入 builder；`after` 为进入循环前的节点（独立构图时为 START）
    pub fn install(&self, builder: WorkflowBuilder, after: &str) -> WorkflowBuilder {
        builder
            .node(
                DRAFT,
                DraftNode {
                    llm: self.llm.clone(),
                    title: self.title.clone(),
                },
            )
            .node(
                REFLECT,
                ReflectNode {
                    critic: Critic::new(self.llm.clone()),
                    attempts: self.critique_attempts,
                },
            )
            .node(
                GATHER,
                GatherNode {
                    llm: self.llm.clone(),
                    turn_budget: self.gather_turn_budget,
                },
            )
            .edge(after, DRAFT)
            .conditional_edge(
                DRAFT,
                should_end,
                [(ROUTE_END, END), (ROUTE_CONTINUE, REFLECT)],
            )
            .edge(REFLECT, GATHER)
            .edge(GATHER, DRAFT)
    }

    /// 独立的反思循环图
    pub fn graph(&self) -> Result<WorkflowGraph, crate::workflow::GraphError> {
        self.install(WorkflowBuilder::new("reflection"), START).build()
    }
}

/// 终止判断：只看计数器与 RunLimits::max_iteration
pub fn should_end(state: &ExecutionState, ctx: &RunContext) -> &'static str {
    if state.iteration() > ctx.limits.max_iteration {
        tracing::info!(run_id = %ctx.run_id, iteration = state.iteration(), "Max iteration reached");
        ROUTE_END
    } else {
        ROUTE_CONTINUE
    }
}

struct DraftNode {
    llm: Arc<dyn LlmClient>,
    title: String,
}

impl DraftNode {
    fn material(state: &ExecutionState) -> String {
        let mut material = String::new();
        if let Some(request) = state.last_user_message() {
            material.push_str(&format!("<request>{}</request>\n", request));
        }
        for artifact in state.artifacts() {
            material.push_str(&format!("<data>{}</data>\n", artifact));
        }
        if !state.context().is_empty() {
            material.push_str(&format!(
                "<additional_context>{}</additional_context>\n",
                state.context().join("\n\n")
            ));
        }
        material
    }
}

#[async_trait]
impl Node for DraftNode {
    async fn run(&self, state: &ExecutionState, ctx: &RunContext) -> Result<StateUpdate, FlowError> {
        let current = state.final_output();
        let body = if state.iteration() == 0 && !current.trim().is_empty() {
            tracing::info!(run_id = %ctx.run_id, "Adopting supplied draft");
            current.to_string()
        } else {
            let request = if current.trim().is_empty() {
                LlmRequest::new(vec![
                    Message::system(DRAFT_PROMPT),
                    Message::user(Self::material(state)),
                ])
            } else {
                LlmRequest::new(vec![
                    Message::system(REVISE_PROMPT),
                    Message::user(format!(
                        "<draft>{}</draft>\n<context>{}</context>",
                        current,
                        state.context().join("\n\n")
                    )),
                ])
            };
            ctx.notifier.emit(ProgressEvent::Thinking);
            match self.llm.complete(&request).await {
                Ok(reply) => reply.content,
                Err(e) if !current.trim().is_empty() => {
                    tracing::warn!(run_id = %ctx.run_id, "Revision failed, keeping previous draft: {}", e);
                    current.to_string()
                }
                Err(e) => {
                    return Err(FlowError::fatal(DRAFT, format!("model unavailable: {}", e)));
                }
            }
        };

        let images: String = state
            .resources()
            .iter()
            .map(|locator| format!("![image]({})\n\n", locator))
            .collect();
        ctx.artifacts
            .prepend_report(&format!("{}\n\n{}\n\n{}", self.title, body, images))
            .await;
        ctx.notifier.emit(ProgressEvent::Message { text: body.clone() });

        Ok(StateUpdate::new().final_output(body).increment_iteration())
    }
}

struct ReflectNode {
    critic: Critic,
    attempts: Option<usize>,
}

#[async_trait]
impl Node for ReflectNode {
    async fn run(&self, state: &ExecutionState, ctx: &RunContext) -> Result<StateUpdate, FlowError> {
        let attempts = self.attempts.unwrap_or(ctx.limits.critique_attempts);
        let verdict = self
            .critic
            .reflect_with_attempts(state.final_output(), attempts)
            .await;
        if verdict.exhausted {
            ctx.notifier.emit(ProgressEvent::Degraded {
                detail: "critique could not be parsed; continuing without reflection".to_string(),
            });
        }
        ctx.notifier.emit(ProgressEvent::Reflection {
            notes: verdict.notes(),
            queries: verdict.queries.clone(),
        });
        Ok(StateUpdate::new()
            .reflection(verdict.notes())
            .verdict(verdict))
    }
}

struct GatherNode {
    llm: Arc<dyn LlmClient>,
    turn_budget: Option<usize>,
}

#[async_trait]
impl Node for GatherNode {
    async fn run(&self, state: &ExecutionState, ctx: &RunContext) -> Result<StateUpdate, FlowError> {
        let queries = state.verdict().map(|v| v.queries.clone()).unwrap_or_default();
        if queries.is_empty() {
            tracing::info!(run_id = %ctx.run_id, "No follow-up queries, nothing to gather");
            return Ok(StateUpdate::new());
        }

        let mut tool_loop = ToolLoop::new(self.llm.clone()).system_prompt(GATHER_PROMPT);
        if let Some(budget) = self.turn_budget {
            tool_loop = tool_loop.turn_budget(budget);
        }
        let draft = state.final_output();
        let notes = state.reflection().join("\n");

        let outcomes = join_all(queries.iter().map(|query| {
            let history = vec![Message::user(format!(
                "<draft>{}</draft>\n<reflection>{}</reflection>\n<question>{}</question>",
                draft, notes, query
            ))];
            let tool_loop = &tool_loop;
            async move { tool_loop.run(&history, ctx).await }
        }))
        .await;

        let mut update = StateUpdate::new();
        for (query, outcome) in queries.iter().zip(outcomes) {
            if outcome.incomplete {
                update = update.incomplete();
            }
            update = update
                .context(format!("## {}\n\n{}", query, outcome.answer))
                .resources(outcome.resources);
        }
        Ok(update)
    }
}
