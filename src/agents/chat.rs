//! 对话 Agent：可选的计划步骤 + ToolLoop
//!
//! plan（可选）-> agent -> END。plan 节点让模型给出 `<plan>` 块，并以一条用户消息把计划交给 agent；
//! 计划失败不影响回答，只是不追加计划消息。

use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use regex::Regex;

use crate::core::{ExecutionState, FlowError, RunContext, StateUpdate};
use crate::llm::{LlmClient, LlmRequest};
use crate::memory::Message;
use crate::notify::ProgressEvent;
use crate::react::{agent_node, ToolLoop};
use crate::workflow::{GraphError, Node, WorkflowBuilder, WorkflowGraph, END, START};

pub const PLAN: &str = "plan";
pub const AGENT: &str = "agent";

const PLAN_PROMPT: &str = "For the given objective, come up with a simple step by step plan. \
This plan should involve individual tasks, that if executed correctly will yield the correct answer. \
Do not add any superfluous steps. The result of the final step should be the final answer. \
Make sure that each step has all the information needed. The plan should be returned in <plan> tag.";

const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant. Use the available tools when they \
help answer the question, and answer directly when they do not.";

#[derive(Debug, Clone, Default)]
pub struct ChatAgentOptions {
    /// 先生成计划再回答
    pub plan: bool,
    pub system_prompt: Option<String>,
    /// ToolLoop 回合上限；默认取 RunLimits::tool_turn_budget
    pub turn_budget: Option<usize>,
    pub extended_reasoning: bool,
}

/// 构建对话 Agent 图
pub fn build_chat_agent(
    llm: Arc<dyn LlmClient>,
    options: ChatAgentOptions,
) -> Result<WorkflowGraph, GraphError> {
    let mut tool_loop = ToolLoop::new(llm.clone())
        .system_prompt(
            options
                .system_prompt
                .clone()
                .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
        )
        .extended_reasoning(options.extended_reasoning);
    if let Some(budget) = options.turn_budget {
        tool_loop = tool_loop.turn_budget(budget);
    }

    let builder = WorkflowBuilder::new("chat").node(AGENT, agent_node(tool_loop));
    let builder = if options.plan {
        builder
            .node(PLAN, PlanNode { llm })
            .edge(START, PLAN)
            .edge(PLAN, AGENT)
    } else {
        builder.edge(START, AGENT)
    };
    builder.edge(AGENT, END).build()
}

/// 取出 `<plan>...</plan>` 之间的内容；没有标签时返回整段文本
pub fn extract_plan(text: &str) -> String {
    static PLAN_TAG: OnceLock<Option<Regex>> = OnceLock::new();
    PLAN_TAG
        .get_or_init(|| Regex::new(r"(?s)<plan>(.*?)</plan>").ok())
        .as_ref()
        .and_then(|re| re.captures(text))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
        .unwrap_or(text)
        .trim()
        .to_string()
}

struct PlanNode {
    llm: Arc<dyn LlmClient>,
}

#[async_trait]
impl Node for PlanNode {
    async fn run(&self, state: &ExecutionState, ctx: &RunContext) -> Result<StateUpdate, FlowError> {
        let mut messages = vec![Message::system(PLAN_PROMPT)];
        // 计划只需要对话内容，不带工具回合
        messages.extend(
            state
                .messages()
                .iter()
                .filter(|m| m.tool_call_id.is_none() && m.tool_calls.is_empty())
                .cloned(),
        );

        ctx.notifier.emit(ProgressEvent::Thinking);
        let plan = match self.llm.complete(&LlmRequest::new(messages)).await {
            Ok(reply) => extract_plan(&reply.content),
            Err(e) => {
                tracing::warn!(run_id = %ctx.run_id, "Planning failed, answering without a plan: {}", e);
                return Ok(StateUpdate::new());
            }
        };
        if plan.is_empty() {
            return Ok(StateUpdate::new());
        }

        tracing::info!(run_id = %ctx.run_id, "plan: {}", plan);
        ctx.notifier.emit(ProgressEvent::Message {
            text: format!("Plan:\n{}", plan),
        });
        Ok(StateUpdate::new().message(Message::user(format!(
            "Refer to the following plan when answering.\n{}",
            plan
        ))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_plan() {
        assert_eq!(extract_plan("ok <plan>\n1. a\n2. b\n</plan> done"), "1. a\n2. b");
        assert_eq!(extract_plan("  just steps  "), "just steps");
    }

    #[test]
    fn test_graph_shape() {
        let llm: Arc<dyn LlmClient> = Arc::new(crate::llm::MockLlmClient);
        let plain = build_chat_agent(llm.clone(), ChatAgentOptions::default()).unwrap();
        assert_eq!(plain.node_ids(), &[AGENT.to_string()]);

        let planned = build_chat_agent(
            llm,
            ChatAgentOptions {
                plan: true,
                ..ChatAgentOptions::default()
            },
        )
        .unwrap();
        assert!(planned.to_mermaid().contains("plan --> agent;"));
    }
}
