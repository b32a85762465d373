//! ReAct 工具循环
//!
//! 每回合：带完整历史与工具清单调用模型；回复含工具调用时追加一条工具调用回合，
//! 并发执行全部调用（join 后按调用顺序追加，每个调用紧跟一条工具结果回合）；回复不含工具调用即为最终回答。
//! 回合数受本循环预算与运行级回合池双重约束，耗尽时以最后的部分回答结束并标记不完整。
//! 工具失败转为 "Error: ..." 工具结果回合，不中断循环；模型调用失败结束循环并标记不完整。

use std::sync::Arc;

use futures_util::future::join_all;

use crate::core::RunContext;
use crate::llm::{LlmClient, LlmRequest};
use crate::memory::{Message, ToolCall};
use crate::notify::{preview, ProgressEvent};
use crate::tools::{ToolError, ToolExecutor, ToolOutput};

/// Observation 预览最大字符数
const OBSERVATION_PREVIEW_CHARS: usize = 200;

/// 模型调用失败且没有任何部分回答时的占位回复
pub const MODEL_FAILURE_PLACEHOLDER: &str =
    "Sorry, the model is unavailable right now and no answer could be produced.";

/// 回合耗尽且没有任何部分回答时的占位回复
pub const BUDGET_EXHAUSTED_PLACEHOLDER: &str =
    "The tool turn budget ran out before a final answer was reached.";

/// 循环结果
#[derive(Debug, Clone, Default)]
pub struct ToolLoopOutcome {
    pub answer: String,
    /// 本次循环新增的消息（工具调用回合、工具结果回合、最终回答）
    pub messages: Vec<Message>,
    /// 工具结果中解析出的资源定位符（按出现顺序累积）
    pub resources: Vec<String>,
    /// 模型调用次数
    pub turns: usize,
    pub tool_failures: usize,
    pub incomplete: bool,
}

enum StopReason {
    Answered,
    Budget,
    Cancelled,
    ModelFailed,
}

pub struct ToolLoop {
    llm: Arc<dyn LlmClient>,
    tools: Option<Arc<ToolExecutor>>,
    turn_budget: Option<usize>,
    system_prompt: Option<String>,
    extended_reasoning: bool,
    allowed_tools: Option<Vec<String>>,
}

impl ToolLoop {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self {
            llm,
            tools: None,
            turn_budget: None,
            system_prompt: None,
            extended_reasoning: false,
            allowed_tools: None,
        }
    }

    /// 指定工具执行器；默认使用运行上下文中的执行器
    pub fn tools(mut self, tools: Arc<ToolExecutor>) -> Self {
        self.tools = Some(tools);
        self
    }

    /// 本循环回合上限；默认取 RunLimits::tool_turn_budget
    pub fn turn_budget(mut self, budget: usize) -> Self {
        self.turn_budget = Some(budget.max(1));
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn extended_reasoning(mut self, on: bool) -> Self {
        self.extended_reasoning = on;
        self
    }

    /// 只向模型暴露这些工具
    pub fn allowed_tools(mut self, names: Vec<String>) -> Self {
        self.allowed_tools = Some(names);
        self
    }

    pub async fn run(&self, history: &[Message], ctx: &RunContext) -> ToolLoopOutcome {
        let budget = self.turn_budget.unwrap_or(ctx.limits.tool_turn_budget);
        let tools = self.tools.clone().unwrap_or_else(|| ctx.tools.clone());
        let specs = tools.specs(self.allowed_tools.as_deref());

        let mut conversation: Vec<Message> = Vec::with_capacity(history.len() + 1);
        if let Some(prompt) = &self.system_prompt {
            conversation.push(Message::system(prompt.clone()));
        }
        conversation.extend_from_slice(history);

        let mut outcome = ToolLoopOutcome::default();
        let mut partial = String::new();

        let stop = loop {
            if ctx.is_cancelled() {
                break StopReason::Cancelled;
            }
            if outcome.turns >= budget || !ctx.try_take_tool_turn() {
                break StopReason::Budget;
            }
            outcome.turns += 1;
            ctx.notifier.emit(ProgressEvent::TurnUpdate {
                turn: outcome.turns,
                budget,
            });
            ctx.notifier.emit(ProgressEvent::Thinking);

            let request = LlmRequest {
                messages: conversation.clone(),
                tools: specs.clone(),
                extended_reasoning: self.extended_reasoning,
            };
            let reply = match self.llm.complete(&request).await {
                Ok(reply) => reply,
                Err(e) => {
                    tracing::warn!(run_id = %ctx.run_id, turn = outcome.turns, "Model call failed: {}", e);
                    break StopReason::ModelFailed;
                }
            };

            if reply.tool_calls.is_empty() {
                let answer = Message::assistant(reply.content.clone());
                conversation.push(answer.clone());
                outcome.messages.push(answer);
                outcome.answer = reply.content;
                break StopReason::Answered;
            }

            if !reply.content.trim().is_empty() {
                partial = reply.content.clone();
            }
            let calls = reply.tool_calls;
            let call_turn = Message::assistant_with_tool_calls(reply.content, calls.clone());
            conversation.push(call_turn.clone());
            outcome.messages.push(call_turn);

            let results = join_all(calls.iter().map(|call| self.invoke(&tools, call, ctx))).await;
            for (call, result) in calls.iter().zip(results) {
                let observation = match result {
                    Ok(output) => {
                        outcome.resources.extend(output.locators().iter().cloned());
                        let text = output.to_observation();
                        ctx.notifier.emit(ProgressEvent::Observation {
                            tool: call.name.clone(),
                            preview: preview(&text, OBSERVATION_PREVIEW_CHARS),
                        });
                        text
                    }
                    Err(e) => {
                        outcome.tool_failures += 1;
                        ctx.notifier.emit(ProgressEvent::ToolFailure {
                            tool: call.name.clone(),
                            reason: e.to_string(),
                        });
                        format!("Error: {}", e)
                    }
                };
                let result_turn = Message::tool_result(call.id.clone(), observation);
                conversation.push(result_turn.clone());
                outcome.messages.push(result_turn);
            }
        };

        match stop {
            StopReason::Answered => {
                tracing::info!(run_id = %ctx.run_id, turns = outcome.turns, "Tool loop answered");
            }
            reason => {
                let (detail, placeholder) = match reason {
                    StopReason::Budget => ("tool turn budget exhausted", BUDGET_EXHAUSTED_PLACEHOLDER),
                    StopReason::Cancelled => ("run cancelled", BUDGET_EXHAUSTED_PLACEHOLDER),
                    _ => ("model call failed", MODEL_FAILURE_PLACEHOLDER),
                };
                tracing::warn!(run_id = %ctx.run_id, turns = outcome.turns, "Tool loop stopped early: {}", detail);
                outcome.answer = if partial.is_empty() {
                    placeholder.to_string()
                } else {
                    partial
                };
                outcome.incomplete = true;
                ctx.notifier.emit(ProgressEvent::Incomplete {
                    reason: detail.to_string(),
                });
            }
        }
        outcome
    }

    async fn invoke(
        &self,
        tools: &ToolExecutor,
        call: &ToolCall,
        ctx: &RunContext,
    ) -> Result<ToolOutput, ToolError> {
        ctx.notifier.emit(ProgressEvent::ToolCall {
            tool: call.name.clone(),
            args: call.args.clone(),
        });
        if let Some(allowed) = &self.allowed_tools {
            if !allowed.is_empty() && !allowed.contains(&call.name) {
                return Err(ToolError::Unknown(call.name.clone()));
            }
        }
        let content = tools.execute(&call.name, call.args.clone()).await?;
        Ok(ToolOutput::decode(content))
    }
}
