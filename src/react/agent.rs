//! 把 ToolLoop 适配为图节点：以状态中的消息历史运行循环，写回新消息、最终回答与资源

use async_trait::async_trait;

use crate::core::{ExecutionState, FlowError, RunContext, StateUpdate};
use crate::notify::ProgressEvent;
use crate::react::ToolLoop;
use crate::workflow::Node;

pub struct AgentNode {
    tool_loop: ToolLoop,
}

pub fn agent_node(tool_loop: ToolLoop) -> AgentNode {
    AgentNode { tool_loop }
}

#[async_trait]
impl Node for AgentNode {
    async fn run(&self, state: &ExecutionState, ctx: &RunContext) -> Result<StateUpdate, FlowError> {
        let outcome = self.tool_loop.run(state.messages(), ctx).await;
        ctx.notifier.emit(ProgressEvent::Message {
            text: outcome.answer.clone(),
        });

        let mut update = StateUpdate::new()
            .messages(outcome.messages)
            .resources(outcome.resources)
            .final_output(outcome.answer);
        if outcome.incomplete {
            update = update.incomplete();
        }
        Ok(update)
    }
}
