//! ReAct 层：模型与工具交替的回合循环，以及其图节点适配

pub mod agent;
pub mod loop_;

pub use agent::{agent_node, AgentNode};
pub use loop_::{ToolLoop, ToolLoopOutcome, BUDGET_EXHAUSTED_PLACEHOLDER, MODEL_FAILURE_PLACEHOLDER};
