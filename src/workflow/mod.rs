//! 工作流模块
//!
//! 以有向图声明 Agent 的步骤：节点是读取状态、返回部分更新的异步函数，边是固定后继或按状态路由的条件边。
//! 图可以有环（反思循环），由执行器的步数上限兜底。

pub mod builder;
pub mod engine;
pub mod graph;
pub mod types;

pub use builder::WorkflowBuilder;
pub use engine::{GraphExecutor, RunOutcome};
pub use graph::WorkflowGraph;
pub use types::{
    node_fn, AbortReason, Edge, FnNode, GraphError, Node, NodeId, Router, WorkflowStatus, END, START,
};
