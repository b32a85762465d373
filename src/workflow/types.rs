//! 工作流类型定义
//!
//! 节点（Node）、边（Edge）、保留节点名、构建/路由错误、运行状态与中止原因。

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::{ExecutionState, FlowError, RunContext, StateUpdate};

/// 入口保留名
pub const START: &str = "__start__";
/// 终点保留名
pub const END: &str = "__end__";

pub type NodeId = String;

/// 图中的一个步骤：读取状态，返回部分更新
#[async_trait]
pub trait Node: Send + Sync {
    async fn run(&self, state: &ExecutionState, ctx: &RunContext) -> Result<StateUpdate, FlowError>;
}

/// 闭包节点：闭包接收状态与上下文的克隆
pub struct FnNode<F> {
    f: F,
}

/// 由异步闭包构造节点
pub fn node_fn<F, Fut>(f: F) -> FnNode<F>
where
    F: Fn(ExecutionState, RunContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<StateUpdate, FlowError>> + Send,
{
    FnNode { f }
}

#[async_trait]
impl<F, Fut> Node for FnNode<F>
where
    F: Fn(ExecutionState, RunContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<StateUpdate, FlowError>> + Send,
{
    async fn run(&self, state: &ExecutionState, ctx: &RunContext) -> Result<StateUpdate, FlowError> {
        (self.f)(state.clone(), ctx.clone()).await
    }
}

/// 路由函数：根据状态（与运行上下文中的限额）返回标签
pub type Router = Arc<dyn Fn(&ExecutionState, &RunContext) -> String + Send + Sync>;

/// 节点的出边
#[derive(Clone)]
pub enum Edge {
    /// 固定后继
    Static(NodeId),
    /// 条件路由：标签 -> 后继（节点或 END）
    Conditional {
        router: Router,
        routes: BTreeMap<String, NodeId>,
    },
}

impl Edge {
    /// 该边可能到达的所有目标
    pub fn targets(&self) -> Vec<&str> {
        match self {
            Edge::Static(to) => vec![to.as_str()],
            Edge::Conditional { routes, .. } => routes.values().map(|s| s.as_str()).collect(),
        }
    }
}

impl fmt::Debug for Edge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Edge::Static(to) => f.debug_tuple("Static").field(to).finish(),
            Edge::Conditional { routes, .. } => {
                f.debug_struct("Conditional").field("routes", routes).finish()
            }
        }
    }
}

/// 图构建与路由错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GraphError {
    #[error("Graph has no entry edge from START")]
    NoEntry,

    #[error("Duplicate node: {0}")]
    DuplicateNode(String),

    #[error("Reserved node name: {0}")]
    ReservedName(String),

    #[error("Node '{0}' has more than one outgoing edge")]
    DuplicateEdge(String),

    #[error("Edge from '{from}' references unknown node '{to}'")]
    UnknownNode { from: String, to: String },

    #[error("Edge declared from unknown node '{0}'")]
    UnknownSource(String),

    #[error("Node '{0}' has no outgoing edge")]
    MissingEdge(String),

    #[error("Router of '{node}' returned unmapped label '{label}'")]
    UnknownRoute { node: String, label: String },
}

/// 运行结束状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkflowStatus {
    /// 到达 END
    Completed,
    /// 步数上限或取消导致提前结束（状态为部分结果）
    Aborted,
}

/// 中止原因
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AbortReason {
    StepBudgetExceeded { limit: usize },
    Cancelled,
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbortReason::StepBudgetExceeded { limit } => {
                write!(f, "step budget of {} exceeded", limit)
            }
            AbortReason::Cancelled => write!(f, "run cancelled"),
        }
    }
}
