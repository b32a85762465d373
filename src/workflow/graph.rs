//! 工作流图
//!
//! 已校验的节点表与出边表；next() 按边解析后继，to_mermaid() 渲染流程图。

use std::collections::HashMap;
use std::sync::Arc;

use crate::core::{ExecutionState, RunContext};
use crate::workflow::types::*;

/// 已校验的图（由 WorkflowBuilder::build 构造）
pub struct WorkflowGraph {
    pub(crate) name: String,
    pub(crate) nodes: HashMap<NodeId, Arc<dyn Node>>,
    /// 声明顺序，用于稳定的渲染输出
    pub(crate) order: Vec<NodeId>,
    pub(crate) edges: HashMap<NodeId, Edge>,
}

impl WorkflowGraph {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn node(&self, id: &str) -> Option<Arc<dyn Node>> {
        self.nodes.get(id).cloned()
    }

    pub fn node_ids(&self) -> &[NodeId] {
        &self.order
    }

    pub fn edge(&self, from: &str) -> Option<&Edge> {
        self.edges.get(from)
    }

    /// 解析 from 的后继；条件边的未知标签为致命路由错误
    pub fn next(&self, from: &str, state: &ExecutionState, ctx: &RunContext) -> Result<NodeId, GraphError> {
        match self.edges.get(from) {
            None if from == START => Err(GraphError::NoEntry),
            None => Err(GraphError::MissingEdge(from.to_string())),
            Some(Edge::Static(to)) => Ok(to.clone()),
            Some(Edge::Conditional { router, routes }) => {
                let label = router(state, ctx);
                routes
                    .get(&label)
                    .cloned()
                    .ok_or_else(|| GraphError::UnknownRoute {
                        node: from.to_string(),
                        label,
                    })
            }
        }
    }

    /// Mermaid 流程图
    pub fn to_mermaid(&self) -> String {
        fn label(id: &str) -> String {
            match id {
                START => format!("{}([START])", START),
                END => format!("{}([END])", END),
                other => other.to_string(),
            }
        }

        let mut out = String::from("graph TD;\n");
        let sources = std::iter::once(START.to_string()).chain(self.order.iter().cloned());
        for from in sources {
            match self.edges.get(&from) {
                Some(Edge::Static(to)) => {
                    out.push_str(&format!("    {} --> {};\n", label(&from), label(to)));
                }
                Some(Edge::Conditional { routes, .. }) => {
                    for (route, to) in routes {
                        out.push_str(&format!(
                            "    {} -. {} .-> {};\n",
                            label(&from),
                            route,
                            label(to)
                        ));
                    }
                }
                None => {}
            }
        }
        out
    }
}

impl std::fmt::Debug for WorkflowGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowGraph")
            .field("name", &self.name)
            .field("nodes", &self.order)
            .field("edges", &self.edges)
            .finish()
    }
}
