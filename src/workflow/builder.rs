//! 工作流构建器
//!
//! 提供流畅的 API 来声明节点与边；build() 完成全部结构校验，运行时不再出现结构性错误（条件路由的未知标签除外）。

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::core::{ExecutionState, RunContext};
use crate::workflow::graph::WorkflowGraph;
use crate::workflow::types::*;

/// 工作流构建器
pub struct WorkflowBuilder {
    name: String,
    nodes: Vec<(NodeId, Arc<dyn Node>)>,
    edges: Vec<(NodeId, Edge)>,
}

impl WorkflowBuilder {
    /// 创建新的工作流构建器
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            nodes: Vec::new(),
            edges: Vec::new(),
        }
    }

    /// 添加节点
    pub fn node(self, id: impl Into<NodeId>, node: impl Node + 'static) -> Self {
        self.node_arc(id, Arc::new(node))
    }

    pub fn node_arc(mut self, id: impl Into<NodeId>, node: Arc<dyn Node>) -> Self {
        self.nodes.push((id.into(), node));
        self
    }

    /// 添加固定边
    pub fn edge(mut self, from: impl Into<NodeId>, to: impl Into<NodeId>) -> Self {
        self.edges.push((from.into(), Edge::Static(to.into())));
        self
    }

    /// 添加条件边：router 返回标签，routes 把标签映射到后继
    pub fn conditional_edge<R, L, I, K, V>(mut self, from: impl Into<NodeId>, router: R, routes: I) -> Self
    where
        R: Fn(&ExecutionState, &RunContext) -> L + Send + Sync + 'static,
        L: Into<String>,
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<NodeId>,
    {
        let routes: BTreeMap<String, NodeId> = routes
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        let router: Router = Arc::new(move |state: &ExecutionState, ctx: &RunContext| -> String {
            router(state, ctx).into()
        });
        self.edges.push((from.into(), Edge::Conditional { router, routes }));
        self
    }

    /// 构建并校验：唯一入口、端点存在、每个节点有出边、无重复、无保留名
    pub fn build(self) -> Result<WorkflowGraph, GraphError> {
        let mut nodes: HashMap<NodeId, Arc<dyn Node>> = HashMap::new();
        let mut order = Vec::new();
        for (id, node) in self.nodes {
            if id == START || id == END {
                return Err(GraphError::ReservedName(id));
            }
            if nodes.insert(id.clone(), node).is_some() {
                return Err(GraphError::DuplicateNode(id));
            }
            order.push(id);
        }

        let mut edges: HashMap<NodeId, Edge> = HashMap::new();
        for (from, edge) in self.edges {
            if from == END {
                return Err(GraphError::ReservedName(from));
            }
            if from != START && !nodes.contains_key(&from) {
                return Err(GraphError::UnknownSource(from));
            }
            for to in edge.targets() {
                if to != END && !nodes.contains_key(to) {
                    return Err(GraphError::UnknownNode {
                        from: from.clone(),
                        to: to.to_string(),
                    });
                }
            }
            if edges.contains_key(&from) {
                return Err(GraphError::DuplicateEdge(from));
            }
            edges.insert(from, edge);
        }

        if !edges.contains_key(START) {
            return Err(GraphError::NoEntry);
        }
        if let Some(missing) = order.iter().find(|id| !edges.contains_key(*id)) {
            return Err(GraphError::MissingEdge(missing.clone()));
        }

        tracing::debug!(workflow = %self.name, nodes = order.len(), "Workflow graph built");
        Ok(WorkflowGraph {
            name: self.name,
            nodes,
            order,
            edges,
        })
    }
}
