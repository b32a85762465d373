//! 运行级错误
//!
//! 只有 FlowError 会越过一次运行的边界；工具失败、结构化解析失败、预算耗尽等在内部转为状态与标记。

use thiserror::Error;

use crate::core::state::StateError;
use crate::session::SessionError;
use crate::workflow::GraphError;

/// 终止运行并返回给调用方的错误
#[derive(Error, Debug)]
pub enum FlowError {
    /// 节点判断已无可能产生有意义的输出（例如所有上游数据都失败）
    #[error("Fatal error in node '{node}': {reason}")]
    Fatal { node: String, reason: String },

    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    #[error("Invalid execution state: {0}")]
    State(#[from] StateError),

    #[error("Session store error: {0}")]
    Session(#[from] SessionError),
}

impl FlowError {
    pub fn fatal(node: impl Into<String>, reason: impl Into<String>) -> Self {
        FlowError::Fatal {
            node: node.into(),
            reason: reason.into(),
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, FlowError::Fatal { .. })
    }
}
