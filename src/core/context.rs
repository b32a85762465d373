//! 运行上下文：运行 ID、限额、工具注册表、通知器、产物、取消令牌
//!
//! 每次运行独立构造，调用方在运行开始时提供全部配置；上下文内的计数（通知序号、工具回合账本）只属于本次运行。

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::core::artifacts::{ArtifactStore, MemoryArtifactStore, RunArtifacts};
use crate::notify::{NoopSink, NotificationSink, Notifier};
use crate::tools::{ToolExecutor, ToolRegistry};

/// 单次运行的限额
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunLimits {
    /// 图执行的最大步数（节点执行次数）
    pub max_steps: usize,
    /// 反思循环的最大迭代数
    pub max_iteration: u32,
    /// 单个 ToolLoop 的回合上限
    pub tool_turn_budget: usize,
    /// 整个运行内所有 ToolLoop 共享的回合池；None 表示不设池
    pub run_tool_turns: Option<usize>,
    /// 结构化反思的最大尝试次数（ReflectionCycle 未单独指定时使用）
    pub critique_attempts: usize,
}

impl Default for RunLimits {
    fn default() -> Self {
        Self {
            max_steps: 50,
            max_iteration: 1,
            tool_turn_budget: 100,
            run_tool_turns: None,
            critique_attempts: crate::reflection::DEFAULT_CRITIQUE_ATTEMPTS,
        }
    }
}

impl RunLimits {
    pub fn validate(&self) -> Result<(), ContextError> {
        if self.max_steps == 0 {
            return Err(ContextError::InvalidLimits("max_steps must be > 0".to_string()));
        }
        if self.tool_turn_budget == 0 {
            return Err(ContextError::InvalidLimits(
                "tool_turn_budget must be > 0".to_string(),
            ));
        }
        if self.critique_attempts == 0 {
            return Err(ContextError::InvalidLimits(
                "critique_attempts must be > 0".to_string(),
            ));
        }
        if self.run_tool_turns == Some(0) {
            return Err(ContextError::InvalidLimits(
                "run_tool_turns must be > 0 when set".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Error, Debug, PartialEq)]
pub enum ContextError {
    #[error("Invalid run limits: {0}")]
    InvalidLimits(String),

    #[error("Invalid session id: {0}")]
    InvalidSessionId(String),
}

/// 一次运行的上下文（克隆共享同一份计数）
#[derive(Clone)]
pub struct RunContext {
    pub run_id: String,
    pub session_id: Option<String>,
    pub limits: RunLimits,
    pub tools: Arc<ToolExecutor>,
    pub notifier: Notifier,
    pub artifacts: RunArtifacts,
    pub cancel: CancellationToken,
    tool_turns_used: Arc<AtomicUsize>,
}

impl RunContext {
    pub fn builder() -> RunContextBuilder {
        RunContextBuilder::default()
    }

    /// 从运行回合池中取一个回合；池已空返回 false
    pub fn try_take_tool_turn(&self) -> bool {
        match self.limits.run_tool_turns {
            None => {
                self.tool_turns_used.fetch_add(1, Ordering::Relaxed);
                true
            }
            Some(limit) => self
                .tool_turns_used
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |used| {
                    (used < limit).then_some(used + 1)
                })
                .is_ok(),
        }
    }

    /// 本次运行已消耗的 ToolLoop 回合数
    pub fn tool_turns_used(&self) -> usize {
        self.tool_turns_used.load(Ordering::Relaxed)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// RunContext 构造器：在构造时校验限额与会话 ID
#[derive(Default)]
pub struct RunContextBuilder {
    run_id: Option<String>,
    session_id: Option<String>,
    limits: RunLimits,
    tools: Option<Arc<ToolExecutor>>,
    sink: Option<Arc<dyn NotificationSink>>,
    artifact_store: Option<Arc<dyn ArtifactStore>>,
    cancel: Option<CancellationToken>,
}

impl RunContextBuilder {
    pub fn run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }

    pub fn session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn limits(mut self, limits: RunLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn max_steps(mut self, max_steps: usize) -> Self {
        self.limits.max_steps = max_steps;
        self
    }

    pub fn max_iteration(mut self, max_iteration: u32) -> Self {
        self.limits.max_iteration = max_iteration;
        self
    }

    pub fn tool_turn_budget(mut self, budget: usize) -> Self {
        self.limits.tool_turn_budget = budget;
        self
    }

    pub fn tools(mut self, tools: Arc<ToolExecutor>) -> Self {
        self.tools = Some(tools);
        self
    }

    pub fn sink(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn artifact_store(mut self, store: Arc<dyn ArtifactStore>) -> Self {
        self.artifact_store = Some(store);
        self
    }

    pub fn cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn build(self) -> Result<RunContext, ContextError> {
        self.limits.validate()?;
        if let Some(id) = &self.session_id {
            if !crate::session::is_valid_session_id(id) {
                return Err(ContextError::InvalidSessionId(id.clone()));
            }
        }

        let run_id = self
            .run_id
            .unwrap_or_else(|| uuid::Uuid::new_v4().simple().to_string()[..8].to_string());
        let sink = self.sink.unwrap_or_else(|| Arc::new(NoopSink));
        let store = self
            .artifact_store
            .unwrap_or_else(|| Arc::new(MemoryArtifactStore::new()));
        let tools = self
            .tools
            .unwrap_or_else(|| Arc::new(ToolExecutor::new(ToolRegistry::new(), 30)));

        Ok(RunContext {
            notifier: Notifier::new(run_id.clone(), sink),
            artifacts: RunArtifacts::new(store, &run_id),
            run_id,
            session_id: self.session_id,
            limits: self.limits,
            tools,
            cancel: self.cancel.unwrap_or_default(),
            tool_turns_used: Arc::new(AtomicUsize::new(0)),
        })
    }
}
