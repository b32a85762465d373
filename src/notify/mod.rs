//! 进度通知：单向、只写、发后即忘
//!
//! NotificationSink 不返回错误、不阻塞；接收端不可用时静默丢弃。
//! 序号与状态轨迹由每次运行独立持有的 Notifier 维护，不存在进程级共享计数。

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tokio::sync::mpsc;

/// 运行过程事件（可序列化为 JSON 供前端展示）
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    /// 图执行进入某个节点
    StepStarted { node: String, step: usize, max_steps: usize },
    /// 节点轨迹，如 "collect -> draft -> reflect..."
    Status { trail: String },
    /// ReAct 回合更新
    TurnUpdate { turn: usize, budget: usize },
    /// 正在调用模型
    Thinking,
    /// 调用工具
    ToolCall { tool: String, args: serde_json::Value },
    /// 工具返回（预览）
    Observation { tool: String, preview: String },
    /// 工具执行失败（已转为工具结果回合）
    ToolFailure { tool: String, reason: String },
    /// 反思结果
    Reflection { notes: Vec<String>, queries: Vec<String> },
    /// 结构化输出重试耗尽，以空结果继续
    Degraded { detail: String },
    /// 节点产出的文本（草稿、计划等）
    Message { text: String },
    /// 预算耗尽或取消，结果不完整
    Incomplete { reason: String },
    /// 致命错误
    Error { text: String },
}

/// 带运行 ID 与序号的通知
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub run_id: String,
    pub index: usize,
    pub event: ProgressEvent,
}

/// 通知出口（外部协作方）
pub trait NotificationSink: Send + Sync {
    fn send(&self, notification: Notification);
}

/// 丢弃所有通知
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl NotificationSink for NoopSink {
    fn send(&self, _notification: Notification) {}
}

/// 推送到无界通道；接收端关闭后静默丢弃
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<Notification>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl NotificationSink for ChannelSink {
    fn send(&self, notification: Notification) {
        let _ = self.tx.send(notification);
    }
}

/// 写入 tracing 日志
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl NotificationSink for TracingSink {
    fn send(&self, notification: Notification) {
        let event = serde_json::to_string(&notification.event).unwrap_or_default();
        tracing::info!(run_id = %notification.run_id, index = notification.index, %event, "progress");
    }
}

/// 每次运行独立的通知器：序号、状态轨迹
#[derive(Clone)]
pub struct Notifier {
    run_id: String,
    sink: Arc<dyn NotificationSink>,
    index: Arc<AtomicUsize>,
    trail: Arc<Mutex<Vec<String>>>,
}

impl Notifier {
    pub fn new(run_id: impl Into<String>, sink: Arc<dyn NotificationSink>) -> Self {
        Self {
            run_id: run_id.into(),
            sink,
            index: Arc::new(AtomicUsize::new(0)),
            trail: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn silent(run_id: impl Into<String>) -> Self {
        Self::new(run_id, Arc::new(NoopSink))
    }

    pub fn emit(&self, event: ProgressEvent) {
        let index = self.index.fetch_add(1, Ordering::Relaxed);
        self.sink.send(Notification {
            run_id: self.run_id.clone(),
            index,
            event,
        });
    }

    /// 记录节点到状态轨迹并推送 Status
    pub fn status(&self, node: &str) {
        let trail = match self.trail.lock() {
            Ok(mut trail) => {
                trail.push(node.to_string());
                trail.join(" -> ")
            }
            Err(_) => return,
        };
        self.emit(ProgressEvent::Status {
            trail: format!("{}...", trail),
        });
    }

    /// 运行结束时推送完整轨迹
    pub fn finish(&self) {
        let trail = self.trail.lock().map(|t| t.join(" -> ")).unwrap_or_default();
        self.emit(ProgressEvent::Status { trail });
    }

    /// 已发送的通知数
    pub fn sent(&self) -> usize {
        self.index.load(Ordering::Relaxed)
    }

    pub fn trail(&self) -> Vec<String> {
        self.trail.lock().map(|t| t.clone()).unwrap_or_default()
    }
}

/// 截断预览文本（按字符）
pub fn preview(text: &str, max_chars: usize) -> String {
    let head: String = text.chars().take(max_chars).collect();
    if text.chars().count() > max_chars {
        format!("{}...", head)
    } else {
        head
    }
}
