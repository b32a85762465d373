//! 记忆层：对话消息与工具调用类型（执行状态中的消息历史）

pub mod conversation;

pub use conversation::{Message, Role, ToolCall};
