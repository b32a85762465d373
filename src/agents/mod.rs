//! 现成的 Agent 图：对话 Agent 与数据报告 Agent

pub mod chat;
pub mod report;

pub use chat::{build_chat_agent, extract_plan, ChatAgentOptions};
pub use report::{DataSource, ReportAgent};
