//! Hive - Rust 智能体编排内核
//!
//! 模块划分：
//! - **agents**: 现成的 Agent 图（对话 Agent、数据报告 Agent）
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 执行状态、运行上下文、产物文档、有界重试、运行级错误
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / Mock）
//! - **memory**: 对话消息与工具调用
//! - **notify**: 进度通知
//! - **react**: ReAct 工具循环
//! - **reflection**: 结构化反思与有界重写循环
//! - **session**: 会话检查点存储（内存 / 文件 / SQLite）
//! - **tools**: 工具 trait、注册表、执行器与结果解码
//! - **workflow**: 图的声明、校验与执行

pub mod agents;
pub mod config;
pub mod core;
pub mod llm;
pub mod memory;
pub mod notify;
pub mod observability;
pub mod react;
pub mod reflection;
pub mod session;
pub mod tools;
pub mod workflow;
