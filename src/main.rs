//! Hive 演示入口
//!
//! 用法：`hive [--session <id>] [--plan] <message...>`
//! 按配置创建 LLM 与会话存储，运行一轮对话 Agent 并打印回答；同一会话 ID 的多次调用会接着上一轮的历史。

use std::sync::Arc;

use anyhow::{bail, Context};
use hive::agents::{build_chat_agent, ChatAgentOptions};
use hive::config::{load_config, AppConfig};
use hive::core::{FileArtifactStore, RunContext};
use hive::llm::{LlmClient, MockLlmClient, OpenAiClient};
use hive::memory::Message;
use hive::notify::TracingSink;
use hive::session::create_session_store;
use hive::tools::{CurrentTimeTool, ToolExecutor, ToolRegistry};
use hive::workflow::GraphExecutor;

struct Args {
    session: Option<String>,
    plan: bool,
    message: String,
}

fn parse_args() -> anyhow::Result<Args> {
    let mut session = None;
    let mut plan = false;
    let mut words = Vec::new();
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--session" => session = Some(args.next().context("--session needs a value")?),
            "--plan" => plan = true,
            _ => words.push(arg),
        }
    }
    if words.is_empty() {
        bail!("usage: hive [--session <id>] [--plan] <message...>");
    }
    Ok(Args {
        session,
        plan,
        message: words.join(" "),
    })
}

fn create_llm(cfg: &AppConfig) -> anyhow::Result<Arc<dyn LlmClient>> {
    match cfg.llm.provider.as_str() {
        "mock" => Ok(Arc::new(MockLlmClient)),
        "openai" => {
            let api_key = std::env::var(&cfg.llm.api_key_env)
                .with_context(|| format!("{} is not set", cfg.llm.api_key_env))?;
            Ok(Arc::new(OpenAiClient::new(
                cfg.llm.base_url.as_deref(),
                &cfg.llm.model,
                Some(&api_key),
                cfg.llm.request_timeout_secs,
            )))
        }
        other => bail!("unknown llm provider: {}", other),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    hive::observability::init();

    let args = parse_args()?;
    let cfg = load_config(None).context("Failed to load config")?;
    let llm = create_llm(&cfg)?;

    let mut registry = ToolRegistry::new();
    registry.register(CurrentTimeTool);
    let tools = Arc::new(ToolExecutor::new(registry, cfg.limits.tool_timeout_secs));

    let graph = build_chat_agent(
        llm,
        ChatAgentOptions {
            plan: args.plan,
            ..ChatAgentOptions::default()
        },
    )
    .context("Failed to build chat agent")?;
    let executor = GraphExecutor::new(graph).with_sessions(create_session_store(&cfg.session).await);

    let mut builder = RunContext::builder()
        .limits(cfg.limits.to_run_limits())
        .tools(tools)
        .sink(Arc::new(TracingSink))
        .artifact_store(Arc::new(FileArtifactStore::new(&cfg.app.artifacts_dir)));
    if let Some(session) = &args.session {
        builder = builder.session_id(session.clone());
    }
    let ctx = builder.build().context("Invalid run context")?;

    let outcome = executor
        .run_turn(vec![Message::user(args.message)], &ctx)
        .await
        .context("Run failed")?;

    println!("{}", outcome.answer());
    if outcome.is_incomplete() {
        eprintln!("(incomplete: the run stopped before finishing)");
    }
    Ok(())
}
