//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `HIVE__*` 覆盖（双下划线表示嵌套，如 `HIVE__LLM__PROVIDER=openai`）。

use std::path::PathBuf;

use serde::Deserialize;

use crate::core::RunLimits;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub limits: LimitsSection,
    pub llm: LlmSection,
    pub session: SessionSection,
}

/// [app] 段：应用名、产物目录
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppSection {
    pub name: String,
    /// 步骤日志与报告的根目录；其下生成 artifacts/{run_id}_*.md
    pub artifacts_dir: PathBuf,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: "hive".to_string(),
            artifacts_dir: PathBuf::from("."),
        }
    }
}

/// [limits] 段：单次运行的各类上限
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LimitsSection {
    pub max_steps: usize,
    pub max_iteration: u32,
    pub tool_turn_budget: usize,
    /// 运行内所有 ToolLoop 共享的回合池；不设置表示不限
    pub run_tool_turns: Option<usize>,
    /// 单次工具调用超时（秒）
    pub tool_timeout_secs: u64,
    pub critique_attempts: usize,
}

impl Default for LimitsSection {
    fn default() -> Self {
        let limits = RunLimits::default();
        Self {
            max_steps: limits.max_steps,
            max_iteration: limits.max_iteration,
            tool_turn_budget: limits.tool_turn_budget,
            run_tool_turns: limits.run_tool_turns,
            tool_timeout_secs: 30,
            critique_attempts: limits.critique_attempts,
        }
    }
}

impl LimitsSection {
    pub fn to_run_limits(&self) -> RunLimits {
        RunLimits {
            max_steps: self.max_steps,
            max_iteration: self.max_iteration,
            tool_turn_budget: self.tool_turn_budget,
            run_tool_turns: self.run_tool_turns,
            critique_attempts: self.critique_attempts,
        }
    }
}

/// [llm] 段：后端选择与超时
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    /// 后端：mock / openai
    pub provider: String,
    pub model: String,
    pub base_url: Option<String>,
    /// 保存 API Key 的环境变量名
    pub api_key_env: String,
    /// 单次请求超时（秒）
    pub request_timeout_secs: u64,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: "mock".to_string(),
            model: "gpt-4o-mini".to_string(),
            base_url: None,
            api_key_env: "OPENAI_API_KEY".to_string(),
            request_timeout_secs: 60,
        }
    }
}

/// [session] 段：会话检查点后端
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionSection {
    /// memory / file / sqlite（后者需启用 async-sqlite feature）
    pub backend: String,
    /// file 后端为目录，sqlite 后端为数据库文件
    pub path: String,
    /// 内存会话空闲淘汰时间（秒）
    pub idle_ttl_secs: u64,
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            backend: "memory".to_string(),
            path: "sessions".to_string(),
            idle_ttl_secs: 3600,
        }
    }
}

/// 从默认路径 config/default.toml 与可选路径加载配置，再合并环境变量
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("HIVE")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
