//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `SHAPEFLOW__*` 覆盖
//! （双下划线表示嵌套，如 `SHAPEFLOW__LLM__MODEL=gpt-4o`）。

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::core::AgentError;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub agent: AgentSection,
}

/// [app] 段
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppSection {
    pub name: Option<String>,
    /// 持久化历史保留条数上限，未设置时不限
    pub history_max_messages: Option<usize>,
}

/// [llm] 段：后端与超时
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    pub provider: String,
    pub model: String,
    pub base_url: Option<String>,
    pub timeouts: LlmTimeoutsSection,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "gpt-4o".to_string(),
            base_url: None,
            timeouts: LlmTimeoutsSection::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmTimeoutsSection {
    pub request: u64,
}

impl Default for LlmTimeoutsSection {
    fn default() -> Self {
        Self { request: 60 }
    }
}

/// [agent] 段：入口步骤、迭代/转移上限与跳转邻接表
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentSection {
    pub entry_step: String,
    /// 单个步骤内工具调用循环的迭代上限
    pub max_iterations: usize,
    /// 步骤间转移次数上限
    pub max_transitions: usize,
    pub tool_timeout_secs: u64,
    /// 步骤名 -> 允许的 jump/call 目标
    pub destinations: HashMap<String, Vec<String>>,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            entry_step: "main".to_string(),
            max_iterations: 50,
            max_transitions: 32,
            tool_timeout_secs: 30,
            destinations: HashMap::new(),
        }
    }
}

/// 加载配置；path 为 None 时尝试 config/default.toml（不存在则仅用默认值 + 环境变量）
pub fn load_config(path: Option<&Path>) -> Result<AppConfig, AgentError> {
    let path = path
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config/default.toml"));

    let mut builder = config::Config::builder();
    if path.exists() {
        builder = builder.add_source(config::File::from(path));
    }
    builder = builder.add_source(
        config::Environment::with_prefix("SHAPEFLOW")
            .separator("__")
            .try_parsing(true),
    );

    builder
        .build()
        .and_then(config::Config::try_deserialize)
        .map_err(|e| AgentError::Config(e.to_string()))
}
