//! Agent 错误类型
//!
//! 覆盖请求构建、模型调用、工具执行与步骤跳转校验。达到迭代上限与用户取消
//! 属于正常终止，经 StepStatus 表达，不在此处作为错误抛出；InvalidTransition
//! 在工具调用路径上以软失败（tool result 字符串）返回给模型，循环继续。

use thiserror::Error;

/// Step 核心运行过程中可能出现的错误
#[derive(Error, Debug, Clone)]
pub enum AgentError {
    #[error("Request build failed: {0}")]
    RequestBuild(String),

    #[error("LLM error: {0}")]
    LlmError(String),

    #[error("JSON parse error: {0}")]
    JsonParse(String),

    #[error("Tool execution failed: {0}")]
    ToolExecutionFailed(String),

    #[error("Tool timeout: {0}")]
    ToolTimeout(String),

    /// 模型调用了未注册的工具名
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    /// jump/call 目标不在 valid_destinations 中，或已有 call 挂起
    #[error("Invalid step transition: {0}")]
    InvalidTransition(String),

    #[error("Unknown step: {0}")]
    UnknownStep(String),

    #[error("Config error: {0}")]
    Config(String),
}
