//! Shapeflow - CAD 智能体步进执行核心
//!
//! 驱动多步骤工具调用工作流的状态机：每个 Step 对一个任务跑有界的
//! 请求 -> 工具调用 -> 结果写回循环，步骤之间支持两种控制转移原语
//! （单向 jump 与带返回的 call），并跨转移正确保持会话上下文。
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误类型与编排器
//! - **llm**: 模型传输抽象与实现（OpenAI 兼容 / Mock）
//! - **memory**: 对话消息与持久化聊天历史
//! - **observability**: tracing 初始化
//! - **step**: Step 运行时、StepResult、跳转策略 / 控制器 / 工具
//! - **tools**: Tool trait、注册表与执行器

pub mod config;
pub mod core;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod step;
pub mod tools;

pub use core::{Agent, AgentError, AgentRunOutcome};
pub use step::{
    Step, StepJump, StepJumpController, StepJumpHandle, StepResult, StepStatus, UserInputQueue,
};
