//! 模型传输抽象
//!
//! 对 Step 核心而言模型是黑盒：给定请求（消息 + 工具定义），返回一条
//! assistant 消息——要么是最终回复，要么携带若干带 call id 的工具调用。

use async_trait::async_trait;

use crate::core::AgentError;
use crate::memory::Message;
use crate::tools::ToolSpec;

/// 一次（或累计的）token 统计
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

impl TokenUsage {
    pub fn add(&mut self, other: &TokenUsage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
    }
}

/// 发给模型的请求：当前消息序列与可用工具定义
#[derive(Clone, Debug)]
pub struct ChatRequest {
    pub messages: Vec<Message>,
    pub tools: Vec<ToolSpec>,
}

/// 模型的一轮应答：assistant 消息（最终回复或工具调用）与本次 token 消耗
#[derive(Clone, Debug)]
pub struct ModelTurn {
    pub message: Message,
    pub usage: TokenUsage,
}

/// 模型客户端 trait
#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn complete(&self, request: &ChatRequest) -> Result<ModelTurn, AgentError>;

    /// 累计 token 统计；默认零，具体实现可覆盖
    fn token_usage(&self) -> TokenUsage {
        TokenUsage::default()
    }
}
