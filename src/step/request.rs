//! 请求构建
//!
//! RequestBuilder 把当前消息序列组装成一次模型请求；工具定义由 Step 在
//! 构建之后统一附加。构建失败沿 Result 传播，在 Step 边界转为 error 状态。

use crate::core::AgentError;
use crate::llm::ChatRequest;
use crate::memory::Message;

/// 请求构建能力；每个 Step 各持一份
pub trait RequestBuilder: Send + Sync {
    fn build(&self, messages: &[Message]) -> Result<ChatRequest, AgentError>;
}

/// 基于固定系统提示词的构建器：系统提示 + 可选说明段落 + 当前消息
pub struct InstructionRequestBuilder {
    system_prompt: String,
    instruction_blocks: Vec<String>,
}

impl InstructionRequestBuilder {
    pub fn new(system_prompt: impl Into<String>) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            instruction_blocks: Vec::new(),
        }
    }

    /// 追加一个说明段落（如跳转工具的使用说明）；空段落忽略
    pub fn with_instruction_block(mut self, block: impl Into<String>) -> Self {
        let block = block.into();
        if !block.is_empty() {
            self.instruction_blocks.push(block);
        }
        self
    }
}

impl RequestBuilder for InstructionRequestBuilder {
    fn build(&self, messages: &[Message]) -> Result<ChatRequest, AgentError> {
        if self.system_prompt.trim().is_empty() {
            return Err(AgentError::RequestBuild(
                "system prompt is empty".to_string(),
            ));
        }
        let mut system = self.system_prompt.clone();
        for block in &self.instruction_blocks {
            system.push_str("\n\n");
            system.push_str(block);
        }
        let mut out = Vec::with_capacity(messages.len() + 1);
        out.push(Message::system(system));
        out.extend(messages.iter().cloned());
        Ok(ChatRequest {
            messages: out,
            tools: Vec::new(),
        })
    }
}
