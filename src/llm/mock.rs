//! Mock 模型客户端（用于测试，无需 API）
//!
//! 按脚本顺序吐出预设的应答轮次：最终回复或工具调用；脚本耗尽后报错，
//! 便于测试断言实际发生的请求次数。

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use crate::core::AgentError;
use crate::llm::{ChatRequest, ModelClient, ModelTurn, TokenUsage};
use crate::memory::{Message, ToolCallRequest};

/// 脚本化 Mock 客户端
#[derive(Default)]
pub struct MockModelClient {
    turns: Mutex<VecDeque<ModelTurn>>,
    requests: Mutex<Vec<ChatRequest>>,
    calls: AtomicUsize,
}

impl MockModelClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加一轮最终回复
    pub fn with_final_turn(self, text: impl Into<String>) -> Self {
        self.push_turn(ModelTurn {
            message: Message::assistant(text),
            usage: TokenUsage {
                prompt_tokens: 10,
                completion_tokens: 5,
                total_tokens: 15,
            },
        });
        self
    }

    /// 追加一轮单个工具调用
    pub fn with_tool_call(self, tool_name: &str, arguments: Value) -> Self {
        let call = ToolCallRequest {
            id: format!("call_{}", Uuid::new_v4().simple()),
            name: tool_name.to_string(),
            arguments,
        };
        self.push_turn(ModelTurn {
            message: Message::assistant_tool_calls("", vec![call]),
            usage: TokenUsage {
                prompt_tokens: 10,
                completion_tokens: 5,
                total_tokens: 15,
            },
        });
        self
    }

    /// 实际发出的请求次数
    pub fn request_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// 实际收到的请求副本（按顺序），供测试断言消息序列
    pub fn recorded_requests(&self) -> Vec<ChatRequest> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn push_turn(&self, turn: ModelTurn) {
        self.turns
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(turn);
    }
}

#[async_trait]
impl ModelClient for MockModelClient {
    async fn complete(&self, request: &ChatRequest) -> Result<ModelTurn, AgentError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(request.clone());
        self.turns
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
            .ok_or_else(|| AgentError::LlmError("mock: no scripted turns left".to_string()))
    }
}
