//! Step 执行结果
//!
//! 一次 Step.run 恰好产出一个不可变的 StepResult；编排器据其 status 与
//! step_jump 决定下一步动作。

use std::fmt;

use crate::llm::TokenUsage;
use crate::memory::{HistoryMessage, Message};
use crate::step::StepJump;

/// 终止状态，互斥且必居其一
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StepStatus {
    /// 模型给出最终回复
    Completed,
    /// 用户取消（正常终止，非错误）
    Cancelled,
    /// 请求构建 / 模型调用 / 未注册工具等失败，描述在 response 中
    Error,
    /// 未产出最终回复即达到迭代上限（正常终止，仍会咨询 step_jump）
    MaxIterations,
    /// 本次运行中登记了 call 并主动让出控制权
    CallPending,
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StepStatus::Completed => "completed",
            StepStatus::Cancelled => "cancelled",
            StepStatus::Error => "error",
            StepStatus::MaxIterations => "max_iterations",
            StepStatus::CallPending => "call_pending",
        };
        f.write_str(s)
    }
}

/// 一次 Step.run 的结果快照
pub struct StepResult {
    /// 产出该结果的步骤名
    pub step_name: String,
    /// 最终回复文本；error 时为失败描述，call_pending 时为让出说明
    pub response: String,
    /// 应追加到持久化聊天历史的消息
    pub history_messages: Vec<HistoryMessage>,
    /// 本次调用内实际与模型交换的原始消息（不跨 resume 累计）
    pub api_messages: Vec<Message>,
    /// 本次调用累计的 token 用量
    pub token_usage: TokenUsage,
    pub status: StepStatus,
    /// 供编排器咨询下一步的跳转策略
    pub step_jump: StepJump,
}

#[cfg(test)]
impl StepResult {
    /// 测试辅助：构造一个 completed 结果
    pub fn test_completed(step_name: &str, response: &str) -> Self {
        Self {
            step_name: step_name.to_string(),
            response: response.to_string(),
            history_messages: Vec::new(),
            api_messages: Vec::new(),
            token_usage: TokenUsage::default(),
            status: StepStatus::Completed,
            step_jump: StepJump::Terminal,
        }
    }
}
