//! 智能体编排器
//!
//! 按名字注册 Step，从入口步骤开始顺序驱动：每个 StepResult 的 step_jump
//! 决定下一步；error 停止并透出描述（不咨询跳转），cancelled 静默停止；
//! call 目标完成后先把 pending-call 转为 pending-return 再咨询跳转。
//! 恢复由控制器暂存判定：下一步存在暂存消息即以 resume 方式运行。

use std::collections::HashMap;

use tokio_util::sync::CancellationToken;

use crate::core::AgentError;
use crate::llm::TokenUsage;
use crate::memory::ChatHistoryManager;
use crate::step::{Step, StepJumpHandle, StepStatus};

/// 步骤间转移次数上限，防止跳转成环时死循环
const DEFAULT_MAX_TRANSITIONS: usize = 32;

/// 一次 agent run 的最终结果
#[derive(Clone, Debug)]
pub struct AgentRunOutcome {
    pub response: String,
    pub status: StepStatus,
    pub token_usage: TokenUsage,
}

/// 智能体：步骤注册表 + 入口步骤 + 持久化历史 + 共享跳转控制器
pub struct Agent {
    steps: HashMap<String, Step>,
    entry_step: String,
    history: ChatHistoryManager,
    controller: StepJumpHandle,
    cancel: CancellationToken,
    max_transitions: usize,
    last_token_usage: TokenUsage,
    conversation_counter: u64,
}

impl Agent {
    pub fn new(entry_step: impl Into<String>, controller: StepJumpHandle) -> Self {
        Self {
            steps: HashMap::new(),
            entry_step: entry_step.into(),
            history: ChatHistoryManager::new(None),
            controller,
            cancel: CancellationToken::new(),
            max_transitions: DEFAULT_MAX_TRANSITIONS,
            last_token_usage: TokenUsage::default(),
            conversation_counter: 0,
        }
    }

    pub fn with_max_transitions(mut self, max_transitions: usize) -> Self {
        self.max_transitions = max_transitions.max(1);
        self
    }

    pub fn register_step(&mut self, step: Step) {
        self.steps.insert(step.name().to_string(), step);
    }

    /// 请求取消当前处理；在迭代边界生效
    pub fn request_cancellation(&self) {
        self.cancel.cancel();
    }

    /// 为新一轮请求重置取消标记
    pub fn reset_cancellation(&mut self) {
        self.cancel = CancellationToken::new();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn history(&self) -> &ChatHistoryManager {
        &self.history
    }

    pub fn last_token_usage(&self) -> TokenUsage {
        self.last_token_usage
    }

    /// 处理一条用户输入：从入口步骤驱动到终止
    pub async fn run(&mut self, user_input: &str) -> Result<AgentRunOutcome, AgentError> {
        if self.steps.is_empty() {
            return Err(AgentError::Config("no steps registered".to_string()));
        }
        if !self.steps.contains_key(&self.entry_step) {
            return Err(AgentError::UnknownStep(self.entry_step.clone()));
        }

        self.controller.clear();
        let conversation_id = self.next_conversation_id();
        self.history.set_conversation_id(&conversation_id);
        tracing::info!(conversation = %conversation_id, entry = %self.entry_step, "agent run start");

        let cancel = self.cancel.clone();
        let mut usage = TokenUsage::default();
        let mut current = self.entry_step.clone();
        let mut input = Some(user_input.to_string());
        let mut response = String::new();
        let mut status = StepStatus::Completed;

        for transition in 0..self.max_transitions {
            // 自调用时被调方与调用方共用同一暂存键：call 仍挂起说明本次
            // 是被调的新运行，不是恢复
            let resume =
                self.controller.has_saved(&current) && !self.controller.is_call_target(&current);
            let history_snapshot = self.history.to_messages();
            if let Some(text) = input.as_deref() {
                self.history.add_user_message(text);
            }

            let step = self
                .steps
                .get(&current)
                .ok_or_else(|| AgentError::UnknownStep(current.clone()))?;
            tracing::info!(step = %current, transition, resume, "executing step");
            let result = step
                .run(&history_snapshot, input.as_deref(), resume, &cancel)
                .await;
            input = None;

            usage.add(&result.token_usage);
            self.history.append(result.history_messages.clone());
            response = result.response.clone();
            status = result.status;

            match result.status {
                StepStatus::Error => {
                    tracing::error!(step = %current, "step failed: {}", result.response);
                    break;
                }
                StepStatus::Cancelled => break,
                _ => {}
            }

            // call_pending 的结果是调用方刚刚挂起，不是被调方完成
            if self.controller.is_call_target(&current) && result.status != StepStatus::CallPending
            {
                self.controller.mark_call_target_complete(&result);
            }

            match result.step_jump.get_next_step(&result) {
                Some(next) => {
                    if transition + 1 == self.max_transitions {
                        tracing::warn!(
                            discarded = %next,
                            max_transitions = self.max_transitions,
                            "step transition limit reached, stopping"
                        );
                        break;
                    }
                    current = next;
                }
                None => break,
            }
        }

        self.last_token_usage = usage;
        tracing::info!(status = %status, "agent run finished");
        Ok(AgentRunOutcome {
            response,
            status,
            token_usage: usage,
        })
    }

    fn next_conversation_id(&mut self) -> String {
        self.conversation_counter += 1;
        let timestamp = chrono::Utc::now().format("%Y%m%d_%H%M%S");
        format!("conv_{}_{:03}", timestamp, self.conversation_counter)
    }
}
