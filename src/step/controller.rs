//! 步骤跳转控制器
//!
//! 进程内唯一的跳转协调者：持有 valid_destinations 邻接表与 call 的
//! 三态机（idle -> call_pending -> return_pending -> idle）。jump 不进入
//! 该状态机，只是一个无保存的一次性目标槽。调用方消息的保存/恢复按
//! 步骤名暂存于此，控制器本身绝不触碰任何正在运行的 Step 的消息缓冲。

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::core::AgentError;
use crate::memory::Message;
use crate::step::StepResult;

/// 已转换为待返回的 call：Dynamic StepJump 消费后恢复 return_step
#[derive(Clone, Debug)]
pub struct PendingReturn {
    pub return_step: String,
    pub summary: String,
}

#[derive(Debug)]
enum CallPhase {
    Idle,
    CallPending {
        target_step: String,
        return_step: String,
    },
    ReturnPending {
        return_step: String,
        summary: String,
    },
}

/// 跳转/调用协调状态；通过 StepJumpHandle 共享
pub struct StepJumpController {
    valid_destinations: HashMap<String, Vec<String>>,
    phase: CallPhase,
    jump_target: Option<String>,
    saved_messages: HashMap<String, Vec<Message>>,
}

impl StepJumpController {
    pub fn new(valid_destinations: HashMap<String, Vec<String>>) -> Self {
        Self {
            valid_destinations,
            phase: CallPhase::Idle,
            jump_target: None,
            saved_messages: HashMap::new(),
        }
    }

    /// 清空所有挂起状态（每次 agent run 开始时调用）
    pub fn clear(&mut self) {
        self.phase = CallPhase::Idle;
        self.jump_target = None;
        self.saved_messages.clear();
    }

    /// 登记一次 call：同一时刻至多一个挂起的 call，先于目标合法性检查
    pub fn register_call(
        &mut self,
        from_step: &str,
        to_step: &str,
        saved_messages: Vec<Message>,
    ) -> Result<(), AgentError> {
        if !matches!(self.phase, CallPhase::Idle) {
            return Err(AgentError::InvalidTransition(
                "a call is already pending".to_string(),
            ));
        }
        self.validate_destination(from_step, to_step)?;
        self.phase = CallPhase::CallPending {
            target_step: to_step.to_string(),
            return_step: from_step.to_string(),
        };
        self.saved_messages
            .insert(from_step.to_string(), saved_messages);
        Ok(())
    }

    /// 登记一次 jump：与 call 相同的邻接校验，但无保存、无返回
    pub fn register_jump(&mut self, from_step: &str, to_step: &str) -> Result<(), AgentError> {
        self.validate_destination(from_step, to_step)?;
        self.jump_target = Some(to_step.to_string());
        Ok(())
    }

    /// 取出并清空 jump 目标
    pub fn take_jump_target(&mut self) -> Option<String> {
        self.jump_target.take()
    }

    /// 当前挂起 call 的目标步骤
    pub fn pending_call_target(&self) -> Option<String> {
        match &self.phase {
            CallPhase::CallPending { target_step, .. } => Some(target_step.clone()),
            _ => None,
        }
    }

    /// 指定步骤是否正是挂起 call 的目标
    pub fn is_call_target(&self, step: &str) -> bool {
        matches!(&self.phase, CallPhase::CallPending { target_step, .. } if target_step == step)
    }

    /// 被调步骤完成后由编排器调用：call_pending -> return_pending
    pub fn mark_call_target_complete(&mut self, result: &StepResult) {
        if let CallPhase::CallPending {
            target_step,
            return_step,
        } = std::mem::replace(&mut self.phase, CallPhase::Idle)
        {
            let summary = format!(
                "Called step '{}' finished with status {}. Result: {}",
                target_step,
                result.status,
                excerpt(&result.response, 200)
            );
            self.phase = CallPhase::ReturnPending {
                return_step,
                summary,
            };
        }
    }

    /// 消费挂起的返回（一次性）：return_pending -> idle。
    /// 其余相位原样保留，call_pending 不受影响。
    pub fn consume_pending_return(&mut self) -> Option<PendingReturn> {
        if !matches!(self.phase, CallPhase::ReturnPending { .. }) {
            return None;
        }
        match std::mem::replace(&mut self.phase, CallPhase::Idle) {
            CallPhase::ReturnPending {
                return_step,
                summary,
            } => Some(PendingReturn {
                return_step,
                summary,
            }),
            _ => None,
        }
    }

    pub fn has_pending_return(&self) -> bool {
        matches!(self.phase, CallPhase::ReturnPending { .. })
    }

    /// 取走某步骤暂存的消息（恢复时使用）
    pub fn take_saved(&mut self, step: &str) -> Option<Vec<Message>> {
        self.saved_messages.remove(step)
    }

    /// 向某步骤的暂存消息追加一条（合成的继续性提示）
    pub fn append_saved(&mut self, step: &str, message: Message) {
        match self.saved_messages.get_mut(step) {
            Some(saved) => saved.push(message),
            None => tracing::warn!(step, "no saved messages to append to"),
        }
    }

    pub fn has_saved(&self, step: &str) -> bool {
        self.saved_messages.contains_key(step)
    }

    /// 某步骤允许的目标列表（无配置即不可跳转）
    pub fn valid_destinations_for(&self, step: &str) -> Vec<String> {
        self.valid_destinations.get(step).cloned().unwrap_or_default()
    }

    fn validate_destination(&self, from_step: &str, to_step: &str) -> Result<(), AgentError> {
        match self.valid_destinations.get(from_step) {
            None => Err(AgentError::InvalidTransition(format!(
                "step '{from_step}' cannot jump to other steps"
            ))),
            Some(targets) if !targets.iter().any(|t| t == to_step) => {
                Err(AgentError::InvalidTransition(format!(
                    "cannot go from '{from_step}' to '{to_step}', valid: {targets:?}"
                )))
            }
            Some(_) => Ok(()),
        }
    }
}

fn excerpt(text: &str, max_chars: usize) -> String {
    if text.chars().count() > max_chars {
        format!("{}...", text.chars().take(max_chars).collect::<String>())
    } else {
        text.to_string()
    }
}

/// 共享句柄：内部短临界区，绝不跨 await 持锁
#[derive(Clone)]
pub struct StepJumpHandle {
    inner: Arc<Mutex<StepJumpController>>,
}

impl StepJumpHandle {
    pub fn new(controller: StepJumpController) -> Self {
        Self {
            inner: Arc::new(Mutex::new(controller)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, StepJumpController> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn register_call(
        &self,
        from_step: &str,
        to_step: &str,
        saved_messages: Vec<Message>,
    ) -> Result<(), AgentError> {
        self.lock().register_call(from_step, to_step, saved_messages)
    }

    pub fn register_jump(&self, from_step: &str, to_step: &str) -> Result<(), AgentError> {
        self.lock().register_jump(from_step, to_step)
    }

    pub fn take_jump_target(&self) -> Option<String> {
        self.lock().take_jump_target()
    }

    pub fn pending_call_target(&self) -> Option<String> {
        self.lock().pending_call_target()
    }

    pub fn is_call_target(&self, step: &str) -> bool {
        self.lock().is_call_target(step)
    }

    pub fn mark_call_target_complete(&self, result: &StepResult) {
        self.lock().mark_call_target_complete(result)
    }

    pub fn consume_pending_return(&self) -> Option<PendingReturn> {
        self.lock().consume_pending_return()
    }

    pub fn has_pending_return(&self) -> bool {
        self.lock().has_pending_return()
    }

    pub fn take_saved(&self, step: &str) -> Option<Vec<Message>> {
        self.lock().take_saved(step)
    }

    pub fn append_saved(&self, step: &str, message: Message) {
        self.lock().append_saved(step, message)
    }

    pub fn has_saved(&self, step: &str) -> bool {
        self.lock().has_saved(step)
    }

    pub fn valid_destinations_for(&self, step: &str) -> Vec<String> {
        self.lock().valid_destinations_for(step)
    }
}
