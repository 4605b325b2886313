//! StepJump 跳转策略
//!
//! 封闭的变体集合：Fixed（固定目标）、Terminal（停止）、Dynamic（咨询
//! 控制器：待返回 > 挂起 call 目标 > jump 目标 > 回退策略）。
//! get_next_step 只读取控制器状态与结果，绝不触碰任何步骤的消息缓冲
//! （待恢复的暂存副本除外：返回前向其追加一条合成的继续性提示）。

use crate::memory::Message;
use crate::step::{StepJumpHandle, StepResult, StepStatus};

/// 下一步跳转策略
#[derive(Clone)]
pub enum StepJump {
    /// 无条件返回固定目标（对 error/cancelled 同样返回，是否采纳由编排器决定）
    Fixed(String),
    /// 总是停止
    Terminal,
    /// 控制器驱动：处理 call 的去与回，否则回退
    Dynamic {
        controller: StepJumpHandle,
        fallback: Option<Box<StepJump>>,
    },
}

impl StepJump {
    pub fn fixed(target: impl Into<String>) -> Self {
        StepJump::Fixed(target.into())
    }

    pub fn dynamic(controller: StepJumpHandle, fallback: Option<StepJump>) -> Self {
        StepJump::Dynamic {
            controller,
            fallback: fallback.map(Box::new),
        }
    }

    /// 返回下一步的步骤名，None 表示停止
    pub fn get_next_step(&self, result: &StepResult) -> Option<String> {
        match self {
            StepJump::Fixed(target) => Some(target.clone()),
            StepJump::Terminal => None,
            StepJump::Dynamic {
                controller,
                fallback,
            } => {
                // 待返回优先：消费并恢复调用方，恢复前补一条合成提示
                if let Some(pending) = controller.consume_pending_return() {
                    controller
                        .append_saved(&pending.return_step, Message::user(pending.summary.clone()));
                    return Some(pending.return_step);
                }
                // 本次运行登记了 call：去往目标（挂起状态保留，待目标完成后转为待返回）
                if result.status == StepStatus::CallPending {
                    if let Some(target) = controller.pending_call_target() {
                        return Some(target);
                    }
                }
                // 本次运行登记了 jump：一次性目标
                if let Some(target) = controller.take_jump_target() {
                    return Some(target);
                }
                match fallback {
                    Some(f) => f.get_next_step(result),
                    None => None,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::step::StepJumpController;
    use std::collections::HashMap;

    fn handle() -> StepJumpHandle {
        let mut destinations = HashMap::new();
        destinations.insert("main".to_string(), vec!["lint".to_string()]);
        StepJumpHandle::new(StepJumpController::new(destinations))
    }

    #[test]
    fn test_fixed_ignores_status() {
        let jump = StepJump::fixed("lint");
        let result = StepResult::test_completed("main", "done");
        assert_eq!(jump.get_next_step(&result).as_deref(), Some("lint"));
    }

    #[test]
    fn test_terminal_stops() {
        let jump = StepJump::Terminal;
        let result = StepResult::test_completed("main", "done");
        assert!(jump.get_next_step(&result).is_none());
    }

    #[test]
    fn test_dynamic_falls_back_when_idle() {
        let jump = StepJump::dynamic(handle(), Some(StepJump::fixed("lint")));
        let result = StepResult::test_completed("main", "done");
        assert_eq!(jump.get_next_step(&result).as_deref(), Some("lint"));
    }

    #[test]
    fn test_dynamic_without_fallback_stops() {
        let jump = StepJump::dynamic(handle(), None);
        let result = StepResult::test_completed("main", "done");
        assert!(jump.get_next_step(&result).is_none());
    }

    #[test]
    fn test_dynamic_routes_pending_call_target() {
        let ctrl = handle();
        ctrl.register_call("main", "lint", vec![Message::user("s0")])
            .unwrap();
        let jump = StepJump::dynamic(ctrl, Some(StepJump::fixed("elsewhere")));
        let mut result = StepResult::test_completed("main", "calling lint");
        result.status = StepStatus::CallPending;
        assert_eq!(jump.get_next_step(&result).as_deref(), Some("lint"));
    }

    #[test]
    fn test_dynamic_consumes_return_and_appends_note() {
        let ctrl = handle();
        ctrl.register_call("main", "lint", vec![Message::user("s0")])
            .unwrap();
        let lint_result = StepResult::test_completed("lint", "all clean");
        ctrl.mark_call_target_complete(&lint_result);

        let jump = StepJump::dynamic(ctrl.clone(), None);
        assert_eq!(
            jump.get_next_step(&lint_result).as_deref(),
            Some("main")
        );

        // 顺序保持：原消息在前，合成提示恰好追加一条在尾部
        let restored = ctrl.take_saved("main").unwrap();
        assert_eq!(restored.len(), 2);
        assert_eq!(restored[0].content, "s0");
        assert!(restored[1].content.contains("all clean"));
    }

    #[test]
    fn test_dynamic_routes_jump_target() {
        let ctrl = handle();
        ctrl.register_jump("main", "lint").unwrap();
        let jump = StepJump::dynamic(ctrl, Some(StepJump::fixed("elsewhere")));
        let result = StepResult::test_completed("main", "handing off");
        assert_eq!(jump.get_next_step(&result).as_deref(), Some("lint"));
        // 一次性：再次咨询走回退
        assert_eq!(jump.get_next_step(&result).as_deref(), Some("elsewhere"));
    }
}
