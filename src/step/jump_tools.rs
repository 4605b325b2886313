//! 步骤跳转工具
//!
//! 面向模型暴露的两个保留工具：jump_to_step（单向移交）与 call_step
//! （调用并返回）。工具定义把允许的目标烘焙进参数 enum；目标不合法时以
//! {"success": false, ...} 的工具结果软失败返回，模型可在同一循环内纠正。

use serde_json::{json, Value};

use crate::memory::Message;
use crate::step::StepJumpHandle;
use crate::tools::ToolSpec;

/// jump_to_step 保留工具名
pub const JUMP_TOOL_NAME: &str = "jump_to_step";
/// call_step 保留工具名
pub const CALL_TOOL_NAME: &str = "call_step";

/// 绑定到某个步骤的跳转工具适配器
pub struct StepJumpTools {
    controller: StepJumpHandle,
    current_step: String,
}

impl StepJumpTools {
    pub fn new(controller: StepJumpHandle, current_step: impl Into<String>) -> Self {
        Self {
            controller,
            current_step: current_step.into(),
        }
    }

    /// 该工具名是否由本适配器处理
    pub fn handles(&self, tool_name: &str) -> bool {
        tool_name == JUMP_TOOL_NAME || tool_name == CALL_TOOL_NAME
    }

    /// 工具定义；当前步骤无允许目标时为空（模型看不到这两个工具）
    pub fn definitions(&self) -> Vec<ToolSpec> {
        let destinations = self.controller.valid_destinations_for(&self.current_step);
        if destinations.is_empty() {
            return Vec::new();
        }
        let step_name_schema = json!({
            "type": "object",
            "properties": {
                "step_name": {
                    "type": "string",
                    "description": "Name of the destination step",
                    "enum": destinations,
                }
            },
            "required": ["step_name"],
        });
        vec![
            ToolSpec {
                name: JUMP_TOOL_NAME.to_string(),
                description: format!(
                    "Jump to another workflow step. Execution will NOT return to the current step. \
                     Valid destinations: {destinations:?}"
                ),
                parameters: step_name_schema.clone(),
            },
            ToolSpec {
                name: CALL_TOOL_NAME.to_string(),
                description: format!(
                    "Call another workflow step. After it completes, execution returns to the \
                     current step. Valid destinations: {destinations:?}"
                ),
                parameters: step_name_schema,
            },
        ]
    }

    /// 系统提示词中的使用说明段落；无允许目标时为空
    pub fn instructions(&self) -> String {
        let destinations = self.controller.valid_destinations_for(&self.current_step);
        if destinations.is_empty() {
            return String::new();
        }
        format!(
            "### Step Flow Control Tools\n\n\
             1. **jump_to_step** - Jump to another step (no return)\n\
             \x20  - Use when you're done and want to hand off to another step\n\
             \x20  - Valid destinations: {destinations:?}\n\n\
             2. **call_step** - Call another step and return\n\
             \x20  - Use when you want another step to run, then continue your work\n\
             \x20  - Valid destinations: {destinations:?}\n"
        )
    }

    /// 登记 jump；无论成败都返回工具结果 JSON（软失败）
    pub fn request_jump(&self, step_name: &str) -> String {
        match self.controller.register_jump(&self.current_step, step_name) {
            Ok(()) => json!({
                "success": true,
                "message": format!("Jump to '{step_name}' requested"),
            })
            .to_string(),
            Err(e) => soft_failure(&e.to_string()),
        }
    }

    /// 登记 call 并暂存调用方消息；Ok 为确认 JSON，Err 为软失败 JSON
    pub fn request_call(
        &self,
        step_name: &str,
        saved_messages: Vec<Message>,
    ) -> Result<String, String> {
        match self
            .controller
            .register_call(&self.current_step, step_name, saved_messages)
        {
            Ok(()) => Ok(json!({
                "success": true,
                "message": format!(
                    "Call to '{step_name}' requested (will return to '{}')",
                    self.current_step
                ),
            })
            .to_string()),
            Err(e) => Err(soft_failure(&e.to_string())),
        }
    }

    /// call 成功时写入工具结果与暂存副本的确认文本（两处必须一致）
    pub fn call_ack(&self, step_name: &str) -> String {
        json!({
            "success": true,
            "message": format!(
                "Call to '{step_name}' requested (will return to '{}')",
                self.current_step
            ),
        })
        .to_string()
    }

    /// 取走本步骤暂存的消息（call 返回后的恢复路径）
    pub fn take_saved(&self) -> Option<Vec<Message>> {
        self.controller.take_saved(&self.current_step)
    }
}

/// 从工具调用参数中取 step_name
pub fn step_name_arg(arguments: &Value) -> Option<&str> {
    arguments.get("step_name").and_then(Value::as_str)
}

fn soft_failure(message: &str) -> String {
    json!({ "success": false, "message": message }).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::step::StepJumpController;
    use std::collections::HashMap;

    fn tools_for(step: &str) -> StepJumpTools {
        let mut destinations = HashMap::new();
        destinations.insert("main".to_string(), vec!["lint".to_string()]);
        let handle = StepJumpHandle::new(StepJumpController::new(destinations));
        StepJumpTools::new(handle, step)
    }

    #[test]
    fn test_definitions_bake_in_destinations() {
        let tools = tools_for("main");
        let defs = tools.definitions();
        assert_eq!(defs.len(), 2);
        let enum_values = defs[0].parameters["properties"]["step_name"]["enum"]
            .as_array()
            .unwrap();
        assert_eq!(enum_values.len(), 1);
        assert_eq!(enum_values[0], "lint");
    }

    #[test]
    fn test_no_destinations_no_definitions() {
        let tools = tools_for("lint");
        assert!(tools.definitions().is_empty());
        assert!(tools.instructions().is_empty());
    }

    #[test]
    fn test_invalid_jump_is_soft_failure() {
        let tools = tools_for("main");
        let result: Value = serde_json::from_str(&tools.request_jump("deploy")).unwrap();
        assert_eq!(result["success"], false);
        assert!(result["message"].as_str().unwrap().contains("deploy"));
    }

    #[test]
    fn test_invalid_call_is_soft_failure() {
        let tools = tools_for("main");
        let err = tools.request_call("deploy", vec![]).unwrap_err();
        let result: Value = serde_json::from_str(&err).unwrap();
        assert_eq!(result["success"], false);
    }

    #[test]
    fn test_call_ack_matches_request_call_result() {
        let tools = tools_for("main");
        let ack = tools.call_ack("lint");
        let ok = tools.request_call("lint", vec![]).unwrap();
        assert_eq!(ack, ok);
    }

    #[test]
    fn test_step_name_arg() {
        assert_eq!(
            step_name_arg(&serde_json::json!({"step_name": "lint"})),
            Some("lint")
        );
        assert!(step_name_arg(&serde_json::json!({})).is_none());
    }
}
