//! Step 运行时
//!
//! 单个步骤的有界工具调用循环：构建请求 -> 调用模型 -> 执行工具 -> 写回
//! 结果，直至模型给出最终回复、达到迭代上限、被取消、出错，或通过 call
//! 让出控制权。取消只在迭代边界与单个工具之间检查，绝不打断在途请求；
//! 所有失败都收敛为 status=error 的 StepResult，不向编排器抛出。

use tokio_util::sync::CancellationToken;

use crate::core::AgentError;
use crate::llm::{ModelClient, TokenUsage};
use crate::memory::{HistoryMessage, Message, Role};
use crate::step::jump_tools::{step_name_arg, CALL_TOOL_NAME, JUMP_TOOL_NAME};
use crate::step::{StepJump, StepJumpHandle, StepJumpTools, StepResult, StepStatus, UserInputQueue};
use crate::step::request::RequestBuilder;
use crate::tools::{ToolExecutor, ToolSpec};
use std::sync::Arc;

/// 步骤：命名的独立执行单元，构造一次、跨多次运行复用
pub struct Step {
    name: String,
    request_builder: Box<dyn RequestBuilder>,
    model: Arc<dyn ModelClient>,
    tool_executor: ToolExecutor,
    jump_tools: Option<StepJumpTools>,
    input_queue: Option<UserInputQueue>,
    max_iterations: usize,
    step_jump: StepJump,
}

impl Step {
    /// 创建步骤；max_iterations 必须 >= 1
    pub fn new(
        name: impl Into<String>,
        request_builder: Box<dyn RequestBuilder>,
        model: Arc<dyn ModelClient>,
        tool_executor: ToolExecutor,
        max_iterations: usize,
        step_jump: StepJump,
    ) -> Self {
        assert!(max_iterations >= 1, "max_iterations must be >= 1");
        Self {
            name: name.into(),
            request_builder,
            model,
            tool_executor,
            jump_tools: None,
            input_queue: None,
            max_iterations,
            step_jump,
        }
    }

    /// 绑定跳转工具：让模型可以从本步骤发起 jump/call
    pub fn with_jump_tools(mut self, controller: StepJumpHandle) -> Self {
        self.jump_tools = Some(StepJumpTools::new(controller, self.name.clone()));
        self
    }

    /// 绑定运行中输入队列：用户在本步骤运行期间追加的输入在迭代边界并入对话
    pub fn with_input_queue(mut self, queue: UserInputQueue) -> Self {
        self.input_queue = Some(queue);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// 运行步骤的工具调用循环，恰好产出一个 StepResult。
    ///
    /// 普通运行以 history + user_input 作为消息种子；resume 运行从控制器
    /// 暂存处恢复消息（含合成的继续性提示），api_messages 只覆盖本次调用。
    pub async fn run(
        &self,
        history: &[Message],
        user_input: Option<&str>,
        resume: bool,
        cancel: &CancellationToken,
    ) -> StepResult {
        tracing::info!(step = %self.name, resume, "step start");

        let mut messages: Vec<Message> = if resume {
            match self.jump_tools.as_ref().and_then(|jt| jt.take_saved()) {
                Some(saved) => saved,
                None => {
                    return self.finish(
                        StepStatus::Error,
                        format!("resume requested but no saved messages for step '{}'", self.name),
                        Vec::new(),
                        Vec::new(),
                        TokenUsage::default(),
                    );
                }
            }
        } else {
            let mut seed = history.to_vec();
            if let Some(input) = user_input {
                seed.push(Message::user(input));
            }
            seed
        };

        let mut api_messages: Vec<Message> = Vec::new();
        let mut usage = TokenUsage::default();

        for iteration in 0..self.max_iterations {
            if cancel.is_cancelled() {
                return self.finish(
                    StepStatus::Cancelled,
                    "Operation cancelled by user.",
                    Vec::new(),
                    api_messages,
                    usage,
                );
            }

            if let Some(input) = self.input_queue.as_ref().and_then(UserInputQueue::pop) {
                tracing::info!(step = %self.name, iteration = iteration + 1, "mid-run user input");
                messages.push(Message::user(input));
            }

            let mut request = match self.request_builder.build(&messages) {
                Ok(r) => r,
                Err(e) => {
                    return self.finish(
                        StepStatus::Error,
                        format!("Error during step execution: {e}"),
                        Vec::new(),
                        api_messages,
                        usage,
                    );
                }
            };
            request.tools = self.tool_specs();
            self.attach_jump_instructions(&mut request);

            tracing::debug!(step = %self.name, iteration = iteration + 1, "model request");
            let turn = match self.model.complete(&request).await {
                Ok(t) => t,
                Err(e) => {
                    return self.finish(
                        StepStatus::Error,
                        format!("Error during step execution: {e}"),
                        Vec::new(),
                        api_messages,
                        usage,
                    );
                }
            };
            usage.add(&turn.usage);

            let assistant = turn.message;
            messages.push(assistant.clone());
            api_messages.push(assistant.clone());

            if assistant.is_final_answer() {
                let response = assistant.content;
                let history_messages = vec![HistoryMessage::new(Role::Assistant, response.clone())];
                return self.finish(
                    StepStatus::Completed,
                    response,
                    history_messages,
                    api_messages,
                    usage,
                );
            }

            // 工具调用批次；call 成功时立即挂起，不再发起模型调用
            for call in &assistant.tool_calls {
                if cancel.is_cancelled() {
                    return self.finish(
                        StepStatus::Cancelled,
                        "Operation cancelled by user.",
                        Vec::new(),
                        api_messages,
                        usage,
                    );
                }

                if let Some(jt) = self.jump_tools.as_ref().filter(|jt| jt.handles(&call.name)) {
                    let target = match step_name_arg(&call.arguments) {
                        Some(t) => t.to_string(),
                        None => {
                            let content = r#"{"success": false, "message": "missing required argument 'step_name'"}"#;
                            push_tool_result(&mut messages, &mut api_messages, &call.id, content);
                            continue;
                        }
                    };

                    if call.name == JUMP_TOOL_NAME {
                        let content = jt.request_jump(&target);
                        push_tool_result(&mut messages, &mut api_messages, &call.id, &content);
                        continue;
                    }

                    debug_assert_eq!(call.name, CALL_TOOL_NAME);
                    // 暂存副本必须包含本次确认，恢复后对话才是闭合的
                    let ack = Message::tool_result(&call.id, jt.call_ack(&target));
                    let mut snapshot = messages.clone();
                    snapshot.push(ack.clone());
                    match jt.request_call(&target, snapshot) {
                        Ok(_) => {
                            messages.push(ack.clone());
                            api_messages.push(ack);
                            tracing::info!(step = %self.name, target = %target, "call registered, suspending");
                            return self.finish(
                                StepStatus::CallPending,
                                format!("Call to '{target}' pending."),
                                Vec::new(),
                                api_messages,
                                usage,
                            );
                        }
                        Err(soft) => {
                            // 目标不合法或已有 call 挂起：软失败，循环继续
                            push_tool_result(&mut messages, &mut api_messages, &call.id, &soft);
                            continue;
                        }
                    }
                }

                match self
                    .tool_executor
                    .execute(&call.name, call.arguments.clone())
                    .await
                {
                    Ok(content) => {
                        push_tool_result(&mut messages, &mut api_messages, &call.id, &content);
                    }
                    Err(e @ AgentError::ToolExecutionFailed(_))
                    | Err(e @ AgentError::ToolTimeout(_)) => {
                        // 工具自身失败对模型可见、可恢复
                        let content = format!("Error: {e}");
                        push_tool_result(&mut messages, &mut api_messages, &call.id, &content);
                    }
                    Err(e) => {
                        return self.finish(
                            StepStatus::Error,
                            format!("Error during step execution: {e}"),
                            Vec::new(),
                            api_messages,
                            usage,
                        );
                    }
                }
            }
        }

        self.finish(
            StepStatus::MaxIterations,
            "Step reached maximum iterations without completing the task.",
            vec![HistoryMessage::new(
                Role::Assistant,
                "Step reached maximum iterations without completing the task.",
            )],
            api_messages,
            usage,
        )
    }

    fn tool_specs(&self) -> Vec<ToolSpec> {
        let mut specs = self.tool_executor.specs();
        if let Some(jt) = &self.jump_tools {
            specs.extend(jt.definitions());
        }
        specs
    }

    /// 跳转工具的使用说明并入系统提示词
    fn attach_jump_instructions(&self, request: &mut crate::llm::ChatRequest) {
        let Some(jt) = &self.jump_tools else { return };
        let extra = jt.instructions();
        if extra.is_empty() {
            return;
        }
        if let Some(system) = request
            .messages
            .iter_mut()
            .find(|m| m.role == Role::System)
        {
            system.content.push_str("\n\n");
            system.content.push_str(&extra);
        }
    }

    fn finish(
        &self,
        status: StepStatus,
        response: impl Into<String>,
        history_messages: Vec<HistoryMessage>,
        api_messages: Vec<Message>,
        token_usage: TokenUsage,
    ) -> StepResult {
        let response = response.into();
        tracing::info!(step = %self.name, status = %status, "step finished");
        StepResult {
            step_name: self.name.clone(),
            response,
            history_messages,
            api_messages,
            token_usage,
            status,
            step_jump: self.step_jump.clone(),
        }
    }

}

fn push_tool_result(
    messages: &mut Vec<Message>,
    api_messages: &mut Vec<Message>,
    call_id: &str,
    content: &str,
) {
    let msg = Message::tool_result(call_id, content);
    messages.push(msg.clone());
    api_messages.push(msg);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockModelClient;
    use crate::step::request::InstructionRequestBuilder;
    use crate::step::StepJumpController;
    use crate::tools::{EchoTool, ToolRegistry};
    use std::collections::HashMap;

    fn executor_with_echo() -> ToolExecutor {
        let mut registry = ToolRegistry::new();
        registry.register(EchoTool);
        ToolExecutor::new(registry, 5)
    }

    fn controller_main_to_lint() -> StepJumpHandle {
        let mut destinations = HashMap::new();
        destinations.insert("main".to_string(), vec!["lint".to_string()]);
        StepJumpHandle::new(StepJumpController::new(destinations))
    }

    fn step_with(model: MockModelClient, max_iterations: usize) -> (Step, Arc<MockModelClient>) {
        let model = Arc::new(model);
        let step = Step::new(
            "main",
            Box::new(InstructionRequestBuilder::new("You are a CAD assistant.")),
            model.clone(),
            executor_with_echo(),
            max_iterations,
            StepJump::Terminal,
        );
        (step, model)
    }

    #[tokio::test]
    async fn test_final_answer_completes() {
        let (step, _) = step_with(MockModelClient::new().with_final_turn("done"), 3);
        let cancel = CancellationToken::new();
        let result = step.run(&[], Some("build a box"), false, &cancel).await;

        assert_eq!(result.status, StepStatus::Completed);
        assert_eq!(result.response, "done");
        assert_eq!(result.history_messages.len(), 1);
        assert_eq!(result.history_messages[0].content, "done");
        assert_eq!(result.token_usage.total_tokens, 15);
    }

    #[tokio::test]
    async fn test_tool_loop_then_final_answer() {
        let model = MockModelClient::new()
            .with_tool_call("echo", serde_json::json!({"text": "ping"}))
            .with_final_turn("pong");
        let (step, model) = step_with(model, 5);
        let cancel = CancellationToken::new();
        let result = step.run(&[], Some("echo ping"), false, &cancel).await;

        assert_eq!(result.status, StepStatus::Completed);
        assert_eq!(model.request_count(), 2);
        // assistant(tool_call) + tool result + assistant(final)
        assert_eq!(result.api_messages.len(), 3);
        assert_eq!(result.api_messages[1].role, Role::Tool);
        assert_eq!(result.api_messages[1].content, "ping");
    }

    #[tokio::test]
    async fn test_max_iterations_after_exactly_one_cycle() {
        let model = MockModelClient::new()
            .with_tool_call("echo", serde_json::json!({"text": "again"}))
            .with_tool_call("echo", serde_json::json!({"text": "again"}));
        let (step, model) = step_with(model, 1);
        let cancel = CancellationToken::new();
        let result = step.run(&[], Some("loop forever"), false, &cancel).await;

        assert_eq!(result.status, StepStatus::MaxIterations);
        assert_eq!(model.request_count(), 1);
    }

    #[tokio::test]
    async fn test_precancelled_yields_empty_history() {
        let (step, model) = step_with(MockModelClient::new().with_final_turn("never"), 3);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = step.run(&[], Some("anything"), false, &cancel).await;

        assert_eq!(result.status, StepStatus::Cancelled);
        assert!(result.history_messages.is_empty());
        assert_eq!(model.request_count(), 0);
    }

    #[tokio::test]
    async fn test_model_failure_contained_as_error() {
        // 无脚本轮次 -> mock 报 LlmError
        let (step, _) = step_with(MockModelClient::new(), 3);
        let cancel = CancellationToken::new();
        let result = step.run(&[], Some("hi"), false, &cancel).await;

        assert_eq!(result.status, StepStatus::Error);
        assert!(result.response.contains("LLM error"));
    }

    #[tokio::test]
    async fn test_valid_call_suspends_with_saved_messages() {
        let model = MockModelClient::new()
            .with_tool_call("call_step", serde_json::json!({"step_name": "lint"}))
            .with_final_turn("should not be reached");
        let ctrl = controller_main_to_lint();
        let model = Arc::new(model);
        let step = Step::new(
            "main",
            Box::new(InstructionRequestBuilder::new("prompt")),
            model.clone(),
            executor_with_echo(),
            5,
            StepJump::Terminal,
        )
        .with_jump_tools(ctrl.clone());

        let cancel = CancellationToken::new();
        let result = step.run(&[], Some("check my code"), false, &cancel).await;

        assert_eq!(result.status, StepStatus::CallPending);
        // 登记后立即挂起，不再发起模型调用
        assert_eq!(model.request_count(), 1);
        assert_eq!(ctrl.pending_call_target().as_deref(), Some("lint"));

        // 暂存副本以确认工具结果收尾，顺序完整
        let saved = ctrl.take_saved("main").unwrap();
        let last = saved.last().unwrap();
        assert_eq!(last.role, Role::Tool);
        assert!(last.content.contains("\"success\":true"));
        assert_eq!(saved[0].content, "check my code");
    }

    #[tokio::test]
    async fn test_invalid_call_soft_fails_and_continues() {
        let model = MockModelClient::new()
            .with_tool_call("call_step", serde_json::json!({"step_name": "deploy"}))
            .with_final_turn("recovered");
        let ctrl = controller_main_to_lint();
        let model = Arc::new(model);
        let step = Step::new(
            "main",
            Box::new(InstructionRequestBuilder::new("prompt")),
            model.clone(),
            executor_with_echo(),
            5,
            StepJump::Terminal,
        )
        .with_jump_tools(ctrl.clone());

        let cancel = CancellationToken::new();
        let result = step.run(&[], Some("go"), false, &cancel).await;

        assert_eq!(result.status, StepStatus::Completed);
        assert_eq!(result.response, "recovered");
        assert_eq!(model.request_count(), 2);
        // 无效 call 不留任何暂存
        assert!(!ctrl.has_saved("main"));
        let soft = &result.api_messages[1];
        assert_eq!(soft.role, Role::Tool);
        assert!(soft.content.contains("\"success\":false"));
    }

    #[tokio::test]
    async fn test_jump_acknowledged_and_loop_continues() {
        let model = MockModelClient::new()
            .with_tool_call("jump_to_step", serde_json::json!({"step_name": "lint"}))
            .with_final_turn("handed off");
        let ctrl = controller_main_to_lint();
        let model = Arc::new(model);
        let step = Step::new(
            "main",
            Box::new(InstructionRequestBuilder::new("prompt")),
            model.clone(),
            executor_with_echo(),
            5,
            StepJump::Terminal,
        )
        .with_jump_tools(ctrl.clone());

        let cancel = CancellationToken::new();
        let result = step.run(&[], Some("go"), false, &cancel).await;

        assert_eq!(result.status, StepStatus::Completed);
        assert_eq!(ctrl.take_jump_target().as_deref(), Some("lint"));
    }

    #[tokio::test]
    async fn test_queued_input_joins_conversation_at_iteration_boundary() {
        let model = MockModelClient::new()
            .with_tool_call("echo", serde_json::json!({"text": "ok"}))
            .with_final_turn("done");
        let model = Arc::new(model);
        let queue = UserInputQueue::new();
        queue.push("also make it blue");
        let step = Step::new(
            "main",
            Box::new(InstructionRequestBuilder::new("prompt")),
            model.clone(),
            executor_with_echo(),
            5,
            StepJump::Terminal,
        )
        .with_input_queue(queue.clone());

        let cancel = CancellationToken::new();
        let result = step.run(&[], Some("build a box"), false, &cancel).await;

        assert_eq!(result.status, StepStatus::Completed);
        assert!(queue.is_empty());

        // 第一轮请求已带上排队的输入，后续轮次不重复注入
        let requests = model.recorded_requests();
        let injected = |msgs: &[Message]| {
            msgs.iter()
                .filter(|m| m.role == Role::User && m.content == "also make it blue")
                .count()
        };
        assert_eq!(injected(&requests[0].messages), 1);
        assert_eq!(injected(&requests[1].messages), 1);
    }

    #[tokio::test]
    async fn test_resume_without_save_is_error() {
        let ctrl = controller_main_to_lint();
        let model = Arc::new(MockModelClient::new().with_final_turn("x"));
        let step = Step::new(
            "main",
            Box::new(InstructionRequestBuilder::new("prompt")),
            model,
            executor_with_echo(),
            3,
            StepJump::Terminal,
        )
        .with_jump_tools(ctrl);

        let cancel = CancellationToken::new();
        let result = step.run(&[], None, true, &cancel).await;
        assert_eq!(result.status, StepStatus::Error);
        assert!(result.response.contains("no saved messages"));
    }
}
