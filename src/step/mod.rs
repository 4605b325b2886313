//! 步骤执行核心：Step 运行时、StepResult、跳转策略与控制器、跳转工具

pub mod controller;
pub mod input;
pub mod jump;
pub mod jump_tools;
pub mod request;
pub mod result;
#[allow(clippy::module_inception)]
pub mod step;

pub use controller::{PendingReturn, StepJumpController, StepJumpHandle};
pub use input::UserInputQueue;
pub use jump::StepJump;
pub use jump_tools::{StepJumpTools, CALL_TOOL_NAME, JUMP_TOOL_NAME};
pub use request::{InstructionRequestBuilder, RequestBuilder};
pub use result::{StepResult, StepStatus};
pub use step::Step;
