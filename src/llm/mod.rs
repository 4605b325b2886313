//! 模型层：传输抽象与实现（OpenAI 兼容 / Mock）

pub mod mock;
pub mod openai;
pub mod traits;

pub use mock::MockModelClient;
pub use openai::{CumulativeUsage, OpenAiClient};
pub use traits::{ChatRequest, ModelClient, ModelTurn, TokenUsage};
