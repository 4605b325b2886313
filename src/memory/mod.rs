//! 消息层：对话消息单元与持久化聊天历史

pub mod history;
pub mod message;

pub use history::{ChatHistoryManager, HistoryMessage};
pub use message::{Message, Role, ToolCallRequest};
