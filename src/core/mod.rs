//! 核心层：错误类型与编排器

pub mod error;
pub mod orchestrator;

pub use error::AgentError;
pub use orchestrator::{Agent, AgentRunOutcome};
