//! 持久化聊天历史
//!
//! 追加式的对话日志：每条带时间戳与会话 ID，可选上限裁剪。Step 只向其
//! 追加 history_messages，不直接读写内部结构；下一次运行以 to_messages()
//! 的 API 视图作为种子上下文。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::memory::{Message, Role};

/// 持久化历史中的一条消息
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HistoryMessage {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
}

impl HistoryMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Utc::now(),
            conversation_id: None,
        }
    }
}

/// 聊天历史管理器：append-only，可选最大条数
pub struct ChatHistoryManager {
    history: Vec<HistoryMessage>,
    max_messages: Option<usize>,
    conversation_id: Option<String>,
}

impl ChatHistoryManager {
    pub fn new(max_messages: Option<usize>) -> Self {
        Self {
            history: Vec::new(),
            max_messages,
            conversation_id: None,
        }
    }

    /// 设置当前会话 ID，之后追加的消息都会打上该 ID
    pub fn set_conversation_id(&mut self, id: impl Into<String>) {
        self.conversation_id = Some(id.into());
    }

    pub fn add_user_message(&mut self, content: impl Into<String>) {
        self.push(HistoryMessage::new(Role::User, content));
    }

    pub fn add_assistant_message(&mut self, content: impl Into<String>) {
        self.push(HistoryMessage::new(Role::Assistant, content));
    }

    /// 追加一个 Step 产出的 history_messages
    pub fn append(&mut self, messages: Vec<HistoryMessage>) {
        for msg in messages {
            self.push(msg);
        }
    }

    /// API 视图：只保留 role + content，供下一次 Step 作为上下文种子
    pub fn to_messages(&self) -> Vec<Message> {
        self.history
            .iter()
            .map(|m| Message {
                role: m.role,
                content: m.content.clone(),
                tool_calls: Vec::new(),
                tool_call_id: None,
            })
            .collect()
    }

    pub fn messages(&self) -> &[HistoryMessage] {
        &self.history
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    pub fn clear(&mut self) {
        self.history.clear();
    }

    fn push(&mut self, mut msg: HistoryMessage) {
        if msg.conversation_id.is_none() {
            msg.conversation_id = self.conversation_id.clone();
        }
        self.history.push(msg);
        if let Some(max) = self.max_messages {
            if self.history.len() > max {
                let drop = self.history.len() - max;
                self.history.drain(..drop);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_stamps_conversation_id() {
        let mut mgr = ChatHistoryManager::new(None);
        mgr.set_conversation_id("conv_1");
        mgr.add_user_message("hello");
        mgr.append(vec![HistoryMessage::new(Role::Assistant, "hi")]);

        assert_eq!(mgr.len(), 2);
        assert!(mgr
            .messages()
            .iter()
            .all(|m| m.conversation_id.as_deref() == Some("conv_1")));
    }

    #[test]
    fn test_max_messages_prunes_oldest() {
        let mut mgr = ChatHistoryManager::new(Some(2));
        mgr.add_user_message("first");
        mgr.add_assistant_message("second");
        mgr.add_user_message("third");

        let api = mgr.to_messages();
        assert_eq!(api.len(), 2);
        assert_eq!(api[0].content, "second");
        assert_eq!(api[1].content, "third");
    }
}
