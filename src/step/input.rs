//! 运行中用户输入队列
//!
//! 用户在步骤运行期间追加的输入先入队，Step 循环在每个迭代边界（与取消
//! 检查同处）取出至多一条，作为 user 消息并入当前对话。克隆共享同一底层
//! 队列，外部任务可随时入队。

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

/// 线程安全的用户输入队列
#[derive(Clone, Default)]
pub struct UserInputQueue {
    inner: Arc<Mutex<VecDeque<String>>>,
}

impl UserInputQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// 入队一条输入；空字符串忽略
    pub fn push(&self, input: impl Into<String>) {
        let input = input.into();
        if input.is_empty() {
            return;
        }
        self.lock().push_back(input);
    }

    /// 取出最早入队的一条输入
    pub fn pop(&self) -> Option<String> {
        self.lock().pop_front()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<String>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pop_in_fifo_order() {
        let queue = UserInputQueue::new();
        queue.push("first");
        queue.push("second");
        queue.push("");

        assert_eq!(queue.pop().as_deref(), Some("first"));
        assert_eq!(queue.pop().as_deref(), Some("second"));
        assert!(queue.pop().is_none());
    }

    #[test]
    fn test_clones_share_the_queue() {
        let queue = UserInputQueue::new();
        let writer = queue.clone();
        writer.push("from another handle");

        assert!(!queue.is_empty());
        assert_eq!(queue.pop().as_deref(), Some("from another handle"));
        assert!(queue.is_empty());
    }
}
