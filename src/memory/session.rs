//! 会话上下文：每个对话一个 ChatSession，显式传入编排器
//!
//! 会话持有历史；轮次通过 &mut ChatSession 独占执行，同一会话的两个轮次无法并发修改历史。

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::memory::{ConversationHistory, HistorySnapshot};

/// 单个对话会话
#[derive(Clone, Debug)]
pub struct ChatSession {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub history: ConversationHistory,
}

impl ChatSession {
    pub fn new(system_prompt: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            history: ConversationHistory::new(system_prompt),
        }
    }

    pub fn snapshot(&self) -> HistorySnapshot {
        self.history.snapshot()
    }

    /// 清空对话：以同一 System 提示开启新会话（旧历史不做原地修改）
    pub fn restart(&self) -> Self {
        Self::new(self.history.system_prompt().to_string())
    }
}
