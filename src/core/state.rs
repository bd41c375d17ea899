//! 状态定义：UiState 投影
//!
//! UI 只持有轻量的 UiState（阶段、历史快照、锁、错误）；完整历史由会话持有，
//! UiState 与会话共享同一个 Arc 快照，渲染时才做可见性过滤。

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::core::TurnPhase;
use crate::memory::{ChatSession, HistorySnapshot, Message};

/// UI 看到的「投影」状态，轻量且易于渲染
#[derive(Clone, Debug)]
pub struct UiState {
    pub phase: AgentPhase,
    /// 已提交历史的快照（含 System 与工具往来，渲染时过滤）
    pub history: HistorySnapshot,
    /// 轮次进行中尚未提交的用户输入（乐观显示）
    pub pending_input: Option<String>,
    /// 本批正在执行的工具
    pub active_tools: Vec<String>,
    pub input_locked: bool,
    pub error_message: Option<String>,
    pub session_id: String,
    pub session_started: Option<DateTime<Utc>>,
    /// 累计 token：(prompt, completion, total)
    pub token_usage: (u64, u64, u64),
}

impl Default for UiState {
    fn default() -> Self {
        Self {
            phase: AgentPhase::Idle,
            history: HistorySnapshot::default(),
            pending_input: None,
            active_tools: Vec::new(),
            input_locked: false,
            error_message: None,
            session_id: String::new(),
            session_started: None,
            token_usage: (0, 0, 0),
        }
    }
}

impl UiState {
    /// 会话空闲时的投影
    pub fn idle(session: &ChatSession) -> Self {
        Self {
            history: session.snapshot(),
            session_id: session.id.to_string(),
            session_started: Some(session.created_at),
            ..Self::default()
        }
    }

    /// 可展示消息：User 与最终 Assistant 回复（不含未提交的输入）
    pub fn visible(&self) -> impl Iterator<Item = &Message> {
        self.history.iter().filter(|m| m.is_visible())
    }
}

/// Agent 阶段（UI 投影用）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum AgentPhase {
    Idle,
    Thinking,
    ToolExecuting,
    Responding,
    Error,
}

impl From<TurnPhase> for AgentPhase {
    fn from(phase: TurnPhase) -> Self {
        match phase {
            TurnPhase::AwaitingModelDecision => AgentPhase::Thinking,
            TurnPhase::DispatchingTools => AgentPhase::ToolExecuting,
            TurnPhase::AwaitingFinalReply => AgentPhase::Responding,
            TurnPhase::Done => AgentPhase::Idle,
        }
    }
}

impl AgentPhase {
    pub fn label(&self) -> &'static str {
        match self {
            AgentPhase::Idle => "Idle",
            AgentPhase::Thinking => "Thinking...",
            AgentPhase::ToolExecuting => "Running tools...",
            AgentPhase::Responding => "Composing answer...",
            AgentPhase::Error => "Error",
        }
    }
}
