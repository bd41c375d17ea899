//! 轮次事件：编排器在状态迁移与工具调用时发送，供 UI / 日志订阅

use serde::Serialize;

use crate::core::ToolErrorKind;

/// 单个轮次的状态机阶段
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum TurnPhase {
    /// 已追加 User 消息，等待模型决定是否调用工具
    AwaitingModelDecision,
    /// 正在执行本批工具调用
    DispatchingTools,
    /// 工具结果已追加，等待最终回复
    AwaitingFinalReply,
    /// 轮次结束（终态）
    Done,
}

impl TurnPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            TurnPhase::AwaitingModelDecision => "awaiting_model_decision",
            TurnPhase::DispatchingTools => "dispatching_tools",
            TurnPhase::AwaitingFinalReply => "awaiting_final_reply",
            TurnPhase::Done => "done",
        }
    }
}

impl std::fmt::Display for TurnPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 编排过程中发出的事件（供 TUI 实时显示）
#[derive(Clone, Debug, PartialEq, Serialize)]
pub enum TurnEvent {
    /// 进入新阶段
    Phase(TurnPhase),
    /// 开始调用工具
    ToolCallStarted { call_id: String, tool: String },
    /// 工具返回；error 为 None 表示成功
    ToolCallFinished {
        call_id: String,
        tool: String,
        error: Option<ToolErrorKind>,
    },
    /// Token 使用统计（累计）
    TokenUsage {
        prompt_tokens: u64,
        completion_tokens: u64,
        total_tokens: u64,
    },
}
