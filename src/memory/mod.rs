//! 记忆层：对话历史（只追加日志 + 轮次缓冲）与会话上下文

pub mod conversation;
pub mod session;

pub use conversation::{
    tool_results_are_correlated, AssistantReply, ConversationHistory,
    ErrorPayload, HistorySnapshot, Message, ToolCallArguments, ToolCallRequest, ToolPayload,
    ToolResult, TurnBuffer,
};
pub use session::ChatSession;
