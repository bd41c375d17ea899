//! 错误类型：致命通道与可恢复通道
//!
//! ChatError 为致命错误（启动失败、模型调用失败），以 Result 形式返回给调用方；
//! ToolErrorKind 为单次工具调用的可恢复错误，作为数据写入 ToolResult，永不越过 Dispatcher 边界。

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::llm::LlmError;

/// 会话 / 轮次级致命错误
#[derive(Error, Debug)]
pub enum ChatError {
    /// 缺少凭据、未配置工具服务器、配置文件解析失败等
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// 工具枚举失败（服务器无法启动、握手失败、tools/list 出错）
    #[error("Tool discovery failed: {0}")]
    ToolDiscovery(String),

    /// 注册表拒绝同名工具
    #[error("Duplicate tool name: {0}")]
    DuplicateTool(String),

    /// 模型后端不可达 / 拒绝请求；当前轮次失败，历史不变
    #[error("Model invocation failed: {0}")]
    ModelInvocation(#[from] LlmError),

    /// 用户取消了正在进行的轮次
    #[error("Cancelled by user")]
    Cancelled,
}

impl From<config::ConfigError> for ChatError {
    fn from(e: config::ConfigError) -> Self {
        ChatError::Configuration(e.to_string())
    }
}

/// 单次工具调用失败的分类（写入 ErrorPayload.kind）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolErrorKind {
    ToolNotFound,
    ToolArgumentDecodeError,
    ToolExecutionError,
    ToolTimeout,
}

impl ToolErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolErrorKind::ToolNotFound => "tool_not_found",
            ToolErrorKind::ToolArgumentDecodeError => "tool_argument_decode_error",
            ToolErrorKind::ToolExecutionError => "tool_execution_error",
            ToolErrorKind::ToolTimeout => "tool_timeout",
        }
    }
}

impl std::fmt::Display for ToolErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
