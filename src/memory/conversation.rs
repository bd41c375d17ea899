//! 对话历史：消息模型与只追加日志
//!
//! 历史按插入顺序即对话顺序，整段回放给模型。轮次内的消息先写入 TurnBuffer，
//! 轮次到达 Done 时一次性提交；读者（UI）持有 Arc 快照，永远看不到半个轮次。

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::core::ToolErrorKind;

/// 工具调用参数：结构化 map，或后端预先序列化好的原始字符串
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolCallArguments {
    Structured(Map<String, Value>),
    Raw(String),
}

impl ToolCallArguments {
    /// 回放给模型时的编码形式（OpenAI 兼容接口要求字符串）
    pub fn to_wire_string(&self) -> String {
        match self {
            ToolCallArguments::Structured(map) => Value::Object(map.clone()).to_string(),
            ToolCallArguments::Raw(raw) => raw.clone(),
        }
    }
}

impl Default for ToolCallArguments {
    fn default() -> Self {
        ToolCallArguments::Structured(Map::new())
    }
}

impl From<Value> for ToolCallArguments {
    fn from(v: Value) -> Self {
        match v {
            Value::Object(map) => ToolCallArguments::Structured(map),
            Value::Null => ToolCallArguments::default(),
            Value::String(s) => ToolCallArguments::Raw(s),
            other => ToolCallArguments::Raw(other.to_string()),
        }
    }
}

/// 模型发出的单次工具调用请求；call_id 在一个轮次内唯一
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub call_id: String,
    pub tool_name: String,
    #[serde(default)]
    pub arguments: ToolCallArguments,
}

impl ToolCallRequest {
    pub fn new(
        call_id: impl Into<String>,
        tool_name: impl Into<String>,
        arguments: impl Into<ToolCallArguments>,
    ) -> Self {
        Self {
            call_id: call_id.into(),
            tool_name: tool_name.into(),
            arguments: arguments.into(),
        }
    }
}

/// 结构化错误描述（工具未找到 / 参数解码 / 执行失败 / 超时）
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub kind: ToolErrorKind,
    pub message: String,
}

/// 工具结果负载：成功数据或错误描述
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolPayload {
    Success(Value),
    Error(ErrorPayload),
}

impl ToolPayload {
    pub fn error(kind: ToolErrorKind, message: impl Into<String>) -> Self {
        ToolPayload::Error(ErrorPayload {
            kind,
            message: message.into(),
        })
    }

    pub fn is_error(&self) -> bool {
        matches!(self, ToolPayload::Error(_))
    }

    pub fn error_kind(&self) -> Option<ToolErrorKind> {
        match self {
            ToolPayload::Error(e) => Some(e.kind),
            ToolPayload::Success(_) => None,
        }
    }

    /// 喂给模型的文本：成功时为结果 JSON，失败时为 {"error": {...}}
    pub fn to_content(&self) -> String {
        match self {
            ToolPayload::Success(v) => v.to_string(),
            ToolPayload::Error(e) => serde_json::json!({
                "error": { "kind": e.kind, "message": e.message }
            })
            .to_string(),
        }
    }
}

/// 单次工具调用的结果，与一个 ToolCallRequest.call_id 一一对应
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub call_id: String,
    pub payload: ToolPayload,
}

/// 模型的一次回复：文本 + 可能为空的工具调用请求
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AssistantReply {
    pub content: String,
    #[serde(default)]
    pub tool_calls: Vec<ToolCallRequest>,
}

impl AssistantReply {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            tool_calls: Vec::new(),
        }
    }

    pub fn with_calls(content: impl Into<String>, tool_calls: Vec<ToolCallRequest>) -> Self {
        Self {
            content: content.into(),
            tool_calls,
        }
    }

    pub fn requests_tools(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// 单条消息（与模型 API 角色一致）
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum Message {
    System { content: String },
    User { content: String },
    Assistant(AssistantReply),
    ToolResult(ToolResult),
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Message::System {
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Message::User {
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Message::Assistant(AssistantReply::text(content))
    }

    pub fn tool_result(call_id: impl Into<String>, payload: ToolPayload) -> Self {
        Message::ToolResult(ToolResult {
            call_id: call_id.into(),
            payload,
        })
    }

    /// 展示层可见：User 与不带工具调用的 Assistant
    pub fn is_visible(&self) -> bool {
        match self {
            Message::User { .. } => true,
            Message::Assistant(reply) => !reply.requests_tools(),
            Message::System { .. } | Message::ToolResult(_) => false,
        }
    }

    pub fn text(&self) -> String {
        match self {
            Message::System { content } | Message::User { content } => content.clone(),
            Message::Assistant(reply) => reply.content.clone(),
            Message::ToolResult(r) => r.payload.to_content(),
        }
    }
}

impl From<AssistantReply> for Message {
    fn from(reply: AssistantReply) -> Self {
        Message::Assistant(reply)
    }
}

impl From<ToolResult> for Message {
    fn from(result: ToolResult) -> Self {
        Message::ToolResult(result)
    }
}

/// 校验 ToolResult 关联关系：每条 ToolResult 的 call_id 都来自紧邻的前一条 Assistant 的请求
pub fn tool_results_are_correlated(messages: &[Message]) -> bool {
    let mut open_calls: Vec<&str> = Vec::new();
    for m in messages {
        match m {
            Message::Assistant(reply) => {
                open_calls = reply.tool_calls.iter().map(|c| c.call_id.as_str()).collect();
            }
            Message::ToolResult(r) => {
                if !open_calls.contains(&r.call_id.as_str()) {
                    return false;
                }
            }
            Message::System { .. } | Message::User { .. } => open_calls.clear(),
        }
    }
    true
}

/// 对话历史快照（廉价克隆，供 UI 无锁遍历）
pub type HistorySnapshot = Arc<Vec<Message>>;

/// 只追加的对话历史：以 System 消息开头，进程生命周期内单调增长
#[derive(Clone, Debug)]
pub struct ConversationHistory {
    messages: HistorySnapshot,
}

impl ConversationHistory {
    pub fn new(system_prompt: impl Into<String>) -> Self {
        Self {
            messages: Arc::new(vec![Message::system(system_prompt)]),
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn snapshot(&self) -> HistorySnapshot {
        Arc::clone(&self.messages)
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn system_prompt(&self) -> &str {
        match self.messages.first() {
            Some(Message::System { content }) => content,
            _ => "",
        }
    }

    /// 开启一个轮次缓冲区；轮次内所有追加都先进入缓冲区
    pub fn begin_turn(&self) -> TurnBuffer {
        TurnBuffer {
            base: self.snapshot(),
            pending: Vec::new(),
        }
    }

    /// 原子提交轮次缓冲区，返回追加的消息条数。
    /// 只有仍有读者（如 UI）持有旧快照时，make_mut 才会复制底层数组，旧快照保持不变。
    pub fn commit(&mut self, turn: TurnBuffer) -> usize {
        let TurnBuffer { base, pending } = turn;
        debug_assert_eq!(base.len(), self.messages.len(), "turn committed onto a moved history");
        debug_assert!(tool_results_are_correlated(&pending));
        // 先释放缓冲区持有的快照，否则 make_mut 每次都会整段复制
        drop(base);
        let appended = pending.len();
        Arc::make_mut(&mut self.messages).extend(pending);
        appended
    }
}

/// 轮次缓冲区：以开启时的历史快照为底，记录本轮追加的消息
#[derive(Debug)]
pub struct TurnBuffer {
    base: HistorySnapshot,
    pending: Vec<Message>,
}

impl TurnBuffer {
    pub fn push(&mut self, msg: impl Into<Message>) {
        self.pending.push(msg.into());
    }

    /// 模型视角的完整消息序列：已提交历史 + 本轮已追加
    pub fn model_view(&self) -> Vec<Message> {
        let mut all = Vec::with_capacity(self.base.len() + self.pending.len());
        all.extend(self.base.iter().cloned());
        all.extend(self.pending.iter().cloned());
        all
    }
}
