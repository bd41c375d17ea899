//! Mock LLM 客户端（用于测试与离线演示，无需 API）
//!
//! 绑定了 add 工具且最后一条 User 消息形如 "<a> + <b>" 时请求 add；
//! 最后一条是工具结果时据此作答；其余情况回显用户最后一条消息。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;
use serde_json::{json, Value};

use crate::llm::{LlmClient, LlmError};
use crate::memory::{AssistantReply, Message, ToolCallRequest, ToolPayload};
use crate::tools::ToolSpec;

/// Mock 客户端
#[derive(Debug, Default)]
pub struct MockLlmClient {
    next_call: AtomicU64,
}

impl MockLlmClient {
    pub fn new() -> Self {
        Self::default()
    }
}

static ADDITION_RE: OnceLock<Regex> = OnceLock::new();

fn parse_addition(text: &str) -> Option<(f64, f64)> {
    let re = ADDITION_RE
        .get_or_init(|| Regex::new(r"(-?\d+(?:\.\d+)?)\s*\+\s*(-?\d+(?:\.\d+)?)").unwrap());
    let caps = re.captures(text)?;
    let a = caps.get(1)?.as_str().parse().ok()?;
    let b = caps.get(2)?.as_str().parse().ok()?;
    Some((a, b))
}

fn number_json(v: f64) -> Value {
    if v.fract() == 0.0 {
        json!(v as i64)
    } else {
        json!(v)
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(
        &self,
        messages: &[Message],
        tools: &[ToolSpec],
    ) -> Result<AssistantReply, LlmError> {
        match messages.last() {
            Some(Message::ToolResult(_)) => {
                // 汇总本轮全部工具结果
                let answers: Vec<String> = messages
                    .iter()
                    .rev()
                    .take_while(|m| matches!(m, Message::ToolResult(_)))
                    .filter_map(|m| match m {
                        Message::ToolResult(r) => Some(r),
                        _ => None,
                    })
                    .map(|r| match &r.payload {
                        ToolPayload::Success(v) => match v.get("result") {
                            Some(result) => format!("The result is {}.", result),
                            None => format!("The tool returned {}.", v),
                        },
                        ToolPayload::Error(e) => format!("The tool failed: {}", e.message),
                    })
                    .collect();
                Ok(AssistantReply::text(
                    answers.into_iter().rev().collect::<Vec<_>>().join(" "),
                ))
            }
            Some(Message::User { content }) => {
                let can_add = tools.iter().any(|t| t.name == "add");
                if can_add {
                    if let Some((a, b)) = parse_addition(content) {
                        let n = self.next_call.fetch_add(1, Ordering::Relaxed);
                        let call = ToolCallRequest::new(
                            format!("call_{n}"),
                            "add",
                            json!({ "a": number_json(a), "b": number_json(b) }),
                        );
                        return Ok(AssistantReply::with_calls("", vec![call]));
                    }
                }
                Ok(AssistantReply::text(format!("Echo from Mock: {}", content)))
            }
            _ => Err(LlmError::InvalidRequest(
                "conversation must end with a user message or tool result".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn add_spec() -> ToolSpec {
        ToolSpec {
            name: "add".to_string(),
            description: "Add two numbers".to_string(),
            parameters: json!({"type": "object"}),
        }
    }

    #[tokio::test]
    async fn test_requests_add_when_bound() {
        let mock = MockLlmClient::new();
        let reply = mock
            .complete(&[Message::user("What is 25 + 17?")], &[add_spec()])
            .await
            .unwrap();
        assert_eq!(reply.tool_calls.len(), 1);
        assert_eq!(reply.tool_calls[0].tool_name, "add");
        assert_eq!(
            reply.tool_calls[0].arguments,
            json!({"a": 25, "b": 17}).into()
        );
    }

    #[tokio::test]
    async fn test_echoes_without_tools() {
        let mock = MockLlmClient::new();
        let reply = mock.complete(&[Message::user("What is 25 + 17?")], &[]).await.unwrap();
        assert!(reply.tool_calls.is_empty());
        assert!(reply.content.contains("25 + 17"));
    }

    #[tokio::test]
    async fn test_answers_from_tool_result() {
        let mock = MockLlmClient::new();
        let messages = vec![
            Message::user("What is 25 + 17?"),
            AssistantReply::with_calls("", vec![ToolCallRequest::new("call_0", "add", json!({}))]).into(),
            Message::tool_result("call_0", ToolPayload::Success(json!({"result": 42}))),
        ];
        let reply = mock.complete(&messages, &[]).await.unwrap();
        assert!(reply.content.contains("42"));
    }
}
