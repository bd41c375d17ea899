//! OpenAI 兼容 API 客户端
//!
//! 通过 async_openai 调用任意 OpenAI 兼容端点（可配置 base_url）；支持 OpenAI、Gemini 兼容端点、自建代理等。
//! 工具以 function tool 形式绑定；ToolResult 转为 tool 角色消息，带工具调用的 Assistant 消息原样回放其 tool_calls。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_openai::config::OpenAIConfig;
use async_openai::error::OpenAIError;
use async_openai::types::chat::{
    ChatCompletionMessageToolCall, ChatCompletionMessageToolCalls,
    ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
    ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestToolMessageArgs,
    ChatCompletionRequestUserMessageArgs, ChatCompletionResponseMessage, ChatCompletionTool,
    ChatCompletionTools, CreateChatCompletionRequestArgs, FunctionCall, FunctionObject,
};
use async_openai::Client;
use async_trait::async_trait;
use serde_json::Value;

use crate::llm::{LlmClient, LlmError};
use crate::memory::{AssistantReply, Message, ToolCallArguments, ToolCallRequest};
use crate::tools::ToolSpec;

/// Token 使用统计（累计值）
#[derive(Debug, Clone, Default)]
pub struct TokenUsage {
    pub prompt_tokens: Arc<AtomicU64>,
    pub completion_tokens: Arc<AtomicU64>,
    pub total_tokens: Arc<AtomicU64>,
}

impl TokenUsage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, prompt: u64, completion: u64) {
        self.prompt_tokens.fetch_add(prompt, Ordering::Relaxed);
        self.completion_tokens.fetch_add(completion, Ordering::Relaxed);
        self.total_tokens.fetch_add(prompt + completion, Ordering::Relaxed);
    }

    pub fn get(&self) -> (u64, u64, u64) {
        (
            self.prompt_tokens.load(Ordering::Relaxed),
            self.completion_tokens.load(Ordering::Relaxed),
            self.total_tokens.load(Ordering::Relaxed),
        )
    }
}

/// OpenAI 兼容客户端：持有 Client、model 名与采样温度
pub struct OpenAiClient {
    client: Client<OpenAIConfig>,
    model: String,
    temperature: Option<f32>,
    /// 累计 token 使用统计
    pub usage: TokenUsage,
}

impl OpenAiClient {
    pub fn new(base_url: Option<&str>, model: &str, api_key: Option<&str>) -> Self {
        let api_key = api_key
            .map(String::from)
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .unwrap_or_default();

        let config = if let Some(url) = base_url {
            OpenAIConfig::new()
                .with_api_base(url)
                .with_api_key(api_key)
        } else {
            OpenAIConfig::new().with_api_key(api_key)
        };

        Self {
            client: Client::with_config(config),
            model: model.to_string(),
            temperature: None,
            usage: TokenUsage::new(),
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

/// 历史消息 → API 消息
pub(crate) fn to_openai_messages(
    messages: &[Message],
) -> Result<Vec<ChatCompletionRequestMessage>, LlmError> {
    messages.iter().map(to_openai_message).collect()
}

fn to_openai_message(m: &Message) -> Result<ChatCompletionRequestMessage, LlmError> {
    let msg = match m {
        Message::System { content } => ChatCompletionRequestMessage::System(
            ChatCompletionRequestSystemMessageArgs::default()
                .content(content.clone())
                .build()
                .map_err(invalid_request)?,
        ),
        Message::User { content } => ChatCompletionRequestMessage::User(
            ChatCompletionRequestUserMessageArgs::default()
                .content(content.clone())
                .build()
                .map_err(invalid_request)?,
        ),
        Message::Assistant(reply) => {
            let mut args = ChatCompletionRequestAssistantMessageArgs::default();
            args.content(reply.content.clone());
            if reply.requests_tools() {
                let calls: Vec<ChatCompletionMessageToolCalls> = reply
                    .tool_calls
                    .iter()
                    .map(|c| {
                        ChatCompletionMessageToolCalls::Function(ChatCompletionMessageToolCall {
                            id: c.call_id.clone(),
                            function: FunctionCall {
                                name: c.tool_name.clone(),
                                arguments: c.arguments.to_wire_string(),
                            },
                        })
                    })
                    .collect();
                args.tool_calls(calls);
            }
            ChatCompletionRequestMessage::Assistant(args.build().map_err(invalid_request)?)
        }
        Message::ToolResult(result) => ChatCompletionRequestMessage::Tool(
            ChatCompletionRequestToolMessageArgs::default()
                .content(result.payload.to_content())
                .tool_call_id(result.call_id.clone())
                .build()
                .map_err(invalid_request)?,
        ),
    };
    Ok(msg)
}

pub(crate) fn to_openai_tools(tools: &[ToolSpec]) -> Vec<ChatCompletionTools> {
    tools
        .iter()
        .map(|t| {
            ChatCompletionTools::Function(ChatCompletionTool {
                function: FunctionObject {
                    name: t.name.clone(),
                    description: Some(t.description.clone()),
                    parameters: Some(t.parameters.clone()),
                    strict: None,
                },
            })
        })
        .collect()
}

/// API 返回的参数字符串：能解析为对象则结构化，否则原样保留
fn decode_arguments(raw: &str) -> ToolCallArguments {
    if raw.trim().is_empty() {
        return ToolCallArguments::default();
    }
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => ToolCallArguments::Structured(map),
        _ => ToolCallArguments::Raw(raw.to_string()),
    }
}

/// API 响应消息 → AssistantReply
pub(crate) fn reply_from_message(message: &ChatCompletionResponseMessage) -> AssistantReply {
    let tool_calls = message
        .tool_calls
        .iter()
        .flatten()
        .filter_map(|call| match call {
            ChatCompletionMessageToolCalls::Function(c) => Some(ToolCallRequest {
                call_id: c.id.clone(),
                tool_name: c.function.name.clone(),
                arguments: decode_arguments(&c.function.arguments),
            }),
            ChatCompletionMessageToolCalls::Custom(c) => {
                tracing::warn!(call_id = %c.id, "ignoring custom tool call");
                None
            }
        })
        .collect();
    AssistantReply {
        content: message.content.clone().unwrap_or_default(),
        tool_calls,
    }
}

fn invalid_request(e: OpenAIError) -> LlmError {
    LlmError::InvalidRequest(e.to_string())
}

/// 错误分类：鉴权 / 限流 / 网络 / 其它
fn classify_error(e: OpenAIError) -> LlmError {
    match e {
        OpenAIError::Reqwest(err) => match err.status().map(|s| s.as_u16()) {
            Some(401) | Some(403) => LlmError::Auth(err.to_string()),
            Some(429) => LlmError::RateLimited(err.to_string()),
            Some(400) | Some(404) | Some(422) => LlmError::InvalidRequest(err.to_string()),
            _ => LlmError::Network(err.to_string()),
        },
        OpenAIError::ApiError(api) => {
            let code = api.code.clone().unwrap_or_default();
            let kind = api.r#type.clone().unwrap_or_default();
            let msg = api.to_string();
            if code.contains("invalid_api_key") || kind.contains("authentication") {
                LlmError::Auth(msg)
            } else if code.contains("rate_limit") || kind.contains("rate_limit") {
                LlmError::RateLimited(msg)
            } else if kind.contains("invalid_request") || code.contains("insufficient_quota") {
                LlmError::InvalidRequest(msg)
            } else {
                LlmError::Api(msg)
            }
        }
        OpenAIError::JSONDeserialize(err, _) => LlmError::InvalidResponse(err.to_string()),
        OpenAIError::InvalidArgument(msg) => LlmError::InvalidRequest(msg),
        other => LlmError::Api(other.to_string()),
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    fn token_usage(&self) -> (u64, u64, u64) {
        self.usage.get()
    }

    async fn complete(
        &self,
        messages: &[Message],
        tools: &[ToolSpec],
    ) -> Result<AssistantReply, LlmError> {
        let mut args = CreateChatCompletionRequestArgs::default();
        args.model(&self.model).messages(to_openai_messages(messages)?);
        if let Some(t) = self.temperature {
            args.temperature(t);
        }
        if !tools.is_empty() {
            args.tools(to_openai_tools(tools));
        }
        let request = args.build().map_err(invalid_request)?;

        tracing::debug!(model = %self.model, messages = messages.len(), tools = tools.len(), "chat completion request");
        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(classify_error)?;

        // 提取 token 使用统计
        if let Some(usage) = &response.usage {
            self.usage.add(
                usage.prompt_tokens as u64,
                usage.completion_tokens as u64,
            );
        }

        let choice = response
            .choices
            .first()
            .ok_or_else(|| LlmError::InvalidResponse("response contained no choices".to_string()))?;
        Ok(reply_from_message(&choice.message))
    }
}
