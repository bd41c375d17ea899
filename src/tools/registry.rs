//! 工具注册表
//!
//! 所有工具实现 Tool trait（name / description / parameters_schema / call），启动时由发现协作者
//! 一次性构建为 ToolRegistry，之后只读；ToolDispatcher 在调度时按名查找。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::core::ChatError;

/// 工具 trait：名称、描述（供 LLM 理解）、参数 schema、异步调用（args 为 JSON）。
/// 同步工具与异步工具统一为「可能挂起」的 call，调用方无需区分执行方式。
#[async_trait]
pub trait Tool: Send + Sync {
    /// 工具名称（注册表内唯一）
    fn name(&self) -> &str;

    /// 工具描述（供 LLM 理解功能）
    fn description(&self) -> &str;

    /// 参数 JSON Schema；默认空对象，表示无参数或参数格式不限
    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {},
            "required": []
        })
    }

    /// 原生异步实现为 true；包装同步闭包的工具返回 false（仅用于日志，调度方式不变）
    fn is_asynchronous(&self) -> bool {
        true
    }

    /// 串行通道：共用一条连接的工具返回同一把锁，调度器拿到锁之后才开始计时；默认无
    fn call_lane(&self) -> Option<CallLane> {
        None
    }

    /// 调用工具：成功返回结构化值，失败返回错误描述
    async fn call(&self, args: Value) -> Result<Value, String>;
}

/// 同一时刻只允许一个调用在途的共享通道（如一条 stdio 连接）
pub type CallLane = Arc<tokio::sync::Mutex<()>>;

/// 绑定给模型的工具描述
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ToolLookupError {
    #[error("unknown tool '{0}'")]
    NotFound(String),
}

/// 工具注册表：按发现顺序保存 Arc<dyn Tool>，名称唯一；重名在构建时即报错
#[derive(Default)]
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
    by_name: HashMap<String, usize>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 从发现结果一次性构建；遇到重名工具返回 DuplicateTool
    pub fn from_tools<I>(tools: I) -> Result<Self, ChatError>
    where
        I: IntoIterator<Item = Arc<dyn Tool>>,
    {
        let mut registry = Self::new();
        for tool in tools {
            registry.register(tool)?;
        }
        Ok(registry)
    }

    fn register(&mut self, tool: Arc<dyn Tool>) -> Result<(), ChatError> {
        let name = tool.name().to_string();
        if self.by_name.contains_key(&name) {
            return Err(ChatError::DuplicateTool(name));
        }
        self.by_name.insert(name, self.tools.len());
        self.tools.push(tool);
        Ok(())
    }

    pub fn lookup(&self, name: &str) -> Result<Arc<dyn Tool>, ToolLookupError> {
        self.by_name
            .get(name)
            .map(|&idx| Arc::clone(&self.tools[idx]))
            .ok_or_else(|| ToolLookupError::NotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.tools.iter().map(|t| t.name().to_string()).collect()
    }

    /// 绑定给模型的工具列表（保持发现顺序）
    pub fn specs(&self) -> Vec<ToolSpec> {
        self.tools
            .iter()
            .map(|tool| ToolSpec {
                name: tool.name().to_string(),
                description: tool.description().to_string(),
                parameters: tool.parameters_schema(),
            })
            .collect()
    }
}
