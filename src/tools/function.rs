//! 闭包工具：把进程内函数包装成 Tool
//!
//! FnTool 包装异步闭包；BlockingFnTool 包装同步闭包并放到 spawn_blocking 执行，
//! 两者对外都是同一个可挂起的 call，编排器不需要区分工具的执行方式。

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::tools::{parameters_schema_for, Tool};

type AsyncHandler = Box<dyn Fn(Value) -> BoxFuture<'static, Result<Value, String>> + Send + Sync>;
type BlockingHandler = Arc<dyn Fn(Value) -> Result<Value, String> + Send + Sync>;

fn empty_schema() -> Value {
    serde_json::json!({ "type": "object", "properties": {}, "required": [] })
}

/// 异步闭包工具
pub struct FnTool {
    name: String,
    description: String,
    parameters: Value,
    handler: AsyncHandler,
}

impl FnTool {
    pub fn new<F, Fut>(name: impl Into<String>, description: impl Into<String>, f: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, String>> + Send + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: empty_schema(),
            handler: Box::new(move |args| Box::pin(f(args))),
        }
    }

    /// 强类型参数：按 A 反序列化 args（失败即工具错误），并用 A 的 JsonSchema 作为 parameters
    pub fn typed<A, F, Fut>(name: impl Into<String>, description: impl Into<String>, f: F) -> Self
    where
        A: DeserializeOwned + JsonSchema + Send + 'static,
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, String>> + Send + 'static,
    {
        let f = Arc::new(f);
        let tool = Self::new(name, description, move |args: Value| {
            let f = Arc::clone(&f);
            async move {
                let parsed: A = serde_json::from_value(args)
                    .map_err(|e| format!("invalid arguments: {e}"))?;
                f(parsed).await
            }
        });
        tool.with_parameters(parameters_schema_for::<A>())
    }

    pub fn with_parameters(mut self, schema: Value) -> Self {
        self.parameters = schema;
        self
    }
}

#[async_trait]
impl Tool for FnTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters_schema(&self) -> Value {
        self.parameters.clone()
    }

    async fn call(&self, args: Value) -> Result<Value, String> {
        (self.handler)(args).await
    }
}

/// 同步闭包工具：在阻塞线程池执行，不占用异步工作线程
pub struct BlockingFnTool {
    name: String,
    description: String,
    parameters: Value,
    handler: BlockingHandler,
}

impl BlockingFnTool {
    pub fn new<F>(name: impl Into<String>, description: impl Into<String>, f: F) -> Self
    where
        F: Fn(Value) -> Result<Value, String> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: empty_schema(),
            handler: Arc::new(f),
        }
    }

    pub fn with_parameters(mut self, schema: Value) -> Self {
        self.parameters = schema;
        self
    }
}

#[async_trait]
impl Tool for BlockingFnTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters_schema(&self) -> Value {
        self.parameters.clone()
    }

    fn is_asynchronous(&self) -> bool {
        false
    }

    async fn call(&self, args: Value) -> Result<Value, String> {
        let handler = Arc::clone(&self.handler);
        tokio::task::spawn_blocking(move || handler(args))
            .await
            .map_err(|e| format!("blocking tool '{}' failed: {}", self.name, e))?
    }
}
