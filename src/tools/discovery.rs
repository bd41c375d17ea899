//! 工具发现协作者
//!
//! 启动时调用一次，返回按顺序排列的工具集合；失败对会话启动是致命的。

use std::sync::Arc;

use async_trait::async_trait;

use crate::core::ChatError;
use crate::tools::Tool;

#[async_trait]
pub trait ToolDiscovery: Send + Sync {
    /// 枚举全部可用工具（顺序即绑定给模型的顺序）
    async fn discover(&self) -> Result<Vec<Arc<dyn Tool>>, ChatError>;
}

/// 预先构建好的进程内工具（测试、mock 后端）
#[derive(Default, Clone)]
pub struct StaticDiscovery {
    tools: Vec<Arc<dyn Tool>>,
}

impl StaticDiscovery {
    pub fn new(tools: Vec<Arc<dyn Tool>>) -> Self {
        Self { tools }
    }

    pub fn with_tool(mut self, tool: impl Tool + 'static) -> Self {
        self.tools.push(Arc::new(tool));
        self
    }
}

#[async_trait]
impl ToolDiscovery for StaticDiscovery {
    async fn discover(&self) -> Result<Vec<Arc<dyn Tool>>, ChatError> {
        tracing::debug!(count = self.tools.len(), "static tool discovery");
        Ok(self.tools.clone())
    }
}
