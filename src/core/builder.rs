//! 运行时构建器：配置 → LLM 客户端 → 工具发现 → 注册表 → 调度器 → 编排器
//!
//! TUI 与一次性命令行共用同一套初始化逻辑；任何一步失败都以 ChatError 返回，并指明失败的前置条件。

use std::sync::Arc;
use std::time::Duration;

use crate::config::AppConfig;
use crate::core::{ChatError, ConversationOrchestrator};
use crate::llm::{create_gemini_client, LlmClient, MockLlmClient, OpenAiClient, RetryingLlmClient};
use crate::tools::{
    builtin_tools, McpDiscovery, StaticDiscovery, ToolDiscovery, ToolDispatcher, ToolRegistry,
};

/// 构建完成的运行时组件
pub struct Runtime {
    pub llm: Arc<dyn LlmClient>,
    pub registry: Arc<ToolRegistry>,
    pub orchestrator: ConversationOrchestrator,
}

/// 运行时构建器：默认按配置选择 LLM 与工具发现方式，测试可替换任意一项
pub struct RuntimeBuilder {
    config: AppConfig,
    llm: Option<Arc<dyn LlmClient>>,
    discovery: Option<Box<dyn ToolDiscovery>>,
}

impl RuntimeBuilder {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            llm: None,
            discovery: None,
        }
    }

    /// 替换 LLM 客户端（不经过重试装饰）
    pub fn with_llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.llm = Some(llm);
        self
    }

    pub fn with_discovery(mut self, discovery: impl ToolDiscovery + 'static) -> Self {
        self.discovery = Some(Box::new(discovery));
        self
    }

    pub async fn build(self) -> Result<Runtime, ChatError> {
        let llm = match self.llm {
            Some(llm) => llm,
            None => create_llm_from_config(&self.config)?,
        };
        let discovery = match self.discovery {
            Some(d) => d,
            None => create_discovery_from_config(&self.config),
        };

        let tools = discovery.discover().await?;
        let registry = Arc::new(ToolRegistry::from_tools(tools)?);
        tracing::info!(tools = ?registry.tool_names(), "tool registry built");

        let dispatcher = ToolDispatcher::with_concurrency(
            Arc::clone(&registry),
            Duration::from_secs(self.config.tools.call_timeout_secs.max(1)),
            self.config.tools.max_concurrent,
        );
        let orchestrator = ConversationOrchestrator::new(Arc::clone(&llm), dispatcher);
        Ok(Runtime {
            llm,
            registry,
            orchestrator,
        })
    }
}

/// 按配置构建运行时
pub async fn build_runtime(config: &AppConfig) -> Result<Runtime, ChatError> {
    RuntimeBuilder::new(config.clone()).build().await
}

/// 根据配置选择 LLM 后端（Gemini / OpenAI 兼容 / Mock），真实后端外包重试装饰器
pub fn create_llm_from_config(cfg: &AppConfig) -> Result<Arc<dyn LlmClient>, ChatError> {
    let provider = cfg.llm.provider_name();
    let client: Arc<dyn LlmClient> = match provider.as_str() {
        "mock" => {
            tracing::info!("Using Mock LLM");
            return Ok(Arc::new(MockLlmClient::new()));
        }
        "gemini" => {
            let key = cfg.llm.api_key().ok_or_else(|| {
                ChatError::Configuration(format!(
                    "Environment variable {} not set",
                    cfg.llm.api_key_env()
                ))
            })?;
            let mut client = match &cfg.llm.base_url {
                Some(base) => OpenAiClient::new(
                    Some(base.as_str()),
                    cfg.llm.model.as_deref().unwrap_or(crate::llm::GEMINI_FLASH),
                    Some(&key),
                ),
                None => create_gemini_client(cfg.llm.model.as_deref(), Some(&key)),
            };
            client = client.with_temperature(cfg.llm.temperature);
            tracing::info!("Using Gemini LLM ({})", client.model());
            Arc::new(client)
        }
        "openai" => {
            let key = cfg.llm.api_key().ok_or_else(|| {
                ChatError::Configuration(format!(
                    "Environment variable {} not set",
                    cfg.llm.api_key_env()
                ))
            })?;
            let model = cfg.llm.model.clone().unwrap_or_else(|| "gpt-4o-mini".to_string());
            tracing::info!("Using OpenAI LLM ({})", model);
            Arc::new(
                OpenAiClient::new(cfg.llm.base_url.as_deref(), &model, Some(&key))
                    .with_temperature(cfg.llm.temperature),
            )
        }
        other => {
            return Err(ChatError::Configuration(format!(
                "unknown llm.provider '{}'",
                other
            )))
        }
    };
    Ok(Arc::new(RetryingLlmClient::new(client, cfg.llm.retry.clone())))
}

/// mock 后端且未配置服务器时使用进程内演示工具；否则连接所有启用的 MCP 服务器
pub fn create_discovery_from_config(cfg: &AppConfig) -> Box<dyn ToolDiscovery> {
    let servers = cfg.enabled_servers();
    if servers.is_empty() && cfg.llm.is_mock() {
        tracing::info!("No tool servers configured, using built-in tools");
        return Box::new(StaticDiscovery::new(builtin_tools()));
    }
    Box::new(McpDiscovery::new(servers))
}
