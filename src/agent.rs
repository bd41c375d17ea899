//! Headless Agent 运行时
//!
//! 供非 TUI 前端（一次性命令行）调用的无界面逻辑：build_headless 构建编排器与会话，
//! process_message 对单条用户输入跑一个轮次并返回最终回复。

use std::path::PathBuf;

use crate::config::{load_config, validate_config, AppConfig};
use crate::core::{build_runtime, ChatError, ConversationOrchestrator};
use crate::memory::ChatSession;

/// 预构建的 Agent：编排器 + 一个会话
pub struct HeadlessAgent {
    pub orchestrator: ConversationOrchestrator,
    pub session: ChatSession,
    pub config: AppConfig,
}

/// 加载并校验配置，构建运行时；任何启动前置条件失败都直接返回
pub async fn build_headless(config_path: Option<PathBuf>) -> Result<HeadlessAgent, ChatError> {
    let config = load_config(config_path)?;
    validate_config(&config)?;
    let runtime = build_runtime(&config).await?;
    let session = ChatSession::new(config.app.system_prompt.clone());
    Ok(HeadlessAgent {
        orchestrator: runtime.orchestrator,
        session,
        config,
    })
}

/// 处理单条用户消息：跑一个轮次，返回最终回复文本
pub async fn process_message(agent: &mut HeadlessAgent, user_input: &str) -> Result<String, ChatError> {
    let outcome = agent
        .orchestrator
        .run_turn(&mut agent.session, user_input)
        .await?;
    Ok(outcome.reply)
}
