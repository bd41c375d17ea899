//! toolchat - 工具增强对话 TUI
//!
//! 入口：初始化日志（写入 logs/toolchat.log）、创建会话编排器与 TUI，并运行主循环。
//! 用法：toolchat [config.toml]

use std::path::PathBuf;

use anyhow::Context;
use toolchat::{config::load_config, core::create_agent, observability, ui::run_app};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init_file_only(observability::TUI_LOG_FILE)
        .context("Failed to open log file")?;

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let title = load_config(config_path.clone())
        .map(|c| c.app.title)
        .context("Failed to load configuration")?;

    // 启动前置条件（凭据、服务器、工具发现）失败时直接退出，不进入 TUI
    let (cmd_tx, state_rx) = create_agent(config_path)
        .await
        .context("Failed to start chat session")?;

    run_app(title, state_rx, cmd_tx)
        .await
        .context("App run failed")?;

    Ok(())
}
