//! toolchat-ask - 一次性命令行客户端
//!
//! 用法：toolchat-ask ["What is 25 + 17?"]
//! 连接配置中的工具服务器，跑一个轮次并打印最终回复；失败时退出码为 1。
//! 配置文件路径可用 TOOLCHAT_CONFIG 指定。

use std::path::PathBuf;

use anyhow::Context;
use toolchat::agent::{build_headless, process_message};
use toolchat::observability;

const DEFAULT_PROMPT: &str = "What is 25 + 17?";

async fn run(prompt: &str) -> anyhow::Result<String> {
    let config_path = std::env::var("TOOLCHAT_CONFIG").ok().map(PathBuf::from);
    let mut agent = build_headless(config_path)
        .await
        .context("Failed to initialize")?;
    tracing::info!(
        session = %agent.session.id,
        tools = ?agent.orchestrator.tool_specs().iter().map(|t| t.name.as_str()).collect::<Vec<_>>(),
        "ready"
    );
    let reply = process_message(&mut agent, prompt)
        .await
        .context("Turn failed")?;
    Ok(reply)
}

#[tokio::main]
async fn main() {
    if let Err(e) = observability::init_stderr_and_file(observability::ASK_LOG_FILE) {
        eprintln!("warning: file logging disabled: {}", e);
    }

    let args: Vec<String> = std::env::args().skip(1).collect();
    let prompt = if args.is_empty() {
        DEFAULT_PROMPT.to_string()
    } else {
        args.join(" ")
    };

    match run(&prompt).await {
        Ok(reply) => println!("{}", reply),
        Err(e) => {
            tracing::error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            std::process::exit(1);
        }
    }
}
