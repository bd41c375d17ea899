//! toolchat - 工具增强对话编排器
//!
//! 模型逐轮决定是否调用外部工具；工具调用并发执行、按请求顺序回填结果，再由模型给出最终回复。
//!
//! 模块划分：
//! - **agent**: 无头运行时（一次性命令行）
//! - **config**: 应用配置加载（TOML + 环境变量，`${VAR:-default}` 展开）
//! - **core**: 错误、轮次状态机、事件、会话监管、运行时构建
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / Gemini / Mock）
//! - **memory**: 对话历史（只追加 + 轮次缓冲）与会话
//! - **observability**: 日志初始化
//! - **tools**: Tool trait、注册表、调度器、工具发现（MCP stdio）
//! - **ui**: Ratatui TUI 界面

pub mod agent;
pub mod config;
pub mod core;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod tools;
pub mod ui;
