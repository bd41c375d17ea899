//! 可观测性：tracing 日志初始化
//!
//! 默认 info，可通过 RUST_LOG 覆盖。TUI 占用 stdout，因此只写日志文件；
//! 一次性命令行同时写 stderr 与日志文件。

use std::fs::{self, File, OpenOptions};
use std::path::Path;
use std::sync::Mutex;

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub const TUI_LOG_FILE: &str = "logs/toolchat.log";
pub const ASK_LOG_FILE: &str = "logs/toolchat-ask.log";

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

fn open_log_file(path: &Path) -> std::io::Result<File> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }
    OpenOptions::new().create(true).append(true).open(path)
}

/// 只写文件（TUI）
pub fn init_file_only(path: impl AsRef<Path>) -> std::io::Result<()> {
    let file = open_log_file(path.as_ref())?;
    tracing_subscriber::registry()
        .with(env_filter())
        .with(fmt::layer().with_writer(Mutex::new(file)).with_ansi(false))
        .init();
    Ok(())
}

/// stderr + 文件（命令行）
pub fn init_stderr_and_file(path: impl AsRef<Path>) -> std::io::Result<()> {
    let file = open_log_file(path.as_ref())?;
    tracing_subscriber::registry()
        .with(env_filter())
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(fmt::layer().with_writer(Mutex::new(file)).with_ansi(false))
        .init();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_file_created_with_parent_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("toolchat.log");
        open_log_file(&path).unwrap();
        assert!(path.exists());
    }
}
