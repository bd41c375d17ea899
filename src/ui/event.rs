//! 事件处理
//!
//! 轮询 crossterm 键盘事件，将 Ctrl+C/Esc/Ctrl+L/Ctrl+Q 转为 Command（Cancel/Clear/Quit），
//! 其余按键交给 run_app 拼 input_buffer，Enter 时 send_submit。

use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use tokio::sync::mpsc;

use crate::core::Command;

/// 应用事件：来自快捷键的 Command 或原始 KeyEvent
#[derive(Debug, Clone)]
pub enum AppEvent {
    Command(Command),
    Key(KeyEvent),
}

/// 快捷键映射（不涉及终端 IO）
pub fn map_key(key: KeyEvent) -> AppEvent {
    let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
    match key.code {
        KeyCode::Char('c') if ctrl => AppEvent::Command(Command::Cancel),
        KeyCode::Esc => AppEvent::Command(Command::Cancel),
        KeyCode::Char('l') if ctrl => AppEvent::Command(Command::Clear),
        KeyCode::Char('q') if ctrl => AppEvent::Command(Command::Quit),
        _ => AppEvent::Key(key),
    }
}

/// 事件处理器：持有 cmd_tx，poll 时读键盘并返回 AppEvent，快捷键命令直接转发给编排器
pub struct EventHandler {
    cmd_tx: mpsc::UnboundedSender<Command>,
}

impl EventHandler {
    pub fn new(cmd_tx: mpsc::UnboundedSender<Command>) -> Self {
        Self { cmd_tx }
    }

    pub fn poll(&self) -> anyhow::Result<Option<AppEvent>> {
        if event::poll(std::time::Duration::from_millis(50))? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    let ev = map_key(key);
                    if let AppEvent::Command(cmd) = &ev {
                        let _ = self.cmd_tx.send(cmd.clone());
                    }
                    return Ok(Some(ev));
                }
            }
        }
        Ok(None)
    }

    pub fn send_submit(&self, input: String) {
        let _ = self.cmd_tx.send(Command::Submit(input));
    }
}
