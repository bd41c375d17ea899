//! 界面渲染
//!
//! 根据 UiState（phase、历史快照中的可见消息、未提交输入、error）与 input_buffer 绘制：标题栏显示阶段与正在执行的工具，
//! 主体为对话历史（只有 User 与最终回复，按角色着色、按宽度换行），底部为输入框与快捷键提示。

use chrono::Local;
use ratatui::{
    layout::{Constraint, Direction, Layout},
    style::{Color, Modifier, Style},
    text::{Line, Span, Text},
    widgets::{Block, Borders, Paragraph, Scrollbar, ScrollbarOrientation, ScrollbarState},
    Frame,
};

use crate::core::{AgentPhase, UiState};
use crate::memory::Message;

/// 单条消息在 UI 中显示的最大字符数
const MAX_DISPLAY_CHARS: usize = 2000;

/// 对过长内容做折叠：保留前 N 字 + 省略提示
fn truncate_for_display(content: &str) -> String {
    let count = content.chars().count();
    if count <= MAX_DISPLAY_CHARS {
        return content.to_string();
    }
    let head: String = content.chars().take(MAX_DISPLAY_CHARS).collect();
    format!("{}\n... [已省略，共 {} 字]", head, count)
}

/// 将内容按宽度换行，支持 UTF-8（按字符数，避免在 UTF-8 中间截断）
fn wrap_text(s: &str, width: usize) -> Vec<String> {
    if width == 0 {
        return vec![s.to_string()];
    }
    let mut lines = Vec::new();
    for para in s.split('\n') {
        let mut line = String::new();
        for ch in para.chars() {
            if line.chars().count() >= width {
                lines.push(std::mem::take(&mut line));
            }
            line.push(ch);
        }
        lines.push(line);
    }
    if lines.is_empty() {
        lines.push(String::new());
    }
    lines
}

fn phase_label(state: &UiState) -> String {
    match state.phase {
        AgentPhase::ToolExecuting if !state.active_tools.is_empty() => {
            format!("Running: {}", state.active_tools.join(", "))
        }
        phase => phase.label().to_string(),
    }
}

/// 绘制一帧：上方对话区（标题 + 历史 + 滚动条），下方输入区；将 (总行数, 可视高度) 写入 out 供外部 clamp 滚动
pub fn draw(
    f: &mut Frame,
    title: &str,
    state: &UiState,
    input_buffer: &str,
    conversation_scroll: usize,
    out: &mut (usize, usize),
) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(5), Constraint::Length(5)])
        .split(f.area());

    let conv_area = chunks[0];
    let content_width = conv_area.width.saturating_sub(3) as usize; // 边框 + 滚动条

    let (_, _, total_tokens) = state.token_usage;
    let mut block_title = format!(" {} │ {} ", title, phase_label(state));
    if let Some(started) = state.session_started {
        block_title.push_str(&format!("│ since {} ", started.with_timezone(&Local).format("%H:%M")));
    }
    if total_tokens > 0 {
        block_title.push_str(&format!("│ {} tokens ", total_tokens));
    }
    let block = Block::default()
        .title(block_title)
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Yellow));

    let pending = state.pending_input.as_ref().map(|text| Message::user(text.as_str()));
    let mut text_lines: Vec<Line> = Vec::new();
    for m in state.visible().chain(pending.as_ref()) {
        let (prefix, color) = match m {
            Message::User { .. } => ("You ", Color::Cyan),
            _ => ("AI  ", Color::Green),
        };
        if !text_lines.is_empty() {
            text_lines.push(Line::from(Span::raw("")));
        }
        let display_text = truncate_for_display(&m.text());
        for (i, line) in wrap_text(&display_text, content_width.saturating_sub(4).max(20))
            .into_iter()
            .enumerate()
        {
            let pref = if i == 0 { prefix } else { "    " };
            text_lines.push(Line::from(vec![
                Span::styled(pref, Style::default().fg(color).add_modifier(Modifier::BOLD)),
                Span::raw(line),
            ]));
        }
    }

    let content_height = conv_area.height.saturating_sub(2) as usize;
    let total_lines = text_lines.len();
    let max_scroll = total_lines.saturating_sub(content_height);
    let scroll_offset = conversation_scroll.min(max_scroll);

    let inner = block.inner(conv_area);
    let paragraph = Paragraph::new(Text::from(text_lines))
        .block(block)
        .scroll((scroll_offset as u16, 0));
    f.render_widget(paragraph, conv_area);

    if total_lines > content_height {
        let mut scrollbar_state = ScrollbarState::new(total_lines)
            .position(scroll_offset)
            .viewport_content_length(content_height);
        let scrollbar = Scrollbar::new(ScrollbarOrientation::VerticalRight)
            .thumb_symbol("█")
            .track_symbol(Some("░"));
        f.render_stateful_widget(scrollbar, inner, &mut scrollbar_state);
    }

    let input_prompt = if let Some(err) = &state.error_message {
        format!(" Error: {} ", err.chars().take(60).collect::<String>())
    } else if state.input_locked {
        " Waiting for reply... ".to_string()
    } else {
        " Ask a question ".to_string()
    };
    let border_color = if state.error_message.is_some() {
        Color::Red
    } else {
        Color::Blue
    };

    let hint = " Enter send │ ↑↓ PgUp/PgDn scroll │ Ctrl+C cancel │ Ctrl+L clear │ Ctrl+Q quit ";
    let input_block = Block::default()
        .title(input_prompt)
        .title_bottom(Line::from(Span::styled(hint, Style::default().fg(Color::DarkGray))))
        .borders(Borders::ALL)
        .border_style(Style::default().fg(border_color));

    let input = Paragraph::new(input_buffer)
        .block(input_block)
        .style(if state.input_locked {
            Style::default().fg(Color::DarkGray)
        } else {
            Style::default()
        });
    f.render_widget(input, chunks[1]);

    out.0 = total_lines;
    out.1 = content_height;
}
