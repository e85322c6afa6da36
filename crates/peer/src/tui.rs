use std::collections::VecDeque;

use ratatui::Frame;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Paragraph};

use tether::{LinkStats, PeerEvent, PeerState};

const MAX_LOG_LINES: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    Warn,
    Sent,
    Received,
}

#[derive(Debug, Clone)]
pub struct LogLine {
    pub level: LogLevel,
    pub text: String,
}

pub struct PeerView {
    pub role: String,
    pub endpoint: String,
    pub state: PeerState,
    pub remote: Option<String>,
    pub stats: LinkStats,
}

#[derive(Default)]
pub struct TuiState {
    log: VecDeque<LogLine>,
    input: String,
    scroll: usize,
}

impl TuiState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn log_info(&mut self, text: impl Into<String>) {
        self.push(LogLevel::Info, text.into());
    }

    pub fn log_warn(&mut self, text: impl Into<String>) {
        self.push(LogLevel::Warn, text.into());
    }

    pub fn log_sent(&mut self, text: impl Into<String>) {
        self.push(LogLevel::Sent, text.into());
    }

    pub fn log_received(&mut self, text: impl Into<String>) {
        self.push(LogLevel::Received, text.into());
    }

    /// Library events stand in for log output while the terminal is in raw mode.
    pub fn log_event(&mut self, event: PeerEvent) {
        if event.is_problem() {
            self.log_warn(event.to_string());
        } else {
            self.log_info(event.to_string());
        }
    }

    fn push(&mut self, level: LogLevel, text: String) {
        if self.log.len() >= MAX_LOG_LINES {
            self.log.pop_front();
        }
        self.log.push_back(LogLine { level, text });
    }

    pub fn input(&self) -> &str {
        &self.input
    }

    pub fn push_char(&mut self, ch: char) {
        self.input.push(ch);
    }

    pub fn backspace(&mut self) {
        self.input.pop();
    }

    pub fn take_input(&mut self) -> Option<String> {
        let line = std::mem::take(&mut self.input);
        let trimmed = line.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    }

    pub fn scroll_up(&mut self) {
        self.scroll = (self.scroll + 5).min(self.log.len().saturating_sub(1));
    }

    pub fn scroll_down(&mut self) {
        self.scroll = self.scroll.saturating_sub(5);
    }

    pub fn scroll_to_bottom(&mut self) {
        self.scroll = 0;
    }
}

pub fn render(frame: &mut Frame, state: &TuiState, view: &PeerView) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .margin(1)
        .constraints([
            Constraint::Length(3),
            Constraint::Length(4),
            Constraint::Min(3),
            Constraint::Length(3),
        ])
        .split(frame.area());

    render_header(frame, chunks[0], view);
    render_traffic(frame, chunks[1], &view.stats);
    render_log(frame, chunks[2], state);
    render_input(frame, chunks[3], state);
}

fn render_header(frame: &mut Frame, area: Rect, view: &PeerView) {
    let title = format!(" Tether {} - {} ", view.role, view.endpoint);
    let block = Block::default()
        .title(title)
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Cyan));

    let state_color = match view.state {
        PeerState::Connected => Color::Green,
        PeerState::Listening | PeerState::Connecting => Color::Yellow,
        PeerState::ReadyToConnect | PeerState::Uninitialized => Color::Red,
    };

    let mut spans = vec![
        Span::styled("State: ", Style::default().fg(Color::Gray)),
        Span::styled(view.state.to_string(), Style::default().fg(state_color)),
    ];
    if let Some(remote) = &view.remote {
        spans.push(Span::styled("  |  Peer: ", Style::default().fg(Color::Gray)));
        spans.push(Span::styled(remote.clone(), Style::default().fg(Color::White)));
    }

    frame.render_widget(Paragraph::new(Line::from(spans)).block(block), area);
}

fn render_traffic(frame: &mut Frame, area: Rect, stats: &LinkStats) {
    let block = Block::default()
        .title(" Traffic ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Yellow));

    let lines = vec![
        Line::from(vec![
            Span::styled("Commands: ", Style::default().fg(Color::Gray)),
            Span::styled(
                format!(
                    "{} sent / {} recv / {} dropped",
                    stats.messages_sent, stats.messages_received, stats.messages_dropped
                ),
                Style::default().fg(Color::White),
            ),
        ]),
        Line::from(vec![
            Span::styled("Bytes: ", Style::default().fg(Color::Gray)),
            Span::styled(
                format!(
                    "{} sent / {} recv  |  Connections: {}",
                    format_bytes(stats.bytes_sent),
                    format_bytes(stats.bytes_received),
                    stats.connections
                ),
                Style::default().fg(Color::White),
            ),
        ]),
    ];

    frame.render_widget(Paragraph::new(lines).block(block), area);
}

fn render_log(frame: &mut Frame, area: Rect, state: &TuiState) {
    let block = Block::default()
        .title(" Events ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Green));

    let visible = area.height.saturating_sub(2) as usize;
    let end = state.log.len().saturating_sub(state.scroll);
    let start = end.saturating_sub(visible);

    let lines: Vec<Line> = state
        .log
        .range(start..end)
        .map(|line| {
            let (prefix, color) = match line.level {
                LogLevel::Info => ("  ", Color::White),
                LogLevel::Warn => ("! ", Color::Red),
                LogLevel::Sent => ("> ", Color::Cyan),
                LogLevel::Received => ("< ", Color::Green),
            };
            Line::from(Span::styled(
                format!("{}{}", prefix, line.text),
                Style::default().fg(color),
            ))
        })
        .collect();

    frame.render_widget(Paragraph::new(lines).block(block), area);
}

fn render_input(frame: &mut Frame, area: Rect, state: &TuiState) {
    let block = Block::default()
        .title(" Command (Enter to send, PgUp/PgDn scroll, Esc to quit) ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::DarkGray));

    let text = Paragraph::new(format!("{}_", state.input()))
        .block(block)
        .style(Style::default().fg(Color::White).add_modifier(Modifier::BOLD));

    frame.render_widget(text, area);
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{}B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1}KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1}MB", bytes as f64 / (1024.0 * 1024.0))
    }
}
