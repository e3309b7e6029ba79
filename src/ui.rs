use ratatui::{
    Frame,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Clear, Paragraph, Scrollbar, ScrollbarOrientation, ScrollbarState, Wrap},
};

use crate::app::{AppState, InputMode};
use crate::follow::FollowState;
use crate::record::Level;
use crate::render::{DisplayLine, FragmentKind};

/// Draw the entire UI
pub fn draw(frame: &mut Frame, state: &mut AppState) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(1), // Header
            Constraint::Min(3),    // Log view
            Constraint::Length(1), // Status bar
            Constraint::Length(1), // Search bar
        ])
        .split(frame.area());

    draw_header(frame, state, chunks[0]);
    draw_log_view(frame, state, chunks[1]);
    draw_status_bar(frame, state, chunks[2]);
    draw_search_bar(frame, state, chunks[3]);

    if state.show_help {
        draw_help_overlay(frame);
    }
}

/// Draw the header showing the stream and the level selector
fn draw_header(frame: &mut Frame, state: &AppState, area: Rect) {
    let threshold = state.session.threshold();
    let mut spans = vec![
        Span::styled(" longtail ", Style::default().fg(Color::Green).add_modifier(Modifier::BOLD)),
        Span::raw("| "),
        Span::styled(state.session.stream_name(), Style::default().fg(Color::Cyan)),
        Span::raw(" | "),
    ];

    for (i, level) in Level::ALL.iter().enumerate() {
        let label = format!("{}:{} ", i + 1, level.as_str());
        let style = if *level == threshold {
            Style::default().fg(level.color()).add_modifier(Modifier::BOLD | Modifier::REVERSED)
        } else {
            Style::default().fg(Color::Gray)
        };
        spans.push(Span::styled(label, style));
    }

    let header = Paragraph::new(Line::from(spans)).style(Style::default().bg(Color::DarkGray));
    frame.render_widget(header, area);
}

fn fragment_style(kind: FragmentKind, level: Level) -> Style {
    match kind {
        FragmentKind::Id => Style::default().fg(Color::DarkGray),
        FragmentKind::Time => Style::default().fg(Color::Cyan),
        FragmentKind::Level => Style::default().fg(level.color()).add_modifier(Modifier::BOLD),
        FragmentKind::Message => Style::default(),
        FragmentKind::Error => Style::default().fg(Color::Red),
        FragmentKind::FieldKey => Style::default().fg(Color::DarkGray),
        FragmentKind::FieldValue => Style::default().fg(Color::Magenta),
    }
}

/// Convert a display line to styled spans
fn to_line(line: &DisplayLine) -> Line<'static> {
    let highlight = Style::default().bg(Color::Yellow).fg(Color::Black);
    let mut spans = Vec::new();

    for fragment in &line.fragments {
        if fragment.kind.spaced() && !spans.is_empty() {
            spans.push(Span::raw(" "));
        }
        let style = fragment_style(fragment.kind, line.level);
        for segment in &fragment.segments {
            let style = if segment.emphasized { highlight } else { style };
            spans.push(Span::styled(segment.text.clone(), style));
        }
    }
    Line::from(spans)
}

/// Draw the main log view
fn draw_log_view(frame: &mut Frame, state: &mut AppState, area: Rect) {
    let block = Block::default();
    let inner = block.inner(area);
    frame.render_widget(block, area);

    let wrap = state.session.line_wrap();
    state.view.set_geometry(inner.width, inner.height as usize, wrap);
    if inner.height == 0 {
        return;
    }

    let (window, offset) = state.view.window();
    let lines: Vec<Line> = window.iter().map(to_line).collect();
    let mut paragraph = Paragraph::new(lines);
    if wrap {
        paragraph = paragraph.wrap(Wrap { trim: false });
    }
    // Rows of the first line that sit above the viewport
    paragraph = paragraph.scroll((u16::try_from(offset).unwrap_or(u16::MAX), 0));
    frame.render_widget(paragraph, inner);

    let (visible, buffered) = state.line_counts();
    if state.view.total_rows() > state.view.height {
        let scrollbar = Scrollbar::new(ScrollbarOrientation::VerticalRight)
            .begin_symbol(Some("▲"))
            .end_symbol(Some("▼"));
        let mut scrollbar_state =
            ScrollbarState::new(state.view.max_scroll()).position(state.view.scroll);
        frame.render_stateful_widget(scrollbar, area, &mut scrollbar_state);
    }

    if buffered == 0 {
        let msg = Paragraph::new("Waiting for log records...").style(Style::default().fg(Color::DarkGray));
        frame.render_widget(msg, inner);
    } else if visible == 0 {
        let msg = Paragraph::new("No records at or above the selected level")
            .style(Style::default().fg(Color::Yellow));
        frame.render_widget(msg, inner);
    }
}

/// Draw the status bar
fn draw_status_bar(frame: &mut Frame, state: &AppState, area: Rect) {
    let (visible, buffered) = state.line_counts();

    let mode_str = match state.mode {
        InputMode::Normal => "NORMAL",
        InputMode::SearchEditing => "SEARCH",
    };

    let (link_str, link_style) = if state.session.is_connected() {
        ("● live", Style::default().fg(Color::Green))
    } else {
        ("○ reconnecting", Style::default().fg(Color::Red))
    };

    let follow_indicator = match state.session.follow_state() {
        FollowState::Following => "[F]",
        FollowState::Paused => "[P]",
    };
    let regex_indicator = if state.search_is_regex { "[.*]" } else { "" };
    let wrap_indicator = if state.session.line_wrap() { "[W]" } else { "" };

    let indicators: Vec<&str> = [follow_indicator, regex_indicator, wrap_indicator]
        .iter()
        .filter(|s| !s.is_empty())
        .copied()
        .collect();

    let search = state.session.search();
    let search_str = if search.is_empty() {
        String::new()
    } else {
        format!(" | search: {}", search.pattern)
    };

    let help_text = match state.mode {
        InputMode::SearchEditing => " Enter:apply  Esc:cancel  Ctrl+r:regex ",
        InputMode::Normal => " ?:help  1-4:level  f:follow  w:wrap ",
    };

    let status = Line::from(vec![
        Span::styled(format!(" {} ", mode_str), Style::default().bg(Color::Blue).fg(Color::White)),
        Span::styled(format!(" {} ", link_str), link_style),
        Span::raw(format!(
            "{}/{} of {} records {}{} ",
            visible,
            buffered,
            state.session.max_buffer(),
            indicators.join(" "),
            search_str
        )),
        Span::styled(help_text, Style::default().fg(Color::DarkGray)),
    ]);

    let paragraph = Paragraph::new(status).style(Style::default().bg(Color::Black));
    frame.render_widget(paragraph, area);
}

/// Draw the search input bar
fn draw_search_bar(frame: &mut Frame, state: &AppState, area: Rect) {
    match state.mode {
        InputMode::SearchEditing => {
            let chunks = Layout::default()
                .direction(Direction::Horizontal)
                .constraints([
                    Constraint::Length(1), // "/" prefix
                    Constraint::Min(1),    // textarea
                ])
                .split(area);

            let prefix = Paragraph::new("/").style(Style::default().fg(Color::Yellow));
            frame.render_widget(prefix, chunks[0]);
            frame.render_widget(&state.search_textarea, chunks[1]);
        }
        InputMode::Normal => {
            if let Some(msg) = &state.status_message {
                let content = Line::from(Span::styled(msg.as_str(), Style::default().fg(Color::Yellow)));
                frame.render_widget(Paragraph::new(content), area);
            }
        }
    }
}

/// Draw the help overlay
fn draw_help_overlay(frame: &mut Frame) {
    let area = frame.area();

    let width = 50.min(area.width.saturating_sub(4));
    let height = 24.min(area.height.saturating_sub(4));
    let x = (area.width - width) / 2;
    let y = (area.height - height) / 2;
    let help_area = Rect::new(x, y, width, height);

    frame.render_widget(Clear, help_area);

    let help_text = vec![
        Line::from(Span::styled("Keyboard Shortcuts", Style::default().add_modifier(Modifier::BOLD))),
        Line::from(""),
        Line::from("Navigation:"),
        Line::from("  j/k, ↑/↓     Scroll up/down"),
        Line::from("  g/G          Go to top/bottom (G resumes follow)"),
        Line::from("  PgUp/PgDn    Page up/down"),
        Line::from("  Mouse wheel  Scroll (pauses follow)"),
        Line::from("  f            Toggle follow"),
        Line::from(""),
        Line::from("Levels:"),
        Line::from("  1 2 3 4      debug / info / warn / error and up"),
        Line::from(""),
        Line::from("Search:"),
        Line::from("  /            Start search input"),
        Line::from("  r            Toggle regex mode"),
        Line::from("  Esc          Clear search"),
        Line::from(""),
        Line::from("Display:"),
        Line::from("  w            Toggle line wrapping"),
        Line::from("  x            Clear records"),
        Line::from("  ?            Toggle this help"),
        Line::from("  q            Quit"),
    ];

    let block = Block::bordered()
        .title(" Help ")
        .border_style(Style::default().fg(Color::Cyan))
        .style(Style::default().bg(Color::Black));

    frame.render_widget(Paragraph::new(help_text).block(block), help_area);
}
