//! Chat panel rendering (header, message list, input box).

use ratatui::{
    Frame,
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    text::{Line, Span},
    widgets::{Block, Borders, List, ListItem, ListState, Paragraph},
};

use super::theme;
use crate::app::{App, DisplayMessage, NOT_SENT_FOOTER};

/// Render the chat panel.
pub fn render(frame: &mut Frame, area: Rect, app: &App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Min(3),
            Constraint::Length(3),
        ])
        .split(area);

    render_header(frame, chunks[0], app);
    render_messages(frame, chunks[1], app);
    render_input(frame, chunks[2], app);
}

fn render_header(frame: &mut Frame, area: Rect, app: &App) {
    let title = Paragraph::new(Line::from(Span::styled(app.header(), theme::highlighted())))
        .block(Block::default().borders(Borders::ALL));
    frame.render_widget(title, area);
}

/// Render the message list, own messages right-aligned.
fn render_messages(frame: &mut Frame, area: Rect, app: &App) {
    let items: Vec<ListItem> = app.messages.iter().map(message_item).collect();

    let mut state = ListState::default();
    if !app.messages.is_empty() {
        state.select(Some(app.message_scroll));
    }

    let list = List::new(items).block(Block::default().borders(Borders::LEFT | Borders::RIGHT));
    frame.render_stateful_widget(list, area, &mut state);
}

fn message_item(msg: &DisplayMessage) -> ListItem<'_> {
    let alignment = if msg.is_own {
        Alignment::Right
    } else {
        Alignment::Left
    };
    let footer_style = if msg.footer == NOT_SENT_FOOTER {
        theme::failed()
    } else {
        theme::dimmed()
    };

    let lines = vec![
        Line::from(vec![
            Span::styled(msg.sender.as_str(), theme::bold()),
            Span::raw(" "),
            Span::styled(msg.timestamp.as_str(), theme::dimmed()),
        ])
        .alignment(alignment),
        Line::from(Span::styled(
            format!(" {} ", msg.content),
            theme::bubble(msg.is_own),
        ))
        .alignment(alignment),
        Line::from(Span::styled(msg.footer, footer_style)).alignment(alignment),
    ];
    ListItem::new(lines)
}

/// Render the input box.
fn render_input(frame: &mut Frame, area: Rect, app: &App) {
    let mut display_text = app.input.clone();
    let cursor = display_text
        .char_indices()
        .nth(app.cursor_position)
        .map_or(display_text.len(), |(i, _)| i);
    display_text.insert(cursor, '█');

    let input_line = if app.input.is_empty() {
        Line::from(vec![
            Span::styled("█", theme::normal()),
            Span::styled("Type your message...", theme::dimmed()),
        ])
    } else {
        Line::from(Span::styled(display_text, theme::normal()))
    };

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(theme::highlighted());

    frame.render_widget(Paragraph::new(input_line).block(block), area);
}
