//! Status bar rendering.

use ratatui::{
    Frame,
    layout::Rect,
    text::{Line, Span},
    widgets::Paragraph,
};

use super::theme;
use crate::app::App;
use crate::transport::manager::LinkStatus;

const HELP: &str = "Enter: send | /open <id>: switch chat | Ctrl-R: reconnect | Esc: quit";

/// Render the status bar at the bottom of the screen.
pub fn render(frame: &mut Frame, area: Rect, app: &App) {
    let (dot_color, status_text) = match app.link {
        Some(LinkStatus::Connected) => (theme::SUCCESS, LinkStatus::Connected.to_string()),
        Some(status @ (LinkStatus::Connecting | LinkStatus::Reconnecting { .. })) => {
            (theme::WARNING, format!("{status}..."))
        }
        Some(LinkStatus::Offline) => (theme::ERROR, "Offline (Ctrl-R to retry)".to_string()),
        None => (theme::FG_SECONDARY, "No chat open".to_string()),
    };

    let mut spans = vec![
        Span::styled("MentorLink", theme::bold()),
        Span::raw(" | "),
        Span::styled("●", theme::normal().fg(dot_color)),
        Span::raw(format!(" {status_text}")),
        Span::raw(" | "),
    ];
    match app.last_notice() {
        Some(notice) => spans.push(Span::styled(notice, theme::normal())),
        None => spans.push(Span::styled(HELP, theme::dimmed())),
    }

    let paragraph = Paragraph::new(Line::from(spans)).style(theme::status_bar_bg());
    frame.render_widget(paragraph, area);
}
