//! Theme and styling constants for the TUI.

use ratatui::style::{Color, Modifier, Style};

/// Primary foreground color.
pub const FG_PRIMARY: Color = Color::White;

/// Secondary foreground color (dimmed text).
pub const FG_SECONDARY: Color = Color::Gray;

/// Highlight color for the header and focused input.
pub const HIGHLIGHT: Color = Color::Magenta;

/// Connected indicator color.
pub const SUCCESS: Color = Color::Green;

/// Connecting / reconnecting indicator color.
pub const WARNING: Color = Color::Yellow;

/// Offline indicator and failed-send color.
pub const ERROR: Color = Color::Red;

/// Own message bubble color.
pub const OWN_MESSAGE: Color = Color::Rgb(88, 28, 135);

/// Counterpart message bubble color.
pub const OTHER_MESSAGE: Color = Color::Rgb(55, 65, 81);

/// Normal text style.
#[must_use]
pub fn normal() -> Style {
    Style::default().fg(FG_PRIMARY)
}

/// Dimmed text style (timestamps, footers).
#[must_use]
pub fn dimmed() -> Style {
    Style::default().fg(FG_SECONDARY)
}

/// Bold text style.
#[must_use]
pub fn bold() -> Style {
    Style::default().fg(FG_PRIMARY).add_modifier(Modifier::BOLD)
}

/// Highlighted text style (header, input border).
#[must_use]
pub fn highlighted() -> Style {
    Style::default().fg(HIGHLIGHT).add_modifier(Modifier::BOLD)
}

/// Message body style, by author.
#[must_use]
pub fn bubble(own: bool) -> Style {
    normal().bg(if own { OWN_MESSAGE } else { OTHER_MESSAGE })
}

/// Footer of a message that was not sent.
#[must_use]
pub fn failed() -> Style {
    Style::default().fg(ERROR).add_modifier(Modifier::ITALIC)
}

/// Style for the status bar background (dark background with white foreground).
#[must_use]
pub fn status_bar_bg() -> Style {
    Style::default().fg(Color::White).bg(Color::Rgb(30, 30, 50))
}
