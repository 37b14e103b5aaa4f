//! Application state and event handling.
//!
//! [`App`] is plain state: key events produce [`AppAction`]s for the
//! runtime loop to execute against the chat view, and [`SessionEvent`]s
//! published by the mounted session are folded back in with
//! [`App::apply_session_event`].

use chrono::Local;
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};

use crate::chat::session::SessionEvent;
use crate::chat::{ChatMessage, Origin, Participant, ParticipantId, SendStatus};
use crate::transport::manager::LinkStatus;

/// Label used for the local participant's own messages.
pub const SELF_LABEL: &str = "You";

/// Footer shown under every delivered message.
pub const SEEN_FOOTER: &str = "Seen";

/// Footer shown under a local message the transport rejected.
pub const NOT_SENT_FOOTER: &str = "Not sent";

/// Maximum number of notices kept in the notice area.
const MAX_NOTICES: usize = 50;

/// Work the runtime loop must carry out for the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppAction {
    /// Send the text to the mounted session.
    Send(String),
    /// Retry the connection of the mounted session.
    Reconnect,
    /// Switch the chat view to another counterpart.
    Open(ParticipantId),
}

/// A message for display in the chat panel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayMessage {
    /// `"You"` or the sender's full name.
    pub sender: String,
    /// Whether the local participant wrote it.
    pub is_own: bool,
    /// Message content.
    pub content: String,
    /// Local time of the message, formatted for display.
    pub timestamp: String,
    /// Footer line under the message.
    pub footer: &'static str,
}

/// Main application state.
pub struct App {
    /// Current text input.
    pub input: String,
    /// Cursor position in input (character index).
    pub cursor_position: usize,
    /// Messages of the mounted conversation.
    pub messages: Vec<DisplayMessage>,
    /// Scroll offset for message list.
    pub message_scroll: usize,
    /// Counterpart of the mounted conversation.
    pub target: Option<ParticipantId>,
    /// Resolved identity of the counterpart.
    pub counterpart: Participant,
    /// Link status of the mounted session.
    pub link: Option<LinkStatus>,
    /// System notices (errors, status changes).
    pub notices: Vec<String>,
    /// Whether the app should quit.
    pub should_quit: bool,
    local_id: Option<ParticipantId>,
    timestamp_format: String,
}

impl App {
    /// Create an empty application for the given local participant.
    #[must_use]
    pub fn new(local_id: Option<ParticipantId>, timestamp_format: impl Into<String>) -> Self {
        Self {
            input: String::new(),
            cursor_position: 0,
            messages: Vec::new(),
            message_scroll: 0,
            target: None,
            counterpart: Participant::placeholder(),
            link: None,
            notices: Vec::new(),
            should_quit: false,
            local_id,
            timestamp_format: timestamp_format.into(),
        }
    }

    /// Reset the conversation state for a newly mounted counterpart.
    pub fn set_target(&mut self, target: ParticipantId) {
        self.target = Some(target);
        self.counterpart = Participant::placeholder();
        self.messages.clear();
        self.message_scroll = 0;
        self.link = None;
    }

    /// Header title: the counterpart's display name.
    #[must_use]
    pub fn header(&self) -> String {
        if self.target.is_some() {
            self.counterpart.display_name()
        } else {
            "No conversation open".to_string()
        }
    }

    /// Whether a send has a chance of being accepted.
    #[must_use]
    pub fn can_send(&self) -> bool {
        self.link == Some(LinkStatus::Connected)
    }

    /// Append a system notice.
    pub fn push_notice(&mut self, notice: impl Into<String>) {
        self.notices.push(notice.into());
        if self.notices.len() > MAX_NOTICES {
            self.notices.remove(0);
        }
    }

    /// The newest notice, if any.
    #[must_use]
    pub fn last_notice(&self) -> Option<&str> {
        self.notices.last().map(String::as_str)
    }

    /// Fold an event from the mounted session into the display state.
    pub fn apply_session_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Timeline(messages) => {
                self.messages = messages.iter().map(|m| self.display(m)).collect();
                self.message_scroll = self.messages.len().saturating_sub(1);
            }
            SessionEvent::Participant(participant) => self.counterpart = participant,
            SessionEvent::Link(status) => {
                if self.link.is_some() && self.link != Some(status) {
                    self.push_notice(status.to_string());
                }
                self.link = Some(status);
            }
            SessionEvent::Joined { room, .. } => {
                tracing::debug!(%room, "room joined");
            }
            SessionEvent::SendFailed { reason, .. } => {
                self.push_notice(format!("Message not sent: {reason}"));
            }
        }
    }

    fn display(&self, message: &ChatMessage) -> DisplayMessage {
        let is_own = self
            .local_id
            .as_ref()
            .is_some_and(|id| message.is_from(id));
        let footer = match message.origin {
            Origin::Local {
                status: SendStatus::Failed,
                ..
            } => NOT_SENT_FOOTER,
            _ => SEEN_FOOTER,
        };
        DisplayMessage {
            sender: if is_own {
                SELF_LABEL.to_string()
            } else {
                message.sender_display_name()
            },
            is_own,
            content: message.text.clone(),
            timestamp: message
                .timestamp
                .with_timezone(&Local)
                .format(&self.timestamp_format)
                .to_string(),
            footer,
        }
    }

    /// Handle a key event.
    pub fn handle_key_event(&mut self, key: KeyEvent) -> Option<AppAction> {
        match (key.code, key.modifiers) {
            (KeyCode::Char('c'), KeyModifiers::CONTROL) | (KeyCode::Esc, _) => {
                self.should_quit = true;
                None
            }
            (KeyCode::Char('r'), KeyModifiers::CONTROL) => Some(AppAction::Reconnect),
            (KeyCode::Enter, _) => self.submit(),
            (KeyCode::Char(c), _) => {
                self.enter_char(c);
                None
            }
            (KeyCode::Backspace, _) => {
                self.delete_char();
                None
            }
            (KeyCode::Left, _) => {
                self.cursor_position = self.cursor_position.saturating_sub(1);
                None
            }
            (KeyCode::Right, _) => {
                self.cursor_position = (self.cursor_position + 1).min(self.input.chars().count());
                None
            }
            (KeyCode::Home, _) => {
                self.cursor_position = 0;
                None
            }
            (KeyCode::End, _) => {
                self.cursor_position = self.input.chars().count();
                None
            }
            (KeyCode::Up, _) => {
                self.message_scroll = self.message_scroll.saturating_sub(1);
                None
            }
            (KeyCode::Down, _) => {
                self.message_scroll =
                    (self.message_scroll + 1).min(self.messages.len().saturating_sub(1));
                None
            }
            _ => None,
        }
    }

    /// Turn the input line into an action and clear it.
    fn submit(&mut self) -> Option<AppAction> {
        let line = std::mem::take(&mut self.input);
        self.cursor_position = 0;

        if let Some(rest) = line.trim().strip_prefix("/open") {
            let id = rest.trim();
            if id.is_empty() {
                self.push_notice("Usage: /open <userId>");
                return None;
            }
            return Some(AppAction::Open(ParticipantId::new(id)));
        }
        if line.trim().is_empty() {
            return None;
        }
        Some(AppAction::Send(line))
    }

    fn byte_index(&self) -> usize {
        self.input
            .char_indices()
            .nth(self.cursor_position)
            .map_or(self.input.len(), |(i, _)| i)
    }

    fn enter_char(&mut self, c: char) {
        let index = self.byte_index();
        self.input.insert(index, c);
        self.cursor_position += 1;
    }

    fn delete_char(&mut self) {
        if self.cursor_position > 0 {
            self.cursor_position -= 1;
            let index = self.byte_index();
            self.input.remove(index);
        }
    }
}
