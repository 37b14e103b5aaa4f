//! Message stream reconciler.
//!
//! Merges three sources into one list: history loaded at session start,
//! optimistic local sends, and events received over the real-time channel.
//! The list is append-only in receipt order; only history is inserted
//! ahead of what is already shown.
//!
//! The server echoes a sender's own messages back to it. Outbound messages
//! carry a correlation id; an echo carrying the id of an outstanding send
//! confirms that send instead of adding a second copy. Servers that do not
//! echo the id are matched by author and text against the oldest
//! outstanding send.

use std::collections::HashSet;

use chrono::{DateTime, Utc};

use mentorlink_proto::event::{ReceiveMessage, SendMessage};
use mentorlink_proto::room::RoomKey;

use super::{
    ChatMessage, LocalParticipant, MessageId, Origin, PLACEHOLDER_FIRST_NAME, Participant,
    ParticipantId, SendStatus,
};

/// What [`Reconciler::append_remote`] did with an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteOutcome {
    /// A new message was appended.
    Appended,
    /// The event was the echo of a local send, now confirmed.
    Confirmed(MessageId),
    /// The event does not belong to this room.
    Ignored,
}

/// Single writer of the message list for one session.
#[derive(Debug)]
pub struct Reconciler {
    local: LocalParticipant,
    target: ParticipantId,
    room: RoomKey,
    counterpart: Participant,
    messages: Vec<ChatMessage>,
    history_merged: bool,
}

impl Reconciler {
    /// Create an empty list for the conversation between `local` and `target`.
    #[must_use]
    pub fn new(local: LocalParticipant, target: ParticipantId) -> Self {
        let room = RoomKey::between(local.id.as_str(), target.as_str());
        Self {
            local,
            target,
            room,
            counterpart: Participant::placeholder(),
            messages: Vec::new(),
            history_merged: false,
        }
    }

    /// The current list, oldest first.
    #[must_use]
    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    /// Identity used for messages the counterpart sends from now on.
    pub fn set_counterpart(&mut self, counterpart: Participant) {
        self.counterpart = counterpart;
    }

    /// Append an optimistic local send.
    ///
    /// Returns `None`, leaving the list untouched, when `text` is empty or
    /// whitespace. Otherwise returns the correlation id and the payload to
    /// emit.
    pub fn append_local(&mut self, text: &str, now: DateTime<Utc>) -> Option<(MessageId, SendMessage)> {
        if text.trim().is_empty() {
            return None;
        }
        let id = MessageId::new();
        let profile = &self.local.profile;
        self.messages.push(ChatMessage {
            sender_id: self.local.id.clone(),
            sender_first_name: profile.first_name.clone(),
            sender_last_name: profile.last_name.clone(),
            sender_avatar_url: profile.photo_url.clone(),
            text: text.to_string(),
            timestamp: now,
            origin: Origin::Local {
                id,
                status: SendStatus::Sent,
            },
        });
        let payload = SendMessage {
            first_name: profile.first_name.clone(),
            target_user_id: self.target.as_str().to_string(),
            logged_in_user_id: self.local.id.as_str().to_string(),
            text: text.to_string(),
            client_message_id: Some(id.to_string()),
        };
        tracing::debug!(%id, "appended local message");
        Some((id, payload))
    }

    /// Incorporate a `receiveMessage` event.
    ///
    /// Events from anyone but the two room members are ignored. Echoes of
    /// outstanding local sends confirm them. Everything else is appended at
    /// the tail regardless of its timestamp; a missing timestamp means `now`.
    pub fn append_remote(&mut self, event: ReceiveMessage, now: DateTime<Utc>) -> RemoteOutcome {
        if !self.room.includes(&event.sender_id) {
            tracing::debug!(sender = %event.sender_id, room = %self.room, "ignoring event from outside the room");
            return RemoteOutcome::Ignored;
        }
        if event.text.trim().is_empty() {
            tracing::debug!(sender = %event.sender_id, "ignoring empty message");
            return RemoteOutcome::Ignored;
        }

        let sender_id = ParticipantId::new(event.sender_id);
        if let Some(index) = self.find_echo(&sender_id, &event.text, event.client_message_id.as_deref()) {
            let message = &mut self.messages[index];
            if let Origin::Local { id, status } = &mut message.origin {
                *status = SendStatus::Confirmed;
                let id = *id;
                if let Some(server_time) = event.timestamp {
                    message.timestamp = server_time;
                }
                let timestamp = message.timestamp;
                let dropped = self.drop_history_copies(&sender_id, &event.text, timestamp);
                tracing::debug!(%id, dropped, "local message confirmed by echo");
                return RemoteOutcome::Confirmed(id);
            }
        }

        let avatar = if sender_id == self.local.id {
            self.local.profile.photo_url.clone()
        } else {
            self.counterpart.photo_url.clone()
        };
        self.messages.push(ChatMessage {
            sender_id,
            sender_first_name: event
                .first_name
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| PLACEHOLDER_FIRST_NAME.to_string()),
            sender_last_name: event.last_name.unwrap_or_default(),
            sender_avatar_url: avatar,
            text: event.text,
            timestamp: event.timestamp.unwrap_or(now),
            origin: Origin::Remote,
        });
        RemoteOutcome::Appended
    }

    /// Place loaded history ahead of the live messages.
    ///
    /// Entries identical in sender, text and timestamp to a message already
    /// shown are dropped. Only the first call per session has an effect.
    /// Returns the number of entries inserted.
    pub fn merge_history(&mut self, history: Vec<ChatMessage>) -> usize {
        if self.history_merged {
            tracing::debug!("history already merged, ignoring");
            return 0;
        }
        self.history_merged = true;

        let live: HashSet<(&ParticipantId, &str, DateTime<Utc>)> = self
            .messages
            .iter()
            .map(|m| (&m.sender_id, m.text.as_str(), m.timestamp))
            .collect();
        let mut merged: Vec<ChatMessage> = history
            .into_iter()
            .filter(|m| !live.contains(&(&m.sender_id, m.text.as_str(), m.timestamp)))
            .collect();
        let inserted = merged.len();
        merged.append(&mut self.messages);
        self.messages = merged;
        inserted
    }

    /// Mark a local send as failed. Returns `false` if `id` is unknown.
    pub fn mark_failed(&mut self, id: MessageId) -> bool {
        for message in &mut self.messages {
            if let Origin::Local { id: local, status } = &mut message.origin
                && *local == id
            {
                *status = SendStatus::Failed;
                return true;
            }
        }
        false
    }

    /// Remove history entries that duplicate a confirmed local send.
    ///
    /// History loaded while the send was outstanding already holds the
    /// server's copy; the confirmed local message replaces it.
    fn drop_history_copies(&mut self, sender: &ParticipantId, text: &str, timestamp: DateTime<Utc>) -> usize {
        let before = self.messages.len();
        self.messages.retain(|m| {
            !(m.origin == Origin::History && m.sender_id == *sender && m.text == text && m.timestamp == timestamp)
        });
        before - self.messages.len()
    }

    /// Index of the outstanding local send this event echoes, if any.
    fn find_echo(&self, sender: &ParticipantId, text: &str, client_id: Option<&str>) -> Option<usize> {
        if *sender != self.local.id {
            return None;
        }
        let outstanding = |m: &ChatMessage| {
            matches!(
                m.origin,
                Origin::Local {
                    status: SendStatus::Sent,
                    ..
                }
            )
        };
        match client_id {
            Some(raw) => {
                let id = MessageId::parse(raw)?;
                self.messages
                    .iter()
                    .position(|m| outstanding(m) && m.local_id() == Some(id))
            }
            None => self
                .messages
                .iter()
                .position(|m| outstanding(m) && m.text == text),
        }
    }
}
