//! Chat session protocol for one two-party conversation.
//!
//! Contains the message model shared by the session components:
//! - [`handshake`]: room membership announced on every connection
//! - [`reconcile`]: the ordered, duplicate-free message list
//! - [`history`] / [`participant`]: one-shot lookups at session start
//! - [`session`]: the serialized loop binding them to a connection

pub mod handshake;
pub mod history;
pub mod participant;
pub mod reconcile;
pub mod session;

use std::fmt;

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// First name shown when the backend does not supply one.
pub const PLACEHOLDER_FIRST_NAME: &str = "User";

/// Opaque server identifier of a participant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ParticipantId(String);

impl ParticipantId {
    /// Wrap a server id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Return the string representation of this id.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ParticipantId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Display identity of a participant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Participant {
    /// First name.
    pub first_name: String,
    /// Last name, possibly empty.
    pub last_name: String,
    /// Avatar URL, possibly empty.
    pub photo_url: String,
}

impl Participant {
    /// Build an identity, substituting the placeholder for missing or empty
    /// fields.
    #[must_use]
    pub fn from_parts(
        first_name: Option<String>,
        last_name: Option<String>,
        photo_url: Option<String>,
    ) -> Self {
        Self {
            first_name: first_name
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| PLACEHOLDER_FIRST_NAME.to_string()),
            last_name: last_name.filter(|s| !s.is_empty()).unwrap_or_default(),
            photo_url: photo_url.filter(|s| !s.is_empty()).unwrap_or_default(),
        }
    }

    /// The identity shown while the real one is unknown.
    #[must_use]
    pub fn placeholder() -> Self {
        Self::from_parts(None, None, None)
    }

    /// `"{first} {last}"`, trimmed.
    #[must_use]
    pub fn display_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
            .trim()
            .to_string()
    }
}

impl Default for Participant {
    fn default() -> Self {
        Self::placeholder()
    }
}

/// The logged-in participant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalParticipant {
    /// Server id.
    pub id: ParticipantId,
    /// Display identity.
    pub profile: Participant,
}

/// Client-generated correlation id of an optimistic send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageId(Uuid);

impl MessageId {
    /// Generate a new time-ordered id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Parse the wire form of an id.
    #[must_use]
    pub fn parse(text: &str) -> Option<Self> {
        Uuid::parse_str(text).ok().map(Self)
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Progress of an optimistic send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendStatus {
    /// Handed to the transport; no echo seen yet.
    Sent,
    /// The server echoed the message back.
    Confirmed,
    /// The transport rejected the emit.
    Failed,
}

/// Where a message in the list came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// Loaded from the history endpoint.
    History,
    /// Received over the real-time channel.
    Remote,
    /// Sent from this session.
    Local {
        /// Correlation id.
        id: MessageId,
        /// Send progress.
        status: SendStatus,
    },
}

/// One entry of the message list.
///
/// Sender fields are a snapshot taken when the message entered the list and
/// are never re-resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    /// Author.
    pub sender_id: ParticipantId,
    /// Author first name at send/receive time.
    pub sender_first_name: String,
    /// Author last name at send/receive time.
    pub sender_last_name: String,
    /// Author avatar at send/receive time.
    pub sender_avatar_url: String,
    /// Body, never empty.
    pub text: String,
    /// Server time, or client time for an unconfirmed local send.
    pub timestamp: DateTime<Utc>,
    /// Provenance.
    pub origin: Origin,
}

impl ChatMessage {
    /// Whether `participant` wrote this message.
    #[must_use]
    pub fn is_from(&self, participant: &ParticipantId) -> bool {
        &self.sender_id == participant
    }

    /// `"{first} {last}"` of the author, trimmed.
    #[must_use]
    pub fn sender_display_name(&self) -> String {
        format!("{} {}", self.sender_first_name, self.sender_last_name)
            .trim()
            .to_string()
    }

    /// Correlation id, for messages sent from this session.
    #[must_use]
    pub const fn local_id(&self) -> Option<MessageId> {
        match self.origin {
            Origin::Local { id, .. } => Some(id),
            Origin::History | Origin::Remote => None,
        }
    }

    /// Send progress, for messages sent from this session.
    #[must_use]
    pub const fn send_status(&self) -> Option<SendStatus> {
        match self.origin {
            Origin::Local { status, .. } => Some(status),
            Origin::History | Origin::Remote => None,
        }
    }
}
