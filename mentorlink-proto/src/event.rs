//! Chat events exchanged over the real-time channel.
//!
//! Event names and payload field names match the backend exactly; payloads
//! are camelCase JSON objects carried as the single argument of a Socket.IO
//! event packet.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::packet::{CodecError, Packet};

/// Client → server: bind this socket to the two-party room.
pub const JOIN_CHAT: &str = "joinChat";
/// Client → server: deliver a message to the room.
pub const SEND_MESSAGE: &str = "sendMessage";
/// Server → client: a message was posted to the room.
pub const RECEIVE_MESSAGE: &str = "receiveMessage";
/// Server → client: diagnostic confirmation of a room join.
pub const JOINED_ROOM: &str = "joinedRoom";

/// Payload of [`JOIN_CHAT`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinChat {
    /// Display name of the joining participant.
    pub first_name: String,
    /// The counterpart of the conversation.
    pub target_user_id: String,
    /// The joining participant.
    pub logged_in_user_id: String,
}

/// Payload of [`SEND_MESSAGE`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessage {
    /// Display name of the sender.
    pub first_name: String,
    /// The recipient.
    pub target_user_id: String,
    /// The sender.
    pub logged_in_user_id: String,
    /// Message body.
    pub text: String,
    /// Client correlation id, echoed back by servers that support it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_message_id: Option<String>,
}

/// Payload of [`RECEIVE_MESSAGE`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiveMessage {
    /// Sender's first name, if the server included it.
    #[serde(default)]
    pub first_name: Option<String>,
    /// Sender's last name, if the server included it.
    #[serde(default)]
    pub last_name: Option<String>,
    /// Message body.
    pub text: String,
    /// Server-recorded creation time.
    #[serde(
        default,
        with = "crate::time::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub timestamp: Option<DateTime<Utc>>,
    /// Author of the message.
    pub sender_id: String,
    /// Correlation id of the originating `sendMessage`, if echoed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_message_id: Option<String>,
}

/// Payload of [`JOINED_ROOM`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinedRoom {
    /// Server-side room key.
    pub room: String,
    /// Server-side socket id.
    pub socket_id: String,
}

/// Events the client emits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundEvent {
    /// Room membership handshake.
    JoinChat(JoinChat),
    /// Chat message.
    SendMessage(SendMessage),
}

/// Events the client consumes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    /// A message posted to the room.
    ReceiveMessage(ReceiveMessage),
    /// Room join confirmation.
    JoinedRoom(JoinedRoom),
}

/// Decode the first argument of an event into `T`.
fn first_arg<T: DeserializeOwned>(name: &str, args: Vec<Value>) -> Result<T, CodecError> {
    let arg = args
        .into_iter()
        .next()
        .ok_or_else(|| CodecError::Malformed(format!("event {name:?} has no payload")))?;
    Ok(serde_json::from_value(arg)?)
}

impl OutboundEvent {
    /// Wire name of this event.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::JoinChat(_) => JOIN_CHAT,
            Self::SendMessage(_) => SEND_MESSAGE,
        }
    }

    /// Wrap this event in a Socket.IO event packet.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Json`] if the payload cannot be serialized.
    pub fn to_packet(&self) -> Result<Packet, CodecError> {
        match self {
            Self::JoinChat(payload) => Packet::event(self.name(), payload),
            Self::SendMessage(payload) => Packet::event(self.name(), payload),
        }
    }

    /// Parse a named event received by the server.
    ///
    /// Returns `Ok(None)` for event names that are not part of the chat
    /// protocol.
    ///
    /// # Errors
    ///
    /// Returns a [`CodecError`] if a known event carries a malformed payload.
    pub fn from_event(name: &str, args: Vec<Value>) -> Result<Option<Self>, CodecError> {
        match name {
            JOIN_CHAT => Ok(Some(Self::JoinChat(first_arg(name, args)?))),
            SEND_MESSAGE => Ok(Some(Self::SendMessage(first_arg(name, args)?))),
            _ => Ok(None),
        }
    }
}

impl InboundEvent {
    /// Wire name of this event.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::ReceiveMessage(_) => RECEIVE_MESSAGE,
            Self::JoinedRoom(_) => JOINED_ROOM,
        }
    }

    /// Wrap this event in a Socket.IO event packet.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Json`] if the payload cannot be serialized.
    pub fn to_packet(&self) -> Result<Packet, CodecError> {
        match self {
            Self::ReceiveMessage(payload) => Packet::event(self.name(), payload),
            Self::JoinedRoom(payload) => Packet::event(self.name(), payload),
        }
    }

    /// Parse a named event received by the client.
    ///
    /// Returns `Ok(None)` for event names the chat view does not listen to.
    ///
    /// # Errors
    ///
    /// Returns a [`CodecError`] if a known event carries a malformed payload.
    pub fn from_event(name: &str, args: Vec<Value>) -> Result<Option<Self>, CodecError> {
        match name {
            RECEIVE_MESSAGE => Ok(Some(Self::ReceiveMessage(first_arg(name, args)?))),
            JOINED_ROOM => Ok(Some(Self::JoinedRoom(first_arg(name, args)?))),
            _ => Ok(None),
        }
    }
}
