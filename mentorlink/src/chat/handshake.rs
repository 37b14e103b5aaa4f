//! Room membership handshake.
//!
//! The server only routes a room's messages to sockets that announced
//! themselves with `joinChat`. Membership is bound to the connection, so the
//! announcement is repeated on every new connection and skipped for one
//! already joined.

use mentorlink_proto::event::{JoinChat, JoinedRoom, OutboundEvent};
use mentorlink_proto::room::RoomKey;

use super::{LocalParticipant, ParticipantId};
use crate::transport::manager::{ConnectionManager, EmitError};
use crate::transport::{ConnectionId, Connector};

/// Tracks which connection has joined the room.
#[derive(Debug)]
pub struct RoomMembership {
    room: RoomKey,
    payload: JoinChat,
    joined_on: Option<ConnectionId>,
    confirmed: Option<JoinedRoom>,
}

impl RoomMembership {
    /// Membership of `local` in the room shared with `target`.
    #[must_use]
    pub fn new(local: &LocalParticipant, target: &ParticipantId) -> Self {
        Self {
            room: RoomKey::between(local.id.as_str(), target.as_str()),
            payload: JoinChat {
                first_name: local.profile.first_name.clone(),
                target_user_id: target.as_str().to_string(),
                logged_in_user_id: local.id.as_str().to_string(),
            },
            joined_on: None,
            confirmed: None,
        }
    }

    /// The room this membership is for.
    #[must_use]
    pub const fn room(&self) -> &RoomKey {
        &self.room
    }

    /// Announce membership on connection `id`.
    ///
    /// Returns `Ok(false)` without emitting if `id` has already joined.
    /// Sending does not wait for the server's confirmation.
    ///
    /// # Errors
    ///
    /// Propagates the manager's [`EmitError`]; the connection is then not
    /// considered joined.
    pub async fn join<K: Connector>(
        &mut self,
        id: ConnectionId,
        manager: &mut ConnectionManager<K>,
    ) -> Result<bool, EmitError> {
        if self.joined_on == Some(id) {
            tracing::debug!(%id, room = %self.room, "already joined on this connection");
            return Ok(false);
        }
        manager
            .emit(&OutboundEvent::JoinChat(self.payload.clone()))
            .await?;
        self.joined_on = Some(id);
        self.confirmed = None;
        tracing::info!(%id, room = %self.room, "joined room");
        Ok(true)
    }

    /// Record the server's `joinedRoom` confirmation.
    pub fn record_joined(&mut self, joined: JoinedRoom) {
        let expected = self.room.to_string();
        if joined.room == expected {
            tracing::debug!(room = %joined.room, socket_id = %joined.socket_id, "room join confirmed");
        } else {
            tracing::warn!(
                room = %joined.room,
                expected = %expected,
                socket_id = %joined.socket_id,
                "server confirmed a different room"
            );
        }
        self.confirmed = Some(joined);
    }

    /// Connection that last joined the room.
    #[must_use]
    pub const fn joined_on(&self) -> Option<ConnectionId> {
        self.joined_on
    }

    /// The server's confirmation for the current connection, if received.
    #[must_use]
    pub const fn confirmation(&self) -> Option<&JoinedRoom> {
        self.confirmed.as_ref()
    }
}
