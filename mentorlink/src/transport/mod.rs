//! Transport layer for the real-time chat channel.
//!
//! A [`Connector`] establishes one [`Connection`] at a time; the
//! [`manager::ConnectionManager`] owns the current connection and drives
//! reconnection. Implementations:
//! - [`socketio::SocketIoConnector`]: Socket.IO v4 over a WebSocket
//! - [`loopback::LoopbackConnector`]: in-process channels for testing

pub mod loopback;
pub mod manager;
pub mod socketio;

use std::fmt;
use std::future::Future;

use mentorlink_proto::event::{InboundEvent, OutboundEvent};
use mentorlink_proto::packet::CodecError;

/// Identifies one established connection within a session.
///
/// Every successful (re)connection gets a fresh id, so consumers can tell a
/// reconnect apart from the connection they already handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Create an id from its raw generation number.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw generation number.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Errors that can occur during transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The connection has been closed.
    #[error("connection closed")]
    ConnectionClosed,

    /// The operation timed out before completing.
    #[error("transport operation timed out")]
    Timeout,

    /// The server could not be reached.
    #[error("server {0} is unreachable")]
    Unreachable(String),

    /// The server refused or broke the protocol handshake.
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// A packet could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// An underlying I/O error occurred.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// One live real-time connection.
///
/// Inbound listeners are bound to the connection value itself: dropping or
/// closing it releases them, so a replacement connection never inherits
/// handlers from its predecessor.
pub trait Connection: Send + 'static {
    /// Emit an event to the server.
    ///
    /// Returns once the event has been handed to the underlying transport;
    /// this does not imply delivery.
    fn emit(
        &mut self,
        event: &OutboundEvent,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Receive the next inbound chat event.
    ///
    /// Returns `None` once the connection is gone. Must be cancel-safe: a
    /// dropped call never loses an event.
    fn next_event(&mut self) -> impl Future<Output = Option<InboundEvent>> + Send;

    /// Close the connection.
    ///
    /// Inbound delivery stops before the transport is terminated, so no
    /// event is observed after this is called.
    fn close(self) -> impl Future<Output = ()> + Send;
}

/// Factory for [`Connection`]s to one endpoint.
pub trait Connector: Send + Sync + 'static {
    /// Connection type produced by this connector.
    type Conn: Connection;

    /// Start one connection attempt.
    ///
    /// The returned future owns everything it needs, so the manager can keep
    /// it across polls without borrowing the connector.
    fn connect(
        &self,
    ) -> impl Future<Output = Result<Self::Conn, TransportError>> + Send + 'static;
}
