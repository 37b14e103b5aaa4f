//! Chat session: one conversation bound to one connection manager.
//!
//! [`ChatSession::open`] spawns a task that owns the connection manager,
//! the room membership and the reconciler. Commands from the handle, link
//! events and lookup results all pass through a single `select!` loop, so
//! the message list has exactly one writer and no two operations on it
//! interleave.
//!
//! ```text
//! ChatSession (handle)  ── Command ──▶  session task
//!                       ◀─ SessionEvent ─  (manager + membership + reconciler)
//!                                           ▲
//!                          history / participant lookups (spawned once)
//! ```

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{mpsc, oneshot};

use mentorlink_proto::event::{InboundEvent, OutboundEvent};
use mentorlink_proto::room::RoomKey;

use super::handshake::RoomMembership;
use super::history::load_history;
use super::participant::resolve_participant;
use super::reconcile::{Reconciler, RemoteOutcome};
use super::{ChatMessage, LocalParticipant, MessageId, Participant, ParticipantId};
use crate::api::ChatBackend;
use crate::transport::manager::{ConnectionManager, EmitError, LinkEvent, LinkStatus, ReconnectConfig};
use crate::transport::{Connector, TransportError};

/// Everything a session needs to start.
pub struct SessionContext<K, B> {
    /// The logged-in participant.
    pub local: LocalParticipant,
    /// The counterpart of the conversation.
    pub target: ParticipantId,
    /// Source of real-time connections.
    pub connector: K,
    /// Source of history and counterpart identity.
    pub backend: Arc<B>,
    /// Reconnection policy.
    pub reconnect: ReconnectConfig,
}

/// State changes published by a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Snapshot of the full message list after a change.
    Timeline(Vec<ChatMessage>),
    /// The counterpart's identity was resolved.
    Participant(Participant),
    /// The link status changed.
    Link(LinkStatus),
    /// The server confirmed the room join.
    Joined {
        /// Server-side room key.
        room: String,
        /// Server-side socket id.
        socket_id: String,
    },
    /// A local send could not be handed to the transport.
    SendFailed {
        /// The failed message.
        id: MessageId,
        /// Human-readable cause.
        reason: String,
    },
}

/// Why a send was rejected.
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    /// Reconnection attempts are exhausted.
    #[error("offline: reconnect to send messages")]
    Offline,
    /// The link is being (re)established.
    #[error("not connected")]
    NotConnected,
    /// The transport failed while emitting; the message is marked failed.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    /// The session has been closed.
    #[error("session closed")]
    Closed,
}

impl From<EmitError> for SendError {
    fn from(err: EmitError) -> Self {
        match err {
            EmitError::NotConnected => Self::NotConnected,
            EmitError::Offline => Self::Offline,
            EmitError::Transport(e) => Self::Transport(e),
        }
    }
}

/// Successful result of [`ChatSession::send`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// The message was appended and emitted.
    Sent(MessageId),
    /// Empty or whitespace text; nothing happened.
    Ignored,
}

enum Command {
    Send {
        text: String,
        reply: oneshot::Sender<Result<SendOutcome, SendError>>,
    },
    Reconnect,
    Close,
}

enum Lookup {
    History(Vec<ChatMessage>),
    Participant(Participant),
}

/// Handle to a running chat session.
///
/// Dropping the handle aborts the session task, which drops the
/// connection. Prefer [`close`](Self::close) to wait for teardown.
pub struct ChatSession {
    local: LocalParticipant,
    target: ParticipantId,
    room: RoomKey,
    commands: mpsc::UnboundedSender<Command>,
    events: mpsc::UnboundedReceiver<SessionEvent>,
    task: tokio::task::JoinHandle<()>,
}

impl ChatSession {
    /// Start a session: connect, join the room and fetch history and the
    /// counterpart's identity.
    ///
    /// Must be called within a tokio runtime.
    pub fn open<K: Connector, B: ChatBackend>(ctx: SessionContext<K, B>) -> Self {
        let SessionContext {
            local,
            target,
            connector,
            backend,
            reconnect,
        } = ctx;

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (lookup_tx, lookup_rx) = mpsc::unbounded_channel();

        let membership = RoomMembership::new(&local, &target);
        let room = membership.room().clone();
        let lookups = spawn_lookups(&backend, &target, &lookup_tx);
        drop(lookup_tx);

        let session_loop = SessionLoop {
            manager: ConnectionManager::new(connector, reconnect),
            membership,
            reconciler: Reconciler::new(local.clone(), target.clone()),
            events: event_tx,
            lookups,
        };
        tracing::info!(%target, %room, "opening chat session");
        let task = tokio::spawn(session_loop.run(command_rx, lookup_rx));

        Self {
            local,
            target,
            room,
            commands: command_tx,
            events: event_rx,
            task,
        }
    }

    /// The participant this session sends as.
    #[must_use]
    pub const fn local(&self) -> &LocalParticipant {
        &self.local
    }

    /// The counterpart of this session.
    #[must_use]
    pub const fn target(&self) -> &ParticipantId {
        &self.target
    }

    /// The room this session joins.
    #[must_use]
    pub const fn room(&self) -> &RoomKey {
        &self.room
    }

    /// Append `text` optimistically and emit it.
    ///
    /// # Errors
    ///
    /// - [`SendError::NotConnected`] / [`SendError::Offline`] when no
    ///   connection is live; nothing is appended.
    /// - [`SendError::Transport`] when the emit fails; the message stays in
    ///   the list marked failed.
    /// - [`SendError::Closed`] after the session ended.
    pub async fn send(&self, text: &str) -> Result<SendOutcome, SendError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Send {
                text: text.to_string(),
                reply,
            })
            .map_err(|_| SendError::Closed)?;
        rx.await.map_err(|_| SendError::Closed)?
    }

    /// Retry the connection now with a fresh attempt budget.
    ///
    /// # Errors
    ///
    /// Returns [`SendError::Closed`] after the session ended.
    pub fn reconnect(&self) -> Result<(), SendError> {
        self.commands
            .send(Command::Reconnect)
            .map_err(|_| SendError::Closed)
    }

    /// Wait for the next published event. `None` once the session ended.
    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        self.events.recv().await
    }

    /// Take a published event without waiting.
    pub fn try_next_event(&mut self) -> Option<SessionEvent> {
        self.events.try_recv().ok()
    }

    /// Tear the session down and wait until the connection is closed.
    pub async fn close(mut self) {
        if self.commands.send(Command::Close).is_ok() {
            let _ = (&mut self.task).await;
        }
        tracing::info!(target = %self.target, "chat session closed");
    }
}

impl Drop for ChatSession {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Run both one-shot lookups concurrently; results go to `tx`.
fn spawn_lookups<B: ChatBackend>(
    backend: &Arc<B>,
    target: &ParticipantId,
    tx: &mpsc::UnboundedSender<Lookup>,
) -> Vec<tokio::task::JoinHandle<()>> {
    let history = {
        let backend = Arc::clone(backend);
        let target = target.clone();
        let tx = tx.clone();
        tokio::spawn(async move {
            let messages = load_history(backend.as_ref(), &target, Utc::now()).await;
            let _ = tx.send(Lookup::History(messages));
        })
    };
    let participant = {
        let backend = Arc::clone(backend);
        let target = target.clone();
        let tx = tx.clone();
        tokio::spawn(async move {
            let participant = resolve_participant(backend.as_ref(), &target).await;
            let _ = tx.send(Lookup::Participant(participant));
        })
    };
    vec![history, participant]
}

enum Step {
    Command(Option<Command>),
    Link(LinkEvent),
    Lookup(Lookup),
}

struct SessionLoop<K: Connector> {
    manager: ConnectionManager<K>,
    membership: RoomMembership,
    reconciler: Reconciler,
    events: mpsc::UnboundedSender<SessionEvent>,
    lookups: Vec<tokio::task::JoinHandle<()>>,
}

impl<K: Connector> SessionLoop<K> {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut lookups: mpsc::UnboundedReceiver<Lookup>,
    ) {
        self.manager.open();
        self.publish(SessionEvent::Link(self.manager.status()));

        loop {
            let step = tokio::select! {
                command = commands.recv() => Step::Command(command),
                link = self.manager.next() => Step::Link(link),
                Some(lookup) = lookups.recv() => Step::Lookup(lookup),
            };
            match step {
                Step::Command(None | Some(Command::Close)) => break,
                Step::Command(Some(Command::Send { text, reply })) => {
                    let result = self.send(&text).await;
                    let _ = reply.send(result);
                }
                Step::Command(Some(Command::Reconnect)) => {
                    self.manager.reconnect();
                    self.publish(SessionEvent::Link(self.manager.status()));
                }
                Step::Link(event) => self.on_link(event).await,
                Step::Lookup(lookup) => self.on_lookup(lookup),
            }
        }

        for lookup in &self.lookups {
            lookup.abort();
        }
        self.manager.close().await;
    }

    async fn send(&mut self, text: &str) -> Result<SendOutcome, SendError> {
        if text.trim().is_empty() {
            return Ok(SendOutcome::Ignored);
        }
        match self.manager.status() {
            LinkStatus::Connected => {}
            LinkStatus::Offline => return Err(SendError::Offline),
            LinkStatus::Connecting | LinkStatus::Reconnecting { .. } => {
                return Err(SendError::NotConnected);
            }
        }
        let Some((id, payload)) = self.reconciler.append_local(text, Utc::now()) else {
            return Ok(SendOutcome::Ignored);
        };
        match self.manager.emit(&OutboundEvent::SendMessage(payload)).await {
            Ok(()) => {
                self.publish_timeline();
                Ok(SendOutcome::Sent(id))
            }
            Err(e) => {
                tracing::warn!(%id, err = %e, "send failed");
                self.reconciler.mark_failed(id);
                self.publish_timeline();
                self.publish(SessionEvent::SendFailed {
                    id,
                    reason: e.to_string(),
                });
                Err(e.into())
            }
        }
    }

    async fn on_link(&mut self, event: LinkEvent) {
        match event {
            LinkEvent::Connected(id) => {
                self.publish(SessionEvent::Link(LinkStatus::Connected));
                if let Err(e) = self.membership.join(id, &mut self.manager).await {
                    tracing::warn!(%id, err = %e, "room join failed");
                }
            }
            LinkEvent::Event(_, InboundEvent::ReceiveMessage(message)) => {
                match self.reconciler.append_remote(message, Utc::now()) {
                    RemoteOutcome::Appended | RemoteOutcome::Confirmed(_) => {
                        self.publish_timeline();
                    }
                    RemoteOutcome::Ignored => {}
                }
            }
            LinkEvent::Event(_, InboundEvent::JoinedRoom(joined)) => {
                self.publish(SessionEvent::Joined {
                    room: joined.room.clone(),
                    socket_id: joined.socket_id.clone(),
                });
                self.membership.record_joined(joined);
            }
            LinkEvent::Disconnected { id, reason } => {
                tracing::debug!(%id, %reason, "session link lost");
            }
            LinkEvent::Reconnecting {
                attempt,
                max_attempts,
                ..
            } => self.publish(SessionEvent::Link(LinkStatus::Reconnecting {
                attempt,
                max_attempts,
            })),
            LinkEvent::Offline => self.publish(SessionEvent::Link(LinkStatus::Offline)),
        }
    }

    fn on_lookup(&mut self, lookup: Lookup) {
        match lookup {
            Lookup::History(messages) => {
                let inserted = self.reconciler.merge_history(messages);
                tracing::debug!(inserted, "history merged");
                self.publish_timeline();
            }
            Lookup::Participant(participant) => {
                self.reconciler.set_counterpart(participant.clone());
                self.publish(SessionEvent::Participant(participant));
            }
        }
    }

    fn publish_timeline(&self) {
        self.publish(SessionEvent::Timeline(self.reconciler.messages().to_vec()));
    }

    fn publish(&self, event: SessionEvent) {
        // The handle may already be gone; the loop then ends on its next
        // command poll.
        let _ = self.events.send(event);
    }
}
