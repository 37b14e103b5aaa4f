//! Server core: shared state, HTTP lookups, Socket.IO handler and room
//! broadcast.
//!
//! Each WebSocket speaks Engine.IO v4 / Socket.IO v4 on the default
//! namespace. A socket is bound to the user named by its `token` cookie.
//! `joinChat` adds the socket to the two-party room; `sendMessage` stores
//! the message and broadcasts `receiveMessage` to every socket in the room,
//! the sender's included.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Json;
use axum::Router;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::header::COOKIE;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::sync::{RwLock, mpsc};
use uuid::Uuid;

use mentorlink_proto::api::{ChatHistory, HistoryEntry, UserProfile};
use mentorlink_proto::event::{
    InboundEvent, JoinChat, JoinedRoom, OutboundEvent, ReceiveMessage, SendMessage,
};
use mentorlink_proto::packet::{self, DEFAULT_NAMESPACE, OpenInfo, Packet, SocketPacket};
use mentorlink_proto::room::RoomKey;

use crate::config::ServerConfig;
use crate::directory::UserDirectory;
use crate::store::{ChatStore, StoredMessage};

/// Largest frame advertised to clients, in bytes.
const MAX_PAYLOAD: u64 = 1_000_000;

/// Errors starting the server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// The listener could not be bound.
    #[error("failed to bind listener: {0}")]
    Bind(#[from] std::io::Error),
}

/// Server-driven heartbeat parameters, advertised in the `open` packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Heartbeat {
    /// Interval between pings.
    pub interval: Duration,
    /// Grace period for the pong.
    pub timeout: Duration,
}

impl Heartbeat {
    /// How long a socket may stay silent before it is dropped.
    #[must_use]
    pub fn window(&self) -> Duration {
        self.interval + self.timeout
    }
}

impl Default for Heartbeat {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(25),
            timeout: Duration::from_secs(20),
        }
    }
}

struct SocketEntry {
    user_id: String,
    sender: mpsc::UnboundedSender<Message>,
}

/// Shared server state: directory, chat store, sockets and room membership.
pub struct ServerState {
    /// Seeded accounts.
    pub directory: UserDirectory,
    /// Room message logs.
    pub store: ChatStore,
    /// Maps socket id to its user and writer channel.
    sockets: RwLock<HashMap<String, SocketEntry>>,
    /// Socket ids joined to each room.
    rooms: RwLock<HashMap<RoomKey, HashSet<String>>>,
    heartbeat: Heartbeat,
}

impl ServerState {
    /// State with default heartbeat and history limits.
    #[must_use]
    pub fn new(directory: UserDirectory) -> Self {
        Self::with_parts(directory, ChatStore::new(), Heartbeat::default())
    }

    /// State from a resolved configuration.
    #[must_use]
    pub fn from_config(config: &ServerConfig) -> Self {
        Self::with_parts(
            UserDirectory::new(&config.users),
            ChatStore::with_max_history(config.max_history),
            Heartbeat {
                interval: config.ping_interval,
                timeout: config.ping_timeout,
            },
        )
    }

    /// State from explicit parts.
    #[must_use]
    pub fn with_parts(directory: UserDirectory, store: ChatStore, heartbeat: Heartbeat) -> Self {
        Self {
            directory,
            store,
            sockets: RwLock::new(HashMap::new()),
            rooms: RwLock::new(HashMap::new()),
            heartbeat,
        }
    }

    /// Heartbeat parameters advertised to clients.
    #[must_use]
    pub const fn heartbeat(&self) -> Heartbeat {
        self.heartbeat
    }

    async fn register(&self, sid: &str, user_id: &str, sender: mpsc::UnboundedSender<Message>) {
        let mut sockets = self.sockets.write().await;
        sockets.insert(
            sid.to_string(),
            SocketEntry {
                user_id: user_id.to_string(),
                sender,
            },
        );
    }

    /// Forget a socket and remove it from every room.
    async fn unregister(&self, sid: &str) {
        self.sockets.write().await.remove(sid);
        let mut rooms = self.rooms.write().await;
        rooms.retain(|_, members| {
            members.remove(sid);
            !members.is_empty()
        });
    }

    /// Add a socket to a room. Returns `false` if it was already a member.
    async fn join_room(&self, room: &RoomKey, sid: &str) -> bool {
        let mut rooms = self.rooms.write().await;
        rooms.entry(room.clone()).or_default().insert(sid.to_string())
    }

    /// Number of sockets currently joined to `room`.
    pub async fn room_size(&self, room: &RoomKey) -> usize {
        let rooms = self.rooms.read().await;
        rooms.get(room).map_or(0, HashSet::len)
    }

    /// Number of connected sockets.
    pub async fn socket_count(&self) -> usize {
        self.sockets.read().await.len()
    }

    /// Sockets currently bound to `user_id`.
    pub async fn sockets_of(&self, user_id: &str) -> usize {
        let sockets = self.sockets.read().await;
        sockets.values().filter(|s| s.user_id == user_id).count()
    }

    /// Send an event to one socket.
    async fn send_to(&self, sid: &str, event: &InboundEvent) {
        let Some(message) = event_message(event) else {
            return;
        };
        let sockets = self.sockets.read().await;
        if let Some(socket) = sockets.get(sid) {
            let _ = socket.sender.send(message);
        }
    }

    /// Send an event to every socket in `room`, returning how many got it.
    async fn broadcast(&self, room: &RoomKey, event: &InboundEvent) -> usize {
        let Some(message) = event_message(event) else {
            return 0;
        };
        let members: Vec<String> = {
            let rooms = self.rooms.read().await;
            rooms
                .get(room)
                .map(|m| m.iter().cloned().collect())
                .unwrap_or_default()
        };
        let sockets = self.sockets.read().await;
        members
            .iter()
            .filter_map(|sid| sockets.get(sid))
            .filter(|socket| socket.sender.send(message.clone()).is_ok())
            .count()
    }

    /// Send a WebSocket Close frame to every connected socket.
    ///
    /// Clients observe a lost connection; useful for shutdown and tests.
    pub async fn close_all_connections(&self) {
        let sockets = self.sockets.read().await;
        for (sid, socket) in sockets.iter() {
            tracing::info!(%sid, user = %socket.user_id, "closing socket");
            let _ = socket.sender.send(Message::Close(None));
        }
    }
}

/// Encode an event as a text frame.
fn event_message(event: &InboundEvent) -> Option<Message> {
    match event.to_packet().and_then(|p| packet::encode(&p)) {
        Ok(text) => Some(Message::Text(text.into())),
        Err(e) => {
            tracing::error!(event = event.name(), error = %e, "failed to encode event");
            None
        }
    }
}

/// The user named by the request's `token` cookie, if known.
fn identify(state: &ServerState, headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().strip_prefix("token="))
        .find_map(|token| state.directory.authenticate(token).map(str::to_string))
}

#[allow(clippy::cast_possible_truncation)]
const fn millis(duration: Duration) -> u64 {
    duration.as_millis() as u64
}

/// Handles an upgraded WebSocket connection.
///
/// The connection lifecycle:
/// 1. Send the Engine.IO `open` packet.
/// 2. Wait for the namespace connect; refuse it if `user_id` is unknown.
/// 3. Register the socket and start the writer and heartbeat tasks.
/// 4. Dispatch `joinChat` / `sendMessage` until the socket closes or
///    misses its heartbeat.
/// 5. Unregister the socket, leaving every room it joined.
pub async fn handle_socket(socket: WebSocket, state: Arc<ServerState>, user_id: Option<String>) {
    let sid = Uuid::now_v7().simple().to_string();
    let heartbeat = state.heartbeat;
    let (mut ws_sender, mut ws_receiver) = socket.split();

    let open = Packet::Open(OpenInfo {
        sid: sid.clone(),
        upgrades: Vec::new(),
        ping_interval: millis(heartbeat.interval),
        ping_timeout: millis(heartbeat.timeout),
        max_payload: MAX_PAYLOAD,
    });
    if let Err(e) = send_packet(&mut ws_sender, &open).await {
        tracing::warn!(%sid, error = %e, "failed to send open packet");
        return;
    }

    if !wait_for_connect(&mut ws_receiver, heartbeat.window()).await {
        tracing::debug!(%sid, "socket closed before namespace connect");
        return;
    }

    let Some(user_id) = user_id else {
        tracing::warn!(%sid, "refusing unauthenticated socket");
        let refusal = Packet::Message(SocketPacket::ConnectError {
            namespace: DEFAULT_NAMESPACE.to_string(),
            data: json!({ "message": "Unauthorized" }),
        });
        let _ = send_packet(&mut ws_sender, &refusal).await;
        let _ = ws_sender.close().await;
        return;
    };

    let ack = Packet::Message(SocketPacket::Connect {
        namespace: DEFAULT_NAMESPACE.to_string(),
        data: Some(json!({ "sid": sid })),
    });
    if let Err(e) = send_packet(&mut ws_sender, &ack).await {
        tracing::warn!(%sid, error = %e, "failed to acknowledge connect");
        return;
    }

    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    state.register(&sid, &user_id, tx.clone()).await;
    tracing::info!(%sid, user = %user_id, "socket connected");

    // Writer: forwards frames from the channel to the WebSocket.
    let writer_sid = sid.clone();
    let mut write_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let closing = matches!(msg, Message::Close(_));
            if ws_sender.send(msg).await.is_err() {
                tracing::warn!(sid = %writer_sid, "WebSocket write failed");
                break;
            }
            if closing {
                break;
            }
        }
    });

    let ping_task = tokio::spawn(async move {
        let Ok(ping) = packet::encode(&Packet::Ping) else {
            return;
        };
        let start = tokio::time::Instant::now() + heartbeat.interval;
        let mut ticker = tokio::time::interval_at(start, heartbeat.interval);
        loop {
            ticker.tick().await;
            if tx.send(Message::Text(ping.clone().into())).is_err() {
                break;
            }
        }
    });

    let reader_state = Arc::clone(&state);
    let reader_sid = sid.clone();
    let reader_user = user_id.clone();
    let mut read_task = tokio::spawn(async move {
        loop {
            let frame = match tokio::time::timeout(heartbeat.window(), ws_receiver.next()).await {
                Ok(Some(Ok(frame))) => frame,
                Ok(Some(Err(e))) => {
                    tracing::debug!(sid = %reader_sid, error = %e, "WebSocket read failed");
                    break;
                }
                Ok(None) => break,
                Err(_) => {
                    tracing::warn!(sid = %reader_sid, "heartbeat missed, dropping socket");
                    break;
                }
            };
            let Message::Text(text) = frame else {
                if matches!(frame, Message::Close(_)) {
                    break;
                }
                continue;
            };
            match packet::decode(text.as_str()) {
                Ok(Packet::Message(SocketPacket::Event { name, args, .. })) => {
                    handle_event(&reader_state, &reader_sid, &reader_user, &name, args).await;
                }
                Ok(Packet::Message(SocketPacket::Disconnect { .. }) | Packet::Close) => break,
                Ok(Packet::Pong | Packet::Ping | Packet::Noop) => {}
                Ok(other) => tracing::debug!(sid = %reader_sid, ?other, "ignoring packet"),
                Err(e) => tracing::warn!(sid = %reader_sid, error = %e, "undecodable frame"),
            }
        }
    });

    // Wait for either task to finish, then abort the other.
    tokio::select! {
        _ = &mut read_task => {
            write_task.abort();
        }
        _ = &mut write_task => {
            read_task.abort();
        }
    }
    ping_task.abort();

    state.unregister(&sid).await;
    tracing::info!(%sid, user = %user_id, "socket disconnected");
}

/// Waits for the client's namespace connect. Returns `false` if the socket
/// closes, sends something else, or stays silent past `window`.
async fn wait_for_connect(
    receiver: &mut (impl StreamExt<Item = Result<Message, axum::Error>> + Unpin),
    window: Duration,
) -> bool {
    loop {
        let frame = match tokio::time::timeout(window, receiver.next()).await {
            Ok(Some(Ok(frame))) => frame,
            _ => return false,
        };
        match frame {
            Message::Text(text) => match packet::decode(text.as_str()) {
                Ok(Packet::Message(SocketPacket::Connect { .. })) => return true,
                Ok(Packet::Pong | Packet::Noop) => {}
                Ok(other) => {
                    tracing::warn!(?other, "expected namespace connect");
                    return false;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "failed to decode connect packet");
                    return false;
                }
            },
            Message::Close(_) => return false,
            _ => {}
        }
    }
}

/// Dispatch one client event.
async fn handle_event(state: &ServerState, sid: &str, user_id: &str, name: &str, args: Vec<Value>) {
    match OutboundEvent::from_event(name, args) {
        Ok(Some(OutboundEvent::JoinChat(join))) => handle_join(state, sid, user_id, join).await,
        Ok(Some(OutboundEvent::SendMessage(message))) => {
            handle_message(state, user_id, message).await;
        }
        Ok(None) => tracing::debug!(%sid, event = %name, "ignoring unknown event"),
        Err(e) => tracing::warn!(%sid, event = %name, error = %e, "malformed event"),
    }
}

async fn handle_join(state: &ServerState, sid: &str, user_id: &str, join: JoinChat) {
    // The cookie identity wins over the claimed one.
    if join.logged_in_user_id != user_id {
        tracing::warn!(
            %sid,
            user = %user_id,
            claimed = %join.logged_in_user_id,
            "joinChat identity mismatch"
        );
    }
    let room = RoomKey::between(user_id, &join.target_user_id);
    let added = state.join_room(&room, sid).await;
    tracing::info!(%sid, %room, first_name = %join.first_name, added, "joined room");

    let confirmation = InboundEvent::JoinedRoom(JoinedRoom {
        room: room.to_string(),
        socket_id: sid.to_string(),
    });
    state.send_to(sid, &confirmation).await;
}

async fn handle_message(state: &ServerState, user_id: &str, message: SendMessage) {
    if message.text.trim().is_empty() {
        tracing::warn!(user = %user_id, "dropping empty message");
        return;
    }
    let room = RoomKey::between(user_id, &message.target_user_id);
    let now = Utc::now();
    let count = state
        .store
        .append(
            &room,
            StoredMessage {
                sender_id: user_id.to_string(),
                text: message.text.clone(),
                created_at: now,
            },
        )
        .await;

    let sender = state.directory.get(user_id);
    let event = InboundEvent::ReceiveMessage(ReceiveMessage {
        first_name: Some(message.first_name),
        last_name: sender.map(|u| u.last_name.clone()),
        text: message.text,
        timestamp: Some(now),
        sender_id: user_id.to_string(),
        client_message_id: message.client_message_id,
    });
    let delivered = state.broadcast(&room, &event).await;
    tracing::debug!(%room, stored = count, delivered, "message broadcast");
}

async fn send_packet(
    ws_sender: &mut (impl SinkExt<Message, Error = axum::Error> + Unpin),
    packet: &Packet,
) -> Result<(), String> {
    let text = packet::encode(packet).map_err(|e| e.to_string())?;
    ws_sender
        .send(Message::Text(text.into()))
        .await
        .map_err(|e| format!("WebSocket send error: {e}"))
}

/// `GET /chat/{target}`: messages between the caller and `target`.
async fn chat_history(
    State(state): State<Arc<ServerState>>,
    Path(target): Path<String>,
    headers: HeaderMap,
) -> Result<Json<ChatHistory>, StatusCode> {
    let user_id = identify(&state, &headers).ok_or(StatusCode::UNAUTHORIZED)?;
    let room = RoomKey::between(&user_id, &target);
    let messages = state
        .store
        .history(&room)
        .await
        .into_iter()
        .map(|m| HistoryEntry {
            sender_id: Some(state.directory.sender(&m.sender_id)),
            text: m.text,
            created_at: Some(m.created_at),
        })
        .collect();
    Ok(Json(ChatHistory { messages }))
}

/// `GET /user/{id}`: public profile of a user.
async fn user_profile(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<UserProfile>, StatusCode> {
    identify(&state, &headers).ok_or(StatusCode::UNAUTHORIZED)?;
    state
        .directory
        .profile(&id)
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

/// axum handler that upgrades an HTTP request to a Socket.IO connection.
async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let user_id = identify(&state, &headers);
    ws.on_upgrade(move |socket| handle_socket(socket, state, user_id))
}

/// Build the application router.
///
/// The lookups are served both at the root and under `/api`, so clients
/// configured with either base URL reach them.
pub fn router(state: Arc<ServerState>) -> Router {
    let api: Router<Arc<ServerState>> = Router::new()
        .route("/chat/{target}", get(chat_history))
        .route("/user/{id}", get(user_profile));

    Router::new()
        .merge(api.clone())
        .nest("/api", api)
        .route("/socket.io", get(ws_handler))
        .route("/socket.io/", get(ws_handler))
        .with_state(state)
}

/// Starts the server on `addr` and returns the bound address and a join
/// handle.
///
/// # Errors
///
/// Returns [`ServerError::Bind`] if the TCP listener cannot bind.
pub async fn start_server(
    addr: &str,
    state: Arc<ServerState>,
) -> Result<(SocketAddr, tokio::task::JoinHandle<()>), ServerError> {
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let bound_addr = listener.local_addr()?;

    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "server error");
        }
    });

    Ok((bound_addr, handle))
}
