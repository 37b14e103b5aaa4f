// Test-specific lint overrides: integration tests use unwrap/expect freely,
// and some pedantic/nursery lints are not appropriate for test code.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::needless_continue,
    clippy::match_same_arms,
    clippy::doc_markdown,
    clippy::manual_let_else,
    clippy::future_not_send,
    clippy::missing_panics_doc,
    clippy::missing_errors_doc,
    clippy::missing_docs_in_private_items
)]

//! End-to-end tests against the development server.
//!
//! Sessions use the real Socket.IO connector and HTTP backend. These tests
//! validate:
//! - two participants exchange messages and the sender's echo confirms
//! - history and the counterpart profile load over HTTP with the cookie
//! - a dropped connection is re-established and the room re-joined
//! - retries end in offline when the server stays unreachable
//! - an unknown identity cookie is refused at the namespace handshake
//!
//! ## Disconnect simulation
//!
//! Aborting the server's `JoinHandle` leaves accepted WebSockets alive, so
//! connection loss is simulated with a TCP proxy between the client and the
//! server. Killing the proxy aborts every forwarding task and the listener.

use std::sync::Arc;
use std::time::Duration;

use mentorlink::api::HttpBackend;
use mentorlink::chat::session::{
    ChatSession, SendError, SendOutcome, SessionContext, SessionEvent,
};
use mentorlink::chat::{ChatMessage, LocalParticipant, Origin, Participant, ParticipantId, SendStatus};
use mentorlink::transport::manager::{LinkStatus, ReconnectConfig};
use mentorlink::transport::socketio::SocketIoConnector;
use mentorlink::transport::{Connector, TransportError};
use mentorlink_proto::room::RoomKey;
use mentorlink_server::config::UserSeed;
use mentorlink_server::directory::UserDirectory;
use mentorlink_server::server::{Heartbeat, ServerState, start_server};
use mentorlink_server::store::{ChatStore, StoredMessage};
use parking_lot::Mutex;
use url::Url;

const STEP: Duration = Duration::from_secs(10);

// =============================================================================
// TCP Proxy helper
// =============================================================================

/// Forwards a client-facing port to the server. `kill()` severs every
/// proxied connection and stops accepting new ones.
struct TcpProxy {
    client_addr: String,
    accept_handle: tokio::task::JoinHandle<()>,
    conn_handles: Arc<Mutex<Vec<tokio::task::JoinHandle<()>>>>,
}

impl TcpProxy {
    /// Proxy from an OS-assigned port to `backend_addr`.
    async fn new(backend_addr: &str) -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        Self::serve(listener, backend_addr)
    }

    /// Proxy from the fixed `client_addr`. `None` while the port is taken.
    async fn bind(client_addr: &str, backend_addr: &str) -> Option<Self> {
        let listener = tokio::net::TcpListener::bind(client_addr).await.ok()?;
        Some(Self::serve(listener, backend_addr))
    }

    fn serve(listener: tokio::net::TcpListener, backend_addr: &str) -> Self {
        let client_addr = listener.local_addr().unwrap().to_string();
        let backend = backend_addr.to_string();
        let conn_handles: Arc<Mutex<Vec<tokio::task::JoinHandle<()>>>> =
            Arc::new(Mutex::new(Vec::new()));
        let tracked = Arc::clone(&conn_handles);

        let accept_handle = tokio::spawn(async move {
            loop {
                let (mut client_stream, _) = match listener.accept().await {
                    Ok(v) => v,
                    Err(_) => break,
                };
                let backend = backend.clone();
                let conn_handle = tokio::spawn(async move {
                    let Ok(mut backend_stream) = tokio::net::TcpStream::connect(&backend).await
                    else {
                        return;
                    };
                    let _ = tokio::io::copy_bidirectional(&mut client_stream, &mut backend_stream)
                        .await;
                });
                tracked.lock().push(conn_handle);
            }
        });

        Self {
            client_addr,
            accept_handle,
            conn_handles,
        }
    }

    /// Sever all connections and stop listening.
    fn kill(self) {
        self.accept_handle.abort();
        for handle in self.conn_handles.lock().iter() {
            handle.abort();
        }
    }
}

// =============================================================================
// Helpers
// =============================================================================

async fn start() -> (String, Arc<ServerState>) {
    let directory = UserDirectory::new(&[
        UserSeed::new("u1", "Asha", "Rao"),
        UserSeed::new("u2", "Bo", "Lin"),
    ]);
    let heartbeat = Heartbeat {
        interval: Duration::from_millis(200),
        timeout: Duration::from_millis(500),
    };
    let state = Arc::new(ServerState::with_parts(directory, ChatStore::new(), heartbeat));
    let (addr, _handle) = start_server("127.0.0.1:0", Arc::clone(&state))
        .await
        .expect("failed to start server");
    (addr.to_string(), state)
}

fn fast_reconnect(max_attempts: u32) -> ReconnectConfig {
    ReconnectConfig {
        enabled: true,
        initial_delay: Duration::from_millis(50),
        max_delay: Duration::from_millis(200),
        max_attempts,
        randomization_factor: 0.0,
    }
}

fn participant(id: &str, first: &str, last: &str) -> LocalParticipant {
    LocalParticipant {
        id: ParticipantId::new(id),
        profile: Participant::from_parts(Some(first.into()), Some(last.into()), None),
    }
}

/// Open a session from `local` to `target` through `addr`, authenticated by
/// the local id (the default token).
fn open(addr: &str, local: LocalParticipant, target: &str, max_attempts: u32) -> ChatSession {
    let base = Url::parse(&format!("http://{addr}/")).unwrap();
    let token = local.id.as_str().to_string();
    let connector = SocketIoConnector::new(&base).unwrap().with_token(token.clone());
    let backend = HttpBackend::new(base.join("api/").unwrap(), Some(token)).unwrap();
    ChatSession::open(SessionContext {
        local,
        target: ParticipantId::new(target),
        connector,
        backend: Arc::new(backend),
        reconnect: fast_reconnect(max_attempts),
    })
}

/// Wait for a session event matching `pred`, skipping others.
async fn wait_for_event<F>(session: &mut ChatSession, description: &str, pred: F) -> SessionEvent
where
    F: Fn(&SessionEvent) -> bool,
{
    let deadline = tokio::time::Instant::now() + STEP;
    while tokio::time::Instant::now() < deadline {
        let remaining = deadline - tokio::time::Instant::now();
        match tokio::time::timeout(remaining, session.next_event()).await {
            Ok(Some(evt)) if pred(&evt) => return evt,
            Ok(Some(_other)) => continue,
            Ok(None) => panic!("session ended while waiting for {description}"),
            Err(_) => break,
        }
    }
    panic!("timeout waiting for {description}");
}

async fn wait_for_joined(session: &mut ChatSession) {
    wait_for_event(session, "Joined", |e| matches!(e, SessionEvent::Joined { .. })).await;
}

async fn wait_for_timeline<F>(session: &mut ChatSession, description: &str, pred: F) -> Vec<ChatMessage>
where
    F: Fn(&[ChatMessage]) -> bool,
{
    let event = wait_for_event(session, description, |e| {
        matches!(e, SessionEvent::Timeline(m) if pred(m))
    })
    .await;
    match event {
        SessionEvent::Timeline(messages) => messages,
        other => panic!("expected timeline, got {other:?}"),
    }
}

/// Poll until `room` has `expected` joined sockets.
async fn wait_for_room_size(state: &ServerState, room: &RoomKey, expected: usize) {
    let deadline = tokio::time::Instant::now() + STEP;
    while state.room_size(room).await != expected {
        assert!(
            tokio::time::Instant::now() < deadline,
            "room {room} never reached {expected} sockets"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test]
async fn two_participants_exchange_messages() {
    let (addr, _state) = start().await;
    let mut asha = open(&addr, participant("u1", "Asha", "Rao"), "u2", 5);
    let mut bo = open(&addr, participant("u2", "Bo", "Lin"), "u1", 5);
    wait_for_joined(&mut asha).await;
    wait_for_joined(&mut bo).await;

    let SendOutcome::Sent(id) = asha.send("hi Bo").await.unwrap() else {
        panic!("send ignored");
    };

    let own = wait_for_timeline(&mut asha, "confirmed echo", |m| {
        m.len() == 1 && m[0].send_status() == Some(SendStatus::Confirmed)
    })
    .await;
    assert_eq!(own[0].local_id(), Some(id));

    let received = wait_for_timeline(&mut bo, "message from Asha", |m| m.len() == 1).await;
    assert_eq!(received[0].text, "hi Bo");
    assert_eq!(received[0].origin, Origin::Remote);
    assert_eq!(received[0].sender_id, ParticipantId::new("u1"));
    assert_eq!(received[0].sender_display_name(), "Asha Rao");

    bo.send("hey Asha").await.unwrap();
    let both = wait_for_timeline(&mut asha, "reply", |m| m.len() == 2).await;
    assert_eq!(both[1].text, "hey Asha");

    asha.close().await;
    bo.close().await;
}

#[tokio::test]
async fn history_and_profile_load_over_http() {
    let (addr, state) = start().await;
    let room = RoomKey::between("u1", "u2");
    for (sender, text) in [("u2", "welcome"), ("u1", "thanks")] {
        state
            .store
            .append(
                &room,
                StoredMessage {
                    sender_id: sender.into(),
                    text: text.into(),
                    created_at: chrono::Utc::now(),
                },
            )
            .await;
    }

    let mut session = open(&addr, participant("u1", "Asha", "Rao"), "u2", 5);
    let event = wait_for_event(&mut session, "participant", |e| {
        matches!(e, SessionEvent::Participant(_))
    })
    .await;
    let SessionEvent::Participant(counterpart) = event else {
        unreachable!()
    };
    assert_eq!(counterpart.display_name(), "Bo Lin");

    let history = wait_for_timeline(&mut session, "history", |m| m.len() == 2).await;
    let texts: Vec<_> = history.iter().map(|m| m.text.as_str()).collect();
    assert_eq!(texts, ["welcome", "thanks"]);
    assert!(history.iter().all(|m| m.origin == Origin::History));
    assert_eq!(history[0].sender_first_name, "Bo");
    session.close().await;
}

#[tokio::test]
async fn lost_connection_rejoins_room() {
    let (addr, state) = start().await;
    let proxy = TcpProxy::new(&addr).await;
    let proxy_addr = proxy.client_addr.clone();
    let room = RoomKey::between("u1", "u2");

    let mut session = open(&proxy_addr, participant("u1", "Asha", "Rao"), "u2", 10);
    wait_for_joined(&mut session).await;
    wait_for_room_size(&state, &room, 1).await;

    // Sever the proxied connection; keep a fresh proxy on the same port.
    proxy.kill();
    wait_for_event(&mut session, "Reconnecting", |e| {
        matches!(e, SessionEvent::Link(LinkStatus::Reconnecting { .. }))
    })
    .await;
    wait_for_room_size(&state, &room, 0).await;
    let revived = revive_proxy(&proxy_addr, &addr).await;

    wait_for_event(&mut session, "Connected", |e| {
        *e == SessionEvent::Link(LinkStatus::Connected)
    })
    .await;
    wait_for_joined(&mut session).await;
    wait_for_room_size(&state, &room, 1).await;
    assert_eq!(state.sockets_of("u1").await, 1);

    let sent = session.send("still here").await.unwrap();
    assert!(matches!(sent, SendOutcome::Sent(_)));
    session.close().await;
    revived.kill();
}

#[tokio::test]
async fn server_closing_sockets_triggers_reconnect() {
    let (addr, state) = start().await;
    let room = RoomKey::between("u1", "u2");
    let mut session = open(&addr, participant("u1", "Asha", "Rao"), "u2", 5);
    wait_for_joined(&mut session).await;

    state.close_all_connections().await;
    wait_for_event(&mut session, "Reconnecting", |e| {
        matches!(e, SessionEvent::Link(LinkStatus::Reconnecting { .. }))
    })
    .await;
    wait_for_joined(&mut session).await;
    wait_for_room_size(&state, &room, 1).await;
    session.close().await;
}

#[tokio::test]
async fn unreachable_server_ends_offline() {
    let (addr, _state) = start().await;
    let proxy = TcpProxy::new(&addr).await;
    let proxy_addr = proxy.client_addr.clone();
    let mut session = open(&proxy_addr, participant("u1", "Asha", "Rao"), "u2", 2);
    wait_for_joined(&mut session).await;

    proxy.kill();
    wait_for_event(&mut session, "Offline", |e| {
        *e == SessionEvent::Link(LinkStatus::Offline)
    })
    .await;
    let result = session.send("anyone?").await;
    assert!(matches!(result, Err(SendError::Offline)), "{result:?}");
    session.close().await;
}

/// Rebind a proxy on `client_addr` once the killed one released the port.
async fn revive_proxy(client_addr: &str, backend_addr: &str) -> TcpProxy {
    let deadline = tokio::time::Instant::now() + STEP;
    loop {
        if let Some(proxy) = TcpProxy::bind(client_addr, backend_addr).await {
            return proxy;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "could not rebind proxy on {client_addr}"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn unknown_token_is_refused_at_handshake() {
    let (addr, _state) = start().await;
    let base = Url::parse(&format!("http://{addr}/")).unwrap();
    let connector = SocketIoConnector::new(&base).unwrap().with_token("bogus");

    match connector.connect().await {
        Err(TransportError::Handshake(reason)) => {
            assert!(reason.contains("Unauthorized"), "{reason}");
        }
        Err(other) => panic!("expected handshake refusal, got {other}"),
        Ok(_) => panic!("expected handshake refusal, got a connection"),
    }
}
