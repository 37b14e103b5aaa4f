// Test-specific lint overrides: integration tests use unwrap/expect freely,
// and some pedantic/nursery lints are not appropriate for test code.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::match_same_arms,
    clippy::doc_markdown,
    clippy::manual_let_else,
    clippy::future_not_send,
    clippy::missing_panics_doc,
    clippy::missing_errors_doc
)]

//! Integration tests for the chat session over in-process connections.
//!
//! The loopback connector stands in for the server: each accepted
//! connection hands the test a `LoopbackPeer` that sees everything the
//! session emits and can push events back. Covers:
//! - re-joining the room on every new connection, once per connection
//! - send / echo / receive ordering and echo suppression
//! - room scoping and late history placement
//! - fail-fast sends while reconnecting or offline, manual reconnect
//! - view teardown before a replacement session connects

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use mentorlink::api::StaticBackend;
use mentorlink::chat::session::{
    ChatSession, SendError, SendOutcome, SessionContext, SessionEvent,
};
use mentorlink::chat::{
    ChatMessage, LocalParticipant, Origin, Participant, ParticipantId, SendStatus,
};
use mentorlink::transport::loopback::{LoopbackConnector, LoopbackPeer, Outcome};
use mentorlink::transport::manager::{LinkStatus, ReconnectConfig};
use mentorlink::view::ChatView;
use mentorlink_proto::api::{ChatHistory, HistoryEntry, HistorySender, UserProfile};
use mentorlink_proto::event::{InboundEvent, JoinChat, OutboundEvent, ReceiveMessage};
use mentorlink_proto::room::RoomKey;
use tokio::sync::mpsc;

const STEP: Duration = Duration::from_secs(3);

// =============================================================================
// Helpers
// =============================================================================

fn fast_reconnect(max_attempts: u32) -> ReconnectConfig {
    ReconnectConfig {
        enabled: true,
        initial_delay: Duration::from_millis(20),
        max_delay: Duration::from_millis(50),
        max_attempts,
        randomization_factor: 0.0,
    }
}

fn local() -> LocalParticipant {
    LocalParticipant {
        id: ParticipantId::new("u1"),
        profile: Participant::from_parts(Some("Asha".into()), Some("Rao".into()), None),
    }
}

fn open(connector: LoopbackConnector, backend: StaticBackend, max_attempts: u32) -> ChatSession {
    ChatSession::open(SessionContext {
        local: local(),
        target: ParticipantId::new("u2"),
        connector,
        backend: Arc::new(backend),
        reconnect: fast_reconnect(max_attempts),
    })
}

/// Wait for a session event matching `pred`, skipping others.
async fn wait_for_event(
    session: &mut ChatSession,
    description: &str,
    pred: impl Fn(&SessionEvent) -> bool,
) -> SessionEvent {
    let deadline = tokio::time::Instant::now() + STEP;
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        match tokio::time::timeout(remaining, session.next_event()).await {
            Ok(Some(event)) if pred(&event) => return event,
            Ok(Some(_)) => {}
            Ok(None) => panic!("session ended while waiting for {description}"),
            Err(_) => panic!("timed out waiting for {description}"),
        }
    }
}

async fn wait_for_link(session: &mut ChatSession, status: LinkStatus) {
    wait_for_event(session, &format!("link {status}"), |e| {
        *e == SessionEvent::Link(status)
    })
    .await;
}

/// Wait for a timeline snapshot with exactly `len` messages.
async fn wait_for_timeline(session: &mut ChatSession, len: usize) -> Vec<ChatMessage> {
    let event = wait_for_event(session, &format!("timeline of {len}"), |e| {
        matches!(e, SessionEvent::Timeline(m) if m.len() == len)
    })
    .await;
    let SessionEvent::Timeline(messages) = event else {
        unreachable!()
    };
    messages
}

async fn next_peer(peers: &mut mpsc::UnboundedReceiver<LoopbackPeer>) -> LoopbackPeer {
    tokio::time::timeout(STEP, peers.recv())
        .await
        .expect("timed out waiting for a connection")
        .expect("connector dropped")
}

async fn expect_join(peer: &mut LoopbackPeer) -> JoinChat {
    match tokio::time::timeout(STEP, peer.recv()).await {
        Ok(Some(OutboundEvent::JoinChat(join))) => join,
        other => panic!("expected joinChat, got {other:?}"),
    }
}

fn remote(sender: &str, text: &str) -> ReceiveMessage {
    ReceiveMessage {
        first_name: Some("Bo".into()),
        last_name: Some("Lin".into()),
        text: text.into(),
        timestamp: Some(Utc::now()),
        sender_id: sender.into(),
        client_message_id: None,
    }
}

fn texts(messages: &[ChatMessage]) -> Vec<&str> {
    messages.iter().map(|m| m.text.as_str()).collect()
}

// =============================================================================
// Handshake
// =============================================================================

#[tokio::test]
async fn join_is_emitted_once_per_connection() {
    let (connector, mut peers) = LoopbackConnector::new();
    let mut session = open(connector.clone(), StaticBackend::new(), 5);

    let mut first = next_peer(&mut peers).await;
    let join = expect_join(&mut first).await;
    assert_eq!(join.first_name, "Asha");
    assert_eq!(join.logged_in_user_id, "u1");
    assert_eq!(join.target_user_id, "u2");
    wait_for_link(&mut session, LinkStatus::Connected).await;

    // Sever the link; the session must re-join on the replacement.
    drop(first);
    let mut second = next_peer(&mut peers).await;
    assert_eq!(second.attempt(), 2);
    expect_join(&mut second).await;
    wait_for_link(&mut session, LinkStatus::Connected).await;

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(second.try_recv().is_none(), "join must not repeat");
    assert_eq!(connector.attempts(), 2);
    session.close().await;
}

// =============================================================================
// Send / receive
// =============================================================================

#[tokio::test]
async fn echo_with_correlation_id_confirms_instead_of_duplicating() {
    let (connector, mut peers) = LoopbackConnector::new();
    let mut session = open(connector, StaticBackend::new(), 5);
    let mut peer = next_peer(&mut peers).await;
    expect_join(&mut peer).await;
    wait_for_link(&mut session, LinkStatus::Connected).await;

    let SendOutcome::Sent(id) = session.send("hi Bo").await.unwrap() else {
        panic!("send was ignored");
    };
    let Some(OutboundEvent::SendMessage(sent)) = peer.recv().await else {
        panic!("expected sendMessage");
    };
    assert_eq!(sent.text, "hi Bo");
    assert_eq!(sent.client_message_id, Some(id.to_string()));

    let server_time = Utc.with_ymd_and_hms(2024, 5, 1, 9, 30, 0).unwrap();
    assert!(peer.deliver(InboundEvent::ReceiveMessage(ReceiveMessage {
        first_name: Some("Asha".into()),
        last_name: Some("Rao".into()),
        text: "hi Bo".into(),
        timestamp: Some(server_time),
        sender_id: "u1".into(),
        client_message_id: sent.client_message_id.clone(),
    })));
    peer.deliver(InboundEvent::ReceiveMessage(remote("u2", "hello Asha")));

    let messages = wait_for_timeline(&mut session, 2).await;
    assert_eq!(texts(&messages), ["hi Bo", "hello Asha"]);
    assert_eq!(
        messages[0].origin,
        Origin::Local {
            id,
            status: SendStatus::Confirmed
        }
    );
    assert_eq!(messages[0].timestamp, server_time);
    assert_eq!(messages[1].origin, Origin::Remote);
    session.close().await;
}

#[tokio::test]
async fn echo_without_correlation_id_matches_pending_send() {
    let (connector, mut peers) = LoopbackConnector::new();
    let mut session = open(connector, StaticBackend::new(), 5);
    let mut peer = next_peer(&mut peers).await;
    expect_join(&mut peer).await;
    wait_for_link(&mut session, LinkStatus::Connected).await;

    session.send("same").await.unwrap();
    session.send("same").await.unwrap();
    let mut echo = remote("u1", "same");
    echo.first_name = Some("Asha".into());
    peer.deliver(InboundEvent::ReceiveMessage(echo));
    peer.deliver(InboundEvent::ReceiveMessage(remote("u2", "after")));

    let messages = wait_for_timeline(&mut session, 3).await;
    assert_eq!(texts(&messages), ["same", "same", "after"]);
    assert_eq!(messages[0].send_status(), Some(SendStatus::Confirmed));
    assert_eq!(messages[1].send_status(), Some(SendStatus::Sent));
    session.close().await;
}

#[tokio::test]
async fn remote_messages_append_in_receipt_order() {
    let (connector, mut peers) = LoopbackConnector::new();
    let mut session = open(connector, StaticBackend::new(), 5);
    let mut peer = next_peer(&mut peers).await;
    expect_join(&mut peer).await;

    let mut late = remote("u2", "second");
    late.timestamp = Some(Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap());
    peer.deliver(InboundEvent::ReceiveMessage(remote("u2", "first")));
    peer.deliver(InboundEvent::ReceiveMessage(late));

    let messages = wait_for_timeline(&mut session, 2).await;
    assert_eq!(texts(&messages), ["first", "second"]);
    session.close().await;
}

#[tokio::test]
async fn third_party_events_are_ignored() {
    let (connector, mut peers) = LoopbackConnector::new();
    let mut session = open(connector, StaticBackend::new(), 5);
    let mut peer = next_peer(&mut peers).await;
    expect_join(&mut peer).await;

    peer.deliver(InboundEvent::ReceiveMessage(remote("u3", "intruder")));
    peer.deliver(InboundEvent::ReceiveMessage(remote("u2", "welcome")));

    let messages = wait_for_timeline(&mut session, 1).await;
    assert_eq!(texts(&messages), ["welcome"]);
    session.close().await;
}

#[tokio::test]
async fn resolved_counterpart_avatar_applies_to_later_messages() {
    let backend = StaticBackend::new().with_profile(
        "u2",
        UserProfile {
            first_name: Some("Bo".into()),
            last_name: Some("Lin".into()),
            photo_url: Some("https://img/bo.png".into()),
        },
    );
    let (connector, mut peers) = LoopbackConnector::new();
    let mut session = open(connector, backend, 5);
    let mut peer = next_peer(&mut peers).await;
    expect_join(&mut peer).await;

    let event = wait_for_event(&mut session, "participant", |e| {
        matches!(e, SessionEvent::Participant(_))
    })
    .await;
    assert_eq!(
        event,
        SessionEvent::Participant(Participant::from_parts(
            Some("Bo".into()),
            Some("Lin".into()),
            Some("https://img/bo.png".into()),
        ))
    );

    peer.deliver(InboundEvent::ReceiveMessage(remote("u2", "hi")));
    let messages = wait_for_timeline(&mut session, 1).await;
    assert_eq!(messages[0].sender_avatar_url, "https://img/bo.png");
    session.close().await;
}

// =============================================================================
// History
// =============================================================================

#[tokio::test]
async fn late_history_goes_before_live_messages_without_duplicates() {
    let shared_time = Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap();
    let sender = HistorySender {
        id: Some("u2".into()),
        first_name: Some("Bo".into()),
        last_name: Some("Lin".into()),
        photo_url: None,
    };
    let history = ChatHistory {
        messages: vec![
            HistoryEntry {
                sender_id: Some(sender.clone()),
                text: "older".into(),
                created_at: Some(Utc.with_ymd_and_hms(2024, 5, 1, 7, 0, 0).unwrap()),
            },
            HistoryEntry {
                sender_id: Some(sender),
                text: "overlap".into(),
                created_at: Some(shared_time),
            },
        ],
    };
    let backend = StaticBackend::new().with_history("u2", history);
    backend.set_delay(Duration::from_millis(300));

    let (connector, mut peers) = LoopbackConnector::new();
    let mut session = open(connector, backend, 5);
    let mut peer = next_peer(&mut peers).await;
    expect_join(&mut peer).await;

    let mut overlap = remote("u2", "overlap");
    overlap.timestamp = Some(shared_time);
    peer.deliver(InboundEvent::ReceiveMessage(overlap));
    peer.deliver(InboundEvent::ReceiveMessage(remote("u2", "live")));
    wait_for_timeline(&mut session, 2).await;

    let messages = wait_for_timeline(&mut session, 3).await;
    assert_eq!(texts(&messages), ["older", "overlap", "live"]);
    assert_eq!(messages[0].origin, Origin::History);
    assert_eq!(messages[1].origin, Origin::Remote);
    session.close().await;
}

// =============================================================================
// Connection loss
// =============================================================================

#[tokio::test]
async fn send_while_reconnecting_fails_fast_without_appending() {
    let (connector, mut peers) = LoopbackConnector::new();
    connector.script([Outcome::Accept]);
    connector.set_fallback(Outcome::Refuse);
    let mut session = open(connector, StaticBackend::new(), 5);
    let mut peer = next_peer(&mut peers).await;
    expect_join(&mut peer).await;
    wait_for_link(&mut session, LinkStatus::Connected).await;

    drop(peer);
    wait_for_event(&mut session, "reconnecting", |e| {
        matches!(e, SessionEvent::Link(LinkStatus::Reconnecting { .. }))
    })
    .await;

    let result = session.send("lost?").await;
    assert!(matches!(result, Err(SendError::NotConnected)), "{result:?}");
    assert!(session.try_next_event().is_none_or(|e| !matches!(e, SessionEvent::Timeline(_))));
    session.close().await;
}

#[tokio::test]
async fn exhausted_retries_go_offline_until_manual_reconnect() {
    let (connector, mut peers) = LoopbackConnector::new();
    connector.script([Outcome::Accept]);
    connector.set_fallback(Outcome::Refuse);
    let mut session = open(connector.clone(), StaticBackend::new(), 2);
    let mut peer = next_peer(&mut peers).await;
    expect_join(&mut peer).await;

    drop(peer);
    wait_for_link(&mut session, LinkStatus::Offline).await;
    // One accepted connection, then the two retries.
    assert_eq!(connector.attempts(), 3);
    assert!(matches!(
        session.send("anyone?").await,
        Err(SendError::Offline)
    ));

    connector.set_fallback(Outcome::Accept);
    session.reconnect().unwrap();
    let mut replacement = next_peer(&mut peers).await;
    expect_join(&mut replacement).await;
    wait_for_link(&mut session, LinkStatus::Connected).await;
    assert!(matches!(
        session.send("back").await,
        Ok(SendOutcome::Sent(_))
    ));
    session.close().await;
}

#[tokio::test]
async fn events_after_close_are_never_observed() {
    let (connector, mut peers) = LoopbackConnector::new();
    let mut session = open(connector, StaticBackend::new(), 5);
    let mut peer = next_peer(&mut peers).await;
    expect_join(&mut peer).await;
    wait_for_link(&mut session, LinkStatus::Connected).await;

    session.close().await;
    assert!(peer.is_closed());
    assert!(!peer.deliver(InboundEvent::ReceiveMessage(remote("u2", "too late"))));
}

// =============================================================================
// View
// =============================================================================

#[tokio::test]
async fn switching_target_closes_previous_connection_first() {
    let (connector, mut peers) = LoopbackConnector::new();
    let mut view = ChatView::new(
        Some(local()),
        connector,
        Arc::new(StaticBackend::new()),
        fast_reconnect(5),
    );

    view.mount(ParticipantId::new("u2")).await.unwrap();
    let mut first = next_peer(&mut peers).await;
    assert_eq!(expect_join(&mut first).await.target_user_id, "u2");

    view.mount(ParticipantId::new("u3")).await.unwrap();
    assert!(first.is_closed(), "old connection must close before the new one opens");

    let mut second = next_peer(&mut peers).await;
    let join = expect_join(&mut second).await;
    assert_eq!(join.target_user_id, "u3");
    assert_eq!(view.target(), Some(&ParticipantId::new("u3")));

    // Traffic for the old room goes nowhere.
    assert!(!first.deliver(InboundEvent::ReceiveMessage(remote("u2", "stale"))));
    view.unmount().await;
    assert!(second.is_closed());
}

#[tokio::test]
async fn mounting_same_target_keeps_the_connection() {
    let (connector, mut peers) = LoopbackConnector::new();
    let mut view = ChatView::new(
        Some(local()),
        connector.clone(),
        Arc::new(StaticBackend::new()),
        fast_reconnect(5),
    );
    view.mount(ParticipantId::new("u2")).await.unwrap();
    let mut peer = next_peer(&mut peers).await;
    expect_join(&mut peer).await;

    view.mount(ParticipantId::new("u2")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(connector.attempts(), 1);
    assert!(!peer.is_closed());
    view.unmount().await;
}

#[tokio::test]
async fn identity_change_replaces_session_for_same_target() {
    let (connector, mut peers) = LoopbackConnector::new();
    let mut view = ChatView::new(
        Some(local()),
        connector.clone(),
        Arc::new(StaticBackend::new()),
        fast_reconnect(5),
    );
    view.mount(ParticipantId::new("u2")).await.unwrap();
    let mut first = next_peer(&mut peers).await;
    assert_eq!(expect_join(&mut first).await.logged_in_user_id, "u1");

    let other = LocalParticipant {
        id: ParticipantId::new("u9"),
        profile: Participant::from_parts(Some("Noor".into()), None, None),
    };
    view.set_identity(Some(other)).await;
    assert!(first.is_closed(), "old identity must be torn down before remounting");

    let session = view.mount(ParticipantId::new("u2")).await.unwrap();
    assert_eq!(session.room(), &RoomKey::between("u9", "u2"));
    let mut second = next_peer(&mut peers).await;
    let join = expect_join(&mut second).await;
    assert_eq!(join.logged_in_user_id, "u9");
    assert_eq!(join.first_name, "Noor");
    assert_eq!(connector.attempts(), 2);

    view.set_identity(None).await;
    assert!(second.is_closed());
    assert!(view.target().is_none());
}

#[tokio::test]
async fn lookups_for_previous_target_never_reach_new_session() {
    let history = ChatHistory {
        messages: vec![HistoryEntry {
            sender_id: Some(HistorySender {
                id: Some("u2".into()),
                first_name: Some("Bo".into()),
                last_name: Some("Lin".into()),
                photo_url: None,
            }),
            text: "from the u2 room".into(),
            created_at: Some(Utc.with_ymd_and_hms(2024, 5, 1, 7, 0, 0).unwrap()),
        }],
    };
    let backend = StaticBackend::new().with_history("u2", history).with_profile(
        "u2",
        UserProfile {
            first_name: Some("Bo".into()),
            last_name: Some("Lin".into()),
            photo_url: None,
        },
    );
    backend.set_delay(Duration::from_millis(300));
    let bo = Participant::from_parts(Some("Bo".into()), Some("Lin".into()), None);

    let (connector, mut peers) = LoopbackConnector::new();
    let mut view = ChatView::new(Some(local()), connector, Arc::new(backend), fast_reconnect(5));
    view.mount(ParticipantId::new("u2")).await.unwrap();
    let mut first = next_peer(&mut peers).await;
    expect_join(&mut first).await;

    // Switch well before the u2 lookups complete.
    let session = view.mount(ParticipantId::new("u3")).await.unwrap();
    let mut second = next_peer(&mut peers).await;
    expect_join(&mut second).await;

    // Both u3 lookups miss, so the session settles on an empty timeline
    // and the placeholder participant.
    let mut seen_timeline = false;
    let mut seen_participant = false;
    let deadline = tokio::time::Instant::now() + STEP;
    while !(seen_timeline && seen_participant) {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        match tokio::time::timeout(remaining, session.next_event()).await {
            Ok(Some(SessionEvent::Timeline(messages))) => {
                assert!(messages.is_empty(), "u3 timeline got {:?}", texts(&messages));
                seen_timeline = true;
            }
            Ok(Some(SessionEvent::Participant(participant))) => {
                assert_ne!(participant, bo);
                assert_eq!(participant, Participant::placeholder());
                seen_participant = true;
            }
            Ok(Some(_)) => {}
            Ok(None) => panic!("session ended"),
            Err(_) => panic!("timed out waiting for u3 lookups"),
        }
    }

    tokio::time::sleep(Duration::from_millis(100)).await;
    while let Some(event) = session.try_next_event() {
        match event {
            SessionEvent::Timeline(messages) => {
                assert!(!texts(&messages).contains(&"from the u2 room"));
            }
            SessionEvent::Participant(participant) => assert_ne!(participant, bo),
            _ => {}
        }
    }
    view.unmount().await;
}

#[tokio::test]
async fn failed_attempts_never_join_and_final_success_joins_once() {
    let (connector, mut peers) = LoopbackConnector::new();
    connector.script([
        Outcome::Accept,
        Outcome::Refuse,
        Outcome::Refuse,
        Outcome::Refuse,
        Outcome::Refuse,
        Outcome::Accept,
    ]);
    let mut session = open(connector.clone(), StaticBackend::new(), 5);
    let mut first = next_peer(&mut peers).await;
    expect_join(&mut first).await;
    wait_for_link(&mut session, LinkStatus::Connected).await;

    drop(first);
    let mut last = next_peer(&mut peers).await;
    assert_eq!(last.attempt(), 6);
    expect_join(&mut last).await;
    wait_for_link(&mut session, LinkStatus::Connected).await;
    assert!(last.try_recv().is_none());
    assert_eq!(connector.attempts(), 6);
    session.close().await;
}

#[tokio::test]
async fn history_then_local_send_shows_three_messages() {
    let sender = HistorySender {
        id: Some("u2".into()),
        first_name: Some("Bo".into()),
        last_name: None,
        photo_url: None,
    };
    let entry = |text: &str, minute| HistoryEntry {
        sender_id: Some(sender.clone()),
        text: text.into(),
        created_at: Some(Utc.with_ymd_and_hms(2024, 5, 1, 7, minute, 0).unwrap()),
    };
    let backend = StaticBackend::new().with_history(
        "u2",
        ChatHistory {
            messages: vec![entry("one", 0), entry("two", 1)],
        },
    );
    let (connector, mut peers) = LoopbackConnector::new();
    let mut session = open(connector, backend, 5);
    let mut peer = next_peer(&mut peers).await;
    expect_join(&mut peer).await;

    // The join is emitted on a live link, so the send goes out whether or
    // not history has landed yet; either way it ends up last.
    session.send("hi").await.unwrap();
    let messages = wait_for_timeline(&mut session, 3).await;
    assert_eq!(texts(&messages), ["one", "two", "hi"]);
    assert_eq!(messages[2].sender_id, ParticipantId::new("u1"));
    let Some(OutboundEvent::SendMessage(sent)) = peer.recv().await else {
        panic!("expected sendMessage");
    };
    assert_eq!(sent.text, "hi");
    assert!(peer.try_recv().is_none());
    session.close().await;
}
