// Test-specific lint overrides: integration tests use unwrap/expect freely,
// and some pedantic/nursery lints are not appropriate for test code.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::doc_markdown,
    clippy::future_not_send,
    clippy::missing_panics_doc
)]

//! Integration tests wiring the terminal app to a mounted chat view.
//!
//! Key events are fed to `App`, the resulting actions are carried out
//! against a `ChatView` over loopback connections the way the runtime loop
//! does, and the frame is rendered to a test backend. These tests validate:
//! - typed text reaches the server as `sendMessage` and renders as own
//! - `/open` switches the conversation and resets the panel
//! - offline status shows in the status bar and Ctrl-R recovers

use std::sync::Arc;
use std::time::Duration;

use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use mentorlink::api::StaticBackend;
use mentorlink::app::{App, AppAction, SELF_LABEL};
use mentorlink::chat::{LocalParticipant, Participant, ParticipantId};
use mentorlink::transport::loopback::{LoopbackConnector, LoopbackPeer, Outcome};
use mentorlink::transport::manager::{LinkStatus, ReconnectConfig};
use mentorlink::ui;
use mentorlink::view::ChatView;
use mentorlink_proto::api::UserProfile;
use mentorlink_proto::event::{InboundEvent, OutboundEvent, ReceiveMessage};
use ratatui::Terminal;
use ratatui::backend::TestBackend;
use tokio::sync::mpsc;

const STEP: Duration = Duration::from_secs(3);

type View = ChatView<LoopbackConnector, StaticBackend>;

struct Harness {
    app: App,
    view: View,
    connector: LoopbackConnector,
    peers: mpsc::UnboundedReceiver<LoopbackPeer>,
}

impl Harness {
    async fn new(target: &str) -> Self {
        let (connector, peers) = LoopbackConnector::new();
        let backend = StaticBackend::new().with_profile(
            "u2",
            UserProfile {
                first_name: Some("Bo".into()),
                last_name: Some("Lin".into()),
                photo_url: None,
            },
        );
        let local = LocalParticipant {
            id: ParticipantId::new("u1"),
            profile: Participant::from_parts(Some("Asha".into()), Some("Rao".into()), None),
        };
        let reconnect = ReconnectConfig {
            enabled: true,
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(20),
            max_attempts: 1,
            randomization_factor: 0.0,
        };
        let mut harness = Self {
            app: App::new(Some(local.id.clone()), "%H:%M"),
            view: ChatView::new(Some(local), connector.clone(), Arc::new(backend), reconnect),
            connector,
            peers,
        };
        harness.run(AppAction::Open(ParticipantId::new(target))).await;
        harness
    }

    /// Carry out an action the way the runtime loop does.
    async fn run(&mut self, action: AppAction) {
        match action {
            AppAction::Send(text) => {
                if let Some(session) = self.view.session()
                    && let Err(e) = session.send(&text).await
                {
                    self.app.push_notice(format!("Not sent: {e}"));
                }
            }
            AppAction::Reconnect => {
                if let Some(session) = self.view.session() {
                    session.reconnect().unwrap();
                }
            }
            AppAction::Open(target) => {
                self.view.mount(target.clone()).await.unwrap();
                self.app.set_target(target);
            }
        }
    }

    async fn type_line(&mut self, line: &str) {
        for c in line.chars() {
            assert!(self.press(KeyCode::Char(c), KeyModifiers::NONE).is_none());
        }
        if let Some(action) = self.press(KeyCode::Enter, KeyModifiers::NONE) {
            self.run(action).await;
        }
    }

    fn press(&mut self, code: KeyCode, modifiers: KeyModifiers) -> Option<AppAction> {
        self.app.handle_key_event(KeyEvent::new(code, modifiers))
    }

    /// Apply session events until `done` holds for the app state.
    async fn settle(&mut self, description: &str, done: impl Fn(&App) -> bool) {
        let deadline = tokio::time::Instant::now() + STEP;
        while !done(&self.app) {
            let session = self.view.session().expect("no session mounted");
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            match tokio::time::timeout(remaining, session.next_event()).await {
                Ok(Some(event)) => self.app.apply_session_event(event),
                Ok(None) => panic!("session ended while waiting for {description}"),
                Err(_) => panic!("timed out waiting for {description}"),
            }
        }
    }

    async fn next_peer(&mut self) -> LoopbackPeer {
        tokio::time::timeout(STEP, self.peers.recv())
            .await
            .expect("timed out waiting for a connection")
            .expect("connector dropped")
    }

    fn render(&self) -> String {
        let mut terminal = Terminal::new(TestBackend::new(60, 16)).unwrap();
        terminal.draw(|frame| ui::draw(frame, &self.app)).unwrap();
        let buffer = terminal.backend().buffer();
        let mut text = String::new();
        for y in 0..buffer.area.height {
            for x in 0..buffer.area.width {
                text.push_str(buffer[(x, y)].symbol());
            }
            text.push('\n');
        }
        text
    }
}

async fn recv(peer: &mut LoopbackPeer) -> OutboundEvent {
    tokio::time::timeout(STEP, peer.recv())
        .await
        .expect("timed out waiting for an emit")
        .expect("connection closed")
}

#[tokio::test]
async fn typed_message_is_sent_and_rendered_as_own() {
    let mut h = Harness::new("u2").await;
    let mut peer = h.next_peer().await;
    assert!(matches!(recv(&mut peer).await, OutboundEvent::JoinChat(_)));
    h.settle("connected and resolved", |app| {
        app.can_send() && app.header() == "Bo Lin"
    })
    .await;

    h.type_line("hello Bo").await;
    let OutboundEvent::SendMessage(sent) = recv(&mut peer).await else {
        panic!("expected sendMessage");
    };
    assert_eq!(sent.text, "hello Bo");
    assert!(h.app.input.is_empty());

    peer.deliver(InboundEvent::ReceiveMessage(ReceiveMessage {
        first_name: Some("Bo".into()),
        last_name: Some("Lin".into()),
        text: "hi Asha".into(),
        timestamp: None,
        sender_id: "u2".into(),
        client_message_id: None,
    }));
    h.settle("two messages", |app| app.messages.len() == 2).await;

    assert!(h.app.messages[0].is_own);
    assert_eq!(h.app.messages[0].sender, SELF_LABEL);
    assert_eq!(h.app.messages[1].sender, "Bo Lin");

    let screen = h.render();
    assert!(screen.contains("Bo Lin"), "{screen}");
    assert!(screen.contains("hello Bo"), "{screen}");
    assert!(screen.contains("hi Asha"), "{screen}");
    h.view.unmount().await;
}

#[tokio::test]
async fn open_command_switches_conversation() {
    let mut h = Harness::new("u2").await;
    let first = h.next_peer().await;
    h.settle("connected", App::can_send).await;

    h.type_line("/open u3").await;
    assert!(first.is_closed());
    assert_eq!(h.app.target, Some(ParticipantId::new("u3")));
    assert!(h.app.messages.is_empty());

    let mut second = h.next_peer().await;
    let OutboundEvent::JoinChat(join) = recv(&mut second).await else {
        panic!("expected joinChat");
    };
    assert_eq!(join.target_user_id, "u3");
    h.view.unmount().await;
}

#[tokio::test]
async fn offline_status_shows_and_ctrl_r_recovers() {
    let mut h = Harness::new("u2").await;
    let peer = h.next_peer().await;
    h.connector.set_fallback(Outcome::Refuse);
    h.settle("connected", App::can_send).await;

    drop(peer);
    h.settle("offline", |app| app.link == Some(LinkStatus::Offline))
        .await;
    assert!(h.render().contains(&LinkStatus::Offline.to_string()));

    h.type_line("lost").await;
    assert!(h.app.last_notice().is_some_and(|n| n.starts_with("Not sent")));
    assert!(h.app.messages.is_empty());

    h.connector.set_fallback(Outcome::Accept);
    let action = h.press(KeyCode::Char('r'), KeyModifiers::CONTROL).unwrap();
    h.run(action).await;
    h.settle("reconnected", App::can_send).await;
    h.view.unmount().await;
}
